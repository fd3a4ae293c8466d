use std::{
    io,
    process::Stdio,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EncoderConfig,
    encoder::{
        EncoderCommand, EncoderHandle, EncoderLauncher, ProcessStatus,
        monitor::{EncoderStats, spawn_monitor},
    },
    error::{LaunchError, WriteError},
    frame::Frame,
};

const MONITOR_DRAIN: Duration = Duration::from_secs(1);

/// Spawns the encoder as an OS process.
pub struct ProcessLauncher {
    command: EncoderCommand,
    probe: Duration,
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new(command: EncoderCommand, probe: Duration, grace: Duration) -> Self {
        Self {
            command,
            probe,
            grace,
        }
    }

    pub fn from_config(command: EncoderCommand, config: &EncoderConfig) -> Self {
        Self::new(command, config.launch_probe(), config.stop_grace())
    }
}

#[async_trait]
impl EncoderLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Box<dyn EncoderHandle>, LaunchError> {
        let program = self.command.program();
        log::info!("encoder: spawning {} {:?}", program, self.command.args());

        let mut child = Command::new(program)
            .args(self.command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => LaunchError::NotFound(program.to_string()),
                _ => LaunchError::Spawn(e),
            })?;

        let label = format!("encoder[{}]", child.id().unwrap_or_default());
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LaunchError::Spawn(io::Error::other("stdin not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::Spawn(io::Error::other("stderr not captured")))?;

        let stats = Arc::new(EncoderStats::default());
        let monitor = spawn_monitor(stderr, Arc::clone(&stats), label.clone());

        match tokio::time::timeout(self.probe, child.wait()).await {
            Ok(Ok(status)) => {
                // let the monitor log whatever the process said before dying
                let _ = tokio::time::timeout(MONITOR_DRAIN, monitor).await;
                log::error!("{}: exited during launch with {}", label, status);
                return Err(LaunchError::ImmediateExit {
                    code: status.code(),
                });
            }
            Ok(Err(e)) => return Err(LaunchError::Spawn(e)),
            Err(_) => {}
        }

        Ok(Box::new(ProcessHandle::new(
            child, stdin, stats, monitor, label, self.grace,
        )))
    }
}

type PendingFrame = (Frame, OwnedSemaphorePermit);

/// Why the stdin pump stopped.
#[derive(Debug)]
enum PumpFailure {
    Closed,
    Io(String),
}

pub struct ProcessHandle {
    child: Child,
    label: String,
    grace: Duration,
    stats: Arc<EncoderStats>,
    monitor: Option<JoinHandle<()>>,
    // a single permit: at most one frame between the pacer and the pipe
    slot: Arc<Semaphore>,
    frames: mpsc::Sender<PendingFrame>,
    pump: Option<JoinHandle<()>>,
    pump_failure: Arc<Mutex<Option<PumpFailure>>>,
    pump_done: Arc<AtomicBool>,
    cancel: CancellationToken,
    stopped: bool,
}

impl ProcessHandle {
    fn new(
        child: Child,
        stdin: ChildStdin,
        stats: Arc<EncoderStats>,
        monitor: JoinHandle<()>,
        label: String,
        grace: Duration,
    ) -> Self {
        let (frames, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let pump_failure = Arc::new(Mutex::new(None));
        let pump_done = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump_frames(
            stdin,
            rx,
            cancel.clone(),
            Arc::clone(&pump_failure),
            Arc::clone(&pump_done),
            label.clone(),
        ));

        Self {
            child,
            label,
            grace,
            stats,
            monitor: Some(monitor),
            slot: Arc::new(Semaphore::new(1)),
            frames,
            pump: Some(pump),
            pump_failure,
            pump_done,
            cancel,
            stopped: false,
        }
    }

    fn pump_error(&self) -> WriteError {
        let failure = self.pump_failure.lock().ok().and_then(|mut f| f.take());
        match failure {
            // reported once, later writes see Closed
            Some(PumpFailure::Io(msg)) => WriteError::IoFailure(msg),
            Some(PumpFailure::Closed) | None => WriteError::Closed,
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: plain signal delivery to our own child
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                log::debug!("{}: SIGTERM failed: {}", self.label, io::Error::last_os_error());
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}
}

#[async_trait]
impl EncoderHandle for ProcessHandle {
    fn write(&mut self, frame: Frame) -> Result<(), WriteError> {
        if self.stopped {
            return Err(WriteError::Closed);
        }
        if self.pump_done.load(Ordering::Acquire) {
            return Err(self.pump_error());
        }

        let permit = match Arc::clone(&self.slot).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(WriteError::BufferFull),
            Err(TryAcquireError::Closed) => return Err(WriteError::Closed),
        };
        self.frames.try_send((frame, permit)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WriteError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => self.pump_error(),
        })
    }

    fn status(&mut self) -> ProcessStatus {
        if self.stopped {
            return ProcessStatus::Stopped;
        }
        match self.child.try_wait() {
            Ok(None) => ProcessStatus::Running,
            Ok(Some(status)) => ProcessStatus::Crashed {
                code: status.code(),
            },
            Err(e) => {
                log::warn!("{}: status check failed: {}", self.label, e);
                ProcessStatus::Crashed { code: None }
            }
        }
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.slot.close();

        // abandon any in-flight write; dropping stdin gives the encoder EOF
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        if let Ok(None) = self.child.try_wait() {
            self.terminate();
            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(Ok(status)) => log::info!("{}: exited with {}", self.label, status),
                Ok(Err(e)) => log::warn!("{}: wait failed: {}", self.label, e),
                Err(_) => {
                    log::warn!("{}: still running after {:?}, killing", self.label, self.grace);
                    if let Err(e) = self.child.kill().await {
                        log::error!("{}: kill failed: {}", self.label, e);
                    }
                }
            }
        }

        if let Some(monitor) = self.monitor.take() {
            if tokio::time::timeout(MONITOR_DRAIN, monitor).await.is_err() {
                log::debug!("{}: diagnostic stream still open after exit", self.label);
            }
        }
    }

    fn heartbeats(&self) -> u64 {
        self.stats.heartbeats()
    }
}

async fn pump_frames(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<PendingFrame>,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<PumpFailure>>>,
    done: Arc<AtomicBool>,
    label: String,
) {
    let mut in_flight = None;
    loop {
        let (frame, permit) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        in_flight = Some(permit);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = stdin.write_all(frame.data()) => result,
        };

        if let Err(e) = result {
            let reason = if e.kind() == io::ErrorKind::BrokenPipe {
                log::warn!("{}: stdin closed by encoder", label);
                PumpFailure::Closed
            } else {
                log::error!("{}: stdin write failed: {}", label, e);
                PumpFailure::Io(e.to_string())
            };
            if let Ok(mut failure) = failure.lock() {
                *failure = Some(reason);
            }
            break;
        }
        in_flight = None;
        log::trace!("{}: wrote frame {} ({} bytes)", label, frame.seq(), frame.len());
    }

    done.store(true, Ordering::Release);
    rx.close();
    // the slot frees up only once writers can see the pump is gone
    drop(in_flight);
}
