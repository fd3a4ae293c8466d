//! Scripted stand-ins for the renderer and encoder process.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    encoder::{EncoderHandle, EncoderLauncher, ProcessStatus},
    error::{CaptureError, LaunchError, WriteError},
    frame::Frame,
    source::FrameSource,
};

pub fn frame(seq: u64) -> Frame {
    Frame::new(seq, Instant::now(), vec![0xFF, 0xD8, seq as u8, 0xFF, 0xD9])
}

type DelayFn = Box<dyn Fn(u64) -> Duration + Send>;
type FailFn = Box<dyn Fn(u64) -> Option<CaptureError> + Send>;

#[derive(Debug, Default)]
pub struct SourceProbe {
    captures: Mutex<Vec<Instant>>,
    in_flight: AtomicBool,
    overlapped: AtomicBool,
    connects: AtomicU32,
    closes: AtomicU32,
}

impl SourceProbe {
    /// Start instants of every capture call.
    pub fn captures(&self) -> Vec<Instant> {
        self.captures.lock().unwrap().clone()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a SourceProbe);

impl<'a> InFlight<'a> {
    fn enter(probe: &'a SourceProbe) -> Self {
        if probe.in_flight.swap(true, Ordering::SeqCst) {
            probe.overlapped.store(true, Ordering::SeqCst);
        }
        Self(probe)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Frame source whose capture latency and failures are functions of the call
/// number (1-based).
pub struct FakeSource {
    probe: Arc<SourceProbe>,
    delay: DelayFn,
    failures: FailFn,
    refuse_connect: bool,
    calls: u64,
    seq: u64,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(SourceProbe::default()),
            delay: Box::new(|_| Duration::ZERO),
            failures: Box::new(|_| None),
            refuse_connect: false,
            calls: 0,
            seq: 0,
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(u64) -> Duration + Send + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn failing_with(
        mut self,
        failures: impl Fn(u64) -> Option<CaptureError> + Send + 'static,
    ) -> Self {
        self.failures = Box::new(failures);
        self
    }

    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn connect(&mut self) -> Result<(), CaptureError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect {
            return Err(CaptureError::RendererUnavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        let _guard = InFlight::enter(&self.probe);
        let started = Instant::now();
        self.probe.captures.lock().unwrap().push(started);
        self.calls += 1;

        let delay = (self.delay)(self.calls);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = (self.failures)(self.calls) {
            return Err(err);
        }
        self.seq += 1;
        Ok(Frame::new(self.seq, started, vec![0xFF, 0xD8, 0xFF, 0xD9]))
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Behaviour of one fake encoder instance. Write numbers are 1-based per instance.
#[derive(Debug, Clone, Default)]
pub struct HandleScript {
    /// This write and every later one fails with Closed.
    pub closed_at_write: Option<u32>,
    pub busy_writes: Vec<u32>,
    pub io_failure_writes: Vec<u32>,
    /// Reported as exited (code 1) once this many writes were accepted.
    pub exit_after_writes: Option<u32>,
}

#[derive(Debug, Default)]
pub struct LauncherProbe {
    launches: AtomicU32,
    stops: AtomicU32,
    generation: AtomicU64,
    delivered: Mutex<Vec<(u64, u64)>>,
    launched_at: Mutex<Vec<Instant>>,
}

impl LauncherProbe {
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// (instance number, frame seq) of every accepted write.
    pub fn delivered(&self) -> Vec<(u64, u64)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn launched_at(&self) -> Vec<Instant> {
        self.launched_at.lock().unwrap().clone()
    }
}

/// Plays back `plans` in order, then keeps launching healthy instances.
pub struct FakeLauncher {
    plans: Mutex<VecDeque<Result<HandleScript, LaunchError>>>,
    probe: Arc<LauncherProbe>,
}

impl FakeLauncher {
    pub fn new(plans: Vec<Result<HandleScript, LaunchError>>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            probe: Arc::new(LauncherProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<LauncherProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn EncoderHandle>, LaunchError> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        self.probe.launched_at.lock().unwrap().push(Instant::now());
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HandleScript::default()));
        let script = plan?;
        let generation = self.probe.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeHandle {
            script,
            generation,
            writes: 0,
            accepted: 0,
            closed: false,
            stopped: false,
            probe: Arc::clone(&self.probe),
        }))
    }
}

struct FakeHandle {
    script: HandleScript,
    generation: u64,
    writes: u32,
    accepted: u32,
    closed: bool,
    stopped: bool,
    probe: Arc<LauncherProbe>,
}

#[async_trait]
impl EncoderHandle for FakeHandle {
    fn write(&mut self, frame: Frame) -> Result<(), WriteError> {
        self.writes += 1;
        if self.stopped || self.closed || self.script.closed_at_write == Some(self.writes) {
            self.closed = true;
            return Err(WriteError::Closed);
        }
        if self.script.busy_writes.contains(&self.writes) {
            return Err(WriteError::BufferFull);
        }
        if self.script.io_failure_writes.contains(&self.writes) {
            return Err(WriteError::IoFailure("short write".into()));
        }
        self.accepted += 1;
        self.probe
            .delivered
            .lock()
            .unwrap()
            .push((self.generation, frame.seq()));
        Ok(())
    }

    fn status(&mut self) -> ProcessStatus {
        if self.stopped {
            return ProcessStatus::Stopped;
        }
        let exited = self
            .script
            .exit_after_writes
            .is_some_and(|n| self.accepted >= n);
        if self.closed || exited {
            ProcessStatus::Crashed { code: Some(1) }
        } else {
            ProcessStatus::Running
        }
    }

    async fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
