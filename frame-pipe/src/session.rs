//! Session lifecycle: launch, stream, recover from encoder loss, terminate.
//!
//! ```text
//! Idle ──start──► Launching ──ok──► Streaming ◄──restarted── Degraded
//!                    │                  │  └──encoder lost──►  │
//!                    ▼                  ▼                      ▼
//!               Terminated ◄────── stop / renderer lost / budget exhausted
//! ```

use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::PipelineConfig,
    encoder::{EncoderLauncher, EncoderProcess},
    pacer::{FramePacer, PacerExit},
    source::FrameSource,
    stats::PipelineStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Stopped,
    LaunchFailed,
    RestartBudgetExhausted,
    RendererLost,
    /// The session task panicked.
    Crashed,
}

impl TerminationReason {
    /// Anything but an operator stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TerminationReason::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Launching,
    Streaming,
    Degraded,
    Terminated(TerminationReason),
}

impl SessionState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionState::Terminated(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Terminated(reason) => write!(f, "Terminated({:?})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Clone)]
struct StateTracker {
    state: Arc<watch::Sender<SessionState>>,
    transitions: broadcast::Sender<SessionTransition>,
}

impl StateTracker {
    fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (transitions, _) = broadcast::channel(64);
        Self {
            state: Arc::new(state),
            transitions,
        }
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Terminated is absorbing; setting the current state again is a no-op.
    fn set(&self, to: SessionState) {
        let mut from = None;
        self.state.send_if_modified(|current| {
            if current.is_terminated() || *current == to {
                return false;
            }
            from = Some(*current);
            *current = to;
            true
        });

        if let Some(from) = from {
            log::info!("session: {} -> {}", from, to);
            let _ = self.transitions.send(SessionTransition { from, to });
        }
    }
}

/// Owns one source and one encoder for its whole life.
///
/// Build it, [`start`](Self::start) it once, and [`stop`](Self::stop) it any
/// number of times. The work runs on its own task; observers use
/// [`subscribe`](Self::subscribe), [`transitions`](Self::transitions) and
/// [`stats`](Self::stats).
pub struct StreamSession {
    config: PipelineConfig,
    parts: Option<(Box<dyn FrameSource>, Box<dyn EncoderLauncher>)>,
    tracker: StateTracker,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<TerminationReason>>,
    reason: Option<TerminationReason>,
}

impl StreamSession {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        launcher: Box<dyn EncoderLauncher>,
    ) -> Self {
        Self {
            config,
            parts: Some((source, launcher)),
            tracker: StateTracker::new(),
            stats: Arc::new(PipelineStats::default()),
            cancel: CancellationToken::new(),
            task: None,
            reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tracker.state.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<SessionTransition> {
        self.tracker.transitions.subscribe()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        match self.tracker.current() {
            SessionState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.tracker.current().is_terminated() {
            anyhow::bail!("session already terminated");
        }
        let Some((source, launcher)) = self.parts.take() else {
            anyhow::bail!("session already started");
        };

        self.tracker.set(SessionState::Launching);
        let runner = Runner {
            pacer: FramePacer::new(&self.config, Arc::clone(&self.stats)),
            config: self.config.clone(),
            source,
            encoder: EncoderProcess::new(launcher),
            tracker: self.tracker.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.child_token(),
        };
        self.task = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    /// Stops the session and waits until everything is released. Returns the
    /// termination reason, which is `Stopped` unless the session had already
    /// terminated on its own.
    pub async fn stop(&mut self) -> TerminationReason {
        if let Some(reason) = self.reason {
            return reason;
        }
        self.cancel.cancel();
        self.finish().await
    }

    /// Resolves once the session has terminated on its own or been stopped.
    pub async fn wait(&mut self) -> TerminationReason {
        if let Some(reason) = self.reason {
            return reason;
        }
        self.finish().await
    }

    async fn finish(&mut self) -> TerminationReason {
        let reason = match self.task.take() {
            Some(task) => match task.await {
                Ok(reason) => reason,
                Err(e) => {
                    log::error!("session: task failed: {}", e);
                    TerminationReason::Crashed
                }
            },
            None => {
                // never started: nothing was acquired
                self.parts = None;
                TerminationReason::Stopped
            }
        };
        self.tracker.set(SessionState::Terminated(reason));
        self.reason = Some(reason);
        reason
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Runner {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    encoder: EncoderProcess,
    pacer: FramePacer,
    tracker: StateTracker,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(mut self) -> TerminationReason {
        let reason = self.drive().await;
        match reason {
            TerminationReason::Stopped => log::info!("session: stopped"),
            reason => log::error!("session: terminated: {:?}", reason),
        }

        // the runner is consumed here, so this happens once
        self.encoder.stop().await;
        self.source.close().await;
        log::info!("session: released, {:?}", self.stats.snapshot());

        self.tracker.set(SessionState::Terminated(reason));
        reason
    }

    async fn drive(&mut self) -> TerminationReason {
        if let Err(reason) = self.launch().await {
            return reason;
        }

        let mut restarts = 0u32;
        loop {
            self.tracker.set(SessionState::Streaming);
            let streaming_since = Instant::now();

            let exit = self
                .pacer
                .run(self.source.as_mut(), &mut self.encoder, &self.cancel)
                .await;
            match exit {
                PacerExit::Cancelled => return TerminationReason::Stopped,
                PacerExit::RendererLost => return TerminationReason::RendererLost,
                PacerExit::EncoderLost => {}
            }

            if streaming_since.elapsed() >= self.config.stable_period() {
                restarts = 0;
            }
            self.tracker.set(SessionState::Degraded);
            if let Err(reason) = self.restart(&mut restarts).await {
                return reason;
            }
        }
    }

    async fn launch(&mut self) -> Result<(), TerminationReason> {
        let policy = self.config.launch_retry.clone();
        let attempts = policy.attempts.max(1);

        let mut failed = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TerminationReason::Stopped),
                result = self.source.connect() => result,
            };
            match result {
                Ok(()) => break,
                Err(e) => {
                    failed += 1;
                    log::warn!("session: source connect failed ({}/{}): {}", failed, attempts, e);
                    if failed >= attempts {
                        return Err(TerminationReason::LaunchFailed);
                    }
                    pause(&self.cancel, policy.backoff(failed)).await?;
                }
            }
        }

        let mut failed = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TerminationReason::Stopped),
                result = self.encoder.start() => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    failed += 1;
                    log::warn!("session: encoder launch failed ({}/{}): {}", failed, attempts, e);
                    if failed >= attempts {
                        return Err(TerminationReason::LaunchFailed);
                    }
                    pause(&self.cancel, policy.backoff(failed)).await?;
                }
            }
        }
    }

    /// Replaces the lost encoder. `used` counts attempts since the stream was
    /// last stable; the first attempt of a streak runs immediately.
    async fn restart(&mut self, used: &mut u32) -> Result<(), TerminationReason> {
        self.encoder.stop().await;
        let policy = self.config.restart_retry.clone();

        loop {
            if *used >= policy.attempts {
                log::error!("session: encoder restart budget of {} exhausted", policy.attempts);
                return Err(TerminationReason::RestartBudgetExhausted);
            }
            if *used > 0 {
                pause(&self.cancel, policy.backoff(*used)).await?;
            }
            *used += 1;
            self.stats.record_restart();
            log::info!("session: restarting encoder ({}/{})", used, policy.attempts);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TerminationReason::Stopped),
                result = self.encoder.start() => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("session: encoder restart failed: {}", e),
            }
        }
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), TerminationReason> {
    log::debug!("session: retrying in {:?}", delay);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TerminationReason::Stopped),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
