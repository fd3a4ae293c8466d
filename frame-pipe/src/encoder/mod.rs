//! Encoder subprocess supervision.
//!
//! [`EncoderLauncher`] and [`EncoderHandle`] are the seam to the operating system;
//! [`EncoderProcess`] owns the single live handle and its lifecycle state on top of it.

use async_trait::async_trait;

use crate::{
    error::{LaunchError, WriteError},
    frame::Frame,
};

pub mod command;
pub mod monitor;
pub mod process;

pub use command::EncoderCommand;
pub use process::ProcessLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Crashed { code: Option<i32> },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    NotStarted,
    Starting,
    Running,
    Crashed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Crashed,
}

#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EncoderHandle>, LaunchError>;
}

/// One running encoder instance.
#[async_trait]
pub trait EncoderHandle: Send {
    /// Hands the frame to the process input without blocking.
    fn write(&mut self, frame: Frame) -> Result<(), WriteError>;

    /// Non-blocking liveness check.
    fn status(&mut self) -> ProcessStatus;

    /// Terminates the process, bounded by the grace period. Safe to call twice.
    async fn stop(&mut self);

    fn heartbeats(&self) -> u64 {
        0
    }
}

pub struct EncoderProcess {
    launcher: Box<dyn EncoderLauncher>,
    handle: Option<Box<dyn EncoderHandle>>,
    state: EncoderState,
    generation: u64,
}

impl EncoderProcess {
    pub fn new(launcher: Box<dyn EncoderLauncher>) -> Self {
        Self {
            launcher,
            handle: None,
            state: EncoderState::NotStarted,
            generation: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Number of process instances launched so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Launches a fresh process. A previous handle is stopped and discarded,
    /// never reused.
    pub async fn start(&mut self) -> Result<(), LaunchError> {
        if let Some(mut old) = self.handle.take() {
            old.stop().await;
        }
        self.state = EncoderState::Starting;

        match self.launcher.launch().await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.generation += 1;
                self.state = EncoderState::Running;
                log::info!("encoder: instance #{} running", self.generation);
                Ok(())
            }
            Err(e) => {
                self.state = EncoderState::Stopped;
                Err(e)
            }
        }
    }

    pub fn write(&mut self, frame: Frame) -> Result<(), WriteError> {
        if self.state != EncoderState::Running {
            return Err(WriteError::Closed);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(WriteError::Closed);
        };

        let result = handle.write(frame);
        if let Err(WriteError::Closed) = result {
            self.state = EncoderState::Crashed;
        }
        result
    }

    pub fn health_check(&mut self) -> Health {
        let Some(handle) = self.handle.as_mut() else {
            return Health::Crashed;
        };
        match handle.status() {
            ProcessStatus::Running if self.state == EncoderState::Running => Health::Healthy,
            ProcessStatus::Running => Health::Crashed,
            ProcessStatus::Crashed { code } => {
                if self.state == EncoderState::Running {
                    log::warn!(
                        "encoder: instance #{} exited (code {:?}, {} heartbeats)",
                        self.generation,
                        code,
                        handle.heartbeats()
                    );
                }
                self.state = EncoderState::Crashed;
                Health::Crashed
            }
            ProcessStatus::Stopped => {
                self.state = EncoderState::Stopped;
                Health::Crashed
            }
        }
    }

    pub async fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop().await;
            log::info!("encoder: instance #{} stopped", self.generation);
        }
        if self.state != EncoderState::NotStarted {
            self.state = EncoderState::Stopped;
        }
    }
}
