use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PipelineConfig,
    encoder::{EncoderProcess, Health},
    error::{CaptureError, WriteError},
    source::FrameSource,
    stats::PipelineStats,
};

/// Absolute tick schedule: tick `n` is due at `start + n * interval`.
///
/// Deadlines are never derived from the previous wake-up, so capture jitter
/// cannot accumulate into drift.
#[derive(Debug, Clone)]
pub struct PacingClock {
    start: Instant,
    interval: Duration,
    next_tick: u64,
}

impl PacingClock {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            next_tick: 0,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self, tick: u64) -> Instant {
        let nanos = self.interval.as_nanos().saturating_mul(tick as u128);
        self.start + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    pub fn next_deadline(&self) -> Instant {
        self.deadline(self.next_tick)
    }

    /// Consumes the pending tick and returns its number.
    pub fn fire(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Skips every pending tick whose deadline is already behind `now` and
    /// returns how many were skipped.
    pub fn catch_up(&mut self, now: Instant) -> u64 {
        let next = self.next_deadline();
        if now <= next {
            return 0;
        }
        let late = (now - next).as_nanos();
        let interval = self.interval.as_nanos().max(1);
        let skipped = u64::try_from(late.div_ceil(interval)).unwrap_or(u64::MAX);
        self.next_tick = self.next_tick.saturating_add(skipped);
        skipped
    }
}

/// Why [`FramePacer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerExit {
    Cancelled,
    EncoderLost,
    RendererLost,
}

pub struct FramePacer {
    interval: Duration,
    capture_timeout: Duration,
    failure_budget: u32,
    error_ceiling: u32,
    stats: Arc<PipelineStats>,
}

impl FramePacer {
    pub fn new(config: &PipelineConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            interval: config.interval(),
            capture_timeout: config.capture_timeout(),
            failure_budget: config.capture_failure_budget,
            error_ceiling: config.capture_error_ceiling,
            stats,
        }
    }

    /// Runs one capture+delivery cycle per tick until cancelled or until the
    /// encoder or the renderer is lost. The clock starts fresh on every call.
    pub async fn run(
        &self,
        source: &mut dyn FrameSource,
        encoder: &mut EncoderProcess,
        cancel: &CancellationToken,
    ) -> PacerExit {
        let mut clock = PacingClock::new(Instant::now(), self.interval);
        let mut consecutive_failures = 0u32;
        let mut consecutive_errors = 0u32;
        log::debug!("pacer: started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PacerExit::Cancelled,
                _ = tokio::time::sleep_until(clock.next_deadline()) => {}
            }
            let tick = clock.fire();
            self.stats.record_tick();

            let captured = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PacerExit::Cancelled,
                captured = tokio::time::timeout(self.capture_timeout, source.capture()) => {
                    captured.unwrap_or(Err(CaptureError::Timeout(self.capture_timeout)))
                }
            };

            match captured {
                Ok(frame) => {
                    consecutive_failures = 0;
                    consecutive_errors = 0;
                    self.stats.record_captured();
                    let seq = frame.seq();
                    match encoder.write(frame) {
                        Ok(()) => self.stats.record_delivered(),
                        Err(WriteError::BufferFull) => {
                            self.stats.record_dropped();
                            log::trace!("pacer: encoder busy, dropped frame {}", seq);
                        }
                        Err(WriteError::IoFailure(msg)) => {
                            self.stats.record_dropped();
                            log::warn!("pacer: dropped frame {}: {}", seq, msg);
                        }
                        Err(WriteError::Closed) => {
                            self.stats.record_dropped();
                            log::warn!("pacer: encoder input closed at frame {}", seq);
                            return PacerExit::EncoderLost;
                        }
                    }
                }
                Err(e) => {
                    self.stats.record_capture_error();
                    consecutive_errors += 1;
                    if e.is_renderer_fault() {
                        consecutive_failures += 1;
                    }
                    if consecutive_failures > self.failure_budget
                        || consecutive_errors > self.error_ceiling
                    {
                        log::error!(
                            "pacer: {} consecutive capture errors, last: {}",
                            consecutive_errors,
                            e
                        );
                        return PacerExit::RendererLost;
                    }
                    if consecutive_errors <= 1 {
                        log::warn!("pacer: tick {}: {}", tick, e);
                    } else {
                        log::debug!("pacer: tick {}: {}", tick, e);
                    }
                }
            }

            if encoder.health_check() == Health::Crashed {
                return PacerExit::EncoderLost;
            }

            let skipped = clock.catch_up(Instant::now());
            if skipped > 0 {
                self.stats.record_skipped(skipped);
                log::debug!("pacer: tick {} overran, skipped {} tick(s)", tick, skipped);
            }
        }
    }
}

#[cfg(test)]
#[path = "pacer_test.rs"]
mod pacer_test;
