use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::renderer::ImageFormat;

const MAX_DIMENSION: u32 = 8192;

/// Everything the pipeline needs, fixed at session construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    // 0-100, only meaningful for jpeg
    pub quality: u8,
    // None = one pacing interval
    pub capture_timeout_ms: Option<u64>,
    /// Consecutive Timeout/RendererUnavailable captures tolerated before the
    /// renderer is considered lost.
    pub capture_failure_budget: u32,
    /// Consecutive failed captures of any kind tolerated before the renderer
    /// is considered lost.
    pub capture_error_ceiling: u32,
    /// A streaming period at least this long resets the restart budget.
    pub stable_period_ms: u64,
    pub launch_retry: RetryPolicy,
    pub restart_retry: RetryPolicy,
    pub encoder: EncoderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            width: 1280,
            height: 720,
            format: ImageFormat::Jpeg,
            quality: 80,
            capture_timeout_ms: None,
            capture_failure_budget: 75,
            capture_error_ceiling: 250,
            stable_period_ms: 10_000,
            launch_retry: RetryPolicy::default(),
            restart_retry: RetryPolicy::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Target time between capture attempts: 1000 / fps milliseconds.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn capture_timeout(&self) -> Duration {
        self.capture_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.interval())
    }

    pub fn stable_period(&self) -> Duration {
        Duration::from_millis(self.stable_period_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.fps > 0 && self.fps <= 120, "fps must be within 1..=120, got {}", self.fps);
        anyhow::ensure!(
            (1..=MAX_DIMENSION).contains(&self.width) && (1..=MAX_DIMENSION).contains(&self.height),
            "resolution must be within 1..={} per side, got {}x{}",
            MAX_DIMENSION,
            self.width,
            self.height
        );
        anyhow::ensure!(self.quality <= 100, "quality must be within 0..=100, got {}", self.quality);
        anyhow::ensure!(
            self.capture_timeout_ms != Some(0),
            "capture timeout must be positive"
        );
        anyhow::ensure!(
            !self.encoder.program.is_empty() && !self.encoder.destination.is_empty(),
            "encoder program and destination are required"
        );
        Ok(())
    }
}

/// Encoder subprocess profile. The input side (image2pipe on stdin at the
/// pipeline frame rate) is fixed; the output side is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    pub destination: String,
    // "rtsp", "flv", ...
    pub output_format: String,
    pub video_codec: String,
    pub preset: String,
    pub tune: Option<String>,
    pub pixel_format: String,
    /// Appended right before the destination.
    pub extra_args: Vec<String>,
    /// A process exiting within this window fails the launch.
    pub launch_probe_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            destination: "rtsp://127.0.0.1:8554/live2".to_string(),
            output_format: "rtsp".to_string(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            tune: Some("zerolatency".to_string()),
            pixel_format: "yuv420p".to_string(),
            extra_args: Vec::new(),
            launch_probe_ms: 500,
            stop_grace_ms: 5_000,
        }
    }
}

impl EncoderConfig {
    pub fn launch_probe(&self) -> Duration {
        Duration::from_millis(self.launch_probe_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based): initial, 2x, 4x, ... capped.
    pub fn backoff(&self, failed: u32) -> Duration {
        let shift = failed.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Headless Chrome/Chromium over the DevTools protocol
    Chrome,
    /// Synthetic moving test pattern, no browser required
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub kind: RendererKind,
    /// Browser executable; None = search PATH for the usual chromium names
    pub program: Option<String>,
    pub extra_args: Vec<String>,
    pub navigation_timeout_ms: u64,
    /// HTTP readiness probes of the page URL before navigating
    pub ready_attempts: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            kind: RendererKind::Chrome,
            program: None,
            extra_args: Vec::new(),
            navigation_timeout_ms: 30_000,
            ready_attempts: 20,
        }
    }
}

impl RendererConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}
