use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    config::PipelineConfig,
    error::CaptureError,
    frame::Frame,
    renderer::{ImageFormat, Renderer},
};

/// Produces one frame per call and keeps nothing between calls.
#[async_trait]
pub trait FrameSource: Send {
    async fn connect(&mut self) -> Result<(), CaptureError>;

    async fn capture(&mut self) -> Result<Frame, CaptureError>;

    async fn close(&mut self);
}

/// Frame source backed by a [`Renderer`] showing a fixed page.
pub struct RendererSource<R> {
    renderer: R,
    url: String,
    format: ImageFormat,
    quality: u8,
    timeout: Duration,
    last_seq: u64,
}

impl<R: Renderer> RendererSource<R> {
    pub fn new(renderer: R, url: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            renderer,
            url: url.into(),
            format: config.format,
            quality: config.quality,
            timeout: config.capture_timeout(),
            last_seq: 0,
        }
    }
}

#[async_trait]
impl<R: Renderer> FrameSource for RendererSource<R> {
    async fn connect(&mut self) -> Result<(), CaptureError> {
        log::info!("source: loading {}", self.url);
        self.renderer.connect(&self.url).await?;
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        let started = Instant::now();
        let data = tokio::time::timeout(
            self.timeout,
            self.renderer.capture(self.format, self.quality),
        )
        .await
        .map_err(|_| CaptureError::Timeout(self.timeout))??;

        if data.is_empty() {
            return Err(CaptureError::Unknown("renderer returned an empty image".into()));
        }
        self.last_seq += 1;
        Ok(Frame::new(self.last_seq, started, data))
    }

    async fn close(&mut self) {
        self.renderer.close().await;
    }
}
