use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RendererError;

pub mod cdp;
pub mod chrome;
pub mod pattern;

pub use chrome::ChromeRenderer;
pub use pattern::PatternRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    /// Decoder name the encoder uses to read a stream of these images.
    pub fn pipe_codec(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "mjpeg",
            ImageFormat::Png => "png",
        }
    }
}

/// A surface that can load a page and take still pictures of it.
#[async_trait]
pub trait Renderer: Send {
    async fn connect(&mut self, url: &str) -> Result<(), RendererError>;

    /// Must stay usable when a call is abandoned half way.
    async fn capture(&mut self, format: ImageFormat, quality: u8) -> Result<Bytes, RendererError>;

    async fn close(&mut self);
}
