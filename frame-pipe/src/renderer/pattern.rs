use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::RendererError,
    renderer::{ImageFormat, Renderer},
};

const BAR_WIDTH: u32 = 48;
const BAR_STEP: u32 = 8;

/// Test-pattern surface: a bar sweeping across a gradient.
/// Lets the pipeline run end to end on machines without a browser.
pub struct PatternRenderer {
    width: u32,
    height: u32,
    frame_index: u32,
    connected: bool,
}

impl PatternRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
            connected: false,
        }
    }
}

fn render_rgb(width: u16, height: u16, frame_index: u32) -> Vec<u8> {
    let (w, h) = (u32::from(width), u32::from(height));
    let bar_x = frame_index.wrapping_mul(BAR_STEP) % w.max(1);
    let mut pixels = Vec::with_capacity(usize::from(width) * usize::from(height) * 3);
    for y in 0..h {
        for x in 0..w {
            if x >= bar_x && x < bar_x + BAR_WIDTH {
                pixels.extend_from_slice(&[255, 255, 255]);
            } else {
                let r = (x * 255 / w.max(1)) as u8;
                let g = (y * 255 / h.max(1)) as u8;
                pixels.extend_from_slice(&[r, g, 96]);
            }
        }
    }
    pixels
}

fn encode_frame(width: u16, height: u16, frame_index: u32, quality: u8) -> anyhow::Result<Vec<u8>> {
    let pixels = render_rgb(width, height, frame_index);
    let mut out = Vec::new();
    jpeg_encoder::Encoder::new(&mut out, quality.clamp(1, 100))
        .encode(&pixels, width, height, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| anyhow::anyhow!("jpeg encode failed: {}", e))?;
    Ok(out)
}

#[async_trait]
impl Renderer for PatternRenderer {
    async fn connect(&mut self, url: &str) -> Result<(), RendererError> {
        log::info!(
            "pattern: rendering {}x{} test pattern instead of {}",
            self.width,
            self.height,
            url
        );
        self.connected = true;
        Ok(())
    }

    async fn capture(&mut self, format: ImageFormat, quality: u8) -> Result<Bytes, RendererError> {
        if !self.connected {
            return Err(RendererError::Unavailable("pattern renderer not connected".into()));
        }
        if format != ImageFormat::Jpeg {
            return Err(anyhow::anyhow!("pattern renderer only produces jpeg").into());
        }
        let width = u16::try_from(self.width)
            .map_err(|_| anyhow::anyhow!("width {} too large for jpeg", self.width))?;
        let height = u16::try_from(self.height)
            .map_err(|_| anyhow::anyhow!("height {} too large for jpeg", self.height))?;

        let frame_index = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);

        // pixel work stays off the async workers
        let out = tokio::task::spawn_blocking(move || encode_frame(width, height, frame_index, quality))
            .await
            .map_err(|e| anyhow::anyhow!("pattern task failed: {}", e))??;
        Ok(Bytes::from(out))
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}
