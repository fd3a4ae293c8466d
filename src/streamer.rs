use frame_pipe::{
    RendererKind, StreamSession,
    encoder::{EncoderCommand, ProcessLauncher},
    renderer::{ChromeRenderer, ImageFormat, PatternRenderer},
    source::{FrameSource, RendererSource},
};

use crate::config::AppConfig;

/// Wires the configured renderer and the ffmpeg launcher into a session.
pub(crate) fn build_session(config: &AppConfig) -> anyhow::Result<StreamSession> {
    let pipeline = config.pipeline.clone();
    pipeline.validate()?;

    let source: Box<dyn FrameSource> = match config.renderer.kind {
        RendererKind::Chrome => Box::new(RendererSource::new(
            ChromeRenderer::new(config.renderer.clone(), pipeline.width, pipeline.height),
            config.page_url.as_str(),
            &pipeline,
        )),
        RendererKind::Pattern => {
            anyhow::ensure!(
                pipeline.format == ImageFormat::Jpeg,
                "the pattern renderer only produces jpeg"
            );
            Box::new(RendererSource::new(
                PatternRenderer::new(pipeline.width, pipeline.height),
                config.page_url.as_str(),
                &pipeline,
            ))
        }
    };

    let command = EncoderCommand::from_config(&pipeline.encoder, pipeline.fps, pipeline.format);
    log::info!(
        "streamer: {}x{} @ {} fps via {:?} renderer to {}",
        pipeline.width,
        pipeline.height,
        pipeline.fps,
        config.renderer.kind,
        pipeline.encoder.destination
    );
    let launcher = ProcessLauncher::from_config(command, &pipeline.encoder);

    Ok(StreamSession::new(pipeline, source, Box::new(launcher)))
}
