use crate::{config::EncoderConfig, renderer::ImageFormat};

/// Program and argument list of the encoder subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    program: String,
    args: Vec<String>,
}

impl EncoderCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Still images on stdin at `fps`, encoded and published to the destination.
    pub fn from_config(config: &EncoderConfig, fps: u32, format: ImageFormat) -> Self {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            format.pipe_codec().to_string(),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-vcodec".to_string(),
            config.video_codec.clone(),
            "-preset".to_string(),
            config.preset.clone(),
        ];

        if let Some(tune) = &config.tune {
            args.push("-tune".to_string());
            args.push(tune.clone());
        }

        args.extend([
            "-pix_fmt".to_string(),
            config.pixel_format.clone(),
        ]);
        args.extend(config.extra_args.iter().cloned());
        args.extend([
            "-f".to_string(),
            config.output_format.clone(),
            config.destination.clone(),
        ]);

        Self::new(config.program.clone(), args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}
