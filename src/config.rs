use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::Context;
use frame_pipe::{PipelineConfig, RendererConfig};
use serde::{Deserialize, Serialize};

/// Names the JSON config file; unset means built-in defaults.
pub const CONFIG_ENV: &str = "PAGE_STREAMER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: String,
    pub content_dir: PathBuf,
    pub public_dir: PathBuf,
    /// The page the renderer shows; normally served by ourselves.
    pub page_url: String,
    pub renderer: RendererConfig,
    pub pipeline: PipelineConfig,
    pub media_server: MediaServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3200".to_string(),
            content_dir: PathBuf::from("./content"),
            public_dir: PathBuf::from("./public"),
            page_url: "http://localhost:3200/preview.html".to_string(),
            renderer: RendererConfig::default(),
            pipeline: PipelineConfig::default(),
            media_server: MediaServerConfig::default(),
        }
    }
}

/// Embedded RTSP server, only used with the `zlm` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    pub rtsp_port: u16,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self { rtsp_port: 8554 }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.pipeline.validate()?;
        Ok(config)
    }

    fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| {
        AppConfig::load().unwrap_or_else(|e| {
            eprintln!("Error loading configuration: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
