use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;
mod streamer;
#[cfg(feature = "zlm")]
mod zlm;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("frame_pipe", log::LevelFilter::Debug)
        .filter_module("page_streamer", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    if let Err(e) = std::fs::create_dir_all(&config.content_dir) {
        log::error!("Error creating {}: {}", config.content_dir.display(), e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();

    #[cfg(feature = "zlm")]
    {
        let cancel_clone = cancel.clone();
        zlm::start_zlm_server(config.media_server.rtsp_port, cancel_clone);
    }

    let mut session = streamer::build_session(config).unwrap_or_else(|e| {
        log::error!("Error building stream session: {:#}", e);
        std::process::exit(1);
    });

    let stream = api::StreamView {
        state: session.subscribe(),
        stats: session.stats(),
        destination: Arc::from(config.pipeline.encoder.destination.as_str()),
    };
    let cancel_clone = cancel.clone();
    api::start_api_server(config, stream, cancel_clone);

    if let Err(e) = session.start() {
        log::error!("Error starting stream session: {:#}", e);
        std::process::exit(1);
    }

    let mut state = session.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping...");
                cancel.cancel();
            },
            _ = state.wait_for(|s| s.is_terminated()) => {
                break;
            },
        }
    }

    let reason = session.stop().await;
    cancel.cancel();
    log::info!("Stream session ended: {:?}, {:?}", reason, session.stats().snapshot());

    std::process::exit(if reason.is_fatal() { 1 } else { 0 });
}
