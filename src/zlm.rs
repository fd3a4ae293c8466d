#![cfg(feature = "zlm")]

use rszlm::{event, init::EnvInitBuilder, server::rtsp_server_start};
use tokio_util::sync::CancellationToken;

/// Embedded RTSP server the encoder can publish to.
pub(crate) fn start_zlm_server(rtsp_port: u16, cancel: CancellationToken) {
    tokio::spawn(async move {
        let cancel_clone = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            EnvInitBuilder::default()
                .log_level(0)
                .log_mask(0)
                .thread_num(4)
                .build();

            rtsp_server_start(rtsp_port, false);
            log::info!("ZLM: rtsp server on port {}", rtsp_port);

            if let Ok(mut events) = event::EVENTS.write() {
                events.on_media_publish(|media| {
                    log::info!(
                        "ZLM: publish {}/{}",
                        media.url_info.app(),
                        media.url_info.stream()
                    );
                });
            }

            while !cancel_clone.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        });
        tokio::select! {
            _ = handle => {
                log::info!("ZLM: server finished");
            }
            _ = cancel.cancelled() => {
                log::info!("ZLM: server cancelled");
            }
        }
    });
}
