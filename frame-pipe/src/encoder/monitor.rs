//! Encoder diagnostic stream (stderr) consumer.
//!
//! ffmpeg rewrites its progress line with `\r`, so lines are split on either
//! `\r` or `\n`. Progress lines (`frame=`) are heartbeats; everything else is logged.

use std::{
    io,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::{io::AsyncRead, task::JoinHandle, time::Instant};
use tokio_util::codec::{Decoder, FramedRead};

pub const HEARTBEAT_MARKER: &str = "frame=";

const MAX_LINE: usize = 8 * 1024;
const PROGRESS_LOG_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct DiagnosticLineCodec;

impl Decoder for DiagnosticLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                if src.len() > MAX_LINE {
                    let chunk = src.split_to(src.len());
                    return Ok(Some(String::from_utf8_lossy(&chunk).trim().to_string()));
                }
                return Ok(None);
            };
            let chunk = src.split_to(pos + 1);
            let line = String::from_utf8_lossy(&chunk[..pos]).trim().to_string();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let chunk = src.split_to(src.len());
        let line = String::from_utf8_lossy(&chunk).trim().to_string();
        Ok((!line.is_empty()).then_some(line))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heartbeat,
    Error,
    Info,
}

pub fn classify(line: &str) -> LineKind {
    if line.contains(HEARTBEAT_MARKER) {
        return LineKind::Heartbeat;
    }
    let lower = line.to_ascii_lowercase();
    if ["error", "failed", "invalid", "could not", "broken pipe"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        LineKind::Error
    } else {
        LineKind::Info
    }
}

/// Liveness evidence gathered from the diagnostic stream.
#[derive(Debug, Default)]
pub struct EncoderStats {
    heartbeats: AtomicU64,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl EncoderStats {
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat.lock().ok().and_then(|g| *g)
    }

    fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_heartbeat.lock() {
            *last = Some(Instant::now());
        }
    }
}

/// Drains `reader` on its own task so a chatty encoder never stalls frame delivery.
pub fn spawn_monitor<R>(reader: R, stats: std::sync::Arc<EncoderStats>, label: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, DiagnosticLineCodec);
        let mut last_progress_log: Option<Instant> = None;

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("{}: diagnostic stream failed: {}", label, e);
                    break;
                }
            };
            match classify(&line) {
                LineKind::Heartbeat => {
                    stats.record_heartbeat();
                    let due = last_progress_log.is_none_or(|t| t.elapsed() >= PROGRESS_LOG_EVERY);
                    if due {
                        log::info!("{}: {}", label, line);
                        last_progress_log = Some(Instant::now());
                    } else {
                        log::trace!("{}: {}", label, line);
                    }
                }
                LineKind::Error => log::warn!("{}: {}", label, line),
                LineKind::Info => log::debug!("{}: {}", label, line),
            }
        }
        log::debug!("{}: diagnostic stream closed", label);
    })
}
