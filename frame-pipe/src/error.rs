use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("renderer unavailable: {0}")]
    RendererUnavailable(String),
    #[error("capture failed: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Whether this failure counts toward the consecutive capture failure budget.
    pub fn is_renderer_fault(&self) -> bool {
        matches!(
            self,
            CaptureError::Timeout(_) | CaptureError::RendererUnavailable(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The previous frame is still being written; expected backpressure.
    #[error("encoder input is busy")]
    BufferFull,
    #[error("encoder input is closed")]
    Closed,
    #[error("encoder input failed: {0}")]
    IoFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("encoder executable not found: {0}")]
    NotFound(String),
    #[error("encoder exited immediately (code {code:?})")]
    ImmediateExit { code: Option<i32> },
    #[error("failed to spawn encoder: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<RendererError> for CaptureError {
    fn from(err: RendererError) -> Self {
        match err {
            RendererError::Unavailable(msg) => CaptureError::RendererUnavailable(msg),
            RendererError::Failed(e) => CaptureError::Unknown(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_fault_kinds() {
        assert!(CaptureError::Timeout(Duration::from_millis(40)).is_renderer_fault());
        assert!(CaptureError::RendererUnavailable("gone".into()).is_renderer_fault());
        assert!(!CaptureError::Unknown("bad data".into()).is_renderer_fault());
    }

    #[test]
    fn test_renderer_error_mapping() {
        let e: CaptureError = RendererError::Unavailable("socket closed".into()).into();
        assert!(matches!(e, CaptureError::RendererUnavailable(ref m) if m == "socket closed"));

        let e: CaptureError = RendererError::Failed(anyhow::anyhow!("no data")).into();
        assert!(matches!(e, CaptureError::Unknown(ref m) if m == "no data"));
    }
}
