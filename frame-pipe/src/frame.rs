use std::fmt::{Debug, Display, Formatter};

use bytes::Bytes;
use tokio::time::Instant;

/// One still image of the rendering surface.
///
/// Deliberately not `Clone`: a frame is owned by exactly one pipeline stage at a
/// time and is consumed by the encoder write.
pub struct Frame {
    seq: u64,
    captured_at: Instant,
    data: Bytes,
}

impl Frame {
    pub fn new(seq: u64, captured_at: Instant, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            captured_at,
            data: data.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Frame {{ seq: {}, data: {} }}", self.seq, self.data.len())
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("captured_at", &self.captured_at)
            .field("len", &self.data.len())
            .finish()
    }
}
