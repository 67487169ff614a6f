//! Frame sink boundary: the external collaborator consuming rendered frames.

use crate::{
    error::OsdResult,
    raster::{PixelFormat, RenderedFrame},
};

/// Configuration handed to a [`FrameSink`] before any frames are pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Output frames-per-second.
    pub fps: f64,
    /// Pixel layout of every pushed frame.
    pub format: PixelFormat,
    /// Total number of frames that will be pushed, for progress reporting.
    pub total_frames: u64,
}

/// Sink contract for consuming rendered frames in timeline order.
///
/// `push_frame` is called in strictly increasing tick order; a slow sink
/// blocks the producer, which is the pipeline's only backpressure mechanism.
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> OsdResult<()>;
    /// Push one frame in strictly increasing tick order.
    fn push_frame(&mut self, tick: u64, frame: &RenderedFrame) -> OsdResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> OsdResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(u64, RenderedFrame)>,
}

impl InMemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg.clone()
    }

    /// Borrow the captured frames.
    pub fn frames(&self) -> &[(u64, RenderedFrame)] {
        &self.frames
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> OsdResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, tick: u64, frame: &RenderedFrame) -> OsdResult<()> {
        self.frames.push((tick, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> OsdResult<()> {
        Ok(())
    }
}
