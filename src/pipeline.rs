//! End-to-end overlay rendering: reconcile the capture timeline, rasterize it
//! at the output rate and stream every frame into a sink.

use crate::{
    atlas::TileAtlas,
    decode::Capture,
    error::OsdResult,
    raster::Rasterizer,
    reconcile::{effective_rate, reconcile},
    sink::{FrameSink, SinkConfig},
};

/// Options for [`render_overlay`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderOpts {
    /// Output video frame rate.
    pub output_fps: f64,
    /// Nominal telemetry sample rate, used to reconcile the missing
    /// time/index axis and to report the observed rate.
    pub nominal_rate: f64,
}

impl Default for RenderOpts {
    fn default() -> Self {
        Self {
            output_fps: 60.0,
            nominal_rate: 60.0,
        }
    }
}

/// Summary of one rendering run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderStats {
    /// Output ticks implied by the timeline span and output rate.
    pub ticks_total: u64,
    /// Frames actually pushed to the sink.
    pub ticks_emitted: u64,
    /// Sample rate observed from timestamp deltas (reporting only).
    pub effective_rate: f64,
}

/// Progress callback: `(percentage_complete, tick_index)`, invoked after each
/// emitted frame.
pub type ProgressFn<'a> = dyn FnMut(f64, u64) + 'a;

/// Render a decoded capture through `atlas` into `sink`.
///
/// The pipeline is single-threaded and synchronous: reconcile, rasterize,
/// emit. Each frame is handed to the sink with a blocking call, so a slow
/// sink naturally backpressures the renderer.
#[tracing::instrument(skip_all, fields(fps = opts.output_fps, frames = capture.frame_count()))]
pub fn render_overlay(
    capture: &mut Capture,
    atlas: &TileAtlas,
    opts: RenderOpts,
    sink: &mut dyn FrameSink,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> OsdResult<RenderStats> {
    reconcile(&mut capture.frames, opts.nominal_rate)?;

    let raster = Rasterizer::new(
        &capture.frames,
        capture.header.grid,
        atlas,
        opts.output_fps,
    )?;
    let total = raster.tick_count();
    let (width, height) = raster.resolution();
    sink.begin(SinkConfig {
        width,
        height,
        fps: opts.output_fps,
        format: raster.pixel_format(),
        total_frames: total,
    })?;

    let mut emitted = 0u64;
    for (tick, frame) in raster.enumerate() {
        let tick = tick as u64;
        sink.push_frame(tick, &frame)?;
        emitted += 1;
        if let Some(cb) = progress.as_mut() {
            cb(emitted as f64 / total as f64 * 100.0, tick);
        }
    }
    sink.end()?;

    let stats = RenderStats {
        ticks_total: total,
        ticks_emitted: emitted,
        effective_rate: effective_rate(&capture.frames, opts.nominal_rate),
    };
    tracing::debug!(
        ticks = stats.ticks_total,
        rate = stats.effective_rate,
        "overlay render complete"
    );
    Ok(stats)
}
