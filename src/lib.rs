//! osdrender decodes FPV on-screen-display telemetry captures and rasterizes
//! them into a fixed-rate stream of overlay frames for video compositing.
//!
//! The pipeline is: [`decode`](decode::decode) a capture,
//! [`reconcile`](reconcile::reconcile) its time/index axes, optionally
//! [`extract`](fields::extract) typed field values, then drive a
//! [`Rasterizer`] over a [`TileAtlas`] and stream every tick into a
//! [`FrameSink`]. [`render_overlay`] does all of that in one call.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod atlas;
pub mod core;
pub mod decode;
pub mod encode;
pub mod error;
pub mod fields;
pub mod pipeline;
pub mod raster;
pub mod reconcile;
pub mod sink;

pub use crate::atlas::{AtlasLayout, Tile, TileAtlas, TileMode};
pub use crate::core::{Grid, parse_hex_color};
pub use crate::decode::{Capture, FormatTag, OsdFrame, OsdHeader, decode, decode_file};
pub use crate::encode::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use crate::error::{OsdError, OsdResult};
pub use crate::fields::{FieldDescriptor, FieldFormat, FieldLocator, FieldValue, extract};
pub use crate::pipeline::{ProgressFn, RenderOpts, RenderStats, render_overlay};
pub use crate::raster::{PixelFormat, Rasterizer, RenderedFrame};
pub use crate::reconcile::{effective_rate, reconcile};
pub use crate::sink::{FrameSink, InMemorySink, SinkConfig};
