//! Timeline rasterizer: zero-order-hold resampling of the sparse telemetry
//! timeline at a fixed output frame rate, rendering each grid cell through
//! the tile atlas.

use crate::{
    atlas::{TileAtlas, TileMode},
    core::Grid,
    decode::OsdFrame,
    error::{OsdError, OsdResult},
};

/// Pixel layout of a rendered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Opaque 3-channel RGB (chroma-keyed background).
    Rgb8,
    /// 4-channel RGBA with a true transparency channel.
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// One rasterized output frame, handed to the frame sink and not retained.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Tightly packed row-major pixels.
    pub data: Vec<u8>,
}

/// Lazy, finite sequence of rendered frames, one per output tick.
///
/// The iterator holds a monotonically advancing cursor into the timeline
/// (last-known-value hold); it never moves backward, relying on the caller
/// supplying frames in recorded order. Dropping the iterator between ticks is
/// the cancellation path: a tick either fully renders or is never started.
/// Re-rasterizing the same timeline means constructing a new `Rasterizer`.
pub struct Rasterizer<'a> {
    timeline: &'a [OsdFrame],
    times: Vec<f64>,
    grid: Grid,
    atlas: &'a TileAtlas,
    fps: f64,
    start_time: f64,
    ticks: u64,
    next_tick: u64,
    cursor: usize,
}

impl<'a> Rasterizer<'a> {
    /// Build a rasterizer over a reconciled timeline.
    ///
    /// Every frame must carry a time axis (run
    /// [`crate::reconcile::reconcile`] first) and the timeline must be
    /// non-empty.
    pub fn new(
        timeline: &'a [OsdFrame],
        grid: Grid,
        atlas: &'a TileAtlas,
        fps: f64,
    ) -> OsdResult<Self> {
        if !(fps > 0.0) {
            return Err(OsdError::validation(format!(
                "output rate must be positive, got {fps}"
            )));
        }
        if timeline.is_empty() {
            return Err(OsdError::validation("cannot rasterize an empty timeline"));
        }
        let times = timeline
            .iter()
            .map(|f| {
                f.time_secs.ok_or_else(|| {
                    OsdError::validation(
                        "timeline frame is missing its time axis; reconcile the capture first",
                    )
                })
            })
            .collect::<OsdResult<Vec<f64>>>()?;

        let start_time = times[0];
        let end_time = times[times.len() - 1];
        let ticks = ((end_time - start_time) * fps).floor() as u64 + 1;

        Ok(Self {
            timeline,
            times,
            grid,
            atlas,
            fps,
            start_time,
            ticks,
            next_tick: 0,
            cursor: 0,
        })
    }

    /// Total number of output ticks:
    /// `floor((lastTime - firstTime) * fps) + 1`.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Output resolution in pixels: grid dimensions times tile dimensions.
    pub fn resolution(&self) -> (u32, u32) {
        let (tile_w, tile_h) = self.atlas.tile_size();
        (self.grid.width * tile_w, self.grid.height * tile_h)
    }

    /// Pixel layout of the produced frames, decided by the atlas mode.
    pub fn pixel_format(&self) -> PixelFormat {
        match self.atlas.mode() {
            TileMode::Alpha => PixelFormat::Rgba8,
            TileMode::Opaque { .. } => PixelFormat::Rgb8,
        }
    }

    fn render_tick(&mut self, tick: u64) -> RenderedFrame {
        let tick_time = self.start_time + tick as f64 / self.fps;
        while self.cursor + 1 < self.times.len() && self.times[self.cursor + 1] <= tick_time {
            self.cursor += 1;
        }
        let cells = &self.timeline[self.cursor].cells;

        let (width, height) = self.resolution();
        let (tile_w, tile_h) = self.atlas.tile_size();
        let format = self.pixel_format();
        let channels = format.channels();

        let mut data = match self.atlas.mode() {
            TileMode::Alpha => vec![0u8; (width * height) as usize * channels],
            TileMode::Opaque { key } => {
                let mut data = Vec::with_capacity((width * height) as usize * 3);
                for _ in 0..width * height {
                    data.extend_from_slice(&key);
                }
                data
            }
        };

        for row in 0..self.grid.height {
            for col in 0..self.grid.width {
                let idx = self.grid.cell_index(row, col);
                let Some(&cell) = cells.get(idx) else {
                    // Short frames leave the remaining cells as background.
                    continue;
                };
                let tile = self.atlas.tile(cell);
                blit(&mut data, width, channels, &tile.data, tile_w, tile_h, col * tile_w, row * tile_h);
            }
        }

        RenderedFrame {
            width,
            height,
            format,
            data,
        }
    }
}

impl Iterator for Rasterizer<'_> {
    type Item = RenderedFrame;

    fn next(&mut self) -> Option<RenderedFrame> {
        if self.next_tick >= self.ticks {
            return None;
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        Some(self.render_tick(tick))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.ticks - self.next_tick) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rasterizer<'_> {}

fn blit(
    dst: &mut [u8],
    dst_width: u32,
    channels: usize,
    src: &[u8],
    src_width: u32,
    src_height: u32,
    x: u32,
    y: u32,
) {
    let row_bytes = src_width as usize * channels;
    for src_row in 0..src_height as usize {
        let src_off = src_row * row_bytes;
        let dst_off =
            ((y as usize + src_row) * dst_width as usize + x as usize) * channels;
        dst[dst_off..dst_off + row_bytes]
            .copy_from_slice(&src[src_off..src_off + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasLayout;
    use image::RgbaImage;

    /// 1x1 tiles: pixel red channel = tile row, alpha opaque.
    fn unit_atlas(mode: TileMode) -> TileAtlas {
        let sheet = RgbaImage::from_fn(4, 256, |_, y| image::Rgba([y as u8, 0, 0, 255]));
        TileAtlas::new(sheet, AtlasLayout::FixedColumns, mode).unwrap()
    }

    fn frame(t: f64, cells: Vec<u16>) -> OsdFrame {
        OsdFrame {
            time_secs: Some(t),
            index: None,
            cells,
        }
    }

    #[test]
    fn tick_count_follows_floor_rule() {
        let atlas = unit_atlas(TileMode::Alpha);
        let timeline = vec![frame(0.0, vec![1]), frame(1.0, vec![2])];
        let raster = Rasterizer::new(&timeline, Grid::new(1, 1), &atlas, 2.0).unwrap();
        assert_eq!(raster.tick_count(), 3);
        assert_eq!(raster.len(), 3);
    }

    #[test]
    fn zero_order_hold_selects_latest_frame_at_or_before_tick() {
        let atlas = unit_atlas(TileMode::Alpha);
        let timeline = vec![frame(0.0, vec![10]), frame(1.0, vec![20])];
        let raster = Rasterizer::new(&timeline, Grid::new(1, 1), &atlas, 2.0).unwrap();
        let frames: Vec<RenderedFrame> = raster.collect();
        assert_eq!(frames.len(), 3);
        // Ticks at t=0.0 and t=0.5 hold the first frame, t=1.0 the second.
        assert_eq!(frames[0].data[0], 10);
        assert_eq!(frames[1].data[0], 10);
        assert_eq!(frames[2].data[0], 20);
    }

    #[test]
    fn resolution_scales_grid_by_tile_size() {
        let atlas = unit_atlas(TileMode::Alpha);
        let timeline = vec![frame(0.0, vec![0; 6])];
        let raster = Rasterizer::new(&timeline, Grid::new(3, 2), &atlas, 30.0).unwrap();
        assert_eq!(raster.resolution(), (3, 2));
        assert_eq!(raster.tick_count(), 1);
    }

    #[test]
    fn opaque_mode_fills_canvas_with_key_color() {
        let sheet = RgbaImage::from_pixel(4, 256, image::Rgba([0, 0, 0, 0]));
        let atlas = TileAtlas::new(
            sheet,
            AtlasLayout::FixedColumns,
            TileMode::Opaque {
                key: [255, 0, 255],
            },
        )
        .unwrap();
        // One cell of a 2x1 grid populated; the other stays background.
        let timeline = vec![frame(0.0, vec![7])];
        let raster = Rasterizer::new(&timeline, Grid::new(2, 1), &atlas, 30.0).unwrap();
        let frames: Vec<RenderedFrame> = raster.collect();
        assert_eq!(frames[0].format, PixelFormat::Rgb8);
        // Fully transparent tile flattens to the key color, as does the
        // unpopulated cell.
        assert_eq!(frames[0].data, vec![255, 0, 255, 255, 0, 255]);
    }

    #[test]
    fn alpha_mode_keeps_transparency() {
        let sheet = RgbaImage::from_pixel(4, 256, image::Rgba([50, 60, 70, 80]));
        let atlas = TileAtlas::new(sheet, AtlasLayout::FixedColumns, TileMode::Alpha).unwrap();
        let timeline = vec![frame(0.0, vec![3])];
        let raster = Rasterizer::new(&timeline, Grid::new(1, 1), &atlas, 30.0).unwrap();
        let frames: Vec<RenderedFrame> = raster.collect();
        assert_eq!(frames[0].format, PixelFormat::Rgba8);
        assert_eq!(frames[0].data, vec![50, 60, 70, 80]);
    }

    #[test]
    fn tiles_land_at_grid_positions() {
        let atlas = unit_atlas(TileMode::Alpha);
        let timeline = vec![frame(0.0, vec![1, 2, 3, 4])];
        let raster = Rasterizer::new(&timeline, Grid::new(2, 2), &atlas, 30.0).unwrap();
        let frames: Vec<RenderedFrame> = raster.collect();
        let reds: Vec<u8> = frames[0].data.chunks_exact(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unreconciled_timeline_is_rejected() {
        let atlas = unit_atlas(TileMode::Alpha);
        let timeline = vec![OsdFrame {
            time_secs: None,
            index: Some(0),
            cells: vec![0],
        }];
        assert!(Rasterizer::new(&timeline, Grid::new(1, 1), &atlas, 30.0).is_err());
    }

    #[test]
    fn empty_timeline_and_bad_rate_are_rejected() {
        let atlas = unit_atlas(TileMode::Alpha);
        assert!(Rasterizer::new(&[], Grid::new(1, 1), &atlas, 30.0).is_err());
        let timeline = vec![frame(0.0, vec![0])];
        assert!(Rasterizer::new(&timeline, Grid::new(1, 1), &atlas, 0.0).is_err());
    }
}
