//! Tile atlas: a font sheet image served as pixel blocks by tile index.
//!
//! Atlas sheets are always 256 tiles tall. Width-wise they hold up to four
//! columns, so the usable index domain is at most 1024 tiles; the cache is
//! index-keyed, write-once and never evicted within a session, which is fine
//! at that scale.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use image::RgbaImage;

use crate::error::{OsdError, OsdResult};

/// Tile rows in every atlas sheet.
pub const ATLAS_ROWS: u32 = 256;

/// Upper bound on atlas columns.
pub const MAX_COLUMNS: u32 = 4;

/// How tile geometry is derived from the sheet dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AtlasLayout {
    /// Four fixed columns: `tileWidth = imageWidth / 4`.
    FixedColumns,
    /// Tile width derived from the 1:1.5 tile aspect ratio
    /// (`tileWidth = tileHeight / 1.5`), column count probed from the image
    /// width and clamped to `[1, 4]`.
    ProbedColumns,
}

/// Rendering mode baked into cached tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileMode {
    /// Tiles keep their alpha channel verbatim (RGBA output).
    Alpha,
    /// Tiles are flattened over the chroma-key color once at cache fill and
    /// stored as opaque RGB.
    Opaque {
        /// Chroma-key background color.
        key: [u8; 3],
    },
}

impl TileMode {
    /// Channel count of tiles produced under this mode.
    pub fn channels(self) -> u8 {
        match self {
            TileMode::Alpha => 4,
            TileMode::Opaque { .. } => 3,
        }
    }
}

/// One cached pixel block.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// 3 (opaque) or 4 (alpha-preserving).
    pub channels: u8,
    /// Tightly packed row-major pixels.
    pub data: Vec<u8>,
}

/// A loaded tile sheet with its lazily populated tile cache.
#[derive(Debug)]
pub struct TileAtlas {
    sheet: RgbaImage,
    tile_width: u32,
    tile_height: u32,
    columns: u32,
    mode: TileMode,
    // Interior mutability keeps `tile` on `&self`, so one atlas can back
    // concurrent rasterizers over disjoint tick ranges.
    cache: Mutex<HashMap<u16, Arc<Tile>>>,
}

impl TileAtlas {
    /// Load a tile sheet from disk. Failure to load is fatal to atlas
    /// construction.
    pub fn open(
        path: impl AsRef<Path>,
        layout: AtlasLayout,
        mode: TileMode,
    ) -> OsdResult<Self> {
        let path = path.as_ref();
        let sheet = image::open(path)
            .map_err(|e| {
                OsdError::image_load(format!(
                    "failed to load tile sheet '{}': {e}",
                    path.display()
                ))
            })?
            .to_rgba8();
        Self::new(sheet, layout, mode)
    }

    /// Build an atlas over an already decoded RGBA sheet.
    pub fn new(sheet: RgbaImage, layout: AtlasLayout, mode: TileMode) -> OsdResult<Self> {
        let tile_height = sheet.height() / ATLAS_ROWS;
        let (tile_width, columns) = match layout {
            AtlasLayout::FixedColumns => (sheet.width() / MAX_COLUMNS, MAX_COLUMNS),
            AtlasLayout::ProbedColumns => {
                let tile_width = tile_height * 2 / 3;
                if tile_width == 0 {
                    (0, 1)
                } else {
                    (tile_width, (sheet.width() / tile_width).clamp(1, MAX_COLUMNS))
                }
            }
        };
        if tile_width == 0 || tile_height == 0 {
            return Err(OsdError::validation(format!(
                "tile sheet {}x{} too small for a {ATLAS_ROWS}-row atlas",
                sheet.width(),
                sheet.height()
            )));
        }
        Ok(Self {
            sheet,
            tile_width,
            tile_height,
            columns,
            mode,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Tile dimensions in pixels.
    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// Detected column count.
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Rendering mode baked into served tiles.
    pub fn mode(&self) -> TileMode {
        self.mode
    }

    /// Fetch the pixel block for `index`, cutting and caching it on first
    /// use.
    ///
    /// Out-of-range indices clamp to the nearest valid column/row; a crop
    /// falling outside the sheet yields a blank tile of the expected size.
    /// Never fails.
    pub fn tile(&self, index: u16) -> Arc<Tile> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tile) = cache.get(&index) {
            return Arc::clone(tile);
        }
        let tile = Arc::new(self.cut_tile(index));
        cache.insert(index, Arc::clone(&tile));
        tile
    }

    fn cut_tile(&self, index: u16) -> Tile {
        let column = u32::from(index) / ATLAS_ROWS;
        let row = u32::from(index) % ATLAS_ROWS;
        let column = column.min(self.columns - 1);
        let row = row.min(ATLAS_ROWS - 1);

        let left = column * self.tile_width;
        let top = row * self.tile_height;
        if left + self.tile_width > self.sheet.width()
            || top + self.tile_height > self.sheet.height()
        {
            return self.blank_tile();
        }

        let channels = usize::from(self.mode.channels());
        let mut data =
            Vec::with_capacity((self.tile_width * self.tile_height) as usize * channels);
        for y in 0..self.tile_height {
            for x in 0..self.tile_width {
                let px = self.sheet.get_pixel(left + x, top + y).0;
                match self.mode {
                    TileMode::Alpha => data.extend_from_slice(&px),
                    TileMode::Opaque { key } => {
                        let a = u16::from(px[3]);
                        let inv = 255 - a;
                        for c in 0..3 {
                            data.push(
                                (mul_div255(u16::from(px[c]), a)
                                    + mul_div255(u16::from(key[c]), inv))
                                .min(255) as u8,
                            );
                        }
                    }
                }
            }
        }
        Tile {
            width: self.tile_width,
            height: self.tile_height,
            channels: self.mode.channels(),
            data,
        }
    }

    /// Blank fallback tile: transparent in alpha mode, key-colored in opaque
    /// mode (what a fully transparent crop flattens to anyway).
    fn blank_tile(&self) -> Tile {
        let pixels = (self.tile_width * self.tile_height) as usize;
        let data = match self.mode {
            TileMode::Alpha => vec![0u8; pixels * 4],
            TileMode::Opaque { key } => {
                let mut data = Vec::with_capacity(pixels * 3);
                for _ in 0..pixels {
                    data.extend_from_slice(&key);
                }
                data
            }
        };
        Tile {
            width: self.tile_width,
            height: self.tile_height,
            channels: self.mode.channels(),
            data,
        }
    }
}

fn mul_div255(x: u16, y: u16) -> u16 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u16
}
