//! Shared core types: the overlay character grid and color parsing helpers.

use crate::error::{OsdError, OsdResult};

/// Overlay character grid dimensions, in cells.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Grid {
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
}

impl Grid {
    /// Create a grid of `width` x `height` cells.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Flatten `(row, col)` into the row-major cell index.
    ///
    /// This is the single addressing convention shared by the field extractor
    /// and the rasterizer.
    pub fn cell_index(self, row: u32, col: u32) -> usize {
        (row as usize) * (self.width as usize) + col as usize
    }

    /// Total number of cells in the grid.
    pub fn cell_count(self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

/// Parse an `"RRGGBB"` hex color (an optional `#` prefix is accepted) into
/// RGB bytes.
pub fn parse_hex_color(s: &str) -> OsdResult<[u8; 3]> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(OsdError::validation(format!(
            "expected 6 hex digits in color '{s}'"
        )));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| OsdError::validation(format!("invalid hex color '{s}'")))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
