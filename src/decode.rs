//! Multi-version `.osd` capture decoder.
//!
//! Four incompatible record layouts share the `.osd` extension. Dispatch is a
//! bounded, ordered set of signature checks over a fixed 40-byte probe:
//!
//! - fewer than 40 bytes available, or the probe starts with the 7-byte
//!   legacy magic: legacy layout (version 2 or 3) parsed from offset 0;
//! - the probe ends with `"DJO3"`: goggle recording with a fixed 53x20 grid;
//! - anything else: goggle recording with grid dimensions stored inside the
//!   probe itself.
//!
//! A short read at any point (record header or payload) is the normal
//! end-of-capture condition and ends decoding without error. The decoder holds
//! no state across calls; decoding the same bytes twice is bit-identical.

use bytes::Buf;

use crate::{
    core::Grid,
    error::{OsdError, OsdResult},
};

/// 7-byte magic opening every legacy capture.
pub const LEGACY_MAGIC: &[u8; 7] = b"MSPOSD\x00";

/// Trailing probe signature selecting the fixed-dimension goggle layout.
pub const DJO_SIGNATURE: &[u8; 4] = b"DJO3";

/// Length of the format-detection probe.
const PROBE_LEN: usize = 40;

/// Legacy header length: magic + version + config block.
const LEGACY_HEADER_LEN: usize = 7 + 2 + 13;

/// Grid used by the fixed-dimension goggle layout.
const DJO_FIXED_GRID: Grid = Grid {
    width: 53,
    height: 20,
};

/// Probe byte offsets holding the grid dimensions of the variable layout.
const DJO_WIDTH_OFFSET: usize = 0x24;
const DJO_HEIGHT_OFFSET: usize = 0x26;

/// Record layout of a capture, decided once during format detection.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum FormatTag {
    /// Legacy version 2: indexed records, u16 cells, column-major storage.
    LegacyV2,
    /// Legacy version 3: timestamped records, byte cells.
    LegacyV3,
    /// Goggle recording with the `"DJO3"` signature and a fixed 53x20 grid.
    DjoFixed,
    /// Goggle recording carrying its grid dimensions inside the probe.
    DjoVariable,
}

/// Immutable capture header, built once during decode and never mutated.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OsdHeader {
    /// Magic / firmware identifier, NUL-trimmed.
    pub magic: String,
    /// Detected record layout.
    pub format: FormatTag,
    /// Overlay grid dimensions in cells.
    pub grid: Grid,
    /// Font cell width in pixels (legacy layouts only, zero otherwise).
    pub font_width: u8,
    /// Font cell height in pixels (legacy layouts only, zero otherwise).
    pub font_height: u8,
    /// Horizontal overlay offset in pixels.
    pub x_offset: u16,
    /// Vertical overlay offset in pixels.
    pub y_offset: u16,
    /// Raw font variant string (legacy layouts only, empty otherwise).
    pub font_variant: String,
}

/// One decoded telemetry frame.
///
/// Exactly one of `time_secs` / `index` is populated straight out of the
/// decoder; [`crate::reconcile::reconcile`] derives the other. Cell values are
/// 8-bit in legacy captures and 16-bit in goggle captures, widened to `u16`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OsdFrame {
    /// Capture-relative timestamp in seconds.
    pub time_secs: Option<f64>,
    /// Recording frame number.
    pub index: Option<u64>,
    /// Row-major cell values.
    pub cells: Vec<u16>,
}

/// A fully decoded capture: header plus the ordered frame timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    /// Capture header.
    pub header: OsdHeader,
    /// Frames in recorded order.
    pub frames: Vec<OsdFrame>,
}

impl Capture {
    /// Number of decoded frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Capture duration in seconds: the maximum timestamp when timestamps are
    /// present, otherwise approximated from the frame count and
    /// `nominal_rate`.
    pub fn duration_secs(&self, nominal_rate: f64) -> f64 {
        let max_time = self
            .frames
            .iter()
            .filter_map(|f| f.time_secs)
            .fold(None, |acc: Option<f64>, t| {
                Some(acc.map_or(t, |m| m.max(t)))
            });
        match max_time {
            Some(t) => t,
            None if nominal_rate > 0.0 => self.frames.len() as f64 / nominal_rate,
            None => 0.0,
        }
    }
}

/// Decode a capture from an in-memory byte stream.
#[tracing::instrument(skip(bytes), fields(len = bytes.len()))]
pub fn decode(bytes: &[u8]) -> OsdResult<Capture> {
    if bytes.len() < PROBE_LEN || &bytes[..LEGACY_MAGIC.len()] == LEGACY_MAGIC {
        return decode_legacy(bytes);
    }

    let probe = &bytes[..PROBE_LEN];
    let (format, grid) = if &probe[PROBE_LEN - DJO_SIGNATURE.len()..] == DJO_SIGNATURE {
        (FormatTag::DjoFixed, DJO_FIXED_GRID)
    } else {
        let grid = Grid::new(
            u32::from(probe[DJO_WIDTH_OFFSET]),
            u32::from(probe[DJO_HEIGHT_OFFSET]),
        );
        (FormatTag::DjoVariable, grid)
    };
    decode_djo(&bytes[PROBE_LEN..], probe, format, grid)
}

/// Decode a capture file from disk.
pub fn decode_file(path: impl AsRef<std::path::Path>) -> OsdResult<Capture> {
    use anyhow::Context as _;

    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read capture '{}'", path.display()))?;
    decode(&bytes)
}

fn decode_legacy(bytes: &[u8]) -> OsdResult<Capture> {
    let mut buf = bytes;
    if buf.remaining() < LEGACY_HEADER_LEN {
        return Err(OsdError::format(format!(
            "capture too short for legacy header: {} bytes",
            buf.remaining()
        )));
    }

    let mut magic = [0u8; 7];
    buf.copy_to_slice(&mut magic);
    let version = buf.get_u16_le();
    let char_width = buf.get_u8();
    let char_height = buf.get_u8();
    let font_width = buf.get_u8();
    let font_height = buf.get_u8();
    let x_offset = buf.get_u16_le();
    let y_offset = buf.get_u16_le();
    let mut variant = [0u8; 5];
    buf.copy_to_slice(&mut variant);

    let format = match version {
        2 => FormatTag::LegacyV2,
        3 => FormatTag::LegacyV3,
        // The version field sits ahead of every record, so there are no
        // collected frames to preserve at this point.
        other => {
            return Err(OsdError::format(format!(
                "unsupported legacy capture version {other}"
            )));
        }
    };

    let header = OsdHeader {
        magic: trimmed_lossy(&magic),
        format,
        grid: Grid::new(u32::from(char_width), u32::from(char_height)),
        font_width,
        font_height,
        x_offset,
        y_offset,
        font_variant: trimmed_lossy(&variant),
    };

    let frames = match format {
        FormatTag::LegacyV3 => legacy_v3_frames(buf),
        FormatTag::LegacyV2 => legacy_v2_frames(buf, char_height),
        _ => unreachable!("legacy dispatch only yields legacy tags"),
    };

    tracing::debug!(
        format = ?header.format,
        frames = frames.len(),
        "decoded legacy capture"
    );
    Ok(Capture { header, frames })
}

fn legacy_v3_frames(mut buf: &[u8]) -> Vec<OsdFrame> {
    let mut frames = Vec::new();
    loop {
        if buf.remaining() < 8 + 4 {
            break;
        }
        let time_secs = buf.get_f64_le();
        let size = buf.get_u32_le() as usize;
        if buf.remaining() < size {
            break;
        }
        let cells = buf.copy_to_bytes(size).iter().map(|&b| u16::from(b)).collect();
        frames.push(OsdFrame {
            time_secs: Some(time_secs),
            index: None,
            cells,
        });
    }
    frames
}

fn legacy_v2_frames(mut buf: &[u8], char_height: u8) -> Vec<OsdFrame> {
    let mut frames = Vec::new();
    loop {
        if buf.remaining() < 4 + 4 {
            break;
        }
        let index = buf.get_u32_le();
        let size = buf.get_u32_le() as usize;
        if buf.remaining() < 2 * size {
            break;
        }
        let stored: Vec<u16> = (0..size).map(|_| buf.get_u16_le()).collect();
        frames.push(OsdFrame {
            time_secs: None,
            index: Some(u64::from(index)),
            cells: column_major_to_row_major(&stored, u32::from(char_height)),
        });
    }
    frames
}

/// Reorder version-2 cells from their column-major wire order into row-major
/// grid order.
///
/// This is a quirk of the v2 writer, not an optimization; the exact
/// reindexing (`cells[i*height + j]` moves to `[j*cols + i]`) must be
/// reproduced for visual correctness. A trailing partial column is dropped,
/// matching the recorder's own reader.
fn column_major_to_row_major(cells: &[u16], height: u32) -> Vec<u16> {
    let height = height as usize;
    if height == 0 {
        return cells.to_vec();
    }
    let cols = cells.len() / height;
    let mut out = Vec::with_capacity(cols * height);
    for row in 0..height {
        for col in 0..cols {
            out.push(cells[col * height + row]);
        }
    }
    out
}

fn decode_djo(
    mut buf: &[u8],
    probe: &[u8],
    format: FormatTag,
    grid: Grid,
) -> OsdResult<Capture> {
    let cell_count = grid.cell_count();
    if cell_count == 0 {
        return Err(OsdError::format(format!(
            "goggle capture declares an empty {}x{} grid",
            grid.width, grid.height
        )));
    }

    let header = OsdHeader {
        magic: trimmed_lossy(&probe[..4]),
        format,
        grid,
        font_width: 0,
        font_height: 0,
        x_offset: 0,
        y_offset: 0,
        font_variant: String::new(),
    };

    let mut frames = Vec::new();
    loop {
        if buf.remaining() < 4 {
            break;
        }
        let delta_ms = buf.get_u32_le();
        if buf.remaining() < 2 * cell_count {
            break;
        }
        let cells = (0..cell_count).map(|_| buf.get_u16_le()).collect();
        frames.push(OsdFrame {
            time_secs: Some(f64::from(delta_ms) / 1000.0),
            index: None,
            cells,
        });
    }

    tracing::debug!(
        format = ?header.format,
        frames = frames.len(),
        "decoded goggle capture"
    );
    Ok(Capture { header, frames })
}

fn trimmed_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_header(version: u16, char_width: u8, char_height: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LEGACY_MAGIC);
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.push(char_width);
        bytes.push(char_height);
        bytes.push(12); // font_width
        bytes.push(18); // font_height
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(b"BF\x00\x00\x00");
        bytes
    }

    fn v3_record(time_secs: f64, cells: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&time_secs.to_le_bytes());
        bytes.extend_from_slice(&(cells.len() as u32).to_le_bytes());
        bytes.extend_from_slice(cells);
        bytes
    }

    fn v2_record(index: u32, cells: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes.extend_from_slice(&(cells.len() as u32).to_le_bytes());
        for c in cells {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn legacy_v3_roundtrip() {
        let mut bytes = legacy_header(3, 2, 2);
        bytes.extend_from_slice(&v3_record(0.5, &[1, 2, 3, 4]));
        bytes.extend_from_slice(&v3_record(1.0, &[5, 6, 7, 8]));

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.header.format, FormatTag::LegacyV3);
        assert_eq!(capture.header.magic, "MSPOSD");
        assert_eq!(capture.header.grid, Grid::new(2, 2));
        assert_eq!(capture.header.font_variant, "BF");
        assert_eq!(capture.frame_count(), 2);
        assert_eq!(capture.frames[0].time_secs, Some(0.5));
        assert_eq!(capture.frames[0].index, None);
        assert_eq!(capture.frames[0].cells, vec![1, 2, 3, 4]);
        assert_eq!(capture.frames[1].time_secs, Some(1.0));
    }

    #[test]
    fn legacy_v2_transposes_column_major_cells() {
        // charHeight = 2: wire order [1,2,3,4] is two columns of two; the
        // grid order is [1,3,2,4].
        let mut bytes = legacy_header(2, 2, 2);
        bytes.extend_from_slice(&v2_record(7, &[1, 2, 3, 4]));

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.header.format, FormatTag::LegacyV2);
        assert_eq!(capture.frames[0].index, Some(7));
        assert_eq!(capture.frames[0].time_secs, None);
        assert_eq!(capture.frames[0].cells, vec![1, 3, 2, 4]);
    }

    #[test]
    fn truncated_payload_ends_decode_without_error() {
        let mut bytes = legacy_header(3, 2, 2);
        bytes.extend_from_slice(&v3_record(0.0, &[1, 2, 3, 4]));
        // Declared 100-byte payload with only 2 bytes behind it.
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[9, 9]);

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.frame_count(), 1);
        assert_eq!(capture.frames[0].cells, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unsupported_legacy_version_is_a_format_error() {
        let bytes = legacy_header(5, 2, 2);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported legacy capture version 5"));
    }

    #[test]
    fn short_stream_falls_back_to_legacy_parse() {
        // 22 bytes: shorter than the probe but a valid record-free legacy
        // capture.
        let bytes = legacy_header(3, 4, 4);
        assert!(bytes.len() < PROBE_LEN);
        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.frame_count(), 0);
    }

    // The dimension offsets live inside the trailing signature region, so the
    // two probe shapes are mutually exclusive by construction.
    fn djo_fixed_probe() -> Vec<u8> {
        let mut probe = vec![0u8; PROBE_LEN];
        probe[..4].copy_from_slice(b"AU\x00\x00");
        probe[PROBE_LEN - 4..].copy_from_slice(DJO_SIGNATURE);
        probe
    }

    fn djo_variable_probe(width: u8, height: u8) -> Vec<u8> {
        let mut probe = vec![0u8; PROBE_LEN];
        probe[..4].copy_from_slice(b"AU\x00\x00");
        probe[DJO_WIDTH_OFFSET] = width;
        probe[DJO_HEIGHT_OFFSET] = height;
        probe
    }

    fn djo_record(delta_ms: u32, cells: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&delta_ms.to_le_bytes());
        for c in cells {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn djo_fixed_signature_selects_53x20_grid() {
        let mut bytes = djo_fixed_probe();
        let cells: Vec<u16> = (0..1060).collect();
        bytes.extend_from_slice(&djo_record(1500, &cells));

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.header.format, FormatTag::DjoFixed);
        assert_eq!(capture.header.grid, Grid::new(53, 20));
        assert_eq!(capture.header.magic, "AU");
        assert_eq!(capture.frame_count(), 1);
        assert_eq!(capture.frames[0].time_secs, Some(1.5));
        assert_eq!(capture.frames[0].cells.len(), 1060);
        assert_eq!(capture.frames[0].cells[1059], 1059);
    }

    #[test]
    fn djo_variable_reads_grid_from_probe_offsets() {
        let mut bytes = djo_variable_probe(3, 2);
        bytes.extend_from_slice(&djo_record(0, &[1, 2, 3, 4, 5, 6]));
        bytes.extend_from_slice(&djo_record(33, &[6, 5, 4, 3, 2, 1]));

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.header.format, FormatTag::DjoVariable);
        assert_eq!(capture.header.grid, Grid::new(3, 2));
        assert_eq!(capture.frame_count(), 2);
        assert_eq!(capture.frames[1].time_secs, Some(0.033));
        // No reordering for goggle layouts.
        assert_eq!(capture.frames[0].cells, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn djo_variable_with_empty_grid_is_a_format_error() {
        let bytes = djo_variable_probe(0, 2);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn djo_short_trailing_record_is_dropped() {
        let mut bytes = djo_variable_probe(2, 2);
        bytes.extend_from_slice(&djo_record(0, &[1, 2, 3, 4]));
        // Delta plus only one of four cells.
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&9u16.to_le_bytes());

        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.frame_count(), 1);
    }

    #[test]
    fn decode_is_idempotent_across_calls() {
        let mut bytes = legacy_header(3, 2, 2);
        bytes.extend_from_slice(&v3_record(0.25, &[1, 2, 3, 4]));

        let first = decode(&bytes).unwrap();
        let second = decode(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duration_prefers_timestamps_over_nominal_rate() {
        let mut bytes = legacy_header(3, 2, 2);
        bytes.extend_from_slice(&v3_record(0.5, &[0; 4]));
        bytes.extend_from_slice(&v3_record(2.5, &[0; 4]));
        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.duration_secs(60.0), 2.5);

        let mut bytes = legacy_header(2, 2, 2);
        bytes.extend_from_slice(&v2_record(0, &[0; 4]));
        bytes.extend_from_slice(&v2_record(1, &[0; 4]));
        let capture = decode(&bytes).unwrap();
        assert_eq!(capture.duration_secs(60.0), 2.0 / 60.0);
    }
}
