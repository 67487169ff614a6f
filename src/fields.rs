//! Caller-driven field extraction from one frame's cell array.
//!
//! Fields are located either by scanning for a sentinel cell value or by a
//! fixed grid coordinate, then a signed-length window of cells is rendered to
//! a hex string and reinterpreted per format. Every field is extracted
//! independently; a failure in one never aborts the others.

use std::collections::BTreeMap;

use crate::{
    core::Grid,
    error::{OsdError, OsdResult},
};

/// How a field's cell window is anchored inside the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldLocator {
    /// Linear-scan the cells for the first occurrence of this sentinel value;
    /// the window starts next to the match. A frame without the sentinel
    /// simply skips the field.
    Identifier(u16),
    /// Fixed grid position, flattened through [`Grid::cell_index`].
    Coordinate {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },
}

/// Interpretation applied to the extracted hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldFormat {
    /// Hex-decoded to bytes, then decoded permissively as UTF-8.
    Utf8String,
    /// Literal hexadecimal-float notation (`"1.8p1"` is 3.0), not an
    /// IEEE-754 bit-pattern reinterpretation.
    HexFloat,
    /// Digit pairs taken literally as decimal minutes and seconds,
    /// formatted `MM:SS`.
    MmSsTime,
}

/// One caller-supplied field descriptor.
///
/// `length`'s sign selects the read direction relative to the anchor and its
/// magnitude the cell count.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDescriptor {
    /// Window anchor.
    pub locator: FieldLocator,
    /// Signed window length in cells.
    pub length: i32,
    /// Value interpretation.
    pub format: FieldFormat,
}

/// An extracted field value.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// `Utf8String` and `MmSsTime` results.
    Text(String),
    /// `HexFloat` results.
    Number(f64),
}

/// Extract every resolvable field from one frame's cells.
///
/// Fields whose sentinel is absent are silently skipped; fields whose window
/// is out of bounds or whose value fails to parse are logged and skipped.
pub fn extract(
    cells: &[u16],
    grid: Grid,
    fields: &BTreeMap<String, FieldDescriptor>,
) -> BTreeMap<String, FieldValue> {
    let mut values = BTreeMap::new();
    for (name, desc) in fields {
        match extract_one(cells, grid, desc) {
            Ok(Some(value)) => {
                values.insert(name.clone(), value);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(field = %name, error = %err, "skipping field");
            }
        }
    }
    values
}

fn extract_one(
    cells: &[u16],
    grid: Grid,
    desc: &FieldDescriptor,
) -> OsdResult<Option<FieldValue>> {
    let anchor: i64 = match desc.locator {
        FieldLocator::Identifier(id) => {
            match cells.iter().position(|&c| c == id) {
                None => return Ok(None),
                Some(pos) => pos as i64 + if desc.length > 0 { 1 } else { -1 },
            }
        }
        FieldLocator::Coordinate { x, y } => grid.cell_index(y, x) as i64,
    };

    let start = if desc.length < 0 {
        anchor + i64::from(desc.length)
    } else {
        anchor
    };
    let count = i64::from(desc.length.unsigned_abs());
    if start < 0 || start + count > cells.len() as i64 {
        return Err(OsdError::validation(format!(
            "window [{start}, {}) outside {} cells",
            start + count,
            cells.len()
        )));
    }

    let window = &cells[start as usize..(start + count) as usize];
    let hex: String = window.iter().map(|c| format!("{c:02X}")).collect();

    let value = match desc.format {
        FieldFormat::Utf8String => {
            let bytes = hex_to_bytes(&hex)?;
            FieldValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        FieldFormat::HexFloat => FieldValue::Number(parse_hex_float(&hex).ok_or_else(
            || OsdError::validation(format!("'{hex}' is not a hex float")),
        )?),
        FieldFormat::MmSsTime => FieldValue::Text(parse_mm_ss(&hex)?),
    };
    Ok(Some(value))
}

fn hex_to_bytes(hex: &str) -> OsdResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(OsdError::validation(format!(
            "odd-length hex string '{hex}'"
        )));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| OsdError::validation(format!("invalid hex string '{hex}'")))
        })
        .collect()
}

/// Parse the literal hexadecimal-float notation:
/// `[sign] ["0x"] hexdigits ["." hexdigits] ["p" decimal-exponent]`.
///
/// Mirrors Python's `float.fromhex`, which the capture tooling historically
/// used: `"41"` is 65.0, `"1.8p1"` is 3.0.
fn parse_hex_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let (sign, s) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.strip_prefix('+').unwrap_or(s)),
    };
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    let (mantissa, exponent) = match s.split_once(['p', 'P']) {
        Some((m, e)) => (m, Some(e)),
        None => (s, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut value = 0.0f64;
    for c in int_part.chars() {
        value = value * 16.0 + f64::from(c.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += f64::from(c.to_digit(16)?) * scale;
        scale /= 16.0;
    }

    let exp: i32 = match exponent {
        Some(e) if !e.is_empty() => e.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };
    Some(sign * value * 2f64.powi(exp))
}

/// Interpret the hex string as BCD-style `MM:SS`: the first digit pair is the
/// minutes, the rest the seconds, each read as a plain decimal number.
fn parse_mm_ss(hex: &str) -> OsdResult<String> {
    if hex.len() < 4 {
        return Err(OsdError::validation(format!(
            "'{hex}' too short for MM:SS"
        )));
    }
    let parse = |digits: &str| {
        digits
            .parse::<u32>()
            .map_err(|_| OsdError::validation(format!("'{hex}' is not BCD MM:SS")))
    };
    let minutes = parse(&hex[..2])?;
    let seconds = parse(&hex[2..])?;
    Ok(format!("{minutes:02}:{seconds:02}"))
}
