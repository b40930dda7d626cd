//! Binary layout of per-cell quad catalogs and raw star files.
//!
//! A catalog file has three contiguous sections, all little-endian:
//!
//! 1. **Header** (24 bytes): magic, version byte, cell id, pass count, metadata count
//! 2. **Pass table** (`passes × 24` bytes): density, record count and absolute byte offset
//! 3. **Metadata**: tagged key/value entries (see [FieldValue])
//!
//! followed by the [QuadRecord]s of every pass, densely packed in ascending
//! density order.
//!
//! Raw star files are a flat array of 20-byte [StarRecord]s.

use std::io::{Read, Write};

use crate::error::CatalogError;
use crate::index::CellId;

pub const CATALOG_MAGIC: &[u8; 4] = b"QCAT";
pub const CATALOG_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 24;
pub const PASS_ENTRY_SIZE: usize = 24;
pub const QUAD_RECORD_SIZE: usize = 40;
pub const STAR_RECORD_SIZE: usize = 20;

/// Number of edge ratios in a quad signature (6 edges, normalised by the largest)
pub const NUM_RATIOS: usize = 5;

/// One catalog quad: shape signature plus where it sits on the sky
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadRecord {
    /// Five smaller edges divided by the largest, descending
    pub ratios: [f32; NUM_RATIOS],
    /// Largest edge as an angle, degrees
    pub largest_edge: f32,
    pub center_ra: f64,
    pub center_dec: f64,
}

impl QuadRecord {
    pub fn to_bytes(&self) -> [u8; QUAD_RECORD_SIZE] {
        let mut buf = [0u8; QUAD_RECORD_SIZE];
        for (i, r) in self.ratios.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&r.to_le_bytes());
        }
        buf[20..24].copy_from_slice(&self.largest_edge.to_le_bytes());
        buf[24..32].copy_from_slice(&self.center_ra.to_le_bytes());
        buf[32..40].copy_from_slice(&self.center_dec.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; QUAD_RECORD_SIZE]) -> Self {
        let mut ratios = [0f32; NUM_RATIOS];
        for (i, r) in ratios.iter_mut().enumerate() {
            *r = f32::from_le_bytes(le4(&buf[i * 4..i * 4 + 4]));
        }
        Self {
            ratios,
            largest_edge: f32::from_le_bytes(le4(&buf[20..24])),
            center_ra: f64::from_le_bytes(le8(&buf[24..32])),
            center_dec: f64::from_le_bytes(le8(&buf[32..40])),
        }
    }
}

/// Raw catalog star: 8 byte RA, 8 byte Dec (degrees), 4 byte magnitude
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarRecord {
    pub ra: f64,
    pub dec: f64,
    pub mag: f32,
}

impl StarRecord {
    pub fn to_bytes(&self) -> [u8; STAR_RECORD_SIZE] {
        let mut buf = [0u8; STAR_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.ra.to_le_bytes());
        buf[8..16].copy_from_slice(&self.dec.to_le_bytes());
        buf[16..20].copy_from_slice(&self.mag.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; STAR_RECORD_SIZE]) -> Self {
        Self {
            ra: f64::from_le_bytes(le8(&buf[0..8])),
            dec: f64::from_le_bytes(le8(&buf[8..16])),
            mag: f32::from_le_bytes(le4(&buf[16..20])),
        }
    }
}

/// Location and size of one density pass inside a catalog file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassInfo {
    /// Quads per square degree this pass was built for
    pub density: f64,
    pub record_count: u32,
    /// Absolute byte offset of the first record
    pub offset: u64,
}

impl PassInfo {
    pub fn byte_len(&self) -> u64 {
        self.record_count as u64 * QUAD_RECORD_SIZE as u64
    }
}

/// Catalog file header: which cell, which passes, free-form metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub version: u8,
    pub cell: CellId,
    pub passes: Vec<PassInfo>,
    pub metadata: Vec<(String, FieldValue)>,
}

impl FileDescriptor {
    pub fn densities(&self) -> Vec<f64> {
        self.passes.iter().map(|p| p.density).collect()
    }

    pub fn metadata(&self, key: &str) -> Option<&FieldValue> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// A loosely typed value as found in catalog rows and descriptor metadata
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Absent,
}

const TAG_ABSENT: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_TEXT: u8 = 3;

impl FieldValue {
    /// Classify a text field: integer if it parses as one, then float, then text.
    /// Empty fields and the usual null spellings are [FieldValue::Absent].
    pub fn parse(field: &str) -> Self {
        let field = field.trim();
        if field.is_empty() || field.eq_ignore_ascii_case("null") || field == "-" {
            return FieldValue::Absent;
        }
        if let Ok(i) = field.parse::<i64>() {
            return FieldValue::Integer(i);
        }
        match field.parse::<f64>() {
            Ok(f) if f.is_finite() => FieldValue::Float(f),
            Ok(_) => FieldValue::Absent,
            Err(_) => FieldValue::Text(field.to_string()),
        }
    }

    /// Numeric view; text and absent values have none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Text(_) => None,
            FieldValue::Absent => None,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            FieldValue::Absent => w.write_all(&[TAG_ABSENT]),
            FieldValue::Integer(i) => {
                w.write_all(&[TAG_INTEGER])?;
                w.write_all(&i.to_le_bytes())
            }
            FieldValue::Float(f) => {
                w.write_all(&[TAG_FLOAT])?;
                w.write_all(&f.to_le_bytes())
            }
            FieldValue::Text(s) => {
                w.write_all(&[TAG_TEXT])?;
                w.write_all(&(s.len() as u32).to_le_bytes())?;
                w.write_all(s.as_bytes())
            }
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, CatalogError> {
        let tag = read_array::<1, _>(r, "metadata tag")?[0];
        match tag {
            TAG_ABSENT => Ok(FieldValue::Absent),
            TAG_INTEGER => Ok(FieldValue::Integer(i64::from_le_bytes(read_array(
                r,
                "integer metadata",
            )?))),
            TAG_FLOAT => Ok(FieldValue::Float(f64::from_le_bytes(read_array(
                r,
                "float metadata",
            )?))),
            TAG_TEXT => {
                let len = u32::from_le_bytes(read_array(r, "text length")?) as usize;
                Ok(FieldValue::Text(read_string(r, len)?))
            }
            other => Err(CatalogError::Format(format!("unknown metadata tag {other}"))),
        }
    }
}

pub(crate) fn write_key<W: Write>(w: &mut W, key: &str) -> std::io::Result<()> {
    w.write_all(&(key.len() as u16).to_le_bytes())?;
    w.write_all(key.as_bytes())
}

pub(crate) fn read_key<R: Read>(r: &mut R) -> Result<String, CatalogError> {
    let len = u16::from_le_bytes(read_array(r, "metadata key length")?) as usize;
    read_string(r, len)
}

fn read_string<R: Read>(r: &mut R, len: usize) -> Result<String, CatalogError> {
    let mut buf = Vec::new();
    r.take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| CatalogError::from_read(e, "metadata text"))?;
    if buf.len() != len {
        return Err(CatalogError::Format("truncated metadata text".to_string()));
    }
    String::from_utf8(buf).map_err(|_| CatalogError::Format("metadata is not UTF-8".to_string()))
}

pub(crate) fn read_array<const N: usize, R: Read>(
    r: &mut R,
    what: &str,
) -> Result<[u8; N], CatalogError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)
        .map_err(|e| CatalogError::from_read(e, what))?;
    Ok(buf)
}

pub(crate) fn le4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

pub(crate) fn le8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}
