//! Optional tags (auxiliary data) for BAM and SAM records.
//!
//! Optional tags store additional information about alignments such as:
//! - Edit distance (NM:i)
//! - Alignment score (AS:i)
//! - Read group (RG:Z)
//! - MD string (MD:Z)
//! - Many others
//!
//! # Binary Format
//!
//! Each tag is encoded as:
//! - 2 bytes: tag name (e.g., "NM")
//! - 1 byte: value type (A, c, C, s, S, i, I, f, Z, H, B)
//! - N bytes: value (format depends on type)
//!
//! Arrays (`B`) carry a subtype byte (c, C, s, S, i, I, f), a u32 element
//! count, then the elements.
//!
//! # Text Format
//!
//! `NAME:TYPE:VALUE`, where every integer width is written as `i`. Text
//! integers decode to the narrowest binary width that holds them, preferring
//! c, C, s, S, i, I in that order.
//!
//! Unknown type bytes yield [`BamflowError::UnknownTagType`]; lenient readers
//! keep such tags as [`TagValue::Unknown`] with their undecoded bytes.

use crate::error::{BamflowError, Result};
use crate::io::options::Strictness;
use log::warn;
use std::collections::HashSet;
use std::fmt;

/// Tag value types.
///
/// The variant fixes the binary type byte, so a value read from BAM is
/// written back with the same width.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Character (A): single printable character
    Char(u8),
    /// Signed 8-bit integer (c)
    Int8(i8),
    /// Unsigned 8-bit integer (C)
    UInt8(u8),
    /// Signed 16-bit integer (s)
    Int16(i16),
    /// Unsigned 16-bit integer (S)
    UInt16(u16),
    /// Signed 32-bit integer (i)
    Int32(i32),
    /// Unsigned 32-bit integer (I)
    UInt32(u32),
    /// Float (f): IEEE 754 single-precision float
    Float(f32),
    /// String (Z): null-terminated string
    String(String),
    /// Hex string (H): hex-encoded byte array
    Hex(String),
    /// Array (B): typed array of numbers
    Array(ArrayValue),
    /// Tag whose type byte is not recognized, kept undecoded
    Unknown {
        /// The unrecognized type byte
        type_code: u8,
        /// Undecoded payload
        raw: Vec<u8>,
        /// Encoding `raw` is in; it is only written back to that encoding
        encoding: RawEncoding,
    },
}

/// Encoding of an undecoded [`TagValue::Unknown`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEncoding {
    /// SAM value text after `NAME:TYPE:`
    Text,
    /// BAM bytes after the type byte, up to the end of the tag section
    Binary,
}

impl TagValue {
    /// Binary type byte for this value.
    pub fn type_code(&self) -> u8 {
        match self {
            TagValue::Char(_) => b'A',
            TagValue::Int8(_) => b'c',
            TagValue::UInt8(_) => b'C',
            TagValue::Int16(_) => b's',
            TagValue::UInt16(_) => b'S',
            TagValue::Int32(_) => b'i',
            TagValue::UInt32(_) => b'I',
            TagValue::Float(_) => b'f',
            TagValue::String(_) => b'Z',
            TagValue::Hex(_) => b'H',
            TagValue::Array(_) => b'B',
            TagValue::Unknown { type_code, .. } => *type_code,
        }
    }

    /// Whether this value can be written in `encoding`.
    ///
    /// Only undecoded values from the other encoding cannot.
    pub fn is_encodable_as(&self, encoding: RawEncoding) -> bool {
        match self {
            TagValue::Unknown { encoding: own, .. } => *own == encoding,
            _ => true,
        }
    }

    /// Smallest integer variant holding `value` (c, C, s, S, i, I order).
    ///
    /// Returns `None` when the value does not fit any BAM integer width.
    pub fn from_int(value: i64) -> Option<Self> {
        if let Ok(v) = i8::try_from(value) {
            Some(TagValue::Int8(v))
        } else if let Ok(v) = u8::try_from(value) {
            Some(TagValue::UInt8(v))
        } else if let Ok(v) = i16::try_from(value) {
            Some(TagValue::Int16(v))
        } else if let Ok(v) = u16::try_from(value) {
            Some(TagValue::UInt16(v))
        } else if let Ok(v) = i32::try_from(value) {
            Some(TagValue::Int32(v))
        } else if let Ok(v) = u32::try_from(value) {
            Some(TagValue::UInt32(v))
        } else {
            None
        }
    }

    /// Integer value regardless of width.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            TagValue::Int8(v) => Some(v as i64),
            TagValue::UInt8(v) => Some(v as i64),
            TagValue::Int16(v) => Some(v as i64),
            TagValue::UInt16(v) => Some(v as i64),
            TagValue::Int32(v) => Some(v as i64),
            TagValue::UInt32(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Whether this is an integer of any width.
    pub fn is_int(&self) -> bool {
        self.as_int().is_some()
    }

    /// Compare values ignoring integer width.
    ///
    /// SAM text does not record integer width, so `NM:C:5` read from BAM and
    /// `NM:i:5` read from SAM are the same value.
    pub fn value_eq(&self, other: &TagValue) -> bool {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

/// Array value types for tag arrays (B type).
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// Array of signed 8-bit integers
    Int8(Vec<i8>),
    /// Array of unsigned 8-bit integers
    UInt8(Vec<u8>),
    /// Array of signed 16-bit integers
    Int16(Vec<i16>),
    /// Array of unsigned 16-bit integers
    UInt16(Vec<u16>),
    /// Array of signed 32-bit integers
    Int32(Vec<i32>),
    /// Array of unsigned 32-bit integers
    UInt32(Vec<u32>),
    /// Array of 32-bit floats
    Float(Vec<f32>),
}

impl ArrayValue {
    /// Subtype byte (c, C, s, S, i, I, f).
    pub fn subtype(&self) -> u8 {
        match self {
            ArrayValue::Int8(_) => b'c',
            ArrayValue::UInt8(_) => b'C',
            ArrayValue::Int16(_) => b's',
            ArrayValue::UInt16(_) => b'S',
            ArrayValue::Int32(_) => b'i',
            ArrayValue::UInt32(_) => b'I',
            ArrayValue::Float(_) => b'f',
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, subtype: u8, values: &[T]) -> fmt::Result {
    write!(f, "{}", subtype as char)?;
    for v in values {
        write!(f, ",{}", v)?;
    }
    Ok(())
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subtype = self.subtype();
        match self {
            ArrayValue::Int8(v) => join(f, subtype, v),
            ArrayValue::UInt8(v) => join(f, subtype, v),
            ArrayValue::Int16(v) => join(f, subtype, v),
            ArrayValue::UInt16(v) => join(f, subtype, v),
            ArrayValue::Int32(v) => join(f, subtype, v),
            ArrayValue::UInt32(v) => join(f, subtype, v),
            ArrayValue::Float(v) => join(f, subtype, v),
        }
    }
}

/// A single tag with name and value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Two-character tag name (e.g., "NM", "AS", "RG")
    pub name: [u8; 2],
    /// Tag value
    pub value: TagValue,
}

impl Tag {
    /// Create a tag.
    pub fn new(name: [u8; 2], value: TagValue) -> Self {
        Self { name, value }
    }

    /// Get tag name as a string slice.
    ///
    /// # Example
    ///
    /// ```
    /// # use bamflow::io::bam::{Tag, TagValue};
    /// let tag = Tag::new(*b"NM", TagValue::UInt8(5));
    /// assert_eq!(tag.name_str(), "NM");
    /// ```
    pub fn name_str(&self) -> &str {
        std::str::from_utf8(&self.name).unwrap_or("??")
    }

    /// Parse a SAM text tag (`NM:i:5`, `XA:Z:text`, `ZB:B:c,1,-2`).
    ///
    /// With [`Strictness::Lenient`] an unknown type yields
    /// [`TagValue::Unknown`] holding the value text; otherwise it fails with
    /// `UnknownTagType`.
    ///
    /// # Example
    ///
    /// ```
    /// # use bamflow::io::bam::{Tag, TagValue};
    /// # use bamflow::io::Strictness;
    /// let tag = Tag::from_sam("NM:i:300", Strictness::Strict).unwrap();
    /// assert_eq!(tag.value, TagValue::UInt16(300));
    /// assert_eq!(tag.to_string(), "NM:i:300");
    /// ```
    pub fn from_sam(text: &str, strictness: Strictness) -> Result<Self> {
        let mut parts = text.splitn(3, ':');
        let (name, type_str, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(t), Some(v)) => (n, t, v),
            _ => {
                return Err(BamflowError::record(format!(
                    "tag {:?} is not NAME:TYPE:VALUE",
                    text
                )))
            }
        };

        let name: [u8; 2] = name
            .as_bytes()
            .try_into()
            .map_err(|_| BamflowError::record(format!("tag name {:?} must be 2 characters", name)))?;
        let type_code = match type_str.as_bytes() {
            [c] => *c,
            _ => {
                return Err(BamflowError::record(format!(
                    "tag type {:?} must be 1 character",
                    type_str
                )))
            }
        };

        let value = match type_code {
            b'A' => match value.as_bytes() {
                [c] if c.is_ascii_graphic() => TagValue::Char(*c),
                _ => {
                    return Err(BamflowError::record(format!(
                        "tag {}: A value {:?} is not one printable character",
                        text_name(&name),
                        value
                    )))
                }
            },
            b'i' => {
                let parsed: i64 = parse_number(&name, value)?;
                TagValue::from_int(parsed).ok_or_else(|| BamflowError::EncodingOverflow {
                    field: "tag integer",
                    value: parsed.unsigned_abs(),
                    max: u32::MAX as u64,
                })?
            }
            b'f' => TagValue::Float(parse_number(&name, value)?),
            b'Z' => TagValue::String(value.to_string()),
            b'H' => {
                if value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(BamflowError::record(format!(
                        "tag {}: invalid hex string {:?}",
                        text_name(&name),
                        value
                    )));
                }
                TagValue::Hex(value.to_string())
            }
            b'B' => TagValue::Array(parse_text_array(&name, value)?),
            other => {
                let err = BamflowError::UnknownTagType {
                    tag: name,
                    type_code: other,
                };
                if strictness == Strictness::Strict {
                    return Err(err);
                }
                warn!("{}; keeping value undecoded", err);
                TagValue::Unknown {
                    type_code: other,
                    raw: value.as_bytes().to_vec(),
                    encoding: RawEncoding::Text,
                }
            }
        };

        Ok(Tag { name, value })
    }
}

fn text_name(name: &[u8; 2]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn parse_number<T: std::str::FromStr>(name: &[u8; 2], text: &str) -> Result<T> {
    text.parse().map_err(|_| {
        BamflowError::record(format!(
            "tag {}: invalid numeric value {:?}",
            text_name(name),
            text
        ))
    })
}

fn parse_list<T: std::str::FromStr>(name: &[u8; 2], items: &[&str]) -> Result<Vec<T>> {
    items.iter().map(|s| parse_number(name, s)).collect()
}

fn parse_text_array(name: &[u8; 2], text: &str) -> Result<ArrayValue> {
    let mut items = text.split(',');
    let subtype = items.next().unwrap_or_default();
    let values: Vec<&str> = items.collect();

    let array = match subtype {
        "c" => ArrayValue::Int8(parse_list(name, &values)?),
        "C" => ArrayValue::UInt8(parse_list(name, &values)?),
        "s" => ArrayValue::Int16(parse_list(name, &values)?),
        "S" => ArrayValue::UInt16(parse_list(name, &values)?),
        "i" => ArrayValue::Int32(parse_list(name, &values)?),
        "I" => ArrayValue::UInt32(parse_list(name, &values)?),
        "f" => ArrayValue::Float(parse_list(name, &values)?),
        other => {
            return Err(BamflowError::record(format!(
                "tag {}: invalid array subtype {:?}",
                text_name(name),
                other
            )))
        }
    };
    Ok(array)
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name_str())?;
        match &self.value {
            TagValue::Char(c) => write!(f, "A:{}", *c as char),
            TagValue::Int8(_)
            | TagValue::UInt8(_)
            | TagValue::Int16(_)
            | TagValue::UInt16(_)
            | TagValue::Int32(_)
            | TagValue::UInt32(_) => write!(f, "i:{}", self.value.as_int().unwrap_or_default()),
            TagValue::Float(fl) => write!(f, "f:{}", fl),
            TagValue::String(s) => write!(f, "Z:{}", s),
            TagValue::Hex(h) => write!(f, "H:{}", h),
            TagValue::Array(arr) => write!(f, "B:{}", arr),
            TagValue::Unknown {
                type_code,
                raw,
                encoding: RawEncoding::Text,
            } => write!(f, "{}:{}", *type_code as char, String::from_utf8_lossy(raw)),
            // Binary payloads are shown as hex; SAM writers skip them
            TagValue::Unknown {
                type_code,
                raw,
                encoding: RawEncoding::Binary,
            } => {
                write!(f, "{}:", *type_code as char)?;
                raw.iter().try_for_each(|b| write!(f, "{:02X}", b))
            }
        }
    }
}

/// Ordered container of tags.
///
/// Insertion order is preserved and survives both encodings.
///
/// # Example
///
/// ```
/// # use bamflow::io::bam::{Tags, TagValue};
/// let mut tags = Tags::new();
/// tags.insert(*b"NM", TagValue::UInt8(2));
/// tags.insert(*b"RG", TagValue::String("grp1".into()));
///
/// assert_eq!(tags.edit_distance(), Some(2));
/// assert_eq!(tags.read_group(), Some("grp1"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    tags: Vec<Tag>,
}

impl Tags {
    /// Create empty tags.
    pub fn new() -> Self {
        Self { tags: Vec::new() }
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Get a specific tag by name.
    pub fn get(&self, name: &[u8; 2]) -> Option<&Tag> {
        self.tags.iter().find(|t| &t.name == name)
    }

    /// Get a tag value by name.
    pub fn get_value(&self, name: &[u8; 2]) -> Option<&TagValue> {
        self.get(name).map(|t| &t.value)
    }

    /// Replace the value of an existing tag, or append a new one.
    pub fn insert(&mut self, name: [u8; 2], value: TagValue) {
        match self.tags.iter_mut().find(|t| t.name == name) {
            Some(tag) => tag.value = value,
            None => self.tags.push(Tag { name, value }),
        }
    }

    /// Append a tag without checking for an existing one of the same name.
    pub(crate) fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    /// Remove a tag, returning its value.
    pub fn remove(&mut self, name: &[u8; 2]) -> Option<TagValue> {
        let idx = self.tags.iter().position(|t| &t.name == name)?;
        Some(self.tags.remove(idx).value)
    }

    /// Iterate over all tags in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Compare two tag lists ignoring integer width.
    pub fn value_eq(&self, other: &Tags) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.name == b.name && a.value.value_eq(&b.value))
    }

    /// Get an integer tag value of any width.
    pub fn get_int(&self, name: &[u8; 2]) -> Option<i64> {
        self.get_value(name).and_then(TagValue::as_int)
    }

    /// Get a string (Z) tag value.
    pub fn get_string(&self, name: &[u8; 2]) -> Option<&str> {
        match self.get_value(name)? {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get a character (A) tag value.
    pub fn get_char(&self, name: &[u8; 2]) -> Option<u8> {
        match self.get_value(name)? {
            TagValue::Char(c) => Some(*c),
            _ => None,
        }
    }

    /// Get a float (f) tag value.
    pub fn get_float(&self, name: &[u8; 2]) -> Option<f32> {
        match self.get_value(name)? {
            TagValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get a hex (H) tag value.
    pub fn get_hex(&self, name: &[u8; 2]) -> Option<&str> {
        match self.get_value(name)? {
            TagValue::Hex(h) => Some(h),
            _ => None,
        }
    }

    /// Get an array (B) tag value.
    pub fn get_array(&self, name: &[u8; 2]) -> Option<&ArrayValue> {
        match self.get_value(name)? {
            TagValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Edit distance to the reference (NM).
    pub fn edit_distance(&self) -> Option<i64> {
        self.get_int(b"NM")
    }

    /// Alignment score (AS).
    pub fn alignment_score(&self) -> Option<i64> {
        self.get_int(b"AS")
    }

    /// Read group (RG).
    pub fn read_group(&self) -> Option<&str> {
        self.get_string(b"RG")
    }

    /// Mismatching positions (MD).
    pub fn md_string(&self) -> Option<&str> {
        self.get_string(b"MD")
    }

    /// Cell barcode (CB).
    pub fn barcode(&self) -> Option<&str> {
        self.get_string(b"CB")
    }

    /// Molecular identifier (RX).
    pub fn umi(&self) -> Option<&str> {
        self.get_string(b"RX")
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

fn take<'a>(data: &'a [u8], n: usize, name: &[u8; 2]) -> Result<&'a [u8]> {
    data.get(..n).ok_or_else(|| {
        BamflowError::record(format!(
            "tag {}: need {} bytes, {} left",
            text_name(name),
            n,
            data.len()
        ))
    })
}

macro_rules! read_array {
    ($data:expr, $count:expr, $name:expr, $ty:ty, $width:expr) => {{
        let bytes = take($data, $count * $width, $name)?;
        bytes
            .chunks_exact($width)
            .map(|c| <$ty>::from_le_bytes(c.try_into().unwrap_or_default()))
            .collect::<Vec<$ty>>()
    }};
}

/// Parse one binary tag value.
///
/// Returns the value and the number of bytes consumed from `data`.
pub fn parse_tag_value(data: &[u8], name: &[u8; 2], type_code: u8) -> Result<(TagValue, usize)> {
    let value = match type_code {
        b'A' => (TagValue::Char(take(data, 1, name)?[0]), 1),
        b'c' => (TagValue::Int8(take(data, 1, name)?[0] as i8), 1),
        b'C' => (TagValue::UInt8(take(data, 1, name)?[0]), 1),
        b's' => {
            let b = take(data, 2, name)?;
            (TagValue::Int16(i16::from_le_bytes([b[0], b[1]])), 2)
        }
        b'S' => {
            let b = take(data, 2, name)?;
            (TagValue::UInt16(u16::from_le_bytes([b[0], b[1]])), 2)
        }
        b'i' => {
            let b = take(data, 4, name)?;
            (TagValue::Int32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])), 4)
        }
        b'I' => {
            let b = take(data, 4, name)?;
            (TagValue::UInt32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])), 4)
        }
        b'f' => {
            let b = take(data, 4, name)?;
            (TagValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])), 4)
        }
        b'Z' | b'H' => {
            let end = data.iter().position(|&b| b == 0).ok_or_else(|| {
                BamflowError::record(format!(
                    "tag {}: string is not null-terminated",
                    text_name(name)
                ))
            })?;
            let s = std::str::from_utf8(&data[..end])
                .map_err(|_| {
                    BamflowError::record(format!("tag {}: invalid UTF-8", text_name(name)))
                })?
                .to_string();
            let value = if type_code == b'Z' {
                TagValue::String(s)
            } else {
                TagValue::Hex(s)
            };
            (value, end + 1)
        }
        b'B' => {
            let header = take(data, 5, name)?;
            let subtype = header[0];
            let count = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
            let body = &data[5..];
            let (array, width) = match subtype {
                b'c' => (ArrayValue::Int8(read_array!(body, count, name, i8, 1)), 1),
                b'C' => (ArrayValue::UInt8(read_array!(body, count, name, u8, 1)), 1),
                b's' => (ArrayValue::Int16(read_array!(body, count, name, i16, 2)), 2),
                b'S' => (ArrayValue::UInt16(read_array!(body, count, name, u16, 2)), 2),
                b'i' => (ArrayValue::Int32(read_array!(body, count, name, i32, 4)), 4),
                b'I' => (ArrayValue::UInt32(read_array!(body, count, name, u32, 4)), 4),
                b'f' => (ArrayValue::Float(read_array!(body, count, name, f32, 4)), 4),
                other => {
                    return Err(BamflowError::record(format!(
                        "tag {}: invalid array subtype {:?}",
                        text_name(name),
                        other as char
                    )))
                }
            };
            (TagValue::Array(array), 5 + count * width)
        }
        other => {
            return Err(BamflowError::UnknownTagType {
                tag: *name,
                type_code: other,
            })
        }
    };
    Ok(value)
}

/// Parse the binary tag section of a BAM record.
///
/// Strict mode rejects unknown types and duplicate names. Lenient mode keeps
/// an unknown-typed tag as [`TagValue::Unknown`] holding all remaining bytes
/// (its width cannot be known) and keeps duplicates with a warning.
pub fn parse_tags(data: &[u8], strictness: Strictness) -> Result<Tags> {
    let mut tags = Tags::new();
    let mut seen = HashSet::new();
    let mut cursor = 0;

    while cursor < data.len() {
        if cursor + 3 > data.len() {
            return Err(BamflowError::record(format!(
                "incomplete tag header at offset {}",
                cursor
            )));
        }
        let name = [data[cursor], data[cursor + 1]];
        let type_code = data[cursor + 2];
        cursor += 3;

        if !seen.insert(name) {
            let msg = format!("duplicate tag {}", text_name(&name));
            if strictness == Strictness::Strict {
                return Err(BamflowError::record(msg));
            }
            warn!("{}; keeping both", msg);
        }

        match parse_tag_value(&data[cursor..], &name, type_code) {
            Ok((value, consumed)) => {
                tags.push(Tag { name, value });
                cursor += consumed;
            }
            Err(err @ BamflowError::UnknownTagType { .. }) if strictness == Strictness::Lenient => {
                warn!("{}; keeping remaining {} bytes undecoded", err, data.len() - cursor);
                tags.push(Tag {
                    name,
                    value: TagValue::Unknown {
                        type_code,
                        raw: data[cursor..].to_vec(),
                        encoding: RawEncoding::Binary,
                    },
                });
                break;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(tags)
}

fn write_cstring(name: &[u8; 2], s: &str, out: &mut Vec<u8>) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(BamflowError::record(format!(
            "tag {}: string contains a NUL byte",
            text_name(name)
        )));
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

/// Encode one tag, appending name, type byte and payload to `out`.
///
/// An undecoded tag read from SAM text fails with `UnknownTagType`; its
/// binary width is unknown.
pub fn encode_tag(tag: &Tag, out: &mut Vec<u8>) -> Result<()> {
    if !tag.value.is_encodable_as(RawEncoding::Binary) {
        return Err(BamflowError::UnknownTagType {
            tag: tag.name,
            type_code: tag.value.type_code(),
        });
    }
    out.extend_from_slice(&tag.name);
    out.push(tag.value.type_code());

    match &tag.value {
        TagValue::Char(c) => out.push(*c),
        TagValue::Int8(v) => out.push(*v as u8),
        TagValue::UInt8(v) => out.push(*v),
        TagValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        TagValue::String(s) | TagValue::Hex(s) => write_cstring(&tag.name, s, out)?,
        TagValue::Array(array) => {
            let count = u32::try_from(array.len()).map_err(|_| BamflowError::EncodingOverflow {
                field: "tag array length",
                value: array.len() as u64,
                max: u32::MAX as u64,
            })?;
            out.push(array.subtype());
            out.extend_from_slice(&count.to_le_bytes());
            match array {
                ArrayValue::Int8(v) => out.extend(v.iter().map(|x| *x as u8)),
                ArrayValue::UInt8(v) => out.extend_from_slice(v),
                ArrayValue::Int16(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::UInt16(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::Int32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::UInt32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            }
        }
        TagValue::Unknown { raw, .. } => out.extend_from_slice(raw),
    }

    Ok(())
}

/// Encode all tags in order, appending to `out`.
///
/// Undecoded tags read from SAM text are dropped with a warning.
pub fn encode_tags(tags: &Tags, out: &mut Vec<u8>) -> Result<()> {
    for tag in tags {
        if !tag.value.is_encodable_as(RawEncoding::Binary) {
            warn!(
                "dropping tag {}: type {:?} has no binary encoding",
                tag.name_str(),
                tag.value.type_code() as char
            );
            continue;
        }
        encode_tag(tag, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sam(text: &str) -> Tag {
        Tag::from_sam(text, Strictness::Strict).unwrap()
    }

    #[test]
    fn test_parse_binary_integers() {
        let data = vec![
            b'X', b'1', b'c', 0xFE, // -2
            b'X', b'2', b'C', 200, //
            b'X', b'3', b's', 0x00, 0x80, // -32768
            b'X', b'4', b'S', 0xFF, 0xFF, // 65535
            b'N', b'M', b'i', 5, 0, 0, 0, //
            b'X', b'6', b'I', 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let tags = parse_tags(&data, Strictness::Strict).unwrap();
        let values: Vec<_> = tags.iter().map(|t| t.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                TagValue::Int8(-2),
                TagValue::UInt8(200),
                TagValue::Int16(i16::MIN),
                TagValue::UInt16(u16::MAX),
                TagValue::Int32(5),
                TagValue::UInt32(u32::MAX),
            ]
        );
        assert_eq!(tags.edit_distance(), Some(5));
    }

    #[test]
    fn test_parse_binary_strings_and_float() {
        let mut data = vec![b'R', b'G', b'Z'];
        data.extend_from_slice(b"group1\0");
        data.extend_from_slice(&[b'H', b'X', b'H']);
        data.extend_from_slice(b"1AE3\0");
        data.extend_from_slice(&[b'F', b'V', b'f', 0x00, 0x00, 0x80, 0x3F]);
        data.extend_from_slice(&[b'C', b'C', b'A', b'X']);

        let tags = parse_tags(&data, Strictness::Strict).unwrap();
        assert_eq!(tags.read_group(), Some("group1"));
        assert_eq!(tags.get_hex(b"HX"), Some("1AE3"));
        assert_eq!(tags.get_float(b"FV"), Some(1.0));
        assert_eq!(tags.get_char(b"CC"), Some(b'X'));
    }

    #[test]
    fn test_parse_binary_array() {
        let data = vec![
            b'Z', b'B', b'B', b's', 3, 0, 0, 0, // subtype s, count 3
            0x01, 0x00, 0xFF, 0xFF, 0x00, 0x01,
        ];
        let tags = parse_tags(&data, Strictness::Strict).unwrap();
        assert_eq!(
            tags.get_array(b"ZB"),
            Some(&ArrayValue::Int16(vec![1, -1, 256]))
        );
        assert_eq!(tags.get(b"ZB").unwrap().to_string(), "ZB:B:s,1,-1,256");
    }

    #[test]
    fn test_truncated_value() {
        let data = vec![b'N', b'M', b'i', 5, 0];
        let err = parse_tags(&data, Strictness::Strict).unwrap_err();
        assert!(matches!(err, BamflowError::MalformedRecord { .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let data = vec![b'R', b'G', b'Z', b'a', b'b'];
        assert!(parse_tags(&data, Strictness::Lenient).is_err());
    }

    #[test]
    fn test_unknown_type_strict() {
        let data = vec![b'X', b'Y', b'q', 1, 2, 3];
        let err = parse_tags(&data, Strictness::Strict).unwrap_err();
        assert_eq!(err.to_string(), "Unknown tag type for XY: 'q'");
    }

    #[test]
    fn test_unknown_type_lenient_keeps_raw() {
        let data = vec![b'N', b'M', b'C', 1, b'X', b'Y', b'q', 1, 2, 3];
        let tags = parse_tags(&data, Strictness::Lenient).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(
            tags.get_value(b"XY"),
            Some(&TagValue::Unknown {
                type_code: b'q',
                raw: vec![1, 2, 3],
                encoding: RawEncoding::Binary,
            })
        );

        // Re-encoding reproduces the input bytes
        let mut out = Vec::new();
        encode_tags(&tags, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_duplicate_tags() {
        let data = vec![b'N', b'M', b'C', 1, b'N', b'M', b'C', 2];
        let err = parse_tags(&data, Strictness::Strict).unwrap_err();
        assert!(err.to_string().contains("duplicate tag NM"));

        let tags = parse_tags(&data, Strictness::Lenient).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.edit_distance(), Some(1));
    }

    #[test]
    fn test_binary_roundtrip_preserves_type_bytes() {
        let tags: Tags = [
            Tag::new(*b"AA", TagValue::Char(b'z')),
            Tag::new(*b"BB", TagValue::Int8(-5)),
            Tag::new(*b"CC", TagValue::UInt16(60000)),
            Tag::new(*b"DD", TagValue::UInt32(4_000_000_000)),
            Tag::new(*b"EE", TagValue::Float(-0.5)),
            Tag::new(*b"FF", TagValue::String(String::new())),
            Tag::new(*b"GG", TagValue::Hex("00FF".into())),
            Tag::new(*b"HH", TagValue::Array(ArrayValue::Float(vec![]))),
            Tag::new(*b"II", TagValue::Array(ArrayValue::UInt32(vec![1, 2]))),
        ]
        .into_iter()
        .collect();

        let mut out = Vec::new();
        encode_tags(&tags, &mut out).unwrap();
        let parsed = parse_tags(&out, Strictness::Strict).unwrap();
        assert_eq!(parsed, tags);
        for (a, b) in parsed.iter().zip(tags.iter()) {
            assert_eq!(a.value.type_code(), b.value.type_code());
        }
    }

    #[test]
    fn test_text_integer_narrowest_width() {
        assert_eq!(sam("XA:i:-1").value, TagValue::Int8(-1));
        assert_eq!(sam("XA:i:127").value, TagValue::Int8(127));
        assert_eq!(sam("XA:i:128").value, TagValue::UInt8(128));
        assert_eq!(sam("XA:i:-129").value, TagValue::Int16(-129));
        assert_eq!(sam("XA:i:40000").value, TagValue::UInt16(40000));
        assert_eq!(sam("XA:i:-40000").value, TagValue::Int32(-40000));
        assert_eq!(sam("XA:i:3000000000").value, TagValue::UInt32(3_000_000_000));

        let err = Tag::from_sam("XA:i:5000000000", Strictness::Strict).unwrap_err();
        assert!(matches!(err, BamflowError::EncodingOverflow { .. }));
    }

    #[test]
    fn test_text_display_writes_every_width_as_i() {
        let tag = Tag::new(*b"NM", TagValue::UInt32(7));
        assert_eq!(tag.to_string(), "NM:i:7");
        let tag = Tag::new(*b"NM", TagValue::Int16(-7));
        assert_eq!(tag.to_string(), "NM:i:-7");
    }

    #[test]
    fn test_text_roundtrip() {
        for text in [
            "RG:Z:sample one",
            "CC:A:=",
            "FV:f:1.5",
            "HX:H:1AE301",
            "ZB:B:c,1,-2,3",
            "ZC:B:f",
            "XS:Z:a:b:c",
            "NM:i:0",
        ] {
            assert_eq!(sam(text).to_string(), text);
        }
    }

    #[test]
    fn test_text_errors() {
        for bad in [
            "NM:i",
            "NMX:i:1",
            "NM:ii:1",
            "NM:i:abc",
            "CC:A:xy",
            "HX:H:1G",
            "HX:H:123",
            "ZB:B:q,1",
        ] {
            assert!(
                Tag::from_sam(bad, Strictness::Strict).is_err(),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn test_text_unknown_type() {
        let err = Tag::from_sam("XY:q:hello", Strictness::Strict).unwrap_err();
        assert!(matches!(err, BamflowError::UnknownTagType { type_code: b'q', .. }));

        let tag = Tag::from_sam("XY:q:hello", Strictness::Lenient).unwrap();
        assert_eq!(
            tag.value,
            TagValue::Unknown {
                type_code: b'q',
                raw: b"hello".to_vec(),
                encoding: RawEncoding::Text,
            }
        );
        assert_eq!(tag.to_string(), "XY:q:hello");
    }

    #[test]
    fn test_text_unknown_not_written_as_binary() {
        let unknown = Tag::from_sam("XY:q:hello", Strictness::Lenient).unwrap();
        assert!(unknown.value.is_encodable_as(RawEncoding::Text));
        assert!(!unknown.value.is_encodable_as(RawEncoding::Binary));

        let mut out = Vec::new();
        let err = encode_tag(&unknown, &mut out).unwrap_err();
        assert!(matches!(err, BamflowError::UnknownTagType { tag: [b'X', b'Y'], .. }));
        assert!(out.is_empty());

        let tags: Tags = [unknown, sam("NM:i:1")].into_iter().collect();
        encode_tags(&tags, &mut out).unwrap();
        let parsed = parse_tags(&out, Strictness::Strict).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.edit_distance(), Some(1));
    }

    #[test]
    fn test_binary_unknown_shown_as_hex() {
        let data = vec![b'X', b'Y', b'q', 0x00, b'\t', 0xAB];
        let tags = parse_tags(&data, Strictness::Lenient).unwrap();
        let tag = tags.get(b"XY").unwrap();
        assert!(!tag.value.is_encodable_as(RawEncoding::Text));
        assert_eq!(tag.to_string(), "XY:q:0009AB");
    }

    #[test]
    fn test_value_eq_ignores_width() {
        assert!(TagValue::UInt8(5).value_eq(&TagValue::Int32(5)));
        assert!(!TagValue::UInt8(5).value_eq(&TagValue::Int32(6)));
        assert!(!TagValue::UInt8(5).value_eq(&TagValue::Float(5.0)));
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut tags = Tags::new();
        tags.insert(*b"NM", TagValue::UInt8(1));
        tags.insert(*b"AS", TagValue::Int32(-3));
        tags.insert(*b"NM", TagValue::UInt8(2));

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.iter().next().map(|t| t.name), Some(*b"NM"));
        assert_eq!(tags.edit_distance(), Some(2));
        assert_eq!(tags.alignment_score(), Some(-3));

        assert_eq!(tags.remove(b"NM"), Some(TagValue::UInt8(2)));
        assert_eq!(tags.remove(b"NM"), None);
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_string_with_nul_rejected() {
        let tag = Tag::new(*b"XZ", TagValue::String("a\0b".into()));
        assert!(encode_tag(&tag, &mut Vec::new()).is_err());
    }
}
