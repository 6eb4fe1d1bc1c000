//! Alignment record model and BAM binary codec.
//!
//! A record represents a single alignment (read mapped to reference).
//! Each record contains alignment information, sequence data, quality scores,
//! and optional tags.
//!
//! Positions in [`Record`] are 1-based, as in SAM text. The binary codec
//! converts to and from the 0-based BAM encoding.
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Total record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for unmapped)
//! - pos (int32): 0-based leftmost position (-1 for unmapped)
//! - l_read_name (uint8): Length of read name (includes null terminator)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): Null-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores (0xFF run = absent)
//! - tags: Optional tags (variable length)
//! ```

use super::cigar::{self, encode_cigar, parse_cigar, CigarOp};
use super::header::Header;
use super::sequence::{decode_sequence, encode_sequence};
use super::tags::{encode_tag, parse_tags, ArrayValue, RawEncoding, Tag, TagValue, Tags};
use crate::error::{BamflowError, Result};
use crate::io::options::Strictness;
use log::warn;

/// Size of the fixed record section following `block_size`.
pub const FIXED_RECORD_SIZE: usize = 32;

/// Largest CIGAR that fits `n_cigar_op`; longer ones go to the `CG` tag.
pub const MAX_INLINE_CIGAR_OPS: usize = u16::MAX as usize;

/// Bin of a record with no position.
pub const UNMAPPED_BIN: u16 = 4680;

/// Bitwise FLAG values.
pub mod flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence is reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template
    pub const FIRST_SEGMENT: u16 = 0x40;
    /// Last segment in the template
    pub const LAST_SEGMENT: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Failed quality checks
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;
}

fn read_i32_le(data: &[u8], cursor: &mut usize) -> Result<i32> {
    let bytes = data.get(*cursor..*cursor + 4).ok_or_else(|| {
        BamflowError::record(format!(
            "insufficient data at offset {}: need 4 bytes for i32",
            *cursor
        ))
    })?;
    *cursor += 4;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16_le(data: &[u8], cursor: &mut usize) -> Result<u16> {
    let bytes = data.get(*cursor..*cursor + 2).ok_or_else(|| {
        BamflowError::record(format!(
            "insufficient data at offset {}: need 2 bytes for u16",
            *cursor
        ))
    })?;
    *cursor += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u8(data: &[u8], cursor: &mut usize) -> Result<u8> {
    let value = *data.get(*cursor).ok_or_else(|| {
        BamflowError::record(format!("insufficient data at offset {}: need 1 byte", *cursor))
    })?;
    *cursor += 1;
    Ok(value)
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize, what: &str) -> Result<&'a [u8]> {
    let bytes = data.get(*cursor..*cursor + len).ok_or_else(|| {
        BamflowError::record(format!(
            "insufficient data for {} at offset {}: need {} bytes, got {}",
            what,
            *cursor,
            len,
            data.len().saturating_sub(*cursor)
        ))
    })?;
    *cursor += len;
    Ok(bytes)
}

/// Reference IDs are -1 (unmapped) or non-negative.
fn parse_reference_id(ref_id: i32, field: &str) -> Result<Option<usize>> {
    match ref_id {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as usize)),
        invalid => Err(BamflowError::record(format!(
            "invalid {} reference ID {}",
            field, invalid
        ))),
    }
}

/// 0-based BAM position to 1-based.
fn parse_position(pos: i32, field: &str) -> Result<Option<i32>> {
    match pos {
        -1 => Ok(None),
        n if n >= 0 => n
            .checked_add(1)
            .map(Some)
            .ok_or_else(|| BamflowError::record(format!("{} {} out of range", field, n))),
        invalid => Err(BamflowError::record(format!("invalid {} {}", field, invalid))),
    }
}

/// Alignment record.
///
/// Represents a single read alignment with all associated information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Read name/query name
    pub name: String,
    /// Reference sequence ID (index into the header dictionary);
    /// None if unplaced
    pub reference_id: Option<usize>,
    /// 1-based leftmost mapping position; None if unplaced
    pub position: Option<i32>,
    /// Mapping quality; None if unavailable (255)
    pub mapq: Option<u8>,
    /// Bitwise FLAGS, see [`flags`]
    pub flags: u16,
    /// Mate/next segment reference ID
    pub mate_reference_id: Option<usize>,
    /// Mate/next segment 1-based position
    pub mate_position: Option<i32>,
    /// Template length (TLEN)
    pub template_length: i32,
    /// Sequence bases (ASCII); empty if unavailable
    pub sequence: Vec<u8>,
    /// Raw Phred quality scores (no +33 offset); empty if absent
    pub quality: Vec<u8>,
    /// CIGAR operations; empty if unavailable
    pub cigar: Vec<CigarOp>,
    /// Optional tags
    pub tags: Tags,
}

impl Record {
    /// Create a new empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the read is paired.
    pub fn is_paired(&self) -> bool {
        self.flags & flags::PAIRED != 0
    }

    /// Check if both segments are properly aligned.
    pub fn is_proper_pair(&self) -> bool {
        self.flags & flags::PROPER_PAIR != 0
    }

    /// Check if the read is unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.flags & flags::UNMAPPED != 0
    }

    /// Check if the mate is unmapped.
    pub fn is_mate_unmapped(&self) -> bool {
        self.flags & flags::MATE_UNMAPPED != 0
    }

    /// Check if the read is a reverse complement.
    pub fn is_reverse_complement(&self) -> bool {
        self.flags & flags::REVERSE != 0
    }

    /// Check if the mate is a reverse complement.
    pub fn is_mate_reverse_complement(&self) -> bool {
        self.flags & flags::MATE_REVERSE != 0
    }

    /// Check if this is the first segment of the template.
    pub fn is_first_segment(&self) -> bool {
        self.flags & flags::FIRST_SEGMENT != 0
    }

    /// Check if this is the last segment of the template.
    pub fn is_last_segment(&self) -> bool {
        self.flags & flags::LAST_SEGMENT != 0
    }

    /// Check if this is a secondary alignment.
    pub fn is_secondary(&self) -> bool {
        self.flags & flags::SECONDARY != 0
    }

    /// Check if the read failed quality checks.
    pub fn is_qc_fail(&self) -> bool {
        self.flags & flags::QC_FAIL != 0
    }

    /// Check if the read is a duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.flags & flags::DUPLICATE != 0
    }

    /// Check if this is a supplementary alignment.
    pub fn is_supplementary(&self) -> bool {
        self.flags & flags::SUPPLEMENTARY != 0
    }

    /// Get sequence length.
    pub fn sequence_length(&self) -> usize {
        self.sequence.len()
    }

    /// 1-based inclusive end position on the reference.
    ///
    /// Returns `None` when unplaced or when the CIGAR is empty.
    pub fn reference_end(&self) -> Option<i64> {
        let start = self.position? as i64;
        let span = cigar::reference_length(&self.cigar) as i64;
        (span > 0).then(|| start + span - 1)
    }

    /// Check record invariants against a header.
    ///
    /// - reference and mate reference IDs index the dictionary
    /// - positions are at least 1
    /// - CIGAR operations are non-empty and, with a sequence present, the
    ///   CIGAR query length equals the sequence length
    /// - quality, when present with a sequence, matches the sequence length
    pub fn validate(&self, header: &Header) -> Result<()> {
        for (field, id) in [
            ("reference", self.reference_id),
            ("mate reference", self.mate_reference_id),
        ] {
            if let Some(id) = id {
                if id >= header.reference_count() {
                    return Err(BamflowError::record(format!(
                        "{}: {} ID {} not in header ({} references)",
                        self.name,
                        field,
                        id,
                        header.reference_count()
                    )));
                }
            }
        }

        for (field, pos) in [("position", self.position), ("mate position", self.mate_position)] {
            if let Some(pos) = pos {
                if pos < 1 {
                    return Err(BamflowError::record(format!(
                        "{}: {} {} is not 1-based",
                        self.name, field, pos
                    )));
                }
            }
        }

        if let Some(op) = self.cigar.iter().find(|op| op.is_empty()) {
            return Err(BamflowError::cigar(format!(
                "{}: zero-length {} operation",
                self.name,
                op.as_char()
            )));
        }

        if !self.cigar.is_empty() && !self.sequence.is_empty() {
            let query_len = cigar::query_length(&self.cigar);
            if query_len != self.sequence.len() as u64 {
                return Err(BamflowError::record(format!(
                    "{}: CIGAR {} covers {} bases but sequence has {}",
                    self.name,
                    cigar::format_cigar(&self.cigar),
                    query_len,
                    self.sequence.len()
                )));
            }
        }

        if !self.sequence.is_empty()
            && !self.quality.is_empty()
            && self.quality.len() != self.sequence.len()
        {
            return Err(BamflowError::record(format!(
                "{}: {} quality scores for {} bases",
                self.name,
                self.quality.len(),
                self.sequence.len()
            )));
        }

        Ok(())
    }

    /// Compare two records, treating integer tags of different widths as equal.
    pub fn value_eq(&self, other: &Record) -> bool {
        self.name == other.name
            && self.reference_id == other.reference_id
            && self.position == other.position
            && self.mapq == other.mapq
            && self.flags == other.flags
            && self.mate_reference_id == other.mate_reference_id
            && self.mate_position == other.mate_position
            && self.template_length == other.template_length
            && self.sequence == other.sequence
            && self.quality == other.quality
            && self.cigar == other.cigar
            && self.tags.value_eq(&other.tags)
    }
}

/// Replace a `kS mN` placeholder CIGAR with the real one from a `CG:B,I` tag.
///
/// The `CG` tag is removed when it is used.
fn restore_oversized_cigar(cigar: Vec<CigarOp>, sequence_length: usize, tags: &mut Tags) -> Result<Vec<CigarOp>> {
    let is_placeholder = match cigar.as_slice() {
        [CigarOp::SoftClip(len), CigarOp::RefSkip(_)] => {
            sequence_length == 0 || *len as usize == sequence_length
        }
        _ => false,
    };
    if !is_placeholder {
        return Ok(cigar);
    }

    let words: Vec<u8> = match tags.get_array(b"CG") {
        Some(ArrayValue::UInt32(words)) => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        Some(ArrayValue::Int32(words)) => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        _ => return Ok(cigar),
    };

    let real = parse_cigar(&words, words.len() / 4)?;
    tags.remove(b"CG");
    Ok(real)
}

/// Parse a BAM record body (the bytes following `block_size`).
///
/// Unknown tag types and duplicate tags follow `strictness`; every other
/// problem fails with a record-scoped error.
pub fn parse_record(data: &[u8], strictness: Strictness) -> Result<Record> {
    if data.len() < FIXED_RECORD_SIZE {
        return Err(BamflowError::record(format!(
            "record too short: {} bytes (minimum {})",
            data.len(),
            FIXED_RECORD_SIZE
        )));
    }

    let mut cursor = 0;

    let ref_id = read_i32_le(data, &mut cursor)?;
    let pos = read_i32_le(data, &mut cursor)?;
    let l_read_name = read_u8(data, &mut cursor)? as usize;
    if l_read_name == 0 {
        return Err(BamflowError::record("l_read_name is zero"));
    }
    let mapq = read_u8(data, &mut cursor)?;
    let _bin = read_u16_le(data, &mut cursor)?;
    let n_cigar_op = read_u16_le(data, &mut cursor)? as usize;
    let flags = read_u16_le(data, &mut cursor)?;
    let l_seq = read_i32_le(data, &mut cursor)?;
    let l_seq = usize::try_from(l_seq)
        .map_err(|_| BamflowError::record(format!("invalid sequence length {}", l_seq)))?;
    let next_ref_id = read_i32_le(data, &mut cursor)?;
    let next_pos = read_i32_le(data, &mut cursor)?;
    let tlen = read_i32_le(data, &mut cursor)?;

    let name_bytes = take(data, &mut cursor, l_read_name, "read name")?;
    let name = match name_bytes.split_last() {
        Some((&0, name)) => String::from_utf8(name.to_vec())
            .map_err(|e| BamflowError::record(format!("invalid UTF-8 in read name: {}", e)))?,
        _ => return Err(BamflowError::record("read name not null-terminated")),
    };

    let cigar_bytes = take(data, &mut cursor, n_cigar_op * 4, "CIGAR")?;
    let cigar = parse_cigar(cigar_bytes, n_cigar_op)?;

    let seq_bytes = take(data, &mut cursor, l_seq.div_ceil(2), "sequence")?;
    let sequence = decode_sequence(seq_bytes, l_seq)?;

    let quality_bytes = take(data, &mut cursor, l_seq, "quality scores")?;
    let quality = if quality_bytes.iter().all(|&b| b == 0xFF) {
        Vec::new()
    } else {
        quality_bytes.to_vec()
    };

    let mut tags = parse_tags(&data[cursor..], strictness)?;
    let cigar = restore_oversized_cigar(cigar, l_seq, &mut tags)?;

    Ok(Record {
        name,
        reference_id: parse_reference_id(ref_id, "read")?,
        position: parse_position(pos, "position")?,
        mapq: (mapq != 255).then_some(mapq),
        flags,
        mate_reference_id: parse_reference_id(next_ref_id, "mate")?,
        mate_position: parse_position(next_pos, "mate position")?,
        template_length: tlen,
        sequence,
        quality,
        cigar,
        tags,
    })
}

/// Compute the BAI bin for a 0-based half-open interval `[beg, end)`.
///
/// Uses the standard UCSC binning scheme with 14-bit minimum bins.
pub fn reg2bin(beg: i64, end: i64) -> u16 {
    let end = end - 1;
    let bin = if beg >> 14 == end >> 14 {
        ((1 << 15) - 1) / 7 + (beg >> 14)
    } else if beg >> 17 == end >> 17 {
        ((1 << 12) - 1) / 7 + (beg >> 17)
    } else if beg >> 20 == end >> 20 {
        ((1 << 9) - 1) / 7 + (beg >> 20)
    } else if beg >> 23 == end >> 23 {
        ((1 << 6) - 1) / 7 + (beg >> 23)
    } else if beg >> 26 == end >> 26 {
        ((1 << 3) - 1) / 7 + (beg >> 26)
    } else {
        0
    };
    bin as u16
}

fn overflow(field: &'static str, value: u64, max: u64) -> BamflowError {
    BamflowError::EncodingOverflow { field, value, max }
}

fn encode_reference_id(id: Option<usize>, field: &'static str) -> Result<i32> {
    match id {
        None => Ok(-1),
        Some(id) => i32::try_from(id).map_err(|_| overflow(field, id as u64, i32::MAX as u64)),
    }
}

/// 1-based position to the 0-based BAM encoding.
fn encode_position(pos: Option<i32>, name: &str, field: &str) -> Result<i32> {
    match pos {
        None => Ok(-1),
        Some(p) if p >= 1 => Ok(p - 1),
        Some(p) => Err(BamflowError::record(format!(
            "{}: {} {} is not 1-based",
            name, field, p
        ))),
    }
}

/// Encode a record, appending `block_size` and the body to `out`.
///
/// On error `out` is left as it was.
///
/// # Errors
///
/// `EncodingOverflow` when a value does not fit its fixed-width field:
/// - read name longer than 254 bytes
/// - reference index above `i32::MAX`
/// - sequence length or block size above `i32::MAX`
/// - CIGAR operation length of 2^28 or more
pub fn encode_record(record: &Record, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    let result = encode_body(record, out, start);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

fn encode_body(record: &Record, out: &mut Vec<u8>, start: usize) -> Result<()> {
    let name = record.name.as_bytes();
    if name.contains(&0) {
        return Err(BamflowError::record(format!(
            "read name {:?} contains a NUL byte",
            record.name
        )));
    }
    let l_read_name = u8::try_from(name.len() + 1)
        .map_err(|_| overflow("l_read_name", name.len() as u64 + 1, u8::MAX as u64))?;

    let l_seq = i32::try_from(record.sequence.len())
        .map_err(|_| overflow("l_seq", record.sequence.len() as u64, i32::MAX as u64))?;
    let has_sequence = !record.sequence.is_empty();
    if has_sequence && !record.quality.is_empty() && record.quality.len() != record.sequence.len() {
        return Err(BamflowError::record(format!(
            "{}: {} quality scores for {} bases",
            record.name,
            record.quality.len(),
            record.sequence.len()
        )));
    }

    let ref_id = encode_reference_id(record.reference_id, "refID")?;
    let next_ref_id = encode_reference_id(record.mate_reference_id, "next_refID")?;
    let pos = encode_position(record.position, &record.name, "position")?;
    let next_pos = encode_position(record.mate_position, &record.name, "mate position")?;

    let ref_len = cigar::reference_length(&record.cigar) as i64;
    let bin = match record.position {
        None => UNMAPPED_BIN,
        Some(_) => {
            let beg = pos as i64;
            reg2bin(beg, beg + ref_len.max(1))
        }
    };

    // Oversized CIGARs are stored in CG with a kS mN placeholder
    let oversized = record.cigar.len() > MAX_INLINE_CIGAR_OPS;
    let placeholder;
    let inline_cigar: &[CigarOp] = if oversized {
        let query_len = cigar::query_length(&record.cigar);
        placeholder = [
            CigarOp::SoftClip(query_len.min(cigar::MAX_OP_LENGTH as u64) as u32),
            CigarOp::RefSkip(ref_len.min(cigar::MAX_OP_LENGTH as i64) as u32),
        ];
        &placeholder
    } else {
        &record.cigar
    };

    out.extend_from_slice(&0i32.to_le_bytes()); // block_size, patched below
    out.extend_from_slice(&ref_id.to_le_bytes());
    out.extend_from_slice(&pos.to_le_bytes());
    out.push(l_read_name);
    out.push(record.mapq.unwrap_or(255));
    out.extend_from_slice(&bin.to_le_bytes());
    out.extend_from_slice(&(inline_cigar.len() as u16).to_le_bytes());
    out.extend_from_slice(&record.flags.to_le_bytes());
    out.extend_from_slice(&l_seq.to_le_bytes());
    out.extend_from_slice(&next_ref_id.to_le_bytes());
    out.extend_from_slice(&next_pos.to_le_bytes());
    out.extend_from_slice(&record.template_length.to_le_bytes());

    out.extend_from_slice(name);
    out.push(0);

    encode_cigar(inline_cigar, out)?;

    encode_sequence(&record.sequence, out);
    // No sequence means no quality, whatever the record carries
    if record.quality.is_empty() || !has_sequence {
        out.resize(out.len() + record.sequence.len(), 0xFF);
    } else {
        out.extend_from_slice(&record.quality);
    }

    for tag in &record.tags {
        if oversized && &tag.name == b"CG" {
            continue;
        }
        if !tag.value.is_encodable_as(RawEncoding::Binary) {
            warn!(
                "{}: dropping tag {} with unknown SAM type {:?}",
                record.name,
                tag.name_str(),
                tag.value.type_code() as char
            );
            continue;
        }
        encode_tag(tag, out)?;
    }
    if oversized {
        let mut words = Vec::with_capacity(record.cigar.len());
        for op in &record.cigar {
            words.push(op.encode()?);
        }
        encode_tag(&Tag::new(*b"CG", TagValue::Array(ArrayValue::UInt32(words))), out)?;
    }

    let body_len = out.len() - start - 4;
    let block_size = i32::try_from(body_len)
        .map_err(|_| overflow("block_size", body_len as u64, i32::MAX as u64))?;
    out[start..start + 4].copy_from_slice(&block_size.to_le_bytes());
    Ok(())
}
