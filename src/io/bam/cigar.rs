//! CIGAR (Compact Idiosyncratic Gapped Alignment Report) codec.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, CIGAR is stored as 32-bit integers:
//! - Low 4 bits: operation type (0-8)
//! - High 28 bits: operation length (1 to 268,435,455)
//!
//! # SAM Format
//!
//! In SAM, CIGAR is a run of `<length><op>` pairs such as `10M2I5S`, or `*`
//! when the alignment shape is unknown (an empty operation list).
//!
//! # Operations
//!
//! - M: Match/mismatch (alignment match, can include mismatches)
//! - I: Insertion to reference
//! - D: Deletion from reference
//! - N: Skipped region from reference (intron for RNA-seq)
//! - S: Soft clipping (bases present in read, not in alignment)
//! - H: Hard clipping (bases not present in read)
//! - P: Padding (silent deletion from padded reference)
//! - =: Sequence match (bases match reference)
//! - X: Sequence mismatch (bases don't match reference)
//!
//! A zero-length operation is rejected in both encodings.

use crate::error::{BamflowError, Result};

/// Largest length a binary CIGAR word can carry (28 bits).
pub const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

/// CIGAR operation types.
///
/// Each operation describes a type of alignment event and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// Match or mismatch (M)
    Match(u32),
    /// Insertion to reference (I)
    Insertion(u32),
    /// Deletion from reference (D)
    Deletion(u32),
    /// Skipped region from reference (N)
    RefSkip(u32),
    /// Soft clipping (S)
    SoftClip(u32),
    /// Hard clipping (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
}

impl CigarOp {
    /// Build an operation from its BAM op code (0-8) and length.
    ///
    /// Returns `None` for codes outside 0-8.
    pub fn from_code(code: u32, length: u32) -> Option<Self> {
        let op = match code {
            0 => CigarOp::Match(length),
            1 => CigarOp::Insertion(length),
            2 => CigarOp::Deletion(length),
            3 => CigarOp::RefSkip(length),
            4 => CigarOp::SoftClip(length),
            5 => CigarOp::HardClip(length),
            6 => CigarOp::Padding(length),
            7 => CigarOp::SeqMatch(length),
            8 => CigarOp::SeqMismatch(length),
            _ => return None,
        };
        Some(op)
    }

    /// Build an operation from its SAM character and length.
    pub fn from_char(c: char, length: u32) -> Option<Self> {
        let code = match c {
            'M' => 0,
            'I' => 1,
            'D' => 2,
            'N' => 3,
            'S' => 4,
            'H' => 5,
            'P' => 6,
            '=' => 7,
            'X' => 8,
            _ => return None,
        };
        Self::from_code(code, length)
    }

    /// Get the operation count/length.
    pub fn length(&self) -> u32 {
        match *self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => len,
        }
    }

    /// Check if this operation has zero length.
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// BAM op code (0-8).
    pub fn op_code(&self) -> u32 {
        match self {
            CigarOp::Match(_) => 0,
            CigarOp::Insertion(_) => 1,
            CigarOp::Deletion(_) => 2,
            CigarOp::RefSkip(_) => 3,
            CigarOp::SoftClip(_) => 4,
            CigarOp::HardClip(_) => 5,
            CigarOp::Padding(_) => 6,
            CigarOp::SeqMatch(_) => 7,
            CigarOp::SeqMismatch(_) => 8,
        }
    }

    /// Get the operation type as a character (for SAM format).
    pub fn as_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::SeqMatch(_) => '=',
            CigarOp::SeqMismatch(_) => 'X',
        }
    }

    /// Whether this operation consumes read bases (M, I, S, =, X).
    pub fn consumes_query(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Insertion(_)
                | CigarOp::SoftClip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// Whether this operation consumes reference bases (M, D, N, =, X).
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Deletion(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// Encode as a BAM CIGAR word.
    pub fn encode(&self) -> Result<u32> {
        let length = self.length();
        if length == 0 {
            return Err(BamflowError::cigar(format!(
                "zero-length {} operation",
                self.as_char()
            )));
        }
        if length > MAX_OP_LENGTH {
            return Err(BamflowError::EncodingOverflow {
                field: "cigar_op_len",
                value: length as u64,
                max: MAX_OP_LENGTH as u64,
            });
        }
        Ok((length << 4) | self.op_code())
    }
}

impl std::fmt::Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Parse BAM CIGAR operations from binary format.
///
/// Each CIGAR operation is encoded as a 32-bit little-endian integer:
/// - Bits 0-3: operation type (0-8)
/// - Bits 4-31: operation length
///
/// # Errors
///
/// Returns `MalformedCigar` if:
/// - Data is too short for specified number of operations
/// - Invalid operation code encountered (not 0-8)
/// - An operation has length zero
///
/// # Example
///
/// ```
/// use bamflow::io::bam::{parse_cigar, CigarOp};
///
/// // 100M = 100 << 4 | 0 = 1600 = 0x00000640 (little-endian)
/// let data = vec![0x40, 0x06, 0x00, 0x00];
/// let cigar = parse_cigar(&data, 1).unwrap();
/// assert_eq!(cigar, vec![CigarOp::Match(100)]);
/// ```
pub fn parse_cigar(data: &[u8], n_ops: usize) -> Result<Vec<CigarOp>> {
    let required_bytes = n_ops * 4;
    if data.len() < required_bytes {
        return Err(BamflowError::cigar(format!(
            "insufficient CIGAR data: need {} bytes for {} operations, got {}",
            required_bytes,
            n_ops,
            data.len()
        )));
    }

    data[..required_bytes]
        .chunks_exact(4)
        .map(|word| {
            let cigar_int = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            let length = cigar_int >> 4;
            let op_code = cigar_int & 0x0F;

            let op = CigarOp::from_code(op_code, length).ok_or_else(|| {
                BamflowError::cigar(format!("invalid CIGAR operation code: {}", op_code))
            })?;
            if length == 0 {
                return Err(BamflowError::cigar(format!(
                    "zero-length {} operation",
                    op.as_char()
                )));
            }
            Ok(op)
        })
        .collect()
}

/// Encode CIGAR operations as little-endian BAM words, appending to `out`.
pub fn encode_cigar(ops: &[CigarOp], out: &mut Vec<u8>) -> Result<()> {
    out.reserve(ops.len() * 4);
    for op in ops {
        out.extend_from_slice(&op.encode()?.to_le_bytes());
    }
    Ok(())
}

/// Parse a SAM CIGAR string such as `50M5I45M`.
///
/// `*` yields an empty operation list.
///
/// # Example
///
/// ```
/// use bamflow::io::bam::{parse_cigar_text, CigarOp};
///
/// let ops = parse_cigar_text("3S7M").unwrap();
/// assert_eq!(ops, vec![CigarOp::SoftClip(3), CigarOp::Match(7)]);
/// assert!(parse_cigar_text("*").unwrap().is_empty());
/// ```
pub fn parse_cigar_text(text: &str) -> Result<Vec<CigarOp>> {
    if text == "*" {
        return Ok(Vec::new());
    }
    if text.is_empty() {
        return Err(BamflowError::cigar("empty CIGAR string (use '*')"));
    }

    let mut ops = Vec::new();
    let mut length: Option<u32> = None;

    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            let next = length
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit))
                .filter(|n| *n <= MAX_OP_LENGTH)
                .ok_or_else(|| {
                    BamflowError::cigar(format!("operation length too large in {:?}", text))
                })?;
            length = Some(next);
            continue;
        }

        let len = length
            .take()
            .ok_or_else(|| BamflowError::cigar(format!("missing length before '{}'", c)))?;
        let op = CigarOp::from_char(c, len)
            .ok_or_else(|| BamflowError::cigar(format!("invalid CIGAR operation '{}'", c)))?;
        if len == 0 {
            return Err(BamflowError::cigar(format!("zero-length {} operation", c)));
        }
        ops.push(op);
    }

    if length.is_some() {
        return Err(BamflowError::cigar(format!(
            "trailing length without operation in {:?}",
            text
        )));
    }

    Ok(ops)
}

/// Format operations as a SAM CIGAR string (`*` when empty).
pub fn format_cigar(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return String::from("*");
    }
    ops.iter().map(|op| op.to_string()).collect()
}

/// Number of read bases the alignment covers (sum of M/I/S/=/X).
pub fn query_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_query())
        .map(|op| op.length() as u64)
        .sum()
}

/// Number of reference bases the alignment spans (sum of M/D/N/=/X).
pub fn reference_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| op.length() as u64)
        .sum()
}
