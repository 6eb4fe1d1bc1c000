//! 4-bit BAM sequence codec.
//!
//! BAM stores sequences in 4-bit encoding (2 bases per byte).
//! Each nibble (4 bits) encodes one base using a lookup table.
//!
//! # Format
//!
//! - High nibble first, low nibble second within each byte
//! - 16 possible values (4 bases + ambiguity codes)
//! - Example: byte 0x12 -> bases at indices 1 ('A') and 2 ('C')
//! - An odd-length sequence leaves the final low nibble zero

use crate::error::{BamflowError, Result};

/// BAM 4-bit to ASCII base lookup table.
///
/// - 0 = '=' (match to reference)
/// - 1, 2, 4, 8 = A, C, G, T
/// - remaining values = IUPAC ambiguity codes (M, R, S, V, W, Y, H, K, D, B, N)
const SEQ_LOOKUP: [u8; 16] = [
    b'=', b'A', b'C', b'M', // 0-3
    b'G', b'R', b'S', b'V', // 4-7
    b'T', b'W', b'Y', b'H', // 8-11
    b'K', b'D', b'B', b'N', // 12-15
];

/// Nibble for 'N', used for bases outside the alphabet.
const NIBBLE_N: u8 = 15;

/// Map an ASCII base (either case) to its 4-bit code.
///
/// Characters outside `=ACMGRSVTWYHKDBN` encode as `N`.
pub fn base_to_nibble(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'=' => 0,
        b'A' => 1,
        b'C' => 2,
        b'M' => 3,
        b'G' => 4,
        b'R' => 5,
        b'S' => 6,
        b'V' => 7,
        b'T' => 8,
        b'W' => 9,
        b'Y' => 10,
        b'H' => 11,
        b'K' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => NIBBLE_N,
    }
}

/// Decode a 4-bit encoded BAM sequence to ASCII.
///
/// # Arguments
///
/// * `data` - Packed 4-bit sequence data (ceil(length/2) bytes)
/// * `length` - Number of bases to decode
///
/// # Errors
///
/// Returns `MalformedRecord` if `data` is too short for `length`.
///
/// # Example
///
/// ```
/// use bamflow::io::bam::decode_sequence;
///
/// // Byte 0x12 encodes bases at indices 1 ('A') and 2 ('C')
/// let sequence = decode_sequence(&[0x12], 2).unwrap();
/// assert_eq!(sequence, b"AC");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Result<Vec<u8>> {
    let required_bytes = length.div_ceil(2);
    if data.len() < required_bytes {
        return Err(BamflowError::record(format!(
            "insufficient sequence data: need {} bytes for {} bases, got {}",
            required_bytes,
            length,
            data.len()
        )));
    }

    let mut sequence = Vec::with_capacity(length);
    for &byte in &data[..length / 2] {
        sequence.push(SEQ_LOOKUP[(byte >> 4) as usize]);
        sequence.push(SEQ_LOOKUP[(byte & 0x0F) as usize]);
    }
    if length % 2 == 1 {
        sequence.push(SEQ_LOOKUP[(data[length / 2] >> 4) as usize]);
    }

    Ok(sequence)
}

/// Pack ASCII bases into 4-bit codes, appending `ceil(len/2)` bytes to `out`.
pub fn encode_sequence(bases: &[u8], out: &mut Vec<u8>) {
    out.reserve(bases.len().div_ceil(2));
    for pair in bases.chunks(2) {
        let high = base_to_nibble(pair[0]);
        let low = pair.get(1).map_or(0, |&b| base_to_nibble(b));
        out.push((high << 4) | low);
    }
}
