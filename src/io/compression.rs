//! BGZF (Blocked GNU Zip Format) block compression.
//!
//! BAM payloads are stored as a series of independent gzip members, each
//! holding at most 64 KiB of uncompressed data, followed by a fixed 28-byte
//! empty member that marks the end of the stream.
//!
//! # Block Structure
//!
//! ```text
//! - Bytes 0-1:   gzip magic (31, 139)
//! - Byte 2:      CM = 8 (deflate)
//! - Byte 3:      FLG = 4 (FEXTRA)
//! - Bytes 4-9:   MTIME, XFL, OS
//! - Bytes 10-11: XLEN (extra field length)
//! - Extra subfields, including SI1='B', SI2='C', SLEN=2, BSIZE (u16)
//!   where BSIZE = total block size - 1
//! - Raw deflate payload
//! - CRC32 (u32) of the uncompressed payload
//! - ISIZE (u32) uncompressed payload length
//! ```
//!
//! [`BgzfReader`] pulls and inflates one block at a time; [`BgzfWriter`]
//! buffers up to one block of uncompressed data before deflating it. Neither
//! spawns threads: the caller drives all I/O.

use crate::error::{BamflowError, Result};
use crate::io::options::ReadOptions;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::io::{self, BufRead, Read, Write};

/// Maximum uncompressed payload of a single block (64 KiB).
pub const BGZF_BLOCK_DATA_SIZE: usize = 64 * 1024;

/// Maximum total size of a compressed block (BSIZE is a u16 holding size - 1).
pub const BGZF_MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Fixed gzip header preceding the extra field.
const GZIP_FIXED_HEADER_SIZE: usize = 12;

/// Header size of a block written by [`BgzfWriter`] (fixed header + BC subfield).
pub const BGZF_HEADER_SIZE: usize = 18;

/// CRC32 + ISIZE.
pub const BGZF_FOOTER_SIZE: usize = 8;

/// The empty block terminating every well-formed BGZF stream.
pub const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // gzip header
    6, 0, 66, 67, 2, 0, 27, 0, // XLEN=6, BC subfield, BSIZE=27
    3, 0, // empty deflate block
    0, 0, 0, 0, // CRC32
    0, 0, 0, 0, // ISIZE
];

/// Check whether `prefix` starts with a BGZF block header.
///
/// Plain gzip (no `BC` subfield) is not BGZF.
pub fn is_bgzf(prefix: &[u8]) -> bool {
    prefix.len() >= BGZF_HEADER_SIZE
        && prefix[0] == 31
        && prefix[1] == 139
        && prefix[2] == 8
        && prefix[3] & 0x04 != 0
        && u16::from_le_bytes([prefix[10], prefix[11]]) >= 6
        && prefix[12] == b'B'
        && prefix[13] == b'C'
        && u16::from_le_bytes([prefix[14], prefix[15]]) == 2
}

/// Read into `buf` until it is full or the source is exhausted.
///
/// Returns the number of bytes read; fewer than `buf.len()` means EOF.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Streaming BGZF decompressor.
///
/// Holds exactly one decompressed block in memory. Implements [`Read`] and
/// [`BufRead`]; framing failures surface as [`BamflowError::TruncatedStream`]
/// wrapped in an `io::Error` (convert back with `BamflowError::from`).
pub struct BgzfReader<R> {
    inner: R,
    options: ReadOptions,
    /// Decompressed payload of the current block
    block: Vec<u8>,
    /// Read position within `block`
    pos: usize,
    /// Scratch buffer for the compressed payload
    compressed: Vec<u8>,
    /// Compressed offset of the next block header
    offset: u64,
    blocks_read: u64,
    saw_eof_marker: bool,
    done: bool,
}

impl<R: Read> BgzfReader<R> {
    /// Create a strict reader.
    pub fn new(inner: R) -> Self {
        Self::with_options(inner, ReadOptions::default())
    }

    /// Create a reader with explicit options.
    ///
    /// In lenient mode a stream that ends without the EOF marker is accepted
    /// with a warning instead of failing.
    pub fn with_options(inner: R, options: ReadOptions) -> Self {
        Self {
            inner,
            options,
            block: Vec::with_capacity(BGZF_BLOCK_DATA_SIZE),
            pos: 0,
            compressed: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            offset: 0,
            blocks_read: 0,
            saw_eof_marker: false,
            done: false,
        }
    }

    /// Number of blocks read so far (including empty blocks).
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Whether the most recent block was an empty EOF marker.
    pub fn saw_eof_marker(&self) -> bool {
        self.saw_eof_marker
    }

    /// Compressed offset of the next unread block.
    pub fn compressed_offset(&self) -> u64 {
        self.offset
    }

    /// Get a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn truncated(&self, msg: impl Into<String>) -> BamflowError {
        BamflowError::TruncatedStream {
            offset: self.offset,
            msg: msg.into(),
        }
    }

    /// Read and inflate the next block into `self.block`.
    ///
    /// Returns `Ok(false)` on a clean end of input (no bytes left before a
    /// block header).
    fn read_block(&mut self) -> Result<bool> {
        let mut header = [0u8; GZIP_FIXED_HEADER_SIZE];
        let n = read_up_to(&mut self.inner, &mut header)?;
        if n == 0 {
            return Ok(false);
        }
        if n < GZIP_FIXED_HEADER_SIZE {
            return Err(self.truncated(format!(
                "stream ended inside block header ({} of {} bytes)",
                n, GZIP_FIXED_HEADER_SIZE
            )));
        }

        if header[0] != 31 || header[1] != 139 {
            return Err(self.truncated(format!(
                "invalid gzip magic bytes: expected [31, 139], got [{}, {}]",
                header[0], header[1]
            )));
        }
        if header[2] != 8 {
            return Err(self.truncated(format!(
                "unsupported compression method {}",
                header[2]
            )));
        }
        if header[3] & 0x04 == 0 {
            return Err(self.truncated("missing FEXTRA flag (plain gzip, not BGZF)"));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        if read_up_to(&mut self.inner, &mut extra)? < xlen {
            return Err(self.truncated("stream ended inside extra field"));
        }

        // Scan extra subfields for BC (BSIZE)
        let mut bsize: Option<u16> = None;
        let mut pos = 0;
        while pos + 4 <= xlen {
            let si1 = extra[pos];
            let si2 = extra[pos + 1];
            let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

            if si1 == b'B' && si2 == b'C' && slen == 2 {
                if pos + 6 > xlen {
                    return Err(self.truncated("incomplete BSIZE subfield"));
                }
                bsize = Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
                break;
            }

            pos += 4 + slen;
        }

        let block_size = match bsize {
            Some(bs) => bs as usize + 1,
            None => return Err(self.truncated("missing BC subfield (BSIZE)")),
        };

        let already_read = GZIP_FIXED_HEADER_SIZE + xlen;
        if block_size < already_read + BGZF_FOOTER_SIZE {
            return Err(self.truncated(format!(
                "invalid block size {} (header alone is {} bytes)",
                block_size, already_read
            )));
        }

        let remaining = block_size - already_read;
        self.compressed.resize(remaining, 0);
        if read_up_to(&mut self.inner, &mut self.compressed)? < remaining {
            return Err(self.truncated(format!(
                "stream ended inside block of {} bytes",
                block_size
            )));
        }

        let payload_len = remaining - BGZF_FOOTER_SIZE;
        let footer = &self.compressed[payload_len..];
        let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let isize = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

        if isize > BGZF_BLOCK_DATA_SIZE {
            return Err(self.truncated(format!(
                "block declares {} uncompressed bytes (max {})",
                isize, BGZF_BLOCK_DATA_SIZE
            )));
        }

        self.block.clear();
        self.pos = 0;
        // One byte past the block limit is enough to expose a lying ISIZE
        let decoder = DeflateDecoder::new(&self.compressed[..payload_len]);
        let mut bounded = decoder.take(BGZF_BLOCK_DATA_SIZE as u64 + 1);
        if let Err(e) = bounded.read_to_end(&mut self.block) {
            return Err(self.truncated(format!("deflate error: {}", e)));
        }

        if self.block.len() != isize {
            return Err(self.truncated(format!(
                "ISIZE mismatch: footer says {}, inflated {}",
                isize,
                self.block.len()
            )));
        }
        let actual_crc = crc32fast::hash(&self.block);
        if actual_crc != expected_crc {
            return Err(self.truncated(format!(
                "CRC32 mismatch: footer {:#010x}, computed {:#010x}",
                expected_crc, actual_crc
            )));
        }

        self.saw_eof_marker = isize == 0;
        self.offset += block_size as u64;
        self.blocks_read += 1;
        Ok(true)
    }

    /// Called once the source is exhausted between blocks.
    fn finish_stream(&mut self) -> Result<()> {
        self.done = true;
        if self.saw_eof_marker {
            debug!("BGZF stream complete after {} blocks", self.blocks_read);
            return Ok(());
        }

        if self.options.is_lenient() {
            warn!(
                "BGZF stream ended after {} blocks without an EOF marker; file may be truncated",
                self.blocks_read
            );
            Ok(())
        } else {
            Err(self.truncated("missing BGZF EOF marker"))
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.pos >= self.block.len() && !self.done {
            if !self.read_block()? {
                self.finish_stream()?;
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for BgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fill().map_err(io::Error::from)?;
        if self.pos >= self.block.len() {
            return Ok(&[]);
        }
        Ok(&self.block[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.block.len());
    }
}

/// Decompress a complete in-memory BGZF stream.
pub fn decompress_bgzf(data: &[u8], options: ReadOptions) -> Result<Vec<u8>> {
    let mut reader = BgzfReader::with_options(data, options);
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Compress `data` into a single BGZF block appended to `out`.
///
/// Returns `Ok(false)` without touching `out` when the deflated block would
/// not fit in [`BGZF_MAX_BLOCK_SIZE`].
fn compress_block(data: &[u8], level: Compression, out: &mut Vec<u8>) -> Result<bool> {
    debug_assert!(data.len() <= BGZF_BLOCK_DATA_SIZE);

    let mut deflate = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let total_size = BGZF_HEADER_SIZE + deflated.len() + BGZF_FOOTER_SIZE;
    if total_size > BGZF_MAX_BLOCK_SIZE {
        return Ok(false);
    }

    out.extend_from_slice(&[31, 139, 8, 4, 0, 0, 0, 0, 0, 255]);
    out.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    out.extend_from_slice(&[b'B', b'C']);
    out.extend_from_slice(&2u16.to_le_bytes()); // SLEN
    out.extend_from_slice(&((total_size - 1) as u16).to_le_bytes());
    out.extend_from_slice(&deflated);
    out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    Ok(true)
}

/// Streaming BGZF compressor.
///
/// Buffers up to [`BGZF_BLOCK_DATA_SIZE`] bytes, then deflates them into one
/// block. [`finish`](Self::finish) writes the final partial block and the EOF
/// marker exactly once; dropping an unfinished writer does the same on a
/// best-effort basis.
///
/// A failed block write poisons the writer: buffered data is kept, later
/// writes fail, and no EOF marker is ever written, so readers see the
/// stream as truncated rather than complete.
pub struct BgzfWriter<W: Write> {
    inner: Option<W>,
    /// Uncompressed data waiting to fill a block
    buffer: Vec<u8>,
    /// Scratch buffer for compressed output
    compressed: Vec<u8>,
    level: Compression,
    blocks_written: u64,
    finished: bool,
    /// Set once a write to the sink has failed
    poisoned: bool,
}

impl<W: Write> BgzfWriter<W> {
    /// Create a writer with the default compression level (6).
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Compression::default())
    }

    /// Create a writer with an explicit compression level.
    pub fn with_level(inner: W, level: Compression) -> Self {
        Self {
            inner: Some(inner),
            buffer: Vec::with_capacity(BGZF_BLOCK_DATA_SIZE),
            compressed: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            level,
            blocks_written: 0,
            finished: false,
            poisoned: false,
        }
    }

    /// Number of data blocks written (the EOF marker is not counted).
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Whether [`finish`](Self::finish) has completed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether an earlier write to the sink failed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "BGZF writer failed earlier; stream is incomplete",
            ));
        }
        Ok(())
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    fn sink(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("BGZF writer already finished"))
    }

    /// Deflate `data` into one or more blocks and write them.
    fn write_blocks(&mut self, data: &[u8]) -> Result<()> {
        self.compressed.clear();
        if compress_block(data, self.level, &mut self.compressed)? {
            let block = std::mem::take(&mut self.compressed);
            let result = self.sink().and_then(|w| w.write_all(&block));
            self.compressed = block;
            result?;
            self.blocks_written += 1;
            return Ok(());
        }

        // Incompressible payload: halve it until each part fits
        debug!(
            "BGZF payload of {} bytes does not fit one block, splitting",
            data.len()
        );
        let (left, right) = data.split_at(data.len() / 2);
        self.write_blocks(left)?;
        self.write_blocks(right)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.check_poisoned()?;
        let data = std::mem::take(&mut self.buffer);
        let result = self.write_blocks(&data);
        self.buffer = data;
        match result {
            Ok(()) => {
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Flush the partial block, write the EOF marker and flush the sink.
    ///
    /// Idempotent: later calls return `Ok(())` without writing.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_poisoned()?;
        self.flush_block()?;
        let result = self
            .sink()
            .and_then(|sink| sink.write_all(&BGZF_EOF).and_then(|()| sink.flush()));
        if let Err(e) = result {
            self.poisoned = true;
            return Err(e.into());
        }
        self.finished = true;
        debug!("BGZF stream finished after {} blocks", self.blocks_written);
        Ok(())
    }

    /// Finish the stream and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        self.inner
            .take()
            .ok_or_else(|| io::Error::other("BGZF writer already finished").into())
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("cannot write to finished BGZF writer"));
        }
        self.check_poisoned()?;

        let mut remaining = buf;
        while !remaining.is_empty() {
            let space = BGZF_BLOCK_DATA_SIZE - self.buffer.len();
            let to_copy = remaining.len().min(space);
            self.buffer.extend_from_slice(&remaining[..to_copy]);
            remaining = &remaining[to_copy..];

            if self.buffer.len() == BGZF_BLOCK_DATA_SIZE {
                self.flush_block().map_err(io::Error::from)?;
            }
        }

        Ok(buf.len())
    }

    /// Compress any buffered data into a (short) block and flush the sink.
    fn flush(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush_block().map_err(io::Error::from)?;
        self.sink()?.flush()
    }
}

impl<W: Write> Drop for BgzfWriter<W> {
    fn drop(&mut self) {
        if self.poisoned {
            warn!(
                "dropping failed BGZF writer with {} buffered bytes; no EOF marker written",
                self.buffer.len()
            );
        } else if self.inner.is_some() && !self.finished {
            if let Err(e) = self.finish() {
                warn!("failed to finish BGZF stream on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut writer = BgzfWriter::new(Vec::new());
        writer.write_all(data).unwrap();
        writer.into_inner().unwrap()
    }

    /// Count blocks by walking BSIZE fields.
    fn block_sizes(data: &[u8]) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let bsize = u16::from_le_bytes([data[pos + 16], data[pos + 17]]) as usize + 1;
            sizes.push(bsize);
            pos += bsize;
        }
        sizes
    }

    #[test]
    fn test_eof_marker_is_valid_bgzf() {
        assert!(is_bgzf(&BGZF_EOF));
        assert_eq!(BGZF_EOF.len(), 28);
        let out = decompress_bgzf(&BGZF_EOF, ReadOptions::strict()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_is_bgzf_rejects_plain_data() {
        assert!(!is_bgzf(b"@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:10\n"));
        assert!(!is_bgzf(&[31, 139, 8, 0, 0, 0, 0, 0, 0, 255, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!is_bgzf(&[31, 139]));
    }

    #[test]
    fn test_round_trip_small() {
        let data = b"BAM\x01hello bgzf".to_vec();
        let compressed = compress(&data);
        assert!(is_bgzf(&compressed));
        assert!(compressed.ends_with(&BGZF_EOF));
        let out = decompress_bgzf(&compressed, ReadOptions::strict()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_empty_stream_is_only_eof_marker() {
        let compressed = compress(b"");
        assert_eq!(compressed, BGZF_EOF.to_vec());
    }

    #[test]
    fn test_exactly_one_block_payload() {
        let data = vec![b'A'; BGZF_BLOCK_DATA_SIZE];
        let mut writer = BgzfWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.blocks_written(), 1);

        let compressed = writer.into_inner().unwrap();
        // one data block + EOF marker
        assert_eq!(block_sizes(&compressed).len(), 2);
    }

    #[test]
    fn test_one_byte_over_produces_two_blocks() {
        let data = vec![b'A'; BGZF_BLOCK_DATA_SIZE + 1];
        let mut writer = BgzfWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.blocks_written(), 2);

        let compressed = writer.into_inner().unwrap();
        assert_eq!(block_sizes(&compressed).len(), 3);
        let out = decompress_bgzf(&compressed, ReadOptions::strict()).unwrap();
        assert_eq!(out.len(), BGZF_BLOCK_DATA_SIZE + 1);
    }

    #[test]
    fn test_incompressible_payload_is_split() {
        // xorshift noise does not deflate below its own size
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let data: Vec<u8> = (0..BGZF_BLOCK_DATA_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();

        let compressed = compress(&data);
        for size in block_sizes(&compressed) {
            assert!(size <= BGZF_MAX_BLOCK_SIZE);
        }
        let out = decompress_bgzf(&compressed, ReadOptions::strict()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_missing_eof_marker_strict() {
        let compressed = compress(b"some payload");
        let stripped = &compressed[..compressed.len() - BGZF_EOF.len()];

        let err = decompress_bgzf(stripped, ReadOptions::strict()).unwrap_err();
        assert!(matches!(err, BamflowError::TruncatedStream { .. }), "{err}");
    }

    #[test]
    fn test_missing_eof_marker_lenient() {
        let compressed = compress(b"some payload");
        let stripped = &compressed[..compressed.len() - BGZF_EOF.len()];

        let out = decompress_bgzf(stripped, ReadOptions::lenient()).unwrap();
        assert_eq!(out, b"some payload");
    }

    #[test]
    fn test_truncated_block_is_fatal_even_when_lenient() {
        let compressed = compress(b"some payload that gets cut");
        let cut = &compressed[..30];
        let err = decompress_bgzf(cut, ReadOptions::lenient()).unwrap_err();
        assert!(matches!(err, BamflowError::TruncatedStream { .. }));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut compressed = compress(b"checksummed payload");
        let first_block = block_sizes(&compressed)[0];
        // Flip a CRC byte of the first block
        compressed[first_block - 8] ^= 0xFF;
        let err = decompress_bgzf(&compressed, ReadOptions::strict()).unwrap_err();
        assert!(err.to_string().contains("CRC32"));
    }

    #[test]
    fn test_bad_magic() {
        let data = [0u8; 40];
        let err = decompress_bgzf(&data, ReadOptions::strict()).unwrap_err();
        assert!(matches!(err, BamflowError::TruncatedStream { offset: 0, .. }));
    }

    #[test]
    fn test_empty_blocks_mid_stream_are_skipped() {
        let mut data = compress(b"first");
        data.truncate(data.len() - BGZF_EOF.len());
        data.extend_from_slice(&BGZF_EOF);
        data.extend_from_slice(&compress(b"second"));

        let out = decompress_bgzf(&data, ReadOptions::strict()).unwrap();
        assert_eq!(out, b"firstsecond");
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut writer = BgzfWriter::new(Vec::new());
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        let out = writer.into_inner().unwrap();
        assert_eq!(out.windows(28).filter(|w| *w == BGZF_EOF).count(), 1);
    }

    #[test]
    fn test_write_after_finish_fails() {
        let mut writer = BgzfWriter::new(Vec::new());
        writer.finish().unwrap();
        assert!(writer.write_all(b"late").is_err());
    }

    #[test]
    fn test_drop_writes_eof_marker() {
        let mut out = Vec::new();
        {
            let mut writer = BgzfWriter::new(&mut out);
            writer.write_all(b"dropped").unwrap();
        }
        assert!(out.ends_with(&BGZF_EOF));
        assert_eq!(
            decompress_bgzf(&out, ReadOptions::strict()).unwrap(),
            b"dropped"
        );
    }

    /// Sink that accepts `budget` bytes, then fails every write.
    struct FailingSink<'a> {
        written: &'a mut Vec<u8>,
        budget: usize,
    }

    impl Write for FailingSink<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.budget {
                return Err(io::Error::other("disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_poisons_writer() {
        let mut out = Vec::new();
        {
            let sink = FailingSink {
                written: &mut out,
                budget: 0,
            };
            let mut writer = BgzfWriter::new(sink);
            writer.write_all(b"never lands").unwrap();
            assert!(writer.flush().is_err());
            assert!(writer.is_poisoned());

            assert!(writer.write_all(b"more").is_err());
            assert!(writer.finish().is_err());
            assert!(!writer.is_finished());
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_poisoned_writer_skips_eof_on_drop() {
        let payload = vec![3u8; BGZF_BLOCK_DATA_SIZE + 100];
        let first_block = compress(&payload[..BGZF_BLOCK_DATA_SIZE]);
        let first_block_len = first_block.len() - BGZF_EOF.len();

        let mut out = Vec::new();
        {
            // Room for the first block only
            let sink = FailingSink {
                written: &mut out,
                budget: first_block_len,
            };
            let mut writer = BgzfWriter::new(sink);
            writer.write_all(&payload).unwrap();
            assert_eq!(writer.blocks_written(), 1);
            assert!(writer.finish().is_err());
            assert!(writer.is_poisoned());
        }
        assert_eq!(out.len(), first_block_len);
        assert!(!out.ends_with(&BGZF_EOF));

        let err = decompress_bgzf(&out, ReadOptions::strict()).unwrap_err();
        assert!(matches!(err, BamflowError::TruncatedStream { .. }));
    }

    #[test]
    fn test_oversized_inflation_rejected() {
        // Deflates to far more than one block, while the footer claims a full block
        let inflated = vec![0u8; 4 * BGZF_BLOCK_DATA_SIZE];
        let mut deflate = DeflateEncoder::new(Vec::new(), Compression::best());
        deflate.write_all(&inflated).unwrap();
        let deflated = deflate.finish().unwrap();

        let total_size = BGZF_HEADER_SIZE + deflated.len() + BGZF_FOOTER_SIZE;
        let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0];
        block.extend_from_slice(&((total_size - 1) as u16).to_le_bytes());
        block.extend_from_slice(&deflated);
        block.extend_from_slice(&crc32fast::hash(&inflated[..BGZF_BLOCK_DATA_SIZE]).to_le_bytes());
        block.extend_from_slice(&(BGZF_BLOCK_DATA_SIZE as u32).to_le_bytes());
        block.extend_from_slice(&BGZF_EOF);

        for options in [ReadOptions::strict(), ReadOptions::lenient()] {
            let err = decompress_bgzf(&block, options).unwrap_err();
            assert!(
                err.to_string()
                    .contains(&format!("inflated {}", BGZF_BLOCK_DATA_SIZE + 1)),
                "{err}"
            );
        }
    }

    #[test]
    fn test_reader_counters() {
        let compressed = compress(&vec![7u8; BGZF_BLOCK_DATA_SIZE + 10]);
        let mut reader = BgzfReader::new(&compressed[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.blocks_read(), 3);
        assert!(reader.saw_eof_marker());
        assert_eq!(reader.compressed_offset(), compressed.len() as u64);
    }

    proptest! {
        #[test]
        fn prop_bgzf_roundtrip(data in prop::collection::vec(any::<u8>(), 0..200_000)) {
            let compressed = compress(&data);
            let out = decompress_bgzf(&compressed, ReadOptions::strict()).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
