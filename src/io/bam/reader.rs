//! BAM streaming reader.
//!
//! Pulls BGZF blocks on demand, reads the header once, then yields records
//! one at a time with a single reusable body buffer.
//!
//! # Usage
//!
//! ```no_run
//! use bamflow::io::bam::BamReader;
//! use bamflow::io::ReadOptions;
//!
//! # fn main() -> bamflow::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam", ReadOptions::default())?;
//!
//! println!("Header: {} references", bam.header().reference_count());
//!
//! for result in bam.records() {
//!     let record = result?;
//!     println!("{} at {:?}", record.name, record.position);
//! }
//! # Ok(())
//! # }
//! ```

use super::header::{read_header, Header};
use super::record::{parse_record, Record};
use crate::error::{BamflowError, Result};
use crate::io::compression::BgzfReader;
use crate::io::options::ReadOptions;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// BAM file reader with streaming interface.
///
/// The header is read during construction, then records are streamed.
/// In lenient mode, records that fail to decode are logged and skipped;
/// framing errors (broken BGZF, truncated or negative `block_size`) always
/// end the stream.
pub struct BamReader<R> {
    reader: BgzfReader<R>,
    header: Header,
    options: ReadOptions,
    /// Reusable buffer for record bodies
    buffer: Vec<u8>,
    records_read: u64,
    records_skipped: u64,
}

impl<R: Read> BamReader<R> {
    /// Create a strict BAM reader over a BGZF-compressed source.
    ///
    /// Reads and validates the BAM header immediately.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_options(inner, ReadOptions::default())
    }

    /// Create a BAM reader with explicit options.
    pub fn with_options(inner: R, options: ReadOptions) -> Result<Self> {
        Self::from_bgzf(BgzfReader::with_options(inner, options), options)
    }

    /// Create a BAM reader over an existing BGZF stream positioned at the
    /// start of the BAM payload.
    pub fn from_bgzf(mut reader: BgzfReader<R>, options: ReadOptions) -> Result<Self> {
        let header = read_header(&mut reader)?;
        debug!(
            "BAM header: {} references, {} other lines",
            header.reference_count(),
            header.lines().len()
        );

        Ok(Self {
            reader,
            header,
            options,
            buffer: Vec::with_capacity(512),
            records_read: 0,
            records_skipped: 0,
        })
    }

    /// Get a reference to the BAM header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Records successfully decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Records skipped in lenient mode.
    pub fn records_skipped(&self) -> u64 {
        self.records_skipped
    }

    /// The underlying BGZF stream.
    pub fn bgzf(&self) -> &BgzfReader<R> {
        &self.reader
    }

    /// Create an iterator over BAM records.
    pub fn records(&mut self) -> Records<'_, R> {
        Records {
            reader: self,
            done: false,
        }
    }

    fn framing_error(&self, msg: impl Into<String>) -> BamflowError {
        BamflowError::TruncatedStream {
            offset: self.reader.compressed_offset(),
            msg: msg.into(),
        }
    }

    /// Read the next `block_size` prefix; `None` at a clean end of stream.
    fn read_block_size(&mut self) -> Result<Option<usize>> {
        let mut size_buf = [0u8; 4];
        let mut filled = 0;
        while filled < size_buf.len() {
            match self.reader.read(&mut size_buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => return Ok(None),
            4 => {}
            n => {
                return Err(self.framing_error(format!(
                    "stream ended inside record length prefix ({} of 4 bytes)",
                    n
                )))
            }
        }

        let block_size = i32::from_le_bytes(size_buf);
        usize::try_from(block_size)
            .map(Some)
            .map_err(|_| self.framing_error(format!("negative block_size {}", block_size)))
    }

    /// Read a single record.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(block_size) = self.read_block_size()? else {
                debug!(
                    "BAM stream complete: {} records read, {} skipped",
                    self.records_read, self.records_skipped
                );
                return Ok(None);
            };

            self.buffer.clear();
            self.buffer.resize(block_size, 0);
            if let Err(e) = self.reader.read_exact(&mut self.buffer) {
                return Err(match BamflowError::from(e) {
                    BamflowError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => self
                        .framing_error(format!(
                            "stream ended inside record of {} bytes",
                            block_size
                        )),
                    other => other,
                });
            }

            let parsed = parse_record(&self.buffer, self.options.strictness)
                .and_then(|record| record.validate(&self.header).map(|()| record));
            match parsed {
                Ok(record) => {
                    self.records_read += 1;
                    return Ok(Some(record));
                }
                Err(e) if self.options.is_lenient() && e.is_record_scoped() => {
                    self.records_skipped += 1;
                    warn!(
                        "skipping BAM record {}: {}",
                        self.records_read + self.records_skipped,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl BamReader<BufReader<File>> {
    /// Open a BAM file from a path.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path does not exist; header errors otherwise.
    pub fn from_path<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BamflowError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => BamflowError::Io(e),
        })?;
        Self::with_options(BufReader::new(file), options)
    }
}

/// Iterator over BAM records.
///
/// Forward-only and non-restartable; stops after the first error.
pub struct Records<'a, R> {
    reader: &'a mut BamReader<R>,
    done: bool,
}

impl<R: Read> Iterator for Records<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
