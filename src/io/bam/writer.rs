//! BAM file writer with BGZF compression.
//!
//! Encodes records into a single reusable buffer and streams them through a
//! [`BgzfWriter`], so memory stays constant regardless of output size.
//!
//! # Example
//!
//! ```no_run
//! use bamflow::io::bam::{BamWriter, Header, Record, Reference};
//!
//! # fn main() -> bamflow::Result<()> {
//! let mut header = Header::new();
//! header.push_line("@HD\tVN:1.6\tSO:unsorted")?;
//! header.add_reference(Reference::new("chr1", 248956422))?;
//!
//! let mut writer = BamWriter::create("output.bam", &header)?;
//!
//! let mut record = Record::new();
//! record.name = "read1".to_string();
//! record.reference_id = Some(0);
//! record.position = Some(1000);
//! record.sequence = b"ACGT".to_vec();
//! record.quality = vec![30, 30, 30, 30];
//! writer.write_record(&record)?;
//!
//! // Flushes the last block and writes the EOF marker
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

use super::header::{write_header, Header};
use super::record::{encode_record, Record};
use crate::error::{BamflowError, Result};
use crate::io::compression::BgzfWriter;
use flate2::Compression;
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// BAM writer.
///
/// The header must be written before any record. Records are not checked
/// against the header here; [`AlignmentWriter`](super::AlignmentWriter)
/// validates before writing.
pub struct BamWriter<W: Write> {
    writer: BgzfWriter<W>,
    header_written: bool,
    /// Reusable encode buffer
    buffer: Vec<u8>,
    records_written: u64,
}

impl<W: Write> BamWriter<W> {
    /// Create a writer with the default compression level.
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Compression::default())
    }

    /// Create a writer with an explicit compression level.
    pub fn with_level(inner: W, level: Compression) -> Self {
        Self {
            writer: BgzfWriter::with_level(inner, level),
            header_written: false,
            buffer: Vec::with_capacity(512),
            records_written: 0,
        }
    }

    /// Write the magic, header text and reference dictionary.
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.header_written {
            return Err(BamflowError::InvalidState {
                msg: "BAM header already written".into(),
            });
        }
        self.buffer.clear();
        write_header(&mut self.buffer, header)?;
        self.writer.write_all(&self.buffer)?;
        self.header_written = true;
        debug!(
            "wrote BAM header with {} references",
            header.reference_count()
        );
        Ok(())
    }

    /// Encode and write one record.
    ///
    /// A record that fails to encode leaves the stream untouched.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if !self.header_written {
            return Err(BamflowError::InvalidState {
                msg: "BAM record written before header".into(),
            });
        }
        self.buffer.clear();
        encode_record(record, &mut self.buffer)?;
        self.writer.write_all(&self.buffer)?;
        self.records_written += 1;
        Ok(())
    }

    /// Get number of records written.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush the final block and write the BGZF EOF marker. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.finish()?;
        debug!("BAM stream finished: {} records", self.records_written);
        Ok(())
    }

    /// Finish the stream and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner()
    }
}

impl BamWriter<File> {
    /// Create a BAM file and write its header.
    pub fn create<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = Self::new(file);
        writer.write_header(header)?;
        Ok(writer)
    }
}
