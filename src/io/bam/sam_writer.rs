//! SAM text writer.
//!
//! Serializes a [`Header`] and [`Record`]s as tab-separated SAM text.
//! Every integer tag width is written as `i`; qualities are written with the
//! Phred+33 offset; empty sequence/quality/CIGAR become `*`.

use super::cigar::format_cigar;
use super::header::Header;
use super::record::Record;
use super::sam_reader::QUALITY_OFFSET;
use super::tags::RawEncoding;
use crate::error::{BamflowError, Result};
use log::warn;
use std::fmt::Write as _;
use std::io::Write;

/// Highest Phred score printable as a SAM quality character (`~`).
const MAX_TEXT_QUALITY: u8 = b'~' - QUALITY_OFFSET;

fn reference_name<'a>(header: &'a Header, id: Option<usize>, field: &str) -> Result<&'a str> {
    match id {
        None => Ok("*"),
        Some(id) => header.reference_name(id).ok_or_else(|| {
            BamflowError::record(format!("{} ID {} not in header", field, id))
        }),
    }
}

/// Format one record as a SAM line (without the trailing newline).
///
/// # Example
///
/// ```
/// use bamflow::io::bam::{format_sam_record, Header, Record};
///
/// let mut record = Record::new();
/// record.name = "read1".into();
/// record.flags = 4;
/// record.mapq = Some(0);
/// record.sequence = b"ACGT".to_vec();
/// record.quality = vec![30; 4];
///
/// let line = format_sam_record(&record, &Header::new()).unwrap();
/// assert_eq!(line, "read1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t????");
/// ```
pub fn format_sam_record(record: &Record, header: &Header) -> Result<String> {
    let mut line = String::with_capacity(64 + 2 * record.sequence.len());
    write_sam_record(record, header, &mut line)?;
    Ok(line)
}

/// Append one record as a SAM line (without newline) to `line`.
pub fn write_sam_record(record: &Record, header: &Header, line: &mut String) -> Result<()> {
    let rname = reference_name(header, record.reference_id, "reference")?;
    let rnext = match (record.mate_reference_id, record.reference_id) {
        (Some(mate), Some(own)) if mate == own => "=",
        (mate, _) => reference_name(header, mate, "mate reference")?,
    };

    let name = if record.name.is_empty() {
        "*"
    } else {
        record.name.as_str()
    };

    // fmt::Write into a String cannot fail
    let _ = write!(
        line,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
        name,
        record.flags,
        rname,
        record.position.unwrap_or(0),
        record.mapq.unwrap_or(255),
        format_cigar(&record.cigar),
        rnext,
        record.mate_position.unwrap_or(0),
        record.template_length,
    );

    if record.sequence.is_empty() {
        line.push('*');
    } else {
        let seq = std::str::from_utf8(&record.sequence)
            .map_err(|_| BamflowError::record(format!("{}: sequence is not ASCII", name)))?;
        line.push_str(seq);
    }
    line.push('\t');

    if record.quality.is_empty() || record.sequence.is_empty() {
        line.push('*');
    } else {
        if record.quality.len() != record.sequence.len() {
            return Err(BamflowError::record(format!(
                "{}: {} quality scores for {} bases",
                name,
                record.quality.len(),
                record.sequence.len()
            )));
        }
        for &q in &record.quality {
            if q > MAX_TEXT_QUALITY {
                return Err(BamflowError::EncodingOverflow {
                    field: "quality",
                    value: q as u64,
                    max: MAX_TEXT_QUALITY as u64,
                });
            }
            line.push((q + QUALITY_OFFSET) as char);
        }
    }

    for tag in &record.tags {
        if !tag.value.is_encodable_as(RawEncoding::Text) {
            warn!(
                "{}: dropping tag {} with unknown BAM type {:?}",
                name,
                tag.name_str(),
                tag.value.type_code() as char
            );
            continue;
        }
        let _ = write!(line, "\t{}", tag);
    }
    Ok(())
}

/// SAM text writer.
///
/// Holds the header after [`write_header`](Self::write_header) so records
/// can name their references.
pub struct SamWriter<W: Write> {
    writer: W,
    header: Option<Header>,
    line: String,
    records_written: u64,
}

impl<W: Write> SamWriter<W> {
    /// Create a writer. Nothing is written until the header.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header: None,
            line: String::with_capacity(256),
            records_written: 0,
        }
    }

    /// Write the header text.
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.header.is_some() {
            return Err(BamflowError::InvalidState {
                msg: "SAM header already written".into(),
            });
        }
        self.writer.write_all(header.to_sam_text().as_bytes())?;
        self.header = Some(header.clone());
        Ok(())
    }

    /// Write one record as a SAM line.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let header = self.header.as_ref().ok_or_else(|| BamflowError::InvalidState {
            msg: "SAM record written before header".into(),
        })?;

        self.line.clear();
        write_sam_record(record, header, &mut self.line)?;
        self.line.push('\n');
        self.writer.write_all(self.line.as_bytes())?;
        self.records_written += 1;
        Ok(())
    }

    /// Number of records written.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush the underlying writer.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.writer)
    }
}
