//! SAM format reader (text alignment files).
//!
//! SAM is the text representation of BAM: same data, different encoding.
//! Header lines (`@..`) are read up front; alignment lines are parsed on
//! demand into the same [`Record`] type the BAM reader yields.
//!
//! # Example
//!
//! ```
//! use bamflow::io::bam::SamReader;
//!
//! # fn main() -> bamflow::Result<()> {
//! let data = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\nr1\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGT\tIIII\n";
//! let mut sam = SamReader::new(data.as_bytes())?;
//! assert_eq!(sam.header().reference_count(), 1);
//!
//! for record in sam.records() {
//!     let record = record?;
//!     assert_eq!(record.position, Some(5));
//! }
//! # Ok(())
//! # }
//! ```

use super::cigar::parse_cigar_text;
use super::header::Header;
use super::record::Record;
use super::tags::{Tag, Tags};
use crate::error::{BamflowError, Result};
use crate::io::options::{ReadOptions, Strictness};
use log::{debug, warn};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Phred offset of SAM quality characters.
pub const QUALITY_OFFSET: u8 = 33;

/// Number of mandatory SAM columns.
const MANDATORY_FIELDS: usize = 11;

/// SAM format reader.
///
/// Streams alignment records one line at a time.
pub struct SamReader<R> {
    reader: R,
    header: Header,
    options: ReadOptions,
    line_buffer: String,
    /// First alignment line, read while scanning the header
    pending_line: Option<String>,
    line_number: u64,
    records_read: u64,
    records_skipped: u64,
}

impl SamReader<BufReader<File>> {
    /// Open a SAM file from a path.
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

impl<R: BufRead> SamReader<R> {
    /// Create a strict SAM reader and parse the header.
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, ReadOptions::default())
    }

    /// Create a SAM reader with explicit options and parse the header.
    pub fn with_options(reader: R, options: ReadOptions) -> Result<Self> {
        let mut sam_reader = SamReader {
            reader,
            header: Header::new(),
            options,
            line_buffer: String::new(),
            pending_line: None,
            line_number: 0,
            records_read: 0,
            records_skipped: 0,
        };
        sam_reader.parse_header()?;
        Ok(sam_reader)
    }

    /// Get a reference to the SAM header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Records successfully parsed so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Records skipped in lenient mode.
    pub fn records_skipped(&self) -> u64 {
        self.records_skipped
    }

    /// Read one line into `line_buffer`, stripping the line terminator.
    ///
    /// Returns `false` at EOF.
    fn next_line(&mut self) -> Result<bool> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        let trimmed = self.line_buffer.trim_end_matches(['\r', '\n']).len();
        self.line_buffer.truncate(trimmed);
        Ok(true)
    }

    fn parse_header(&mut self) -> Result<()> {
        while self.next_line()? {
            if self.line_buffer.starts_with('@') {
                self.header.push_line(self.line_buffer.as_str()).map_err(|e| match e {
                    BamflowError::MalformedHeader { msg } => BamflowError::MalformedHeader {
                        msg: format!("line {}: {}", self.line_number, msg),
                    },
                    other => other,
                })?;
            } else if !self.line_buffer.trim().is_empty() {
                self.pending_line = Some(std::mem::take(&mut self.line_buffer));
                break;
            }
        }

        debug!(
            "SAM header: {} references, {} other lines",
            self.header.reference_count(),
            self.header.lines().len()
        );
        Ok(())
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of input. In lenient mode, lines that fail
    /// to parse are logged and skipped.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            let line = match self.pending_line.take() {
                Some(line) => line,
                None => {
                    if !self.next_line()? {
                        debug!(
                            "SAM stream complete: {} records read, {} skipped",
                            self.records_read, self.records_skipped
                        );
                        return Ok(None);
                    }
                    if self.line_buffer.trim().is_empty() {
                        continue;
                    }
                    std::mem::take(&mut self.line_buffer)
                }
            };

            let result = if line.starts_with('@') {
                Err(BamflowError::record("header line after alignment records"))
            } else {
                parse_sam_record(&line, &self.header, self.options.strictness)
            };
            // Hand the allocation back for the next line
            self.line_buffer = line;

            match result {
                Ok(record) => {
                    self.records_read += 1;
                    return Ok(Some(record));
                }
                Err(e) if self.options.is_lenient() && e.is_record_scoped() => {
                    self.records_skipped += 1;
                    warn!("skipping SAM line {}: {}", self.line_number, e);
                }
                Err(e) => return Err(at_line(e, self.line_number)),
            }
        }
    }

    /// Create an iterator over SAM records.
    pub fn records(&mut self) -> SamRecords<'_, R> {
        SamRecords {
            reader: self,
            done: false,
        }
    }
}

fn at_line(err: BamflowError, line: u64) -> BamflowError {
    match err {
        BamflowError::MalformedRecord { msg } => BamflowError::MalformedRecord {
            msg: format!("line {}: {}", line, msg),
        },
        BamflowError::MalformedCigar { msg } => BamflowError::MalformedCigar {
            msg: format!("line {}: {}", line, msg),
        },
        other => other,
    }
}

/// Iterator over SAM records.
///
/// Forward-only and non-restartable; stops after the first error.
pub struct SamRecords<'a, R> {
    reader: &'a mut SamReader<R>,
    done: bool,
}

impl<R: BufRead> Iterator for SamRecords<'_, R> {
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

fn parse_field<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BamflowError::record(format!("invalid {}: {:?}", field, value)))
}

fn lookup_reference(header: &Header, name: &str, field: &str) -> Result<Option<usize>> {
    if name == "*" {
        return Ok(None);
    }
    header
        .reference_id(name)
        .map(Some)
        .ok_or_else(|| BamflowError::record(format!("{} {:?} not in header", field, name)))
}

/// 1-based SAM position; 0 means unplaced.
fn parse_position(value: &str, field: &str) -> Result<Option<i32>> {
    match parse_field::<i32>(value, field)? {
        0 => Ok(None),
        p if p > 0 => Ok(Some(p)),
        p => Err(BamflowError::record(format!("negative {}: {}", field, p))),
    }
}

/// Parse one SAM alignment line.
///
/// Format: QNAME FLAG RNAME POS MAPQ CIGAR RNEXT PNEXT TLEN SEQ QUAL [TAGS]
///
/// The record is validated against `header`.
pub fn parse_sam_record(line: &str, header: &Header, strictness: Strictness) -> Result<Record> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MANDATORY_FIELDS {
        return Err(BamflowError::record(format!(
            "expected at least {} fields, found {}",
            MANDATORY_FIELDS,
            fields.len()
        )));
    }

    // `*` is the SAM spelling of an absent name
    let name = match fields[0] {
        "*" => String::new(),
        qname => qname.to_string(),
    };
    let flags: u16 = parse_field(fields[1], "FLAG")?;
    let reference_id = lookup_reference(header, fields[2], "RNAME")?;
    let position = parse_position(fields[3], "POS")?;
    let mapq: u8 = parse_field(fields[4], "MAPQ")?;
    let cigar = parse_cigar_text(fields[5])?;

    let mate_reference_id = match fields[6] {
        "=" => reference_id,
        other => lookup_reference(header, other, "RNEXT")?,
    };
    let mate_position = parse_position(fields[7], "PNEXT")?;
    let template_length: i32 = parse_field(fields[8], "TLEN")?;

    let sequence = match fields[9] {
        "*" => Vec::new(),
        seq => seq.as_bytes().to_vec(),
    };

    let quality = match fields[10] {
        "*" => Vec::new(),
        qual => {
            if qual.len() != sequence.len() {
                return Err(BamflowError::record(format!(
                    "QUAL has {} characters but SEQ has {}",
                    qual.len(),
                    sequence.len()
                )));
            }
            qual.bytes()
                .map(|b| {
                    if (QUALITY_OFFSET..=b'~').contains(&b) {
                        Ok(b - QUALITY_OFFSET)
                    } else {
                        Err(BamflowError::record(format!(
                            "invalid quality character {:?}",
                            b as char
                        )))
                    }
                })
                .collect::<Result<Vec<u8>>>()?
        }
    };

    let mut tags = Tags::new();
    let mut seen = HashSet::new();
    for field in &fields[MANDATORY_FIELDS..] {
        let tag = Tag::from_sam(field, strictness)?;
        if !seen.insert(tag.name) {
            let msg = format!("duplicate tag {}", tag.name_str());
            if strictness == Strictness::Strict {
                return Err(BamflowError::record(msg));
            }
            warn!("{}; keeping both", msg);
        }
        tags.push(tag);
    }

    let record = Record {
        name,
        reference_id,
        position,
        mapq: (mapq != 255).then_some(mapq),
        flags,
        mate_reference_id,
        mate_position,
        template_length,
        sequence,
        quality,
        cigar,
        tags,
    };
    record.validate(header)?;
    Ok(record)
}
