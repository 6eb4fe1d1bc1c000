//! Format-agnostic alignment streams.
//!
//! [`AlignmentReader`] sniffs its input and dispatches to [`BamReader`] or
//! [`SamReader`]; [`AlignmentWriter`] wraps [`BamWriter`] or [`SamWriter`]
//! behind a small state machine so the BGZF tail and EOF marker are always
//! written exactly once.
//!
//! # Example
//!
//! ```no_run
//! use bamflow::io::bam::{AlignmentReader, AlignmentWriter, Format};
//! use bamflow::io::{DataSink, ReadOptions};
//!
//! # fn main() -> bamflow::Result<()> {
//! let mut reader = AlignmentReader::open("input.sam", ReadOptions::default())?;
//! let sink = DataSink::from_path("output.bam");
//! let mut writer = AlignmentWriter::open(sink.open()?, reader.header(), Format::Bam)?;
//!
//! for record in reader.records() {
//!     writer.write_record(&record?)?;
//! }
//! writer.close()?;
//! # Ok(())
//! # }
//! ```

use super::header::Header;
use super::reader::BamReader;
use super::record::Record;
use super::sam_reader::SamReader;
use super::sam_writer::SamWriter;
use super::writer::BamWriter;
use crate::error::{BamflowError, Result};
use crate::io::compression::is_bgzf;
use crate::io::options::ReadOptions;
use crate::io::sink::DataSink;
use log::{debug, info, warn};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Alignment serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Tab-separated text
    Sam,
    /// BGZF-compressed binary
    Bam,
}

impl Format {
    /// Infer the output format from a destination: `.bam` is BAM, anything
    /// else (stdout included) is SAM.
    pub fn for_sink(sink: &DataSink) -> Self {
        if sink.is_bam() {
            Format::Bam
        } else {
            Format::Sam
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Sam => write!(f, "SAM"),
            Format::Bam => write!(f, "BAM"),
        }
    }
}

enum Source<R: BufRead> {
    Sam(SamReader<R>),
    Bam(BamReader<R>),
}

/// Reader over SAM or BAM input, chosen by content.
pub struct AlignmentReader<R: BufRead> {
    source: Source<R>,
}

impl AlignmentReader<BufReader<File>> {
    /// Open a SAM or BAM file.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path does not exist.
    pub fn open<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BamflowError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => BamflowError::Io(e),
        })?;
        let reader = Self::new(BufReader::new(file), options)?;
        debug!("opened {} as {}", path.display(), reader.format());
        Ok(reader)
    }
}

impl<R: BufRead> AlignmentReader<R> {
    /// Detect the format from the first buffered bytes and read the header.
    ///
    /// A BGZF block header means BAM (the magic is checked after inflation);
    /// anything else is parsed as SAM text.
    pub fn new(mut reader: R, options: ReadOptions) -> Result<Self> {
        let source = if is_bgzf(reader.fill_buf()?) {
            Source::Bam(BamReader::with_options(reader, options)?)
        } else {
            Source::Sam(SamReader::with_options(reader, options)?)
        };
        Ok(Self { source })
    }

    /// Format detected on open.
    pub fn format(&self) -> Format {
        match self.source {
            Source::Sam(_) => Format::Sam,
            Source::Bam(_) => Format::Bam,
        }
    }

    /// The input header.
    pub fn header(&self) -> &Header {
        match &self.source {
            Source::Sam(reader) => reader.header(),
            Source::Bam(reader) => reader.header(),
        }
    }

    /// Read the next record; `Ok(None)` at end of stream.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        match &mut self.source {
            Source::Sam(reader) => reader.read_record(),
            Source::Bam(reader) => reader.read_record(),
        }
    }

    /// Records decoded so far.
    pub fn records_read(&self) -> u64 {
        match &self.source {
            Source::Sam(reader) => reader.records_read(),
            Source::Bam(reader) => reader.records_read(),
        }
    }

    /// Records skipped in lenient mode.
    pub fn records_skipped(&self) -> u64 {
        match &self.source {
            Source::Sam(reader) => reader.records_skipped(),
            Source::Bam(reader) => reader.records_skipped(),
        }
    }

    /// Lazy, forward-only iterator over the remaining records.
    pub fn records(&mut self) -> AlignmentRecords<'_, R> {
        AlignmentRecords {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over records of an [`AlignmentReader`]; stops after the first error.
pub struct AlignmentRecords<'a, R: BufRead> {
    reader: &'a mut AlignmentReader<R>,
    done: bool,
}

impl<R: BufRead> Iterator for AlignmentRecords<'_, R> {
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

/// Lifecycle of an [`AlignmentWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Created, nothing written
    Unopened,
    /// Header written, no records yet
    HeaderWritten,
    /// At least one record written
    RecordsStreaming,
    /// Closed; further writes fail
    Closed,
}

enum Output<W: Write> {
    /// Raw sink; no format bytes written yet
    Pending(W),
    Sam(SamWriter<W>),
    Bam(BamWriter<W>),
}

/// Writer producing SAM or BAM.
///
/// `Unopened → HeaderWritten → RecordsStreaming → Closed`. Calls out of
/// order fail with `InvalidState`. Records are validated against the header
/// before they are written. Dropping an unclosed writer closes it, logging
/// any failure.
pub struct AlignmentWriter<W: Write> {
    format: Format,
    state: WriterState,
    output: Option<Output<W>>,
    header: Header,
    records_written: u64,
}

impl<W: Write> AlignmentWriter<W> {
    /// Create an unopened writer. Nothing is written until the header.
    pub fn new(sink: W, format: Format) -> Self {
        Self {
            format,
            state: WriterState::Unopened,
            output: Some(Output::Pending(sink)),
            header: Header::new(),
            records_written: 0,
        }
    }

    /// Create a writer and write `header`.
    pub fn open(sink: W, header: &Header, format: Format) -> Result<Self> {
        let mut writer = Self::new(sink, format);
        writer.write_header(header)?;
        Ok(writer)
    }

    /// Output format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn invalid(&self, action: &str) -> BamflowError {
        BamflowError::InvalidState {
            msg: format!("cannot {} in state {:?}", action, self.state),
        }
    }

    /// Write the header. Legal only once, before any record.
    ///
    /// A failed header write closes the writer.
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.state != WriterState::Unopened {
            return Err(self.invalid("write header"));
        }
        let Some(Output::Pending(sink)) = self.output.take() else {
            return Err(self.invalid("write header"));
        };

        let (output, result) = match self.format {
            Format::Sam => {
                let mut writer = SamWriter::new(sink);
                let result = writer.write_header(header);
                (Output::Sam(writer), result)
            }
            Format::Bam => {
                let mut writer = BamWriter::new(sink);
                let result = writer.write_header(header);
                (Output::Bam(writer), result)
            }
        };
        self.output = Some(output);

        if let Err(e) = result {
            self.state = WriterState::Closed;
            return Err(e);
        }
        self.header = header.clone();
        self.state = WriterState::HeaderWritten;
        Ok(())
    }

    /// Validate and write one record.
    ///
    /// A record that fails validation is not written and the writer stays
    /// usable.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        match self.state {
            WriterState::HeaderWritten | WriterState::RecordsStreaming => {}
            _ => return Err(self.invalid("write record")),
        }
        record.validate(&self.header)?;

        let result = match &mut self.output {
            Some(Output::Sam(writer)) => writer.write_record(record),
            Some(Output::Bam(writer)) => writer.write_record(record),
            _ => Err(BamflowError::InvalidState {
                msg: "no open output".into(),
            }),
        };
        result?;
        self.records_written += 1;
        self.state = WriterState::RecordsStreaming;
        Ok(())
    }

    /// Flush everything and, for BAM, write the EOF marker.
    ///
    /// Idempotent; closing an unopened writer writes nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.state = WriterState::Closed;
        match &mut self.output {
            Some(Output::Sam(writer)) => writer.finish()?,
            Some(Output::Bam(writer)) => writer.finish()?,
            Some(Output::Pending(_)) | None => {}
        }
        debug!(
            "{} writer closed: {} records",
            self.format, self.records_written
        );
        Ok(())
    }

    /// Close and return the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        match self.output.take() {
            Some(Output::Pending(sink)) => Ok(sink),
            Some(Output::Sam(writer)) => writer.into_inner(),
            Some(Output::Bam(writer)) => writer.into_inner(),
            None => Err(self.invalid("take sink")),
        }
    }
}

impl AlignmentWriter<Box<dyn Write + Send>> {
    /// Create an unopened writer for a [`DataSink`]; without an explicit
    /// format it is inferred from the destination name.
    pub fn create(sink: &DataSink, format: Option<Format>) -> Result<Self> {
        let format = format.unwrap_or_else(|| Format::for_sink(sink));
        debug!("writing {} to {}", format, sink);
        Ok(Self::new(sink.open()?, format))
    }
}

impl<W: Write> Drop for AlignmentWriter<W> {
    fn drop(&mut self) {
        if self.state != WriterState::Closed {
            if let Err(e) = self.close() {
                warn!("failed to close {} writer on drop: {}", self.format, e);
            }
        }
    }
}

/// Read `path` (SAM or BAM) and write every record to `sink` as `format`.
///
/// Returns the number of records written.
pub fn copy_alignments<P: AsRef<Path>, W: Write>(
    path: P,
    sink: W,
    format: Format,
    options: ReadOptions,
) -> Result<u64> {
    let mut reader = AlignmentReader::open(path, options)?;
    let mut writer = AlignmentWriter::open(sink, reader.header(), format)?;

    for record in reader.records() {
        writer.write_record(&record?)?;
    }
    writer.close()?;

    info!(
        "converted {} {} records to {} ({} skipped)",
        reader.records_read(),
        reader.format(),
        format,
        reader.records_skipped()
    );
    Ok(writer.records_written())
}

/// Print a SAM or BAM file to stdout as SAM text.
///
/// Returns the process exit status, 0 on success.
pub fn read_bam_or_sam<P: AsRef<Path>>(path: P) -> Result<i32> {
    let stdout = io::stdout();
    let sink = BufWriter::new(stdout.lock());
    copy_alignments(path, sink, Format::Sam, ReadOptions::default())?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::{parse_header_text, CigarOp, TagValue};
    use crate::io::compression::BGZF_EOF;

    const SAM: &str = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n\
                       r1\t0\tchr1\t10\t60\t4M\t*\t0\t0\tACGT\tIIII\tNM:i:0\n\
                       r2\t4\t*\t0\t0\t*\t*\t0\t0\tGG\t*\n";

    fn header() -> Header {
        parse_header_text("@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n").unwrap()
    }

    fn mapped() -> Record {
        Record {
            name: "m1".into(),
            reference_id: Some(0),
            position: Some(3),
            mapq: Some(7),
            cigar: vec![CigarOp::Match(2)],
            sequence: b"AC".to_vec(),
            quality: vec![20, 21],
            ..Record::default()
        }
    }

    #[test]
    fn test_detects_sam() {
        let mut reader = AlignmentReader::new(SAM.as_bytes(), ReadOptions::default()).unwrap();
        assert_eq!(reader.format(), Format::Sam);
        let records: Vec<Record> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tags.get_int(b"NM"), Some(0));
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn test_detects_bam() {
        let mut writer = AlignmentWriter::open(Vec::new(), &header(), Format::Bam).unwrap();
        writer.write_record(&mapped()).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = AlignmentReader::new(&bytes[..], ReadOptions::default()).unwrap();
        assert_eq!(reader.format(), Format::Bam);
        assert_eq!(reader.header(), &header());
        let records: Vec<Record> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(records, vec![mapped()]);
    }

    #[test]
    fn test_empty_input_is_empty_sam() {
        let mut reader = AlignmentReader::new(&b""[..], ReadOptions::default()).unwrap();
        assert_eq!(reader.format(), Format::Sam);
        assert_eq!(reader.header().reference_count(), 0);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_writer_state_machine() {
        let mut writer = AlignmentWriter::new(Vec::new(), Format::Sam);
        assert_eq!(writer.state(), WriterState::Unopened);

        let err = writer.write_record(&mapped()).unwrap_err();
        assert!(matches!(err, BamflowError::InvalidState { .. }));

        writer.write_header(&header()).unwrap();
        assert_eq!(writer.state(), WriterState::HeaderWritten);
        assert!(writer.write_header(&header()).is_err());

        writer.write_record(&mapped()).unwrap();
        assert_eq!(writer.state(), WriterState::RecordsStreaming);

        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(writer.state(), WriterState::Closed);
        assert!(writer.write_record(&mapped()).is_err());
        assert_eq!(writer.records_written(), 1);
    }

    #[test]
    fn test_close_unopened_writes_nothing() {
        let mut writer = AlignmentWriter::new(Vec::new(), Format::Bam);
        writer.close().unwrap();
        assert!(writer.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_record_rejected() {
        let mut writer = AlignmentWriter::open(Vec::new(), &header(), Format::Bam).unwrap();
        let bad = Record {
            reference_id: Some(3),
            ..mapped()
        };
        let err = writer.write_record(&bad).unwrap_err();
        assert!(matches!(err, BamflowError::MalformedRecord { .. }));
        assert_eq!(writer.state(), WriterState::HeaderWritten);

        writer.write_record(&mapped()).unwrap();
        assert_eq!(writer.records_written(), 1);
    }

    #[test]
    fn test_drop_writes_eof_marker() {
        let mut out = Vec::new();
        {
            let mut writer = AlignmentWriter::open(&mut out, &header(), Format::Bam).unwrap();
            writer.write_record(&mapped()).unwrap();
        }
        assert!(out.ends_with(&BGZF_EOF));

        let mut reader = AlignmentReader::new(&out[..], ReadOptions::default()).unwrap();
        assert_eq!(reader.records().count(), 1);
    }

    #[test]
    fn test_sam_to_bam_to_sam() {
        let mut sam = AlignmentReader::new(SAM.as_bytes(), ReadOptions::default()).unwrap();
        let mut bam = AlignmentWriter::open(Vec::new(), sam.header(), Format::Bam).unwrap();
        for record in sam.records() {
            bam.write_record(&record.unwrap()).unwrap();
        }
        let bytes = bam.into_inner().unwrap();

        let mut reader = AlignmentReader::new(&bytes[..], ReadOptions::default()).unwrap();
        let mut text = AlignmentWriter::open(Vec::new(), reader.header(), Format::Sam).unwrap();
        for record in reader.records() {
            text.write_record(&record.unwrap()).unwrap();
        }
        let out = String::from_utf8(text.into_inner().unwrap()).unwrap();
        assert_eq!(out, SAM);
    }

    #[test]
    fn test_integer_tag_width_survives_by_value() {
        let mut record = mapped();
        record.tags.insert(*b"XI", TagValue::Int32(5));

        let mut writer = AlignmentWriter::open(Vec::new(), &header(), Format::Sam).unwrap();
        writer.write_record(&record).unwrap();
        let text = writer.into_inner().unwrap();

        let mut reader = AlignmentReader::new(&text[..], ReadOptions::default()).unwrap();
        let back = reader.read_record().unwrap().unwrap();
        assert_ne!(back, record);
        assert!(back.value_eq(&record));
    }

    #[test]
    fn test_format_for_sink() {
        assert_eq!(Format::for_sink(&DataSink::from_path("a.bam")), Format::Bam);
        assert_eq!(Format::for_sink(&DataSink::from_path("a.sam")), Format::Sam);
        assert_eq!(Format::for_sink(&DataSink::stdout()), Format::Sam);
    }
}
