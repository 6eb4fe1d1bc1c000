//! SAM and BAM alignment formats.
//!
//! Both formats decode into the same [`Record`] and [`Header`] types, so a
//! stream read as one format can be written as the other.
//!
//! # Architecture
//!
//! - [`cigar`], [`sequence`], [`tags`]: field codecs (binary and text)
//! - [`header`]: header text and binary reference dictionary
//! - [`record`]: fixed 32-byte record body, variable-length tail
//! - [`reader`] / [`writer`]: BAM over [`BgzfReader`](crate::io::compression::BgzfReader)
//!   and [`BgzfWriter`](crate::io::compression::BgzfWriter)
//! - [`sam_reader`] / [`sam_writer`]: tab-separated text
//! - [`stream`]: format detection, writer lifecycle, conversion
//!
//! Reading is streaming: one record is decoded per call into owned data,
//! with a reusable body buffer behind it. Positions are 1-based in
//! [`Record`] and converted at the binary boundary.
//!
//! # Example
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
//! for record in bam.records() {
//!     let record = record?;
//!     if let Some(pos) = record.position {
//!         println!("Read {} at position {}", record.name, pos);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Converting
//!
//! ```no_run
//! use bamflow::io::bam::{copy_alignments, Format};
//! use bamflow::io::ReadOptions;
//! use std::fs::File;
//!
//! # fn main() -> bamflow::Result<()> {
//! let out = File::create("alignments.bam")?;
//! let written = copy_alignments("alignments.sam", out, Format::Bam, ReadOptions::lenient())?;
//! println!("{} records", written);
//! # Ok(())
//! # }
//! ```

pub mod cigar;
pub mod header;
pub mod reader;
pub mod record;
pub mod sam_reader;
pub mod sam_writer;
pub mod sequence;
pub mod stream;
pub mod tags;
pub mod writer;

// Re-export main types for convenience
pub use cigar::{encode_cigar, format_cigar, parse_cigar, parse_cigar_text, CigarOp};
pub use header::{parse_header_text, read_header, write_header, Header, Reference};
pub use reader::{BamReader, Records};
pub use record::{encode_record, flags, parse_record, Record};
pub use sam_reader::{parse_sam_record, SamReader, SamRecords};
pub use sam_writer::{format_sam_record, SamWriter};
pub use sequence::{decode_sequence, encode_sequence};
pub use stream::{
    copy_alignments, read_bam_or_sam, AlignmentReader, AlignmentRecords, AlignmentWriter, Format,
    WriterState,
};
pub use tags::{encode_tags, parse_tags, ArrayValue, RawEncoding, Tag, TagValue, Tags};
pub use writer::BamWriter;
