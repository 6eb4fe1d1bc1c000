//! I/O module: streaming alignment codecs and BGZF compression
//!
//! Everything here streams with constant memory regardless of input size:
//! BGZF blocks are inflated on demand and records are decoded one at a time.

pub mod bam;
pub mod compression;
pub mod options;
pub mod sink;

pub use bam::{AlignmentReader, AlignmentWriter, BamReader, BamWriter, Format, SamReader, SamWriter};
pub use compression::{BgzfReader, BgzfWriter};
pub use options::{ReadOptions, Strictness};
pub use sink::DataSink;
