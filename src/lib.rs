//! bamflow: streaming SAM/BAM reader and writer
//!
//! # Overview
//!
//! bamflow reads and writes sequence alignments in SAM (text) and BAM
//! (BGZF-compressed binary) form through one record model, so either format
//! converts losslessly into the other.
//!
//! ## Key Features
//!
//! - **Streaming**: constant memory, one record decoded per pull
//! - **BGZF**: block-level CRC and size checks, EOF marker handling
//! - **Strict or lenient**: lenient reads log and skip damaged records
//! - **Safe writers**: the BAM tail and EOF marker are written exactly once,
//!   on `close()` or on drop
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamflow::io::{AlignmentReader, ReadOptions};
//!
//! # fn main() -> bamflow::Result<()> {
//! let mut reader = AlignmentReader::open("alignments.bam", ReadOptions::default())?;
//!
//! for record in reader.records() {
//!     let record = record?;
//!     println!("{}\t{:?}", record.name, record.position);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io::bam`]: SAM/BAM headers, records, readers and writers
//! - [`io::compression`]: BGZF block codec
//! - [`error`]: error type shared by every layer

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{BamflowError, Result};
pub use io::bam::{Header, Record};
pub use io::{AlignmentReader, AlignmentWriter, DataSink, Format, ReadOptions, Strictness};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
