//! Output destinations for streaming writes
//!
//! `DataSink` names where an alignment stream goes without committing to a
//! concrete writer type. [`DataSink::open`] produces the byte sink that the
//! SAM/BAM writers wrap.
//!
//! # Example
//!
//! ```no_run
//! use bamflow::io::DataSink;
//!
//! // Write to local file
//! let sink = DataSink::from_path("output.bam");
//! assert!(sink.is_bam());
//!
//! // Write to stdout
//! let sink = DataSink::stdout();
//! ```

use crate::error::Result;
use log::debug;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Output destination for streaming writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSink {
    /// Write to a local file path
    ///
    /// A `.bam` extension selects BAM output when no format is given.
    Local(PathBuf),

    /// Write to standard output
    ///
    /// Useful for streaming pipelines:
    /// ```bash
    /// bamflow input.bam | grep -v '^@'
    /// ```
    Stdout,
}

impl DataSink {
    /// Create a sink from a file path
    ///
    /// # Example
    ///
    /// ```
    /// use bamflow::io::DataSink;
    ///
    /// let sink = DataSink::from_path("output.sam");
    /// assert!(!sink.is_bam());
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    /// Create a sink for standard output
    pub fn stdout() -> Self {
        Self::Stdout
    }

    /// Get the file extension if this is a local file sink
    pub(crate) fn extension(&self) -> Option<&str> {
        match self {
            Self::Local(path) => path.extension().and_then(|s| s.to_str()),
            Self::Stdout => None,
        }
    }

    /// Check if the destination name implies BAM output
    pub fn is_bam(&self) -> bool {
        self.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bam"))
    }

    /// Open the destination for writing, truncating an existing file
    pub fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            Self::Local(path) => {
                debug!("opening {} for writing", path.display());
                Ok(Box::new(File::create(path)?))
            }
            Self::Stdout => Ok(Box::new(io::stdout())),
        }
    }
}

impl fmt::Display for DataSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Stdout => write!(f, "<stdout>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_path() {
        let sink = DataSink::from_path("test.bam");
        assert_eq!(sink, DataSink::Local(PathBuf::from("test.bam")));
        assert_eq!(sink.extension(), Some("bam"));
    }

    #[test]
    fn test_is_bam() {
        assert!(DataSink::from_path("out.bam").is_bam());
        assert!(DataSink::from_path("OUT.BAM").is_bam());
        assert!(!DataSink::from_path("out.sam").is_bam());
        assert!(!DataSink::from_path("bam").is_bam());
        assert!(!DataSink::stdout().is_bam());
    }

    #[test]
    fn test_display() {
        assert_eq!(DataSink::stdout().to_string(), "<stdout>");
        assert_eq!(DataSink::from_path("a/b.sam").to_string(), "a/b.sam");
    }

    #[test]
    fn test_open_local() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.sam");
        {
            let mut writer = DataSink::from_path(&path).open().unwrap();
            writer.write_all(b"@HD\tVN:1.6\n").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"@HD\tVN:1.6\n");
    }

    #[test]
    fn test_open_missing_directory() {
        let sink = DataSink::from_path("/nonexistent/dir/out.sam");
        assert!(sink.open().is_err());
    }
}
