//! Error types for bamflow

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bamflow operations
pub type Result<T> = std::result::Result<T, BamflowError>;

/// Error types that can occur while reading or writing alignment streams
#[derive(Debug, Error)]
pub enum BamflowError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Input path does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound {
        /// Path that could not be opened
        path: PathBuf,
    },

    /// BGZF framing is broken, or the stream ended without its EOF marker
    #[error("Truncated BGZF stream at offset {offset}: {msg}")]
    TruncatedStream {
        /// Compressed byte offset of the offending block
        offset: u64,
        /// Error message
        msg: String,
    },

    /// Invalid header (magic bytes, reference dictionary, @SQ lines)
    #[error("Malformed header: {msg}")]
    MalformedHeader {
        /// Error message
        msg: String,
    },

    /// Invalid CIGAR (zero-length op, unknown op code, bad text)
    #[error("Malformed CIGAR: {msg}")]
    MalformedCigar {
        /// Error message
        msg: String,
    },

    /// Invalid alignment record
    #[error("Malformed record: {msg}")]
    MalformedRecord {
        /// Error message
        msg: String,
    },

    /// Tag carries a type byte outside the known alphabet
    #[error("Unknown tag type for {}{}: {:?}", tag[0] as char, tag[1] as char, *type_code as char)]
    UnknownTagType {
        /// Tag key
        tag: [u8; 2],
        /// Offending type byte
        type_code: u8,
    },

    /// A field does not fit its fixed-width binary encoding
    #[error("Encoding overflow: {field} = {value} exceeds maximum {max}")]
    EncodingOverflow {
        /// Name of the field
        field: &'static str,
        /// Value that was supplied
        value: u64,
        /// Largest encodable value
        max: u64,
    },

    /// Writer used out of order (record before header, write after close)
    #[error("Invalid writer state: {msg}")]
    InvalidState {
        /// Error message
        msg: String,
    },
}

impl BamflowError {
    /// Whether this error concerns a single record and can be skipped in lenient mode.
    ///
    /// Framing, header and I/O errors poison the whole stream and always
    /// propagate.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. }
                | Self::MalformedCigar { .. }
                | Self::UnknownTagType { .. }
                | Self::EncodingOverflow { .. }
        )
    }

    pub(crate) fn record(msg: impl Into<String>) -> Self {
        Self::MalformedRecord { msg: msg.into() }
    }

    pub(crate) fn header(msg: impl Into<String>) -> Self {
        Self::MalformedHeader { msg: msg.into() }
    }

    pub(crate) fn cigar(msg: impl Into<String>) -> Self {
        Self::MalformedCigar { msg: msg.into() }
    }
}

/// Unwraps errors that crossed a `Read`/`Write` boundary as `io::Error`.
impl From<io::Error> for BamflowError {
    fn from(err: io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .is_some_and(|inner| inner.is::<BamflowError>());
        if !wrapped {
            return Self::Io(err);
        }

        match err.into_inner().map(|inner| inner.downcast::<BamflowError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
            None => Self::Io(io::Error::from(io::ErrorKind::InvalidData)),
        }
    }
}

impl From<BamflowError> for io::Error {
    fn from(err: BamflowError) -> Self {
        match err {
            BamflowError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
