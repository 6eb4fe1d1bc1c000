//! Reader error policy.

/// How a reader reacts to recoverable damage.
///
/// Framing and header errors always abort the stream. Record-scoped errors
/// (bad CIGAR, bad field, unknown tag type) and a missing BGZF EOF marker
/// either abort (`Strict`) or are logged and recovered from (`Lenient`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Propagate every error
    #[default]
    Strict,
    /// Warn and continue where the damage is contained
    Lenient,
}

/// Options shared by the SAM, BAM and BGZF readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Error policy
    pub strictness: Strictness,
}

impl ReadOptions {
    /// Strict options (the default).
    pub fn strict() -> Self {
        Self {
            strictness: Strictness::Strict,
        }
    }

    /// Lenient options.
    pub fn lenient() -> Self {
        Self {
            strictness: Strictness::Lenient,
        }
    }

    /// Whether record-scoped errors should be recovered from.
    pub fn is_lenient(&self) -> bool {
        self.strictness == Strictness::Lenient
    }
}
