//! Error types for trunking protocol data

use thiserror::Error;

/// Errors raised while building or validating protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Channel range is inverted or starts at zero
    #[error("invalid channel range: {first}..={last}")]
    InvalidRange { first: u16, last: u16 },

    /// Channel step of zero makes the range degenerate
    #[error("channel range step must be non-zero")]
    InvalidStep,

    /// Ident value outside the 13-bit field
    #[error("ident out of range: {0}")]
    IdentOutOfRange(u16),
}
