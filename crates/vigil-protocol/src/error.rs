//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when parsing the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known RESP type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared an invalid length (e.g. below -1).
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A simple string or error line was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A bulk string declared a length above the protocol maximum.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An array or map declared more elements than we accept.
    #[error("too many elements: {0}")]
    TooManyElements(usize),

    /// Arrays or maps nested deeper than the allowed depth.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),
}
