//! RESP frame types.
//!
//! The [`Frame`] enum represents a single parsed reply value.
//! Blob strings use `Bytes` for reference-counted storage.

use bytes::Bytes;

/// A single RESP protocol frame.
///
/// Covers the reply types sentinel and store nodes send back to a
/// client: strings, errors, integers, bulk data, arrays, null, and maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string response, e.g. `+OK\r\n`.
    Simple(String),

    /// Error response, e.g. `-READONLY You can't write against a read only replica.\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames, e.g. `*2\r\n+hello\r\n+world\r\n`.
    Array(Vec<Frame>),

    /// Null value. RESP3 `_\r\n`, or the RESP2 null bulk string
    /// (`$-1\r\n`) and null array (`*-1\r\n`).
    Null,

    /// Ordered map of key-value frame pairs, e.g. `%1\r\n+key\r\n+val\r\n`.
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Builds a client command: an array of bulk strings.
    pub fn command<S: AsRef<str>>(tokens: &[S]) -> Frame {
        Frame::Array(
            tokens
                .iter()
                .map(|t| Frame::Bulk(Bytes::copy_from_slice(t.as_ref().as_bytes())))
                .collect(),
        )
    }

    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns the scalar text of a simple string, bulk string, or integer.
    ///
    /// Non-UTF-8 bulk data is converted lossily. Aggregates, errors, and
    /// null return `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::Simple(s) => Some(s.clone()),
            Frame::Bulk(data) => Some(String::from_utf8_lossy(data).into_owned()),
            Frame::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Flattens this frame into a sequence of string tokens.
    ///
    /// Arrays are walked depth-first and maps contribute key then value,
    /// so a reply listing several records (an array of flat key/value
    /// arrays) becomes one flat token stream with the records back to
    /// back. Null and error frames contribute nothing.
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            Frame::Array(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            Frame::Map(pairs) => {
                for (key, val) in pairs {
                    key.flatten_into(out);
                    val.flatten_into(out);
                }
            }
            Frame::Null | Frame::Error(_) => {}
            scalar => {
                if let Some(text) = scalar.as_text() {
                    out.push(text);
                }
            }
        }
    }
}
