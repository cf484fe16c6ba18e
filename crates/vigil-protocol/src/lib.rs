//! vigil-protocol: RESP wire codec.
//!
//! Parses server replies (RESP2, plus the RESP3 null and map types) and
//! serializes client commands directly into a buffer. This is the only
//! layer that knows about bytes on the wire; everything above it works
//! with [`Frame`] values or flattened string tokens.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use vigil_protocol::{Frame, parse_frame};
//!
//! // parse a simple string
//! let input = b"+PONG\r\n";
//! let (frame, consumed) = parse_frame(input).unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("PONG".into()));
//! assert_eq!(consumed, input.len());
//!
//! // serialize a command
//! let mut buf = BytesMut::new();
//! Frame::command(&["PING"]).serialize(&mut buf);
//! assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::parse_frame;
pub use types::Frame;
