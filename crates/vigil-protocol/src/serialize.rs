//! Direct-to-buffer RESP serialization.
//!
//! Commands leave the client as arrays of bulk strings; the remaining
//! variants are encoded too so that test doubles can script server
//! replies with the same type.

use bytes::BufMut;
use bytes::BytesMut;

use crate::types::Frame;

impl Frame {
    /// Serializes this frame into the provided buffer, including the type
    /// prefix and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_line(b'+', s.as_bytes(), dst),
            Frame::Error(msg) => write_line(b'-', msg.as_bytes(), dst),
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                write_header(b'$', data.len(), dst);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                write_header(b'*', items.len(), dst);
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Map(pairs) => {
                write_header(b'%', pairs.len(), dst);
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
        }
    }
}

fn write_line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

fn write_header(prefix: u8, len: usize, dst: &mut BytesMut) {
    dst.put_u8(prefix);
    write_i64(len as i64, dst);
    dst.put_slice(b"\r\n");
}

/// Writes an i64 as its decimal ASCII representation directly into the buffer.
fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
