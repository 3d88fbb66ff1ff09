use super::value::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write as _;

/// Encodes `value` canonically. Dictionaries are written in key order.
pub fn encode(value: &Value) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    encode_into(value, &mut buf);
    buf.freeze()
}

/// Appends the canonical encoding of `value` to `buf`.
pub fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Int(i) => {
            // Writing into a BytesMut cannot fail.
            let _ = write!(buf, "i{}e", i);
        }
        Value::Bytes(b) => put_string(buf, b),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(entries) => {
            buf.put_u8(b'd');
            for (key, item) in entries {
                put_string(buf, key);
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &[u8]) {
    let _ = write!(buf, "{}:", s.len());
    buf.put_slice(s);
}
