//! Bencode codec used by the KRPC wire format ([BEP-3], [BEP-5]).
//!
//! Only what DHT datagrams need is implemented: integers, byte strings,
//! lists and dictionaries, decoded without copying out of the datagram
//! buffer and encoded canonically (dictionary keys in sorted order).
//!
//! # Examples
//!
//! ```
//! use rbit_dht::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d1:q4:ping1:t2:aa1:y1:qe").unwrap();
//! assert_eq!(value.get_str(b"q"), Some("ping"));
//! assert_eq!(value.get_bytes(b"t").map(|t| t.as_ref()), Some(b"aa".as_slice()));
//!
//! let encoded = encode(&value);
//! assert_eq!(encoded.as_ref(), b"d1:q4:ping1:t2:aa1:y1:qe");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_bytes};
pub use encode::{encode, encode_into};
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
