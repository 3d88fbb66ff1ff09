use bytes::Bytes;
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Byte strings are [`Bytes`] handles, so values decoded from a datagram
/// share its buffer instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Bytes),
    List(Vec<Value>),
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Byte string value from anything convertible into [`Bytes`].
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Value::Bytes(data.into())
    }

    /// Byte string value holding the UTF-8 encoding of `s`.
    pub fn str(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Builds a dictionary from `(key, value)` pairs.
    ///
    /// ```
    /// use rbit_dht::bencode::{encode, Value};
    ///
    /// let value = Value::dict([(&b"y"[..], Value::str("q")), (&b"t"[..], Value::str("aa"))]);
    /// assert_eq!(encode(&value).as_ref(), b"d1:t2:aa1:y1:qe");
    /// ```
    pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a [u8], Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k), v))
                .collect(),
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The byte string as UTF-8, if it is a byte string and valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Dictionary lookup; `None` if this is not a dictionary or the key is absent.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }

    pub fn get_bytes(&self, key: &[u8]) -> Option<&Bytes> {
        self.get(key)?.as_bytes()
    }

    pub fn get_str(&self, key: &[u8]) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_int(&self, key: &[u8]) -> Option<i64> {
        self.get(key)?.as_int()
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}
