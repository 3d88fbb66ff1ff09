use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 64;

/// Decodes exactly one value from `data`; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    decode_bytes(Bytes::copy_from_slice(data))
}

/// Like [`decode`], but byte strings in the result are slices of `data`.
pub fn decode_bytes(data: Bytes) -> Result<Value, BencodeError> {
    let mut parser = Parser { buf: data, pos: 0 };
    let value = parser.value(0)?;

    if parser.pos != parser.buf.len() {
        return Err(BencodeError::TrailingData(parser.pos));
    }

    Ok(value)
}

struct Parser {
    buf: Bytes,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep(MAX_DEPTH));
        }

        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.int_until(b'e')?;
                Ok(Value::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut list = Vec::new();
                while self.peek()? != b'e' {
                    list.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(list))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key_at = self.pos;
                    if !self.peek()?.is_ascii_digit() {
                        return Err(BencodeError::NonStringKey(key_at));
                    }
                    let key = self.string()?;
                    let value = self.value(depth + 1)?;
                    dict.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(dict))
            }
            b'0'..=b'9' => self.string().map(Value::Bytes),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn string(&mut self) -> Result<Bytes, BencodeError> {
        let len_at = self.pos;
        let len = usize::try_from(self.int_until(b':')?)
            .map_err(|_| BencodeError::InvalidLength(len_at))?;

        let end = self
            .pos
            .checked_add(len)
            .ok_or(BencodeError::InvalidLength(len_at))?;
        if end > self.buf.len() {
            return Err(BencodeError::UnexpectedEof(self.buf.len()));
        }

        let s = self.buf.slice(self.pos..end);
        self.pos = end;
        Ok(s)
    }

    /// Parses a canonical decimal integer terminated by `terminator`.
    fn int_until(&mut self, terminator: u8) -> Result<i64, BencodeError> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let len = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or(BencodeError::UnexpectedEof(self.buf.len()))?;
        let digits = &rest[..len];

        let (negative, magnitude) = match digits.split_first() {
            Some((b'-', tail)) => (true, tail),
            _ => (false, digits),
        };
        let canonical = match magnitude {
            [] => false,
            [b'0'] => !negative,
            [b'0', ..] => false,
            _ => magnitude.iter().all(u8::is_ascii_digit),
        };
        if !canonical {
            return Err(BencodeError::InvalidInteger(start));
        }

        let value = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(BencodeError::InvalidInteger(start))?;

        self.pos = start + len + 1;
        Ok(value)
    }
}
