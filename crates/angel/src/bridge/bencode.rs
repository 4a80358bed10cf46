//! Bencode codec for the admin pre-configuration.
//!
//! The client and the core both speak bencode. Dictionaries are kept in a
//! `BTreeMap` keyed by raw bytes, so re-encoding a canonically sorted input
//! reproduces it byte for byte.

use std::collections::BTreeMap;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};

/// Nesting limit for lists and dictionaries.
const MAX_DEPTH: usize = 64;

pub type Dict = BTreeMap<Bytes, Value>;

/// A decoded bencode tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Bytes),
    List(Vec<Value>),
    Dict(Dict),
}

impl Value {
    /// Build a dictionary from string keys.
    pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(d) => d.get(key.as_bytes()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string that is also valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unexpected byte 0x{byte:02x} at byte {offset}")]
    InvalidByte { byte: u8, offset: usize },

    #[error("malformed integer at byte {offset}")]
    InvalidInteger { offset: usize },

    #[error("invalid string length at byte {offset}")]
    InvalidLength { offset: usize },

    #[error("trailing data after value at byte {offset}")]
    TrailingData { offset: usize },

    #[error("dictionary key out of order or repeated at byte {offset}")]
    UnsortedKey { offset: usize },

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

pub fn encode(value: &Value) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);
    encode_into(value, &mut buf);
    buf.freeze()
}

pub fn encode_into(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::Int(n) => {
            dst.put_u8(b'i');
            dst.put_slice(n.to_string().as_bytes());
            dst.put_u8(b'e');
        }
        Value::Bytes(b) => put_string(b, dst),
        Value::List(items) => {
            dst.put_u8(b'l');
            for item in items {
                encode_into(item, dst);
            }
            dst.put_u8(b'e');
        }
        Value::Dict(entries) => {
            dst.put_u8(b'd');
            for (key, item) in entries {
                put_string(key, dst);
                encode_into(item, dst);
            }
            dst.put_u8(b'e');
        }
    }
}

fn put_string(s: &[u8], dst: &mut BytesMut) {
    dst.put_slice(s.len().to_string().as_bytes());
    dst.put_u8(b':');
    dst.put_slice(s);
}

/// Decode exactly one value; anything after it is an error.
pub fn decode(input: &[u8]) -> Result<Value, CodecError> {
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    if parser.pos != input.len() {
        return Err(CodecError::TrailingData { offset: parser.pos });
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Result<u8, CodecError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })
    }

    fn value(&mut self) -> Result<Value, CodecError> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                Ok(Value::Int(self.integer(b'e')?))
            }
            b'l' => {
                self.descend()?;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.ascend();
                Ok(Value::List(items))
            }
            b'd' => {
                self.descend()?;
                let mut entries = Dict::new();
                while self.peek()? != b'e' {
                    let offset = self.pos;
                    let key = self.string()?;
                    if entries.last_key_value().is_some_and(|(last, _)| *last >= key) {
                        return Err(CodecError::UnsortedKey { offset });
                    }
                    let item = self.value()?;
                    entries.insert(key, item);
                }
                self.ascend();
                Ok(Value::Dict(entries))
            }
            b'0'..=b'9' => Ok(Value::Bytes(self.string()?)),
            byte => Err(CodecError::InvalidByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn descend(&mut self) -> Result<(), CodecError> {
        if self.depth == MAX_DEPTH {
            return Err(CodecError::TooDeep);
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    // Consumes the closing 'e'.
    fn ascend(&mut self) {
        self.depth -= 1;
        self.pos += 1;
    }

    /// Canonical decimal up to `terminator`: no leading zeros, no "-0", no '+'.
    fn integer(&mut self, terminator: u8) -> Result<i64, CodecError> {
        let start = self.pos;
        let end = self.input[start..]
            .iter()
            .position(|&b| b == terminator)
            .map(|i| start + i)
            .ok_or(CodecError::UnexpectedEof {
                offset: self.input.len(),
            })?;
        let digits = std::str::from_utf8(&self.input[start..end])
            .map_err(|_| CodecError::InvalidInteger { offset: start })?;
        let n: i64 = digits
            .parse()
            .map_err(|_| CodecError::InvalidInteger { offset: start })?;
        if n.to_string() != digits {
            return Err(CodecError::InvalidInteger { offset: start });
        }
        self.pos = end + 1;
        Ok(n)
    }

    fn string(&mut self) -> Result<Bytes, CodecError> {
        let start = self.pos;
        if !self.peek()?.is_ascii_digit() {
            return Err(CodecError::InvalidLength { offset: start });
        }
        let len = usize::try_from(self.integer(b':')?)
            .map_err(|_| CodecError::InvalidLength { offset: start })?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or(CodecError::UnexpectedEof {
                offset: self.input.len(),
            })?;
        let s = Bytes::copy_from_slice(&self.input[self.pos..end]);
        self.pos = end;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preconfig() -> Value {
        Value::dict([(
            "admin",
            Value::dict([
                ("core", Value::from("./build/admin/angel/cjdns-core")),
                ("bind", Value::from("127.0.0.1:12345")),
                ("pass", Value::from("abcd")),
            ]),
        )])
    }

    #[test]
    fn encodes_sorted_dictionaries() {
        let bytes = encode(&preconfig());
        insta::assert_snapshot!(
            String::from_utf8_lossy(&bytes),
            @"d5:admind4:bind15:127.0.0.1:123454:core30:./build/admin/angel/cjdns-core4:pass4:abcdee"
        );
    }

    #[test]
    fn decode_then_encode_is_byte_identical() {
        let wire = b"d5:admind4:bind15:127.0.0.1:123454:cored8:fromCorei12e6:toCorei14ee4:pass6:secretee";
        let value = decode(wire).unwrap();
        assert_eq!(
            value.get("admin").and_then(|a| a.get("core")).and_then(|c| c.get("toCore")),
            Some(&Value::Int(14))
        );
        assert_eq!(&encode(&value)[..], &wire[..]);
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let value = Value::dict([
            ("list", Value::List(vec![Value::Int(-7), Value::from(""), Value::dict([])])),
            ("raw", Value::Bytes(Bytes::from_static(&[0, 255, b':', b'e']))),
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn rejects_truncated_input() {
        assert_eq!(
            decode(b"d5:admind4:bind"),
            Err(CodecError::UnexpectedEof { offset: 15 })
        );
        assert!(matches!(
            decode(b"10:short"),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn rejects_non_canonical_integers() {
        assert!(matches!(decode(b"i007e"), Err(CodecError::InvalidInteger { .. })));
        assert!(matches!(decode(b"i-0e"), Err(CodecError::InvalidInteger { .. })));
        assert!(matches!(decode(b"i+3e"), Err(CodecError::InvalidInteger { .. })));
        assert!(matches!(decode(b"ie"), Err(CodecError::InvalidInteger { .. })));
    }

    #[test]
    fn rejects_bad_keys_and_trailing_bytes() {
        assert_eq!(
            decode(b"di1ei2ee"),
            Err(CodecError::InvalidLength { offset: 1 })
        );
        assert_eq!(decode(b"i1ei2e"), Err(CodecError::TrailingData { offset: 3 }));
        assert_eq!(
            decode(b"x"),
            Err(CodecError::InvalidByte { byte: b'x', offset: 0 })
        );
    }

    #[test]
    fn rejects_unsorted_or_repeated_keys() {
        assert_eq!(
            decode(b"d1:bi1e1:ai2ee"),
            Err(CodecError::UnsortedKey { offset: 7 })
        );
        assert_eq!(
            decode(b"d1:ai1e1:ai2ee"),
            Err(CodecError::UnsortedKey { offset: 7 })
        );
        assert!(decode(b"d1:ai1e2:aai2ee").is_ok());
    }

    #[test]
    fn limits_nesting() {
        let mut deep = vec![b'l'; MAX_DEPTH + 1];
        deep.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert_eq!(decode(&deep), Err(CodecError::TooDeep));

        let mut ok = vec![b'l'; MAX_DEPTH];
        ok.extend(vec![b'e'; MAX_DEPTH]);
        assert!(decode(&ok).is_ok());
    }
}
