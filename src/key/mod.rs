#![forbid(unsafe_code)]
//! Ordered key tuples and their order-preserving byte encoding.
//!
//! A [`Key`] is a tuple of [`KeyPart`]s. Its derived ordering compares
//! component by component, with a tuple ordering before any longer tuple it is
//! a prefix of. The byte encoding produced by [`Key::encode`] sorts exactly the
//! same way, so an ordered byte store can range-scan keys directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{AggError, Result};
use crate::primitives::bytes::ord;

const TAG_MIN: u8 = 0x00;
const TAG_TUPLE: u8 = 0x01;
const TAG_MAX: u8 = 0xFF;
const PART_INT: u8 = 0x10;
const PART_TEXT: u8 = 0x20;
/// Sorts after every component tag: `encoded(k) ++ [PART_END]` bounds exactly
/// the keys extending `k`.
pub(crate) const PART_END: u8 = PART_TEXT + 1;

/// A single component of a [`Key`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Signed integer component.
    Int(i64),
    /// UTF-8 text component; sorts after every integer.
    Text(String),
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Text(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Text(value)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(v) => write!(f, "{v}"),
            KeyPart::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// An ordered tuple of key components, e.g. `[2017, 3, 1]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(SmallVec<[KeyPart; 4]>);

/// Builds a [`Key`] from a list of components convertible into [`KeyPart`].
///
/// ```
/// use levelagg::key;
/// let k = key![2017, 3, 1];
/// assert_eq!(k.arity(), 3);
/// ```
#[macro_export]
macro_rules! key {
    () => { $crate::Key::default() };
    ($($part:expr),+ $(,)?) => {
        $crate::Key::from_parts([$($crate::KeyPart::from($part)),+])
    };
}

impl Key {
    /// Creates a key from its components.
    pub fn from_parts(parts: impl IntoIterator<Item = KeyPart>) -> Self {
        Key(parts.into_iter().collect())
    }

    /// The key's components in order.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Number of components.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Truncates the key to its first `n` components for grouping.
    ///
    /// Returns `None` (the "ungrouped" marker) when `n == 0`, and the full
    /// key when `n` is at least the key's arity.
    pub fn group_prefix(&self, n: usize) -> Option<Key> {
        if n == 0 {
            return None;
        }
        let take = n.min(self.0.len());
        Some(Key(self.0[..take].iter().cloned().collect()))
    }

    /// Returns true when both keys agree on their first `n` components.
    pub fn shares_group(&self, other: &Key, n: usize) -> bool {
        self.group_prefix(n) == other.group_prefix(n)
    }

    /// Appends the order-preserving encoding of this key to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(TAG_TUPLE);
        for part in &self.0 {
            match part {
                KeyPart::Int(v) => {
                    out.push(PART_INT);
                    ord::push_i64(out, *v);
                }
                KeyPart::Text(s) => {
                    out.push(PART_TEXT);
                    ord::push_escaped(out, s.as_bytes());
                }
            }
        }
    }

    /// Returns the encoding of this key as a fresh buffer.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.0.len() * 9);
        self.encode(&mut out);
        out
    }

    /// Decodes a key produced by [`Key::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Key> {
        match bytes.first() {
            Some(&TAG_TUPLE) => {}
            _ => return Err(AggError::Codec("missing tuple tag")),
        }
        let mut parts = SmallVec::new();
        let mut rest = &bytes[1..];
        while let Some((&tag, body)) = rest.split_first() {
            match tag {
                PART_INT => {
                    let v = ord::read_i64(body).ok_or(AggError::Codec("truncated int component"))?;
                    parts.push(KeyPart::Int(v));
                    rest = &body[8..];
                }
                PART_TEXT => {
                    let (raw, used) = ord::split_escaped(body)
                        .ok_or(AggError::Codec("unterminated text component"))?;
                    let text = String::from_utf8(raw)
                        .map_err(|_| AggError::Codec("text component is not UTF-8"))?;
                    parts.push(KeyPart::Text(text));
                    rest = &body[used..];
                }
                _ => return Err(AggError::Codec("unknown key component tag")),
            }
        }
        Ok(Key(parts))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

/// A position in the index key space: a real key or one of the two sentinels
/// bounding it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Sorts before every key; present at every level with the identity value.
    Min,
    /// A user key.
    Tuple(Key),
    /// Sorts after every key; never stored.
    Max,
}

impl IndexKey {
    /// Appends the encoding of this position to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            IndexKey::Min => out.push(TAG_MIN),
            IndexKey::Tuple(key) => key.encode(out),
            IndexKey::Max => out.push(TAG_MAX),
        }
    }

    /// Decodes a position written by [`IndexKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<IndexKey> {
        match bytes {
            [TAG_MIN] => Ok(IndexKey::Min),
            [TAG_MAX] => Ok(IndexKey::Max),
            _ => Key::decode(bytes).map(IndexKey::Tuple),
        }
    }

    /// The user key, if this is not a sentinel.
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            IndexKey::Tuple(key) => Some(key),
            _ => None,
        }
    }

    /// Consumes the position, returning the user key if it is not a sentinel.
    pub fn into_key(self) -> Option<Key> {
        match self {
            IndexKey::Tuple(key) => Some(key),
            _ => None,
        }
    }
}

impl From<Key> for IndexKey {
    fn from(key: Key) -> Self {
        IndexKey::Tuple(key)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Min => f.write_str("<min>"),
            IndexKey::Tuple(key) => write!(f, "{key}"),
            IndexKey::Max => f.write_str("<max>"),
        }
    }
}
