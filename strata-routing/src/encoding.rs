//! Order-preserving shard-key encoding.
//!
//! A shard-key document encodes to a byte string such that lexicographic
//! byte comparison of two encodings equals the pattern-ordered comparison of
//! the documents. Encoded keys are the keys of every ordered map in the
//! routing index, so one encoding per lookup replaces repeated multi-column
//! document comparison.
//!
//! Per field: a type tag, then a self-delimiting payload. Descending fields
//! invert every byte, which reverses the order of a prefix-free code.
//! Field names are stripped; only positions count.

use bytes::{BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::xxh3_64;

use strata_core::{Error, Result};

use crate::key::{Direction, KeyDocument, KeyValue};

/// An encoded shard key. Cheap to clone; ordered maps key on it directly.
pub type EncodedKey = Bytes;

// Type tags, in the canonical cross-type sort order. MinKey below every
// real value, MaxKey above.
const TAG_MIN_KEY: u8 = 0x10;
const TAG_NULL: u8 = 0x20;
const TAG_NUMBER: u8 = 0x30;
const TAG_STRING: u8 = 0x40;
const TAG_BOOL: u8 = 0x50;
const TAG_MAX_KEY: u8 = 0xf0;

/// The key-ordering descriptor of a shard-key pattern: one direction per
/// field, in pattern order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOrdering {
    directions: Vec<Direction>,
}

impl KeyOrdering {
    /// Creates an ordering descriptor from per-field directions.
    #[must_use]
    pub const fn new(directions: Vec<Direction>) -> Self {
        Self { directions }
    }

    /// Returns the number of key fields.
    #[must_use]
    pub fn num_fields(&self) -> usize {
        self.directions.len()
    }

    /// Encodes a shard-key document positionally under this ordering.
    ///
    /// Deterministic: the same document always yields the same bytes. Field
    /// names in the document are discarded.
    ///
    /// # Errors
    ///
    /// Returns `ShardKeyNotFound` when the document does not have exactly
    /// one value per key field.
    pub fn encode(&self, doc: &KeyDocument) -> Result<EncodedKey> {
        if doc.len() != self.directions.len() {
            return Err(Error::ShardKeyNotFound {
                reason: format!(
                    "key {doc} has {} fields, shard key has {}",
                    doc.len(),
                    self.directions.len()
                ),
            });
        }

        let mut out = BytesMut::with_capacity(doc.len() * 10);
        for (value, direction) in doc.values().zip(self.directions.iter()) {
            let mut field = Vec::with_capacity(10);
            encode_value(value, &mut field);
            if *direction == Direction::Descending {
                for byte in &mut field {
                    *byte = !*byte;
                }
            }
            out.put_slice(&field);
        }
        Ok(out.freeze())
    }
}

/// Appends the tag-and-payload encoding of one value.
fn encode_value(value: &KeyValue, out: &mut Vec<u8>) {
    match value {
        KeyValue::MinKey => out.push(TAG_MIN_KEY),
        KeyValue::Null => out.push(TAG_NULL),
        KeyValue::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&ordered_f64(*n));
        }
        #[allow(clippy::cast_precision_loss)]
        KeyValue::Int(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&ordered_f64(*n as f64));
        }
        KeyValue::String(s) => {
            out.push(TAG_STRING);
            // NUL-escape so embedded zero bytes keep the code prefix-free:
            // 0x00 -> 0x00 0xff, terminator 0x00 0x00.
            for &byte in s.as_bytes() {
                if byte == 0x00 {
                    out.push(0x00);
                    out.push(0xff);
                } else {
                    out.push(byte);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
        KeyValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        KeyValue::MaxKey => out.push(TAG_MAX_KEY),
    }
}

/// Maps an f64 onto u64 big-endian bytes whose unsigned byte order equals
/// the numeric order: flip the sign bit for non-negatives, all bits for
/// negatives.
fn ordered_f64(value: f64) -> [u8; 8] {
    const SIGN: u64 = 0x8000_0000_0000_0000;
    let bits = value.to_bits();
    let mapped = if bits & SIGN == 0 { bits | SIGN } else { !bits };
    mapped.to_be_bytes()
}

/// Compares two single values under ascending order, via their encodings.
#[must_use]
pub fn compare_values(a: &KeyValue, b: &KeyValue) -> std::cmp::Ordering {
    let mut ea = Vec::with_capacity(10);
    let mut eb = Vec::with_capacity(10);
    encode_value(a, &mut ea);
    encode_value(b, &mut eb);
    ea.cmp(&eb)
}

/// Hashes a document value for a hashed shard-key field.
///
/// The result is reduced to 53 bits so it is exactly representable as a
/// number and hash order survives numeric encoding.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn hashed_value(value: &KeyValue) -> KeyValue {
    let mut encoded = Vec::with_capacity(10);
    encode_value(value, &mut encoded);
    KeyValue::Int((xxh3_64(&encoded) >> 11) as i64)
}
