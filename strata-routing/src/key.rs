//! Shard-key value model.
//!
//! A shard-key document is an ordered list of named values; the pattern it
//! is extracted under decides per-field ordering (ascending, descending or
//! hashed). Field names are carried for display and for the admin surface,
//! but key comparison is purely positional.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One value inside a shard-key document.
///
/// `MinKey` and `MaxKey` are sentinels: `MinKey` sorts below every real
/// value and `MaxKey` above, regardless of type. The remaining variants
/// order by type class first (null < numbers < strings < booleans), then by
/// value within the class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyValue {
    /// Sorts below every real value.
    MinKey,
    /// The null value.
    Null,
    /// A numeric value. Integers beyond 2^53 compare with double precision.
    Number(f64),
    /// An integer value; orders together with `Number` by numeric value.
    Int(i64),
    /// A UTF-8 string. Collation-sensitive: routing refuses to target
    /// strings under a non-default collation.
    String(String),
    /// A boolean value.
    Bool(bool),
    /// Sorts above every real value.
    MaxKey,
}

impl KeyValue {
    /// Returns true for types whose comparison depends on collation.
    #[must_use]
    pub const fn is_collatable(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Returns the numeric value when this is a number of either width.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinKey => f.write_str("MinKey"),
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::MaxKey => f.write_str("MaxKey"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// An ordered shard-key document: named values in pattern order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDocument(Vec<(String, KeyValue)>);

impl KeyDocument {
    /// Creates a document from `(field, value)` pairs in order.
    #[must_use]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, KeyValue)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(f, v)| (f.into(), v)).collect())
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the values in field order. Field names are ignored by the
    /// key encoder; only positions matter.
    pub fn values(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter().map(|(_, v)| v)
    }

    /// Returns the `(field, value)` pairs in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &KeyValue)> {
        self.0.iter().map(|(f, v)| (f.as_str(), v))
    }

    /// Returns true if every value is the `MinKey` sentinel.
    #[must_use]
    pub fn is_all_min_key(&self) -> bool {
        !self.0.is_empty() && self.values().all(|v| matches!(v, KeyValue::MinKey))
    }

    /// Returns true if every value is the `MaxKey` sentinel.
    #[must_use]
    pub fn is_all_max_key(&self) -> bool {
        !self.0.is_empty() && self.values().all(|v| matches!(v, KeyValue::MaxKey))
    }
}

impl fmt::Display for KeyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str(" }")
    }
}

/// Ordering of one shard-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Natural ascending order.
    Ascending,
    /// Reversed order.
    Descending,
    /// The field stores a hash of the document value; boundaries and
    /// extracted keys carry pre-hashed integers and order ascending.
    Hashed,
}

/// The shard-key pattern of one collection: ordered `(field, direction)`
/// pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardKeyPattern {
    fields: Vec<(String, Direction)>,
}

impl ShardKeyPattern {
    /// Creates a pattern from `(field, direction)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the pattern is empty or repeats a field.
    pub fn new<I, S>(fields: I) -> strata_core::Result<Self>
    where
        I: IntoIterator<Item = (S, Direction)>,
        S: Into<String>,
    {
        let fields: Vec<(String, Direction)> =
            fields.into_iter().map(|(f, d)| (f.into(), d)).collect();
        if fields.is_empty() {
            return Err(strata_core::Error::InvalidArgument {
                name: "shard_key",
                reason: "shard-key pattern must have at least one field".to_string(),
            });
        }
        for (i, (name, _)) in fields.iter().enumerate() {
            if fields[..i].iter().any(|(other, _)| other == name) {
                return Err(strata_core::Error::InvalidArgument {
                    name: "shard_key",
                    reason: format!("field '{name}' repeats in the shard-key pattern"),
                });
            }
        }
        Ok(Self { fields })
    }

    /// Convenience constructor for a single ascending field.
    #[must_use]
    pub fn ascending(field: &str) -> Self {
        Self {
            fields: vec![(field.to_string(), Direction::Ascending)],
        }
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the pattern has no fields (never for a validated
    /// pattern).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the `(field, direction)` pairs in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Direction)> {
        self.fields.iter().map(|(f, d)| (f.as_str(), *d))
    }

    /// Returns the direction of `field`, if it is part of the pattern.
    #[must_use]
    pub fn direction_of(&self, field: &str) -> Option<Direction> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, d)| *d)
    }

    /// Returns the key-ordering descriptor: the per-field directions.
    #[must_use]
    pub fn ordering(&self) -> crate::encoding::KeyOrdering {
        crate::encoding::KeyOrdering::new(self.fields.iter().map(|(_, d)| *d).collect())
    }

    /// The document at the bottom of the keyspace: every field `MinKey`.
    #[must_use]
    pub fn global_min(&self) -> KeyDocument {
        KeyDocument::from_pairs(self.fields.iter().map(|(f, _)| (f.clone(), KeyValue::MinKey)))
    }

    /// The document at the top of the keyspace: every field `MaxKey`.
    #[must_use]
    pub fn global_max(&self) -> KeyDocument {
        KeyDocument::from_pairs(self.fields.iter().map(|(f, _)| (f.clone(), KeyValue::MaxKey)))
    }
}

impl fmt::Display for ShardKeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (name, direction)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let dir = match direction {
                Direction::Ascending => "1",
                Direction::Descending => "-1",
                Direction::Hashed => "\"hashed\"",
            };
            write!(f, "{name}: {dir}")?;
        }
        f.write_str(" }")
    }
}

/// Collation under which string comparison happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collation {
    /// Plain binary comparison; the only collation routing can evaluate.
    Simple,
    /// A locale-aware collation identified by its locale tag.
    Locale(String),
}

impl Collation {
    /// Returns true for the simple (binary) collation.
    #[must_use]
    pub const fn is_simple(&self) -> bool {
        matches!(self, Self::Simple)
    }
}

/// Decides whether targeting may treat string comparison as binary.
///
/// True when the query specifies no collation and the collection default is
/// binary, or when the query explicitly asks for the simple collation.
#[must_use]
pub fn has_simple_collation(query: Option<&Collation>, default: Option<&Collation>) -> bool {
    match query {
        None => default.is_none(),
        Some(c) => c.is_simple(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_display() {
        let doc = KeyDocument::from_pairs([
            ("a", KeyValue::Int(5)),
            ("b", KeyValue::MinKey),
        ]);
        assert_eq!(format!("{doc}"), "{ a: 5, b: MinKey }");
    }

    #[test]
    fn test_pattern_rejects_duplicates() {
        let result = ShardKeyPattern::new([
            ("a", Direction::Ascending),
            ("a", Direction::Hashed),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_bounds() {
        let pattern = ShardKeyPattern::new([
            ("a", Direction::Ascending),
            ("b", Direction::Descending),
        ])
        .unwrap();
        assert!(pattern.global_min().is_all_min_key());
        assert!(pattern.global_max().is_all_max_key());
    }

    #[test]
    fn test_simple_collation_rules() {
        let simple = Collation::Simple;
        let locale = Collation::Locale("fr".to_string());
        assert!(has_simple_collation(None, None));
        assert!(has_simple_collation(Some(&simple), Some(&locale)));
        assert!(!has_simple_collation(None, Some(&locale)));
        assert!(!has_simple_collation(Some(&locale), None));
    }
}
