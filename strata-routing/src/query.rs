//! Canonical filter trees and shard-key index bounds.
//!
//! The query parser lives outside this crate; it hands targeting a
//! canonical filter tree. This module turns such a tree into per-field
//! bounds over the shard key and flattens those bounds into whole-key
//! ranges the chunk index can scan.

use serde::{Deserialize, Serialize};

use crate::encoding::{compare_values, hashed_value};
use crate::key::{Direction, KeyDocument, KeyValue, ShardKeyPattern};

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// Equality.
    Eq,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
}

/// A canonical query filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Conjunction of sub-filters. An empty conjunction matches everything.
    And(Vec<Filter>),
    /// Disjunction of sub-filters.
    Or(Vec<Filter>),
    /// A single comparison on one field.
    Cmp {
        /// Field the comparison applies to.
        field: String,
        /// The operator.
        op: CmpOp,
        /// The comparison value.
        value: KeyValue,
    },
    /// Membership in a value set.
    In {
        /// Field the membership test applies to.
        field: String,
        /// The candidate values.
        values: Vec<KeyValue>,
    },
    /// A full-text search leaf. Bounds cannot be derived; targeting falls
    /// back to all shards.
    Text {
        /// The search expression.
        query: String,
    },
    /// A geo-near leaf. Not allowed in routed queries.
    GeoNear {
        /// The geometry field.
        field: String,
    },
}

impl Filter {
    /// Returns true if any node in the tree is a geo-near leaf.
    #[must_use]
    pub fn has_geo_near(&self) -> bool {
        match self {
            Self::GeoNear { .. } => true,
            Self::And(children) | Self::Or(children) => {
                children.iter().any(Self::has_geo_near)
            }
            _ => false,
        }
    }

    /// Returns true if any node in the tree is a full-text leaf.
    #[must_use]
    pub fn has_text(&self) -> bool {
        match self {
            Self::Text { .. } => true,
            Self::And(children) | Self::Or(children) => children.iter().any(Self::has_text),
            _ => false,
        }
    }
}

/// A closed-or-open interval over one key field.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Lower bound value.
    pub low: KeyValue,
    /// Upper bound value.
    pub high: KeyValue,
    /// Whether `low` itself is included.
    pub low_inclusive: bool,
    /// Whether `high` itself is included.
    pub high_inclusive: bool,
}

impl Interval {
    /// The interval covering every value of a field.
    #[must_use]
    pub const fn all_values() -> Self {
        Self {
            low: KeyValue::MinKey,
            high: KeyValue::MaxKey,
            low_inclusive: true,
            high_inclusive: true,
        }
    }

    /// A single-value interval.
    #[must_use]
    pub fn point(value: KeyValue) -> Self {
        Self {
            low: value.clone(),
            high: value,
            low_inclusive: true,
            high_inclusive: true,
        }
    }

    /// Returns true for a single-value interval.
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.low_inclusive
            && self.high_inclusive
            && compare_values(&self.low, &self.high).is_eq()
    }

    /// Intersects two intervals; `None` when they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        use std::cmp::Ordering;

        let (low, low_inclusive) = match compare_values(&self.low, &other.low) {
            Ordering::Less => (other.low.clone(), other.low_inclusive),
            Ordering::Greater => (self.low.clone(), self.low_inclusive),
            Ordering::Equal => (self.low.clone(), self.low_inclusive && other.low_inclusive),
        };
        let (high, high_inclusive) = match compare_values(&self.high, &other.high) {
            Ordering::Less => (self.high.clone(), self.high_inclusive),
            Ordering::Greater => (other.high.clone(), other.high_inclusive),
            Ordering::Equal => (
                self.high.clone(),
                self.high_inclusive && other.high_inclusive,
            ),
        };

        match compare_values(&low, &high) {
            Ordering::Greater => None,
            Ordering::Equal if !(low_inclusive && high_inclusive) => None,
            _ => Some(Self {
                low,
                high,
                low_inclusive,
                high_inclusive,
            }),
        }
    }
}

/// Per-field interval lists over the shard key, in pattern order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBounds {
    fields: Vec<Vec<Interval>>,
}

impl IndexBounds {
    /// Bounds covering the whole keyspace: `[MinKey, MaxKey]` per field.
    #[must_use]
    pub fn all_values(pattern: &ShardKeyPattern) -> Self {
        Self {
            fields: pattern.fields().map(|_| vec![Interval::all_values()]).collect(),
        }
    }

    /// Returns the interval list of each field, in pattern order.
    #[must_use]
    pub fn fields(&self) -> &[Vec<Interval>] {
        &self.fields
    }
}

/// Sorts intervals by lower bound and merges overlapping neighbours.
fn unionize(mut intervals: Vec<Interval>) -> Vec<Interval> {
    use std::cmp::Ordering;

    intervals.sort_by(|a, b| {
        compare_values(&a.low, &b.low)
            .then_with(|| b.low_inclusive.cmp(&a.low_inclusive))
    });

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            let joins = match compare_values(&interval.low, &last.high) {
                Ordering::Less => true,
                Ordering::Equal => interval.low_inclusive || last.high_inclusive,
                Ordering::Greater => false,
            };
            if joins {
                if matches!(
                    compare_values(&interval.high, &last.high),
                    Ordering::Greater
                ) {
                    last.high = interval.high;
                    last.high_inclusive = interval.high_inclusive;
                } else if compare_values(&interval.high, &last.high).is_eq() {
                    last.high_inclusive = last.high_inclusive || interval.high_inclusive;
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

/// Derives per-field shard-key bounds from a canonical filter.
///
/// Conjunctions intersect constraints per field; a disjunction at the top
/// unions its children's bounds per field. Values whose comparison is
/// collation-sensitive contribute no bounds unless the effective collation
/// is simple - routing cannot compare them. Unanalysable nodes leave their
/// fields unconstrained.
#[must_use]
pub fn index_bounds_for_query(
    pattern: &ShardKeyPattern,
    filter: &Filter,
    collation_is_simple: bool,
) -> IndexBounds {
    // A text leaf anywhere defeats planning: all-keys fallback.
    if filter.has_text() {
        return IndexBounds::all_values(pattern);
    }

    match filter {
        Filter::Or(children) => {
            if children.is_empty() {
                return IndexBounds::all_values(pattern);
            }
            // Union child bounds per field, then normalise each list.
            let mut fields: Vec<Vec<Interval>> = pattern.fields().map(|_| Vec::new()).collect();
            for child in children {
                let child_bounds = index_bounds_for_query(pattern, child, collation_is_simple);
                for (acc, child_field) in fields.iter_mut().zip(child_bounds.fields.iter()) {
                    acc.extend(child_field.iter().cloned());
                }
            }
            IndexBounds {
                fields: fields.into_iter().map(unionize).collect(),
            }
        }
        _ => bounds_from_conjunction(pattern, filter, collation_is_simple),
    }
}

/// Handles a conjunction (or single leaf): every field starts unconstrained
/// and each analysable leaf narrows its field.
fn bounds_from_conjunction(
    pattern: &ShardKeyPattern,
    filter: &Filter,
    collation_is_simple: bool,
) -> IndexBounds {
    let mut fields: Vec<Vec<Interval>> = pattern
        .fields()
        .map(|_| vec![Interval::all_values()])
        .collect();

    let mut leaves = Vec::new();
    collect_conjunct_leaves(filter, &mut leaves);

    for leaf in leaves {
        let (field, constraint) = match leaf_intervals(leaf, collation_is_simple) {
            Some(pair) => pair,
            None => continue,
        };
        let Some(index) = pattern
            .fields()
            .position(|(name, _)| name == field)
        else {
            continue;
        };

        // A hashed field stores hashes: only equality points survive (as
        // hashed points); value ranges mean nothing in hash order.
        let constraint = if pattern.direction_of(field) == Some(Direction::Hashed) {
            let points: Vec<Interval> = constraint
                .into_iter()
                .filter(Interval::is_point)
                .map(|interval| Interval::point(hashed_value(&interval.low)))
                .collect();
            if points.is_empty() {
                continue;
            }
            points
        } else {
            constraint
        };

        // Intersect the accumulated intervals with the new constraint.
        let current = std::mem::take(&mut fields[index]);
        let mut next = Vec::new();
        for a in &current {
            for b in &constraint {
                if let Some(joined) = a.intersect(b) {
                    next.push(joined);
                }
            }
        }
        fields[index] = unionize(next);
    }

    IndexBounds { fields }
}

/// Flattens a conjunction into its leaves. Nested disjunctions are not
/// analysed further; they simply leave their fields unconstrained.
fn collect_conjunct_leaves<'a>(filter: &'a Filter, out: &mut Vec<&'a Filter>) {
    match filter {
        Filter::And(children) => {
            for child in children {
                collect_conjunct_leaves(child, out);
            }
        }
        Filter::Or(_) => {}
        leaf => out.push(leaf),
    }
}

/// The intervals contributed by one leaf, or `None` when the leaf cannot
/// constrain routing (unsupported leaf, or collation-sensitive value under
/// a non-simple collation).
fn leaf_intervals(leaf: &Filter, collation_is_simple: bool) -> Option<(&str, Vec<Interval>)> {
    let sound = |v: &KeyValue| collation_is_simple || !v.is_collatable();
    match leaf {
        Filter::Cmp { field, op, value } if sound(value) => {
            let interval = match op {
                CmpOp::Eq => Interval::point(value.clone()),
                CmpOp::Lt => Interval {
                    low: KeyValue::MinKey,
                    high: value.clone(),
                    low_inclusive: true,
                    high_inclusive: false,
                },
                CmpOp::Lte => Interval {
                    low: KeyValue::MinKey,
                    high: value.clone(),
                    low_inclusive: true,
                    high_inclusive: true,
                },
                CmpOp::Gt => Interval {
                    low: value.clone(),
                    high: KeyValue::MaxKey,
                    low_inclusive: false,
                    high_inclusive: true,
                },
                CmpOp::Gte => Interval {
                    low: value.clone(),
                    high: KeyValue::MaxKey,
                    low_inclusive: true,
                    high_inclusive: true,
                },
            };
            Some((field.as_str(), vec![interval]))
        }
        Filter::In { field, values } if values.iter().all(|v| sound(v)) && !values.is_empty() => {
            Some((
                field.as_str(),
                values.iter().map(|v| Interval::point(v.clone())).collect(),
            ))
        }
        _ => None,
    }
}

/// Flattens per-field bounds into whole-key `[min, max]` ranges.
///
/// Leading fields whose bounds are a single point extend a common prefix.
/// The first field with a non-point (or multi-interval) bound produces one
/// range per interval; the remaining fields pad out with the bottom and top
/// of their keyspace. Descending fields swap their endpoints so every
/// produced range is ascending under the pattern's encoded order.
#[must_use]
pub fn flatten_bounds(
    pattern: &ShardKeyPattern,
    bounds: &IndexBounds,
) -> Vec<(KeyDocument, KeyDocument)> {
    let fields: Vec<(&str, Direction)> = pattern.fields().collect();
    let mut prefix: Vec<KeyValue> = Vec::new();

    for (index, intervals) in bounds.fields().iter().enumerate() {
        let is_single_point = intervals.len() == 1 && intervals[0].is_point();
        if is_single_point {
            prefix.push(intervals[0].low.clone());
            continue;
        }

        // Branch: one range per interval, remaining fields padded out.
        let mut ranges = Vec::with_capacity(intervals.len());
        for interval in intervals {
            let mut min_values: Vec<KeyValue> = prefix.clone();
            let mut max_values = min_values.clone();
            let descending = fields[index].1 == Direction::Descending;
            if descending {
                min_values.push(interval.high.clone());
                max_values.push(interval.low.clone());
            } else {
                min_values.push(interval.low.clone());
                max_values.push(interval.high.clone());
            }
            for (_, direction) in &fields[index + 1..] {
                if *direction == Direction::Descending {
                    min_values.push(KeyValue::MaxKey);
                    max_values.push(KeyValue::MinKey);
                } else {
                    min_values.push(KeyValue::MinKey);
                    max_values.push(KeyValue::MaxKey);
                }
            }
            ranges.push((make_doc(&fields, min_values), make_doc(&fields, max_values)));
        }
        return ranges;
    }

    // Every field was a point: a single exact range.
    let values = prefix;
    vec![(
        make_doc(&fields, values.clone()),
        make_doc(&fields, values),
    )]
}

fn make_doc(fields: &[(&str, Direction)], values: Vec<KeyValue>) -> KeyDocument {
    KeyDocument::from_pairs(
        fields
            .iter()
            .map(|(name, _)| (*name).to_string())
            .zip(values),
    )
}

/// Extracts an equality on the full shard key from a conjunction, hashing
/// values for hashed fields. Returns `None` when any pattern field lacks an
/// equality.
#[must_use]
pub fn extract_shard_key_from_query(
    pattern: &ShardKeyPattern,
    filter: &Filter,
) -> Option<KeyDocument> {
    let mut leaves = Vec::new();
    collect_conjunct_leaves(filter, &mut leaves);

    let mut values: Vec<Option<&KeyValue>> = vec![None; pattern.len()];
    for leaf in leaves {
        if let Filter::Cmp {
            field,
            op: CmpOp::Eq,
            value,
        } = leaf
        {
            if let Some(index) = pattern.fields().position(|(name, _)| name == field) {
                values[index].get_or_insert(value);
            }
        }
    }

    let mut out = Vec::with_capacity(pattern.len());
    for ((name, direction), value) in pattern.fields().zip(values) {
        let value = value?;
        let value = match direction {
            Direction::Hashed => hashed_value(value),
            _ => value.clone(),
        };
        out.push((name.to_string(), value));
    }
    Some(KeyDocument::from_pairs(out))
}
