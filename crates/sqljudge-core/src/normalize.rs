//! Canonical form of a result table.
//!
//! Two tables that differ only in row order, column order, or numeric
//! representation (`1` vs `1.0`) normalize to equal [`NormalizedTable`]s.
//! Rows are stored sorted under a total order over [`NormValue`], so the
//! comparator can walk both sides in a single merge pass.

use crate::model::{ResultTable, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const DEFAULT_FLOAT_ABS_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_FLOAT_REL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizePolicy {
    pub float_abs_tolerance: f64,
    pub float_rel_tolerance: f64,
    pub case_insensitive_text: bool,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self {
            float_abs_tolerance: DEFAULT_FLOAT_ABS_TOLERANCE,
            float_rel_tolerance: DEFAULT_FLOAT_REL_TOLERANCE,
            case_insensitive_text: false,
        }
    }
}

impl NormalizePolicy {
    /// Exact comparison: no float tolerance, byte-for-byte text.
    pub fn exact() -> Self {
        Self {
            float_abs_tolerance: 0.0,
            float_rel_tolerance: 0.0,
            case_insensitive_text: false,
        }
    }
}

/// Canonical scalar.
///
/// Integral reals inside the `i64` range collapse to `Int`, so `1` and `1.0`
/// are the same value. Timestamps are UTC microseconds since the epoch.
#[derive(Debug, Clone)]
pub enum NormValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(chrono::NaiveDate),
    Timestamp(i64),
}

// 2^63, the first float past i64::MAX.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl NormValue {
    pub fn from_value(value: &Value, policy: &NormalizePolicy) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(i) => Self::Int(*i),
            Value::Real(r) => {
                if r.is_finite() && r.fract() == 0.0 && *r >= -I64_BOUND && *r < I64_BOUND {
                    Self::Int(*r as i64)
                } else if r.is_nan() {
                    Self::Float(f64::NAN)
                } else {
                    Self::Float(*r)
                }
            }
            Value::Text(s) if policy.case_insensitive_text => Self::Text(s.to_lowercase()),
            Value::Text(s) => Self::Text(s.clone()),
            Value::Blob(b) => Self::Blob(b.clone()),
            Value::Date(d) => Self::Date(*d),
            Value::Timestamp(ts) => Self::Timestamp(ts.timestamp_micros()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Blob(_) => 3,
            Self::Date(_) => 4,
            Self::Timestamp(_) => 5,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl Ord for NormValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use NormValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            // Mixed numbers compare by value; ties put the integer first.
            (Int(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Text(a), Text(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for NormValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NormValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NormValue {}

impl fmt::Display for NormValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(micros) => match chrono::DateTime::from_timestamp_micros(*micros) {
                Some(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
                None => write!(f, "{micros}"),
            },
        }
    }
}

/// Tolerance-aware scalar equality. Integers compare exactly, NaN equals only
/// NaN, and any other pair of numbers is equal when within the absolute or the
/// relative tolerance.
pub fn values_match(a: &NormValue, b: &NormValue, policy: &NormalizePolicy) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => {
            if let (NormValue::Int(i), NormValue::Int(j)) = (a, b) {
                return i == j;
            }
            if x.is_nan() || y.is_nan() {
                return x.is_nan() && y.is_nan();
            }
            if x == y {
                return true;
            }
            let diff = (x - y).abs();
            diff <= policy.float_abs_tolerance
                || diff <= policy.float_rel_tolerance * x.abs().max(y.abs())
        }
        _ => a == b,
    }
}

/// Orders two rows using [`values_match`] per column, falling back to the
/// canonical order where values differ.
pub fn cmp_rows(a: &[NormValue], b: &[NormValue], policy: &NormalizePolicy) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        if values_match(x, y, policy) {
            continue;
        }
        match x.cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Rows of equal width whose values all match under [`values_match`].
pub fn rows_match(a: &[NormValue], b: &[NormValue], policy: &NormalizePolicy) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y, policy))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTable {
    /// Lexically sorted column names.
    pub columns: Vec<String>,
    /// Canonical row tuples, projected onto `columns` and sorted.
    pub rows: Vec<Vec<NormValue>>,
}

impl NormalizedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub fn normalize(table: &ResultTable, policy: &NormalizePolicy) -> NormalizedTable {
    let mut order: Vec<usize> = (0..table.columns().len()).collect();
    order.sort_by(|&a, &b| table.columns()[a].cmp(&table.columns()[b]));

    let columns = order.iter().map(|&i| table.columns()[i].clone()).collect();
    let mut rows: Vec<Vec<NormValue>> = table
        .rows()
        .iter()
        .map(|row| {
            order
                .iter()
                .map(|&i| NormValue::from_value(&row[i], policy))
                .collect()
        })
        .collect();
    rows.sort();

    NormalizedTable { columns, rows }
}
