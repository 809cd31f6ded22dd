//! Scalar column values and storage rows.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{BinaryId, BIN_LEN};

/// A flat storage row: column name to scalar value.
pub type Row = BTreeMap<String, Value>;

/// A single scalar column value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view. Numeric strings are accepted, since backing stores
    /// frequently hand integers back as text.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String view of a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Byte view of a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret this value as a [`BinaryId`]: either the raw 11 bytes or
    /// its hex/alphadecimal text form.
    pub fn to_binary_id(&self) -> Result<BinaryId, TypeError> {
        match self {
            Self::Bytes(b) => BinaryId::from_slice(b),
            Self::Str(s) => BinaryId::parse(s),
            other => Err(TypeError::NotAnIdentifier(other.to_string())),
        }
    }

    /// Returns `true` if this holds exactly the bytes of a [`BinaryId`].
    pub fn is_binary_id(&self) -> bool {
        matches!(self, Self::Bytes(b) if b.len() == BIN_LEN)
    }

    /// Comparison on the string form, the way a relational store compares
    /// `5` and `'5'` as the same column value.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            _ => self.to_string() == other.to_string(),
        }
    }

    /// Ordering used for sorting and range conditions. Integers (including
    /// numeric strings) compare numerically, everything else by bytes.
    /// `Null` sorts first.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) if b.len() == BIN_LEN => match BinaryId::from_slice(b) {
                Ok(id) => write!(f, "{}", id.to_alphadecimal()),
                Err(_) => f.write_str(&hex::encode(b)),
            },
            Self::Bytes(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<BinaryId> for Value {
    fn from(id: BinaryId) -> Self {
        Self::Bytes(id.as_bytes().to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Separate `keys` from `row`. Returns `None` unless every key is present
/// and non-null.
pub fn split_from_row(row: &Row, keys: &[String]) -> Option<Row> {
    let mut split = Row::new();
    for key in keys {
        match row.get(key) {
            Some(v) if !v.is_null() => {
                split.insert(key.clone(), v.clone());
            }
            _ => return None,
        }
    }
    Some(split)
}

/// Order-independent, representation-insensitive row equality.
pub fn rows_equal(old: &Row, new: &Row) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .all(|(k, v)| new.get(k).is_some_and(|other| v.loosely_eq(other)))
}

/// Top level changes between two rows: columns whose string form differs
/// or that are new map to their new value, columns missing from `new` map
/// to [`Value::Null`]. No legality checks are performed.
pub fn calc_updates(old: &Row, new: &Row) -> Row {
    let mut updates = Row::new();
    for (key, value) in new {
        match old.get(key) {
            Some(previous) if previous.loosely_eq(value) => {}
            _ => {
                updates.insert(key.clone(), value.clone());
            }
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            updates.insert(key.clone(), Value::Null);
        }
    }
    updates
}

/// Render `_id` columns that hold raw [`BinaryId`] bytes in their
/// alphadecimal form. Used wherever rows become part of a text key.
pub fn alphadecimal_ids(row: &Row) -> Row {
    row.iter()
        .map(|(k, v)| {
            let converted = if k.ends_with("_id") && v.is_binary_id() {
                Value::Str(v.to_string())
            } else {
                v.clone()
            };
            (k.clone(), converted)
        })
        .collect()
}
