//! Conversion between domain objects and storage rows.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{PoisonError, RwLock};

use strata_types::{split_from_row, ObjectRef, Row, Value};

use crate::error::{MapperError, MapperResult};

/// A domain type persisted as a flat row.
///
/// `from_storage_row(&x.to_storage_row())` must reproduce `x`.
pub trait Model: Sized + Send + Sync + 'static {
    /// Domain class name used for routing in a manager group.
    const CLASS: &'static str;

    fn to_storage_row(&self) -> Row;

    fn from_storage_row(row: &Row) -> MapperResult<Self>;

    /// Make `self` reflect `row`, e.g. after the store assigned new values.
    fn apply_storage_row(&mut self, row: &Row) -> MapperResult<()> {
        *self = Self::from_storage_row(row)?;
        Ok(())
    }
}

/// Fetch a column that must be present.
pub fn required<'a>(row: &'a Row, column: &str) -> MapperResult<&'a Value> {
    row.get(column)
        .ok_or_else(|| MapperError::MissingColumn(column.to_string()))
}

/// Fetch a column that must hold text.
pub fn required_str(row: &Row, column: &str) -> MapperResult<String> {
    let value = required(row, column)?;
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(MapperError::InvalidValue {
            column: column.to_string(),
            reason: format!("expected text, got {other:?}"),
        }),
    }
}

/// Fetch a column that must hold an integer (numeric text is accepted).
pub fn required_int(row: &Row, column: &str) -> MapperResult<i64> {
    required(row, column)?
        .as_int()
        .ok_or_else(|| MapperError::InvalidValue {
            column: column.to_string(),
            reason: "expected an integer".into(),
        })
}

/// Converts objects of type `T` to rows and back.
pub trait ObjectMapper<T>: Send + Sync {
    /// Deterministic for unchanged object state.
    fn to_storage_row(&self, object: &ObjectRef<T>) -> Row;

    /// Build a new object from `row`, or make `object` match `row`.
    fn from_storage_row(&self, row: &Row, object: Option<&ObjectRef<T>>)
        -> MapperResult<ObjectRef<T>>;

    /// A previously materialized object with this primary key, if the
    /// mapper remembers one.
    fn get(&self, primary_key: &Row) -> Option<ObjectRef<T>>;

    /// Round-trip `row` through the domain type to erase representation
    /// differences such as `"5"` versus `5`.
    fn normalize_row(&self, row: &Row) -> MapperResult<Row>;

    /// Forget remembered objects.
    fn clear(&self);

    /// Whether [`ObjectMapper::get`] can ever return an object.
    fn is_caching(&self) -> bool {
        false
    }
}

/// Stateless mapper delegating to [`Model`].
pub struct BasicObjectMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BasicObjectMapper<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BasicObjectMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> ObjectMapper<T> for BasicObjectMapper<T> {
    fn to_storage_row(&self, object: &ObjectRef<T>) -> Row {
        object.read().to_storage_row()
    }

    fn from_storage_row(&self, row: &Row, object: Option<&ObjectRef<T>>) -> MapperResult<ObjectRef<T>> {
        match object {
            Some(object) => {
                object.write().apply_storage_row(row)?;
                Ok(object.clone())
            }
            None => Ok(ObjectRef::new(T::from_storage_row(row)?)),
        }
    }

    fn get(&self, _primary_key: &Row) -> Option<ObjectRef<T>> {
        None
    }

    fn normalize_row(&self, row: &Row) -> MapperResult<Row> {
        Ok(T::from_storage_row(row)?.to_storage_row())
    }

    fn clear(&self) {}
}

/// Mapper that remembers every object it materializes, by primary key, so
/// one logical identity maps to one [`ObjectRef`] per unit of work.
///
/// Loading a row for a remembered key updates that object in place.
pub struct CachingObjectMapper<T> {
    primary_key: Vec<String>,
    loaded: RwLock<HashMap<Vec<String>, ObjectRef<T>>>,
}

impl<T> CachingObjectMapper<T> {
    pub fn new<I, S>(primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Number of remembered objects.
    pub fn len(&self) -> usize {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // text forms, so raw and alphadecimal ids share a key
    fn key_of(&self, row: &Row) -> Option<Vec<String>> {
        let split = split_from_row(row, &self.primary_key)?;
        Some(split.values().map(Value::to_string).collect())
    }
}

impl<T: Model> ObjectMapper<T> for CachingObjectMapper<T> {
    fn to_storage_row(&self, object: &ObjectRef<T>) -> Row {
        object.read().to_storage_row()
    }

    fn from_storage_row(&self, row: &Row, object: Option<&ObjectRef<T>>) -> MapperResult<ObjectRef<T>> {
        let key = self.key_of(row);
        let existing = match (object, &key) {
            (Some(object), _) => Some(object.clone()),
            (None, Some(key)) => self
                .loaded
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned(),
            (None, None) => None,
        };
        let object = match existing {
            Some(object) => {
                object.write().apply_storage_row(row)?;
                object
            }
            None => ObjectRef::new(T::from_storage_row(row)?),
        };
        if let Some(key) = key {
            self.loaded
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, object.clone());
        }
        Ok(object)
    }

    fn get(&self, primary_key: &Row) -> Option<ObjectRef<T>> {
        let key = self.key_of(primary_key)?;
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn normalize_row(&self, row: &Row) -> MapperResult<Row> {
        Ok(T::from_storage_row(row)?.to_storage_row())
    }

    fn clear(&self) {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_caching(&self) -> bool {
        true
    }
}
