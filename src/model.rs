//! Model Module
//!
//! Declares what the cache needs to know about a model type: its name, its
//! field set, which fields are unique enough to cache on, and how to read a
//! field's value as a scalar.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Lookup field names that always mean "the primary key".
pub const PK_SENTINELS: [&str; 2] = ["pk", "identity"];

/// Suffix that spells out the default exact-match lookup.
const EXACT_SUFFIX: &str = "__exact";

// == Model ==
/// A row type whose manager can serve cached lookups.
///
/// Every entry of `CACHE_FIELDS` must identify at most one row. An
/// organization slug qualifies, a project slug scoped to its organization
/// does not. The primary key is always cacheable and does not need listing.
///
/// Cached snapshots are produced with `Serialize`, so implementors must not
/// carry connection handles or other process-local state in serialized
/// fields.
pub trait Model: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Model name used in cache keys and log lines.
    const NAME: &'static str;

    /// Name of the primary key field.
    const PK_FIELD: &'static str = "id";

    /// Every persisted field, used to derive the cache version.
    const FIELDS: &'static [&'static str];

    /// Alternate keys the manager may cache on.
    const CACHE_FIELDS: &'static [&'static str] = &[];

    /// Scalar value of `field`, or `None` if the model has no such field.
    ///
    /// Fields referencing other models return the referenced primary key.
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    /// Primary key value. `FieldValue::Null` for rows not yet persisted.
    fn pk(&self) -> FieldValue {
        self.field_value(Self::PK_FIELD).unwrap_or(FieldValue::Null)
    }
}

// == Field Value ==
/// Scalar value of a single model field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl FieldValue {
    /// Normalizes a reference to another model into its primary key.
    pub fn reference<M: Model>(row: &M) -> Self {
        row.pk()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Form hashed into cache keys.
    ///
    /// Integers and strings render plainly, so `7` and `"7"` share a key.
    /// Null and booleans carry a NUL-led marker no real string starts with,
    /// keeping them apart from the strings `"None"` or `"True"`.
    pub fn key_repr(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Null => Cow::Borrowed("\0null"),
            FieldValue::Bool(true) => Cow::Borrowed("\0bool:true"),
            FieldValue::Bool(false) => Cow::Borrowed("\0bool:false"),
            FieldValue::Int(i) => Cow::Owned(i.to_string()),
            FieldValue::Str(s) => Cow::Borrowed(s),
        }
    }

    /// Compares by key form, so `7` and `"7"` name the same row.
    pub fn same_key(&self, other: &FieldValue) -> bool {
        self == other || self.key_repr() == other.key_repr()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "None"),
            FieldValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Str(value.clone())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

// == Canonical Field ==
/// Resolves lookup spellings to the field name stored on the model.
///
/// `__exact` is dropped since it is the default lookup, and the primary key
/// sentinels are replaced by `pk_field`.
pub fn canonical_field<'a>(field: &'a str, pk_field: &'a str) -> &'a str {
    let field = field.strip_suffix(EXACT_SUFFIX).unwrap_or(field);
    if PK_SENTINELS.contains(&field) {
        pk_field
    } else {
        field
    }
}

// == Filter ==
/// A single `field = value` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    field: String,
    value: FieldValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Lookup by primary key.
    pub fn pk(value: impl Into<FieldValue>) -> Self {
        Self::new(PK_SENTINELS[0], value)
    }

    /// Builds a filter from a keyword map, which must hold exactly one entry.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut pairs = pairs.into_iter();
        match (pairs.next(), pairs.next()) {
            (Some((field, value)), None) => Ok(Self::new(field, value)),
            (None, _) => Err(CacheError::NotCacheable(
                "empty filter".to_string(),
            )),
            (Some(_), Some(_)) => Err(CacheError::NotCacheable(
                "filter has more than one field".to_string(),
            )),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Field name as stored on `M`.
    pub fn canonical_field<M: Model>(&self) -> &str {
        canonical_field(&self.field, M::PK_FIELD)
    }

    /// True if `row` satisfies this lookup.
    pub fn matches<M: Model>(&self, row: &M) -> bool {
        row.field_value(self.canonical_field::<M>())
            .map(|value| value.same_key(&self.value))
            .unwrap_or(false)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.value)
    }
}

/// Captures the cacheable field values of a row, keyed by field name.
pub(crate) fn cache_state<M: Model>(row: &M) -> HashMap<&'static str, FieldValue> {
    M::CACHE_FIELDS
        .iter()
        .map(|field| (*field, row.field_value(field).unwrap_or(FieldValue::Null)))
        .collect()
}
