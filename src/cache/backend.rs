//! Cache backend contract and the values stored through it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{FieldValue, Model};

// == Cache Value ==
/// What the manager stores under a cache key.
///
/// Alternate-key lookups hold a `Pointer` to the primary key; only the
/// primary-key entry holds the row itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheValue {
    Pointer(FieldValue),
    Payload {
        model: String,
        snapshot: serde_json::Value,
    },
}

impl CacheValue {
    pub fn pointer(pk: FieldValue) -> Self {
        CacheValue::Pointer(pk)
    }

    /// Snapshots `row` into a payload entry.
    pub fn payload<M: Model>(row: &M) -> Result<Self> {
        Ok(CacheValue::Payload {
            model: M::NAME.to_string(),
            snapshot: serde_json::to_value(row)?,
        })
    }

    /// Decodes a payload of model `M`, describing the mismatch otherwise.
    pub fn into_model<M: Model>(self) -> std::result::Result<M, String> {
        match self {
            CacheValue::Payload { model, snapshot } if model == M::NAME => {
                serde_json::from_value(snapshot).map_err(|e| e.to_string())
            }
            CacheValue::Payload { model, .. } => {
                Err(format!("expected {} payload, found {}", M::NAME, model))
            }
            CacheValue::Pointer(pk) => {
                Err(format!("expected {} payload, found pointer to {}", M::NAME, pk))
            }
        }
    }
}

// == Cache Backend ==
/// Shared key/value store behind every manager.
///
/// Every call carries the model's version tag; entries written under one
/// version are invisible under another. Implementations need not be
/// consistent across concurrent writers: last write wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the value under `key`, or None on a miss.
    async fn get(&self, key: &str, version: &str) -> Result<Option<CacheValue>>;

    /// Returns the values found for `keys`; misses are absent from the map.
    async fn get_many(&self, keys: &[String], version: &str)
        -> Result<HashMap<String, CacheValue>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: CacheValue, ttl: Duration, version: &str)
        -> Result<()>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str, version: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: i64,
        name: String,
    }

    impl Model for Widget {
        const NAME: &'static str = "Widget";
        const FIELDS: &'static [&'static str] = &["id", "name"];

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            match field {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.as_str().into()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_payload_decodes_to_model() {
        let row = Widget {
            id: 1,
            name: "gear".to_string(),
        };
        let value = CacheValue::payload(&row).unwrap();

        assert_eq!(value.into_model::<Widget>().unwrap(), row);
    }

    #[test]
    fn test_payload_of_other_model_is_rejected() {
        let value = CacheValue::Payload {
            model: "Team".to_string(),
            snapshot: serde_json::json!({"id": 1, "name": "gear"}),
        };
        let err = value.into_model::<Widget>().unwrap_err();
        assert!(err.contains("found Team"));
    }

    #[test]
    fn test_pointer_is_not_a_payload() {
        let err = CacheValue::pointer(FieldValue::Int(1))
            .into_model::<Widget>()
            .unwrap_err();
        assert!(err.contains("pointer"));
    }

    #[test]
    fn test_cache_value_wire_format() {
        let encoded = serde_json::to_string(&CacheValue::pointer(FieldValue::Int(7))).unwrap();
        assert_eq!(encoded, r#"{"kind":"pointer","value":7}"#);

        let decoded: CacheValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, CacheValue::Pointer(FieldValue::Int(7)));
    }
}
