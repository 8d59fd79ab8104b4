//! Cache Key Module
//!
//! Deterministic key and version derivation. Keys depend only on the model
//! name and the lookup pairs, so separate processes agree on them without
//! coordination.

use sha2::{Digest, Sha256};

use crate::model::{canonical_field, FieldValue};

/// Length of the version tag taken from the field-set digest.
const VERSION_TAG_LEN: usize = 3;

// == Make Key ==
/// Builds the cache key for `model` from `field=value` pairs.
///
/// Pairs are sorted by field name first, so call order does not matter.
/// `pk_field` resolves the primary key sentinels before hashing.
pub fn make_key(
    model: &str,
    pk_field: &str,
    prefix: &str,
    pairs: &[(&str, &FieldValue)],
) -> String {
    let mut bits: Vec<String> = pairs
        .iter()
        .map(|(field, value)| {
            format!("{}={}", canonical_field(field, pk_field), value.key_repr())
        })
        .collect();
    bits.sort();

    let digest = Sha256::digest(bits.join(":").as_bytes());
    format!("{}:{}:{}", prefix, model, hex::encode(digest))
}

/// Key for a single `field=value` lookup.
pub fn lookup_key(
    model: &str,
    pk_field: &str,
    prefix: &str,
    field: &str,
    value: &FieldValue,
) -> String {
    make_key(model, pk_field, prefix, &[(field, value)])
}

// == Version Tag ==
/// Short tag derived from the sorted field names of a model.
///
/// Adding or removing a field changes the tag, which orphans every entry
/// written under the old one.
pub fn version_tag(fields: &[&str]) -> String {
    let mut sorted: Vec<&str> = fields.to_vec();
    sorted.sort_unstable();

    let digest = Sha256::digest(sorted.join("&").as_bytes());
    let mut tag = hex::encode(digest);
    tag.truncate(VERSION_TAG_LEN);
    tag
}
