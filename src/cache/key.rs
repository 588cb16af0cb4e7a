use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::Node;

/// Hash of cached content for lookup and comparison.
///
/// SHA-256, stored hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializes `value` with object keys sorted at every depth.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let ordered: BTreeMap<&String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                serde_json::Value::Object(
                    ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }

    sorted(value).to_string()
}

#[derive(Serialize)]
struct InputFingerprint<'a> {
    id: Option<i64>,
    value: &'a str,
    ablated: bool,
}

/// Cache key of one step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub step_id: i64,
    pub config_hash: ContentHash,
    pub input_hash: ContentHash,
    pub key: ContentHash,
}

impl CacheKey {
    pub fn new(step_id: i64, config: &serde_json::Value, pending: &[Node]) -> Self {
        let config_hash = ContentHash::from_content(&canonical_json(config));

        let mut inputs: Vec<InputFingerprint<'_>> = pending
            .iter()
            .map(|node| InputFingerprint {
                id: node.id,
                value: &node.value,
                ablated: node.ablated,
            })
            .collect();
        inputs.sort_by_key(|input| input.id);
        // Serializing plain structs of str/i64/bool cannot fail.
        let inputs_json = serde_json::to_string(&inputs).unwrap_or_default();
        let input_hash = ContentHash::from_content(&inputs_json);

        let key = ContentHash::from_content(&format!(
            "{}:{}:{}",
            step_id, config_hash, input_hash
        ));

        Self {
            step_id,
            config_hash,
            input_hash,
            key,
        }
    }
}
