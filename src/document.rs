//! Chunks and their provenance metadata.
//!
//! Metadata is a flat, ordered map from key to scalar value. When several
//! sources contribute metadata to one chunk they are combined with
//! [`merge_metadata`], which applies layers in order so that later layers win
//! on key collisions. The layer order is part of the ingestion contract:
//!
//! | input | layers (first → last)                              | winner      |
//! |-------|----------------------------------------------------|-------------|
//! | text  | `chunk_index`, `source`, caller metadata           | caller      |
//! | file  | `source` + `chunk_index`, caller, loader metadata  | loader      |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Flat key → scalar mapping attached to every chunk.
pub type Metadata = BTreeMap<String, Value>;

/// A bounded span of source text plus provenance metadata; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// `true` when the content is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// The `source` label, if one was recorded as a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// Combine metadata layers in order; a key set by a later layer replaces the
/// value set by an earlier one.
pub fn merge_metadata<'a, I>(layers: I) -> Metadata
where
    I: IntoIterator<Item = &'a Metadata>,
{
    let mut merged = Metadata::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Drop entries whose value is not a string, number or bool.
pub fn sanitize_metadata(metadata: Metadata) -> Metadata {
    metadata
        .into_iter()
        .filter(|(key, value)| {
            let scalar = matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_));
            if !scalar {
                warn!("Dropping non-scalar metadata value for key {:?}", key);
            }
            scalar
        })
        .collect()
}

/// Coerce an arbitrary JSON value into metadata. Anything but an object becomes
/// an empty mapping.
pub fn metadata_from_json(value: Value) -> Metadata {
    match value {
        Value::Object(map) => sanitize_metadata(map.into_iter().collect()),
        Value::Null => Metadata::new(),
        other => {
            warn!("Ignoring metadata that is not a mapping: {}", other);
            Metadata::new()
        }
    }
}
