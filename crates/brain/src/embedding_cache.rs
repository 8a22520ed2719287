//! Versioned key→vector store persisted as `embeddings-cache.json`.
//!
//! The cache is only trusted when both its format version and its recorded
//! state hash match the loaded brain; any mismatch reads as empty and the
//! caller rebuilds. Cluster snapshots rewrite node ids as
//! `<instance>:<origId>`, so lookups fall back composite → original → numeric.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::BrainError;
use crate::schema::Thought;

pub const EMBEDDING_CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    version: u32,
    state_hash: String,
    #[serde(default)]
    nodes: Vec<KeyedVector>,
    #[serde(default)]
    thoughts: Vec<KeyedVector>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyedVector {
    #[serde(alias = "key")]
    id: String,
    embedding: Vec<f32>,
}

/// In-memory view of the cache for one brain.
#[derive(Debug)]
pub struct EmbeddingCache {
    dimension: usize,
    nodes: HashMap<String, Vec<f32>>,
    thoughts: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            nodes: HashMap::new(),
            thoughts: HashMap::new(),
        }
    }

    /// Load the cache file, returning an empty cache on any of: missing
    /// file, unreadable JSON, version mismatch, state-hash mismatch.
    /// Vectors whose length differs from `dimension` are discarded here so
    /// scoring never has to re-check.
    pub async fn load(
        path: &Path,
        expected_state_hash: &str,
        dimension: usize,
    ) -> Result<Self, BrainError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(_) => return Ok(Self::empty(dimension)),
        };

        let file: CacheFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "embedding cache unreadable, treating as empty");
                return Ok(Self::empty(dimension));
            }
        };

        if file.version != EMBEDDING_CACHE_VERSION || file.state_hash != expected_state_hash {
            debug!(
                cached_version = file.version,
                cached_hash = %file.state_hash,
                "embedding cache stale, treating as empty"
            );
            return Ok(Self::empty(dimension));
        }

        let mut cache = Self::empty(dimension);
        let mut wrong_dim = 0usize;
        for kv in file.nodes {
            if kv.embedding.len() == dimension {
                cache.nodes.insert(kv.id, kv.embedding);
            } else {
                wrong_dim += 1;
            }
        }
        for kv in file.thoughts {
            if kv.embedding.len() == dimension {
                cache.thoughts.insert(kv.id, kv.embedding);
            } else {
                wrong_dim += 1;
            }
        }
        if wrong_dim > 0 {
            debug!(wrong_dim, dimension, "discarded cached vectors with foreign dimension");
        }
        Ok(cache)
    }

    /// Persist atomically (temp file + rename) under `state_hash`.
    pub async fn save(&self, path: &Path, state_hash: &str) -> Result<(), BrainError> {
        let file = CacheFile {
            version: EMBEDDING_CACHE_VERSION,
            state_hash: state_hash.to_string(),
            nodes: to_keyed(&self.nodes),
            thoughts: to_keyed(&self.thoughts),
        };
        let rendered = serde_json::to_string(&file).map_err(|err| BrainError::CacheCorrupt {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered).await?;
        if let Err(err) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn insert_node(&mut self, id: impl Into<String>, vector: Vec<f32>) {
        if vector.len() == self.dimension {
            self.nodes.insert(id.into(), vector);
        }
    }

    pub fn insert_thought(&mut self, key: impl Into<String>, vector: Vec<f32>) {
        if vector.len() == self.dimension {
            self.thoughts.insert(key.into(), vector);
        }
    }

    /// Node vector lookup with the cluster-id fallback chain.
    pub fn node_vector(&self, id: &str) -> Option<&[f32]> {
        if let Some(v) = self.nodes.get(id) {
            return Some(v);
        }
        // Cluster snapshots prefix ids with `<instance>:` — try the original.
        if let Some((_, original)) = id.split_once(':') {
            if let Some(v) = self.nodes.get(original) {
                return Some(v);
            }
            // Last resort: producers that keyed on the bare numeric id.
            let numeric: String =
                original.chars().skip_while(|c| !c.is_ascii_digit()).collect();
            if !numeric.is_empty() {
                if let Some(v) = self.nodes.get(numeric.as_str()) {
                    return Some(v);
                }
            }
        }
        None
    }

    pub fn thought_vector(&self, key: &str) -> Option<&[f32]> {
        self.thoughts.get(key).map(Vec::as_slice)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn thought_count(&self) -> usize {
        self.thoughts.len()
    }
}

/// Composite cache key for a thought: `<instanceId|'solo'>:<cycle>`, or a
/// timestamp digest when the producer never assigned a cycle.
pub fn thought_key(thought: &Thought) -> String {
    let instance = thought.instance_id.as_deref().unwrap_or("solo");
    match thought.cycle {
        Some(cycle) => format!("{instance}:{cycle}"),
        None => {
            let mut hasher = Sha256::new();
            hasher.update(thought.timestamp.to_rfc3339().as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            format!("{instance}:ts-{}", &digest[..12])
        }
    }
}

fn to_keyed(map: &HashMap<String, Vec<f32>>) -> Vec<KeyedVector> {
    let mut out: Vec<KeyedVector> = map
        .iter()
        .map(|(id, embedding)| KeyedVector { id: id.clone(), embedding: embedding.clone() })
        .collect();
    // Stable file contents for identical caches.
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
