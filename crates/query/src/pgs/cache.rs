//! On-disk partition cache (`partitions.json`).
//!
//! Freshness is keyed on the brain hash: any mismatch regenerates the
//! partitions before the sweep phase starts. Writes are atomic via temp
//! file + rename.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::enrich::Partition;

pub const PARTITION_CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionCacheFile {
    version: u32,
    created: DateTime<Utc>,
    brain_hash: String,
    partitions: Vec<Partition>,
}

/// Load cached partitions when version and brain hash both match.
pub async fn load_partitions(path: &Path, expected_brain_hash: &str) -> Option<Vec<Partition>> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let file: PartitionCacheFile = match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "partition cache unreadable, regenerating");
            return None;
        }
    };
    if file.version != PARTITION_CACHE_VERSION || file.brain_hash != expected_brain_hash {
        debug!(
            cached_hash = %file.brain_hash,
            "partition cache stale, regenerating"
        );
        return None;
    }
    Some(file.partitions)
}

pub async fn save_partitions(
    path: &Path,
    brain_hash: &str,
    partitions: &[Partition],
) -> std::io::Result<()> {
    let file = PartitionCacheFile {
        version: PARTITION_CACHE_VERSION,
        created: Utc::now(),
        brain_hash: brain_hash.to_string(),
        partitions: partitions.to_vec(),
    };
    let rendered = serde_json::to_string(&file)
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, rendered).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(id: &str) -> Partition {
        Partition {
            id: id.to_string(),
            node_ids: vec!["n1".to_string()],
            node_count: 1,
            summary: "s".to_string(),
            keywords: vec!["k".to_string()],
            centroid_embedding: None,
            adjacent_partitions: vec![],
        }
    }

    #[tokio::test]
    async fn roundtrip_hits_on_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions.json");
        save_partitions(&path, "hash-a", &[partition("p0")]).await.unwrap();

        let loaded = load_partitions(&path, "hash-a").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "p0");
    }

    #[tokio::test]
    async fn hash_mismatch_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions.json");
        save_partitions(&path, "hash-a", &[partition("p0")]).await.unwrap();
        assert!(load_partitions(&path, "hash-b").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions.json");
        tokio::fs::write(&path, "][").await.unwrap();
        assert!(load_partitions(&path, "hash-a").await.is_none());
    }
}
