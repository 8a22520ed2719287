//! Session-resumable sweeping: which partitions a PGS session has already
//! covered, persisted one JSON file per session under `pgs-sessions/`.
//!
//! The searched set only grows across runs until the session is reset.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PgsMode {
    /// Sweep every routed partition.
    Full,
    /// Sweep only routed partitions not yet searched this session.
    Continue,
    /// Re-route among unsearched partitions only.
    Targeted,
}

impl PgsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Continue => "continue",
            Self::Targeted => "targeted",
        }
    }
}

impl FromStr for PgsMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "continue" => Ok(Self::Continue),
            "targeted" => Ok(Self::Targeted),
            other => Err(format!("unknown pgs mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PgsSessionRecord {
    pub query: String,
    pub mode: String,
    pub searched_partition_ids: BTreeSet<String>,
    pub total_partitions: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PgsSessionStore {
    dir: PathBuf,
}

impl PgsSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Missing or corrupt records read as `None`; a broken session file
    /// must never block a fresh sweep.
    pub async fn load(&self, session_id: &str) -> Option<PgsSessionRecord> {
        let path = self.path_for(session_id);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "pgs session unreadable, starting fresh");
                None
            }
        }
    }

    /// Merge `swept` into the session's searched set and persist atomically.
    /// Returns the updated record.
    pub async fn record_sweep(
        &self,
        session_id: &str,
        query: &str,
        mode: PgsMode,
        swept: &BTreeSet<String>,
        total_partitions: usize,
    ) -> std::io::Result<PgsSessionRecord> {
        let mut record = self.load(session_id).await.unwrap_or(PgsSessionRecord {
            query: query.to_string(),
            mode: mode.as_str().to_string(),
            searched_partition_ids: BTreeSet::new(),
            total_partitions,
            timestamp: Utc::now(),
        });
        record.query = query.to_string();
        record.mode = mode.as_str().to_string();
        record.searched_partition_ids.extend(swept.iter().cloned());
        record.total_partitions = total_partitions;
        record.timestamp = Utc::now();

        self.save(session_id, &record).await?;
        Ok(record)
    }

    async fn save(&self, session_id: &str, record: &PgsSessionRecord) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(session_id);
        let rendered = serde_json::to_string(record)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn searched_set_grows_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let store = PgsSessionStore::new(dir.path());

        let first: BTreeSet<String> =
            ["p0", "p1"].iter().map(|s| s.to_string()).collect();
        let record = store
            .record_sweep("s1", "q", PgsMode::Full, &first, 5)
            .await
            .unwrap();
        assert_eq!(record.searched_partition_ids.len(), 2);

        let second: BTreeSet<String> =
            ["p1", "p2"].iter().map(|s| s.to_string()).collect();
        let record = store
            .record_sweep("s1", "q", PgsMode::Continue, &second, 5)
            .await
            .unwrap();
        assert_eq!(record.searched_partition_ids.len(), 3);
        assert_eq!(record.mode, "continue");
    }

    #[tokio::test]
    async fn corrupt_session_reads_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = PgsSessionStore::new(dir.path());
        tokio::fs::write(dir.path().join("bad.json"), "}{").await.unwrap();
        assert!(store.load("bad").await.is_none());
    }
}
