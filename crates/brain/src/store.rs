//! Read-only access to a persisted brain directory.
//!
//! Layout under the brain root:
//!   state.json.gz                         authoritative snapshot
//!   thoughts.jsonl                        newline-delimited thoughts
//!   agents/agent_<id>/{findings,insights}.jsonl   live journals
//!   coordinator/review_<cycle>.md         coordinator reviews
//!
//! Only the snapshot is required; every other source degrades to empty.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use futures::future::join_all;
use tracing::{debug, warn};

use cerebra_config::BrainPaths;

use crate::error::BrainError;
use crate::schema::{BrainState, CoordinatorReview, LiveEntry, LiveEntryKind, Node, Thought};

#[derive(Debug, Clone)]
pub struct BrainStore {
    paths: BrainPaths,
}

/// Result of walking the per-agent journal directories.
#[derive(Debug, Default)]
pub struct JournalScan {
    pub entries: Vec<LiveEntry>,
    pub agents_scanned: usize,
    pub corrupt_lines: usize,
}

/// Outcome of merging journal entries into a baseline snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    pub added: usize,
    /// Entries whose node id already existed in the baseline. The baseline
    /// wins because it carries embeddings.
    pub shadowed: usize,
}

impl BrainStore {
    pub fn new(paths: BrainPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &BrainPaths {
        &self.paths
    }

    /// Load and decompress the snapshot. Missing or corrupt data is fatal to
    /// the query (`StateUnavailable`); dangling edges are dropped silently.
    pub async fn load_state(&self) -> Result<BrainState, BrainError> {
        let path = self.paths.state();
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            BrainError::StateUnavailable(format!("{}: {err}", path.display()))
        })?;

        let mut state = tokio::task::spawn_blocking(move || -> Result<BrainState, String> {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut raw = String::new();
            decoder
                .read_to_string(&mut raw)
                .map_err(|err| format!("gzip: {err}"))?;
            serde_json::from_str(&raw).map_err(|err| format!("json: {err}"))
        })
        .await
        .map_err(|err| BrainError::StateUnavailable(format!("decode task: {err}")))?
        .map_err(|reason| {
            BrainError::StateUnavailable(format!("{}: {reason}", path.display()))
        })?;

        drop_dangling_edges(&mut state);
        debug!(
            nodes = state.nodes.len(),
            edges = state.edges.len(),
            is_cluster = state.is_cluster,
            "brain state loaded"
        );
        Ok(state)
    }

    /// Stream thoughts from `thoughts.jsonl`. Missing file ⇒ empty list;
    /// malformed lines are skipped and counted.
    pub async fn load_thoughts(&self) -> Result<Vec<Thought>, BrainError> {
        let path = self.paths.thoughts();
        let (thoughts, corrupt) = read_jsonl::<Thought>(&path).await?;
        if corrupt > 0 {
            warn!(
                corrupt_lines = corrupt,
                path = %path.display(),
                "thought stream loaded with skipped corrupt lines"
            );
        }
        Ok(thoughts)
    }

    /// Walk `agents/agent_*/{findings,insights}.jsonl`, fanning out one task
    /// per agent directory and merging after all complete.
    pub async fn load_journals(&self) -> Result<JournalScan, BrainError> {
        let agents_dir = self.paths.agents_dir();
        let mut agent_dirs: Vec<PathBuf> = Vec::new();

        let mut read_dir = match tokio::fs::read_dir(&agents_dir).await {
            Ok(rd) => rd,
            // No journals yet is a normal state, not an error.
            Err(_) => return Ok(JournalScan::default()),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("agent_") && entry.path().is_dir() {
                agent_dirs.push(entry.path());
            }
        }
        agent_dirs.sort();

        let scans = join_all(agent_dirs.iter().map(|dir| scan_agent_dir(dir.clone()))).await;

        let mut merged = JournalScan {
            agents_scanned: agent_dirs.len(),
            ..JournalScan::default()
        };
        for scan in scans {
            let (entries, corrupt) = scan?;
            merged.entries.extend(entries);
            merged.corrupt_lines += corrupt;
        }
        if merged.corrupt_lines > 0 {
            warn!(
                corrupt_lines = merged.corrupt_lines,
                agents = merged.agents_scanned,
                "journal scan skipped corrupt lines"
            );
        }
        Ok(merged)
    }

    /// Latest coordinator review by numeric cycle parsed from
    /// `review_<cycle>.md`. Missing directory ⇒ `None`.
    pub async fn load_latest_review(&self) -> Result<Option<CoordinatorReview>, BrainError> {
        let dir = self.paths.coordinator_dir();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(None),
        };

        let mut best: Option<(u64, PathBuf)> = None;
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(cycle) = parse_review_cycle(&name) {
                if best.as_ref().is_none_or(|(c, _)| cycle > *c) {
                    best = Some((cycle, entry.path()));
                }
            }
        }

        match best {
            None => Ok(None),
            Some((cycle, path)) => {
                let content = tokio::fs::read_to_string(&path).await?;
                Ok(Some(CoordinatorReview { cycle, content }))
            }
        }
    }

    /// Merge live-journal entries into `state`. An entry becomes a node only
    /// when its id is absent from the baseline.
    pub fn merge_journals(state: &mut BrainState, entries: &[LiveEntry]) -> MergeStats {
        let mut known: HashSet<String> =
            state.nodes.iter().map(|n| n.id.clone()).collect();
        let mut stats = MergeStats::default();

        for entry in entries {
            if known.contains(&entry.node_id) {
                stats.shadowed += 1;
                continue;
            }
            let mut node = Node::new(entry.node_id.clone(), entry.content.clone());
            if !entry.tag.is_empty() {
                node.tags.insert(entry.tag.clone());
            }
            node.tags.insert(
                match entry.kind {
                    LiveEntryKind::Finding => "agent_finding",
                    LiveEntryKind::Insight => "agent_insight",
                }
                .to_string(),
            );
            node.weight = 0.5;
            node.activation = 0.5;
            known.insert(node.id.clone());
            state.nodes.push(node);
            stats.added += 1;
        }

        debug!(added = stats.added, shadowed = stats.shadowed, "journals merged");
        stats
    }
}

/// Scan one agent directory's findings and insights journals.
async fn scan_agent_dir(dir: PathBuf) -> Result<(Vec<LiveEntry>, usize), BrainError> {
    let mut entries = Vec::new();
    let mut corrupt = 0usize;
    for file in ["findings.jsonl", "insights.jsonl"] {
        let (mut parsed, bad) = read_jsonl::<LiveEntry>(&dir.join(file)).await?;
        entries.append(&mut parsed);
        corrupt += bad;
    }
    Ok((entries, corrupt))
}

/// Read newline-delimited JSON, skipping malformed lines.
///
/// Returns `(records, corrupt_line_count)`. A missing file reads as empty —
/// append-only producers may not have written anything yet.
async fn read_jsonl<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<(Vec<T>, usize), BrainError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), 0));
        }
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    let mut corrupt = 0usize;
    for (line_idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                corrupt += 1;
                debug!(
                    line = line_idx + 1,
                    error = %err,
                    path = %path.display(),
                    "skipping corrupt JSONL line"
                );
            }
        }
    }
    Ok((records, corrupt))
}

fn parse_review_cycle(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("review_")?
        .strip_suffix(".md")?
        .parse()
        .ok()
}

/// Remove edges referencing missing node ids. Dangling endpoints appear when
/// producers prune nodes without rewriting the edge list.
fn drop_dangling_edges(state: &mut BrainState) {
    let index = state.node_index();
    let ids: HashSet<String> = index.keys().map(|s| s.to_string()).collect();
    drop(index);
    let before = state.edges.len();
    state
        .edges
        .retain(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()));
    let dropped = before - state.edges.len();
    if dropped > 0 {
        debug!(dropped, "dropped dangling edges during load");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn write_state(root: &Path, json: &str) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        std::fs::write(root.join("state.json.gz"), encoder.finish().unwrap()).unwrap();
    }

    fn store(root: &Path) -> BrainStore {
        BrainStore::new(BrainPaths::new(root))
    }

    #[tokio::test]
    async fn missing_snapshot_is_state_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path()).load_state().await.unwrap_err();
        assert!(matches!(err, BrainError::StateUnavailable(_)));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_state_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json.gz"), b"not gzip").unwrap();
        let err = store(dir.path()).load_state().await.unwrap_err();
        assert!(matches!(err, BrainError::StateUnavailable(_)));
    }

    #[tokio::test]
    async fn snapshot_roundtrip_drops_dangling_edges() {
        let dir = tempfile::tempdir().unwrap();
        write_state(
            dir.path(),
            r#"{
                "nodes": [{"id":"a","concept":"alpha"},{"id":"b","concept":"beta"}],
                "edges": [
                    {"source":"a","target":"b","weight":0.9},
                    {"source":"a","target":"ghost","weight":0.5}
                ],
                "cycleCount": 4
            }"#,
        );

        let state = store(dir.path()).load_state().await.unwrap();
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.edges.len(), 1);
        assert_eq!(crate::schema::state_hash(&state), "solo:4:2");
    }

    #[tokio::test]
    async fn missing_thoughts_and_journals_are_empty_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_thoughts().await.unwrap().is_empty());
        let scan = store.load_journals().await.unwrap();
        assert!(scan.entries.is_empty());
        assert_eq!(scan.agents_scanned, 0);
    }

    #[tokio::test]
    async fn corrupt_thought_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("thoughts.jsonl"),
            concat!(
                r#"{"cycle":1,"timestamp":"2026-01-01T00:00:00Z","role":"reasoner","content":"first"}"#,
                "\n{broken\n",
                r#"{"cycle":2,"timestamp":"2026-01-02T00:00:00Z","role":"reasoner","content":"second"}"#,
                "\n",
            ),
        )
        .unwrap();

        let thoughts = store(dir.path()).load_thoughts().await.unwrap();
        assert_eq!(thoughts.len(), 2);
        assert_eq!(thoughts[1].content, "second");
    }

    #[tokio::test]
    async fn journal_scan_walks_agent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path().join("agents/agent_07");
        std::fs::create_dir_all(&agent).unwrap();
        std::fs::write(
            agent.join("findings.jsonl"),
            concat!(
                r#"{"nodeId":"j1","type":"finding","content":"fresh","tag":"research","timestamp":"2026-01-01T00:00:00Z"}"#,
                "\nnot json\n",
            ),
        )
        .unwrap();
        std::fs::write(
            agent.join("insights.jsonl"),
            concat!(
                r#"{"nodeId":"j2","type":"insight","content":"deep","tag":"synthesis","timestamp":"2026-01-01T01:00:00Z"}"#,
                "\n",
            ),
        )
        .unwrap();

        let scan = store(dir.path()).load_journals().await.unwrap();
        assert_eq!(scan.agents_scanned, 1);
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.corrupt_lines, 1);
    }

    #[tokio::test]
    async fn latest_review_picked_by_numeric_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let coord = dir.path().join("coordinator");
        std::fs::create_dir_all(&coord).unwrap();
        std::fs::write(coord.join("review_2.md"), "old").unwrap();
        std::fs::write(coord.join("review_10.md"), "new").unwrap();
        std::fs::write(coord.join("notes.md"), "ignored").unwrap();

        let review = store(dir.path()).load_latest_review().await.unwrap().unwrap();
        assert_eq!(review.cycle, 10);
        assert_eq!(review.content, "new");
    }

    #[test]
    fn merge_keeps_baseline_authoritative() {
        let mut state = BrainState {
            nodes: vec![Node::new("existing", "baseline concept")],
            edges: vec![],
            clusters: None,
            cycle_count: 0,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        };
        let entries = vec![
            LiveEntry {
                node_id: "existing".to_string(),
                kind: LiveEntryKind::Finding,
                content: "shadowed".to_string(),
                tag: "research".to_string(),
                timestamp: chrono::Utc::now(),
            },
            LiveEntry {
                node_id: "fresh".to_string(),
                kind: LiveEntryKind::Insight,
                content: "new idea".to_string(),
                tag: "synthesis".to_string(),
                timestamp: chrono::Utc::now(),
            },
        ];

        let stats = BrainStore::merge_journals(&mut state, &entries);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.shadowed, 1);
        assert_eq!(state.nodes.len(), 2);
        assert!(state.nodes[1].has_tag("agent_insight"));
        assert_eq!(state.nodes[0].concept, "baseline concept");
    }
}
