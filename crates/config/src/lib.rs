use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Knobs for Partitioned Graph Synthesis.
///
/// Every field can come from (in ascending precedence) the built-in default,
/// `cerebra.toml`, a `PGS_*` environment variable, or a per-query override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgsConfig {
    /// Sweeps executed in parallel within one batch.
    pub max_concurrent_sweeps: usize,
    /// Brains smaller than this skip partitioning entirely.
    pub min_nodes: usize,
    pub target_partition_min: usize,
    pub target_partition_max: usize,
    /// Communities below this size are merged into their strongest neighbor.
    pub min_community_size: usize,
    pub max_sweep_partitions: usize,
    /// Padding floor for routing. 0 disables padding.
    pub min_sweep_partitions: usize,
    /// Minimum query↔centroid cosine similarity for a partition to be routed.
    pub relevance_threshold: f64,
    pub sweep_max_tokens: u32,
    pub synthesis_max_tokens: u32,
}

impl Default for PgsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sweeps: 5,
            min_nodes: 0,
            target_partition_min: 200,
            target_partition_max: 1800,
            min_community_size: 30,
            max_sweep_partitions: 15,
            min_sweep_partitions: 0,
            relevance_threshold: 0.25,
            sweep_max_tokens: 6000,
            synthesis_max_tokens: 16_000,
        }
    }
}

impl PgsConfig {
    /// Apply `PGS_*` environment variables on top of `self`.
    ///
    /// Unparseable values are ignored so a stray export can't take the
    /// engine down at startup.
    pub fn apply_env(&mut self) {
        env_usize("PGS_MAX_CONCURRENT_SWEEPS", &mut self.max_concurrent_sweeps);
        env_usize("PGS_MIN_NODES", &mut self.min_nodes);
        env_usize("PGS_TARGET_PARTITION_MIN", &mut self.target_partition_min);
        env_usize("PGS_TARGET_PARTITION_MAX", &mut self.target_partition_max);
        env_usize("PGS_MIN_COMMUNITY_SIZE", &mut self.min_community_size);
        env_usize("PGS_MAX_SWEEP_PARTITIONS", &mut self.max_sweep_partitions);
        env_usize("PGS_MIN_SWEEP_PARTITIONS", &mut self.min_sweep_partitions);
        env_f64("PGS_RELEVANCE_THRESHOLD", &mut self.relevance_threshold);
        env_u32("PGS_SWEEP_MAX_TOKENS", &mut self.sweep_max_tokens);
        env_u32("PGS_SYNTHESIS_MAX_TOKENS", &mut self.synthesis_max_tokens);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Timeout for live-cluster snapshot fetches, milliseconds.
    pub snapshot_ttl_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { snapshot_ttl_ms: 4000 }
    }
}

impl ClusterConfig {
    pub fn apply_env(&mut self) {
        if let Ok(raw) = env::var("CLUSTER_SNAPSHOT_TTL_MS") {
            if let Ok(value) = raw.trim().parse() {
                self.snapshot_ttl_ms = value;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pgs: PgsConfig,
    pub cluster: ClusterConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Read `path` as TOML (missing file ⇒ defaults), then apply env
    /// overrides. `.env` files are honored via dotenvy before env reads.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.pgs.apply_env();
        config.cluster.apply_env();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── brain filesystem layout ───────────────────────────────────────────────────

/// Canonical file layout under a per-brain root directory.
#[derive(Debug, Clone)]
pub struct BrainPaths {
    root: PathBuf,
}

impl BrainPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Authoritative gzip JSON snapshot.
    pub fn state(&self) -> PathBuf {
        self.root.join("state.json.gz")
    }

    pub fn thoughts(&self) -> PathBuf {
        self.root.join("thoughts.jsonl")
    }

    /// Per-agent append-only journal directories: `agents/agent_<id>/`.
    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    /// Coordinator reviews: `coordinator/review_<cycle>.md`.
    pub fn coordinator_dir(&self) -> PathBuf {
        self.root.join("coordinator")
    }

    pub fn embeddings_cache(&self) -> PathBuf {
        self.root.join("embeddings-cache.json")
    }

    pub fn partitions(&self) -> PathBuf {
        self.root.join("partitions.json")
    }

    pub fn pgs_sessions_dir(&self) -> PathBuf {
        self.root.join("pgs-sessions")
    }

    pub fn pgs_session(&self, session_id: &str) -> PathBuf {
        self.pgs_sessions_dir().join(format!("{session_id}.json"))
    }

    /// Landing zone for extracted action artifacts.
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }
}

// ── env parsing helpers ───────────────────────────────────────────────────────

fn env_usize(key: &str, slot: &mut usize) {
    if let Ok(raw) = env::var(key) {
        if let Ok(value) = raw.trim().parse() {
            *slot = value;
        }
    }
}

fn env_u32(key: &str, slot: &mut u32) {
    if let Ok(raw) = env::var(key) {
        if let Ok(value) = raw.trim().parse() {
            *slot = value;
        }
    }
}

fn env_f64(key: &str, slot: &mut f64) {
    if let Ok(raw) = env::var(key) {
        if let Ok(value) = raw.trim().parse() {
            *slot = value;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let pgs = PgsConfig::default();
        assert_eq!(pgs.max_concurrent_sweeps, 5);
        assert_eq!(pgs.min_nodes, 0);
        assert_eq!(pgs.target_partition_min, 200);
        assert_eq!(pgs.target_partition_max, 1800);
        assert_eq!(pgs.min_community_size, 30);
        assert_eq!(pgs.max_sweep_partitions, 15);
        assert_eq!(pgs.min_sweep_partitions, 0);
        assert!((pgs.relevance_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(pgs.sweep_max_tokens, 6000);
        assert_eq!(pgs.synthesis_max_tokens, 16_000);
        assert_eq!(ClusterConfig::default().snapshot_ttl_ms, 4000);
    }

    #[test]
    fn toml_roundtrip_preserves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cerebra.toml");

        let mut config = AppConfig::default();
        config.pgs.max_sweep_partitions = 7;
        config.cluster.snapshot_ttl_ms = 900;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.pgs.max_sweep_partitions, 7);
        assert_eq!(loaded.cluster.snapshot_ttl_ms, 900);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = AppConfig::load_from("/nonexistent/cerebra.toml").unwrap();
        assert_eq!(loaded.pgs.max_concurrent_sweeps, 5);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig =
            toml::from_str("[pgs]\nmax_concurrent_sweeps = 2\n").unwrap();
        assert_eq!(config.pgs.max_concurrent_sweeps, 2);
        assert_eq!(config.pgs.target_partition_max, 1800);
    }

    #[test]
    fn brain_paths_layout() {
        let paths = BrainPaths::new("/brains/alpha");
        assert_eq!(paths.state(), PathBuf::from("/brains/alpha/state.json.gz"));
        assert_eq!(paths.thoughts(), PathBuf::from("/brains/alpha/thoughts.jsonl"));
        assert_eq!(
            paths.pgs_session("abc"),
            PathBuf::from("/brains/alpha/pgs-sessions/abc.json")
        );
    }
}
