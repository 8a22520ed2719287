//! PGS execution: partition acquisition, routing, bounded-parallel sweeps
//! and cross-partition synthesis, with progress events at every boundary.

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use cerebra_brain::schema::{BrainState, brain_hash};
use cerebra_brain::{EmbeddingCache, Node};
use cerebra_config::{BrainPaths, PgsConfig};
use cerebra_llm::{
    GenerateRequest, LlmProvider, ReasoningEffort, RetryPolicy, generate_with_retry,
};

use crate::events::{EventSink, ProgressEvent, RoutedPartition, SweepStatus};

use super::cache::{load_partitions, save_partitions};
use super::enrich::{Partition, enrich_partitions};
use super::graph::PartitionGraph;
use super::louvain::{
    detect_communities, merge_small_communities, split_oversize_communities,
};
use super::router::route_partitions;
use super::session::{PgsMode, PgsSessionRecord, PgsSessionStore};

/// Character budget for one partition's full-fidelity node dump.
const SWEEP_CONTENT_BUDGET: usize = 500_000;
const TOTAL_PHASES: usize = 4;

#[derive(Debug, Error)]
pub enum PgsError {
    /// Brain below `min_nodes`; the caller should use the standard path.
    #[error("brain too small for partitioned synthesis ({nodes} < {min})")]
    NotEligible { nodes: usize, min: usize },

    /// Every routed sweep failed; the caller falls back to the non-PGS path.
    #[error("all {0} partition sweeps failed")]
    AllSweepsFailed(usize),

    /// A full-mode run routed zero partitions above the relevance threshold.
    #[error("no partitions routed above the relevance threshold")]
    NothingRouted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub partition_id: String,
    pub content: String,
}

#[derive(Debug)]
pub struct PgsOutcome {
    pub answer: String,
    pub sweeps: Vec<SweepReport>,
    pub failed_sweeps: usize,
    pub total_partitions: usize,
    pub session: PgsSessionRecord,
    pub had_error: bool,
}

pub struct PgsRunner<'a> {
    pub llm: &'a dyn LlmProvider,
    pub retry: &'a RetryPolicy,
    pub config: &'a PgsConfig,
    pub paths: &'a BrainPaths,
    pub model: &'a str,
}

pub struct PgsRequest<'a> {
    pub state: &'a BrainState,
    pub cache: &'a EmbeddingCache,
    pub query: &'a str,
    pub query_vec: Option<&'a [f32]>,
    pub mode: PgsMode,
    pub session_id: &'a str,
    /// Fixed RNG seed for reproducible partitioning (tests); entropy otherwise.
    pub seed: Option<u64>,
}

impl PgsRunner<'_> {
    pub async fn run(
        &self,
        request: &PgsRequest<'_>,
        events: &dyn EventSink,
    ) -> Result<PgsOutcome, PgsError> {
        let state = request.state;
        if state.nodes.len() < self.config.min_nodes {
            return Err(PgsError::NotEligible {
                nodes: state.nodes.len(),
                min: self.config.min_nodes,
            });
        }

        events.emit(ProgressEvent::PgsInit {
            total_nodes: state.nodes.len(),
            total_edges: state.edges.len(),
        });

        // Phase 1: partitions.
        self.phase(events, 1, "partitions", "loading or generating partitions");
        let partitions = self.get_or_create_partitions(request).await?;
        let total_partitions = partitions.len();

        // Phase 2: routing.
        self.phase(events, 2, "routing", "selecting partitions to sweep");
        let store = PgsSessionStore::new(self.paths.pgs_sessions_dir());
        let searched: BTreeSet<String> = store
            .load(request.session_id)
            .await
            .map(|record| record.searched_partition_ids)
            .unwrap_or_default();

        let routed = self.route_for_mode(&partitions, request, &searched);
        events.emit(ProgressEvent::PgsSession {
            mode: request.mode.as_str().to_string(),
            session_id: request.session_id.to_string(),
            searched: searched.len(),
            remaining: total_partitions.saturating_sub(searched.len()),
            total: total_partitions,
            sweeping: routed.len(),
        });

        // Resume modes that found nothing left fall back to a full sweep;
        // a full-mode run with nothing relevant hands back to the caller.
        let sweeping: Vec<&Partition> = if routed.is_empty() {
            if request.mode == PgsMode::Full {
                return Err(PgsError::NothingRouted);
            }
            debug!(mode = request.mode.as_str(), "no unsearched partitions, full sweep fallback");
            partitions.iter().collect()
        } else {
            routed
        };
        events.emit(ProgressEvent::PgsRouted {
            partitions: sweeping
                .iter()
                .map(|p| RoutedPartition {
                    id: p.id.clone(),
                    node_count: p.node_count,
                    summary: p.summary.clone(),
                })
                .collect(),
            total_partitions,
        });

        // Phase 3: sweeps in bounded batches.
        self.phase(events, 3, "sweep", "sweeping partitions");
        let summaries: HashMap<String, String> = partitions
            .iter()
            .map(|p| (p.id.clone(), p.summary.clone()))
            .collect();
        let (sweeps, failed) = self.sweep_all(request, &sweeping, &summaries, events).await;

        let swept_ids: BTreeSet<String> =
            sweeps.iter().map(|s| s.partition_id.clone()).collect();
        let session = store
            .record_sweep(
                request.session_id,
                request.query,
                request.mode,
                &swept_ids,
                total_partitions,
            )
            .await?;
        events.emit(ProgressEvent::PgsSessionUpdated {
            session_id: request.session_id.to_string(),
            searched: session.searched_partition_ids.len(),
        });

        if sweeps.is_empty() {
            return Err(PgsError::AllSweepsFailed(sweeping.len()));
        }

        // Phase 4: synthesis.
        self.phase(events, 4, "synthesis", "synthesizing across partitions");
        let synthesis = self.synthesize(request.query, &sweeps).await;

        info!(
            partitions = total_partitions,
            swept = sweeps.len(),
            failed,
            "pgs run complete"
        );
        Ok(PgsOutcome {
            answer: synthesis.content,
            had_error: synthesis.had_error,
            sweeps,
            failed_sweeps: failed,
            total_partitions,
            session,
        })
    }

    fn phase(&self, events: &dyn EventSink, index: usize, name: &str, message: &str) {
        events.emit(ProgressEvent::PgsPhase {
            phase: name.to_string(),
            phase_index: index,
            total_phases: TOTAL_PHASES,
            message: message.to_string(),
        });
    }

    /// Cache hit when `partitions.json` matches the current brain hash;
    /// otherwise run community detection and persist before sweeping.
    async fn get_or_create_partitions(
        &self,
        request: &PgsRequest<'_>,
    ) -> Result<Vec<Partition>, PgsError> {
        let hash = brain_hash(request.state);
        let path = self.paths.partitions();
        if let Some(partitions) = load_partitions(&path, &hash).await {
            debug!(partitions = partitions.len(), "partition cache hit");
            return Ok(partitions);
        }

        let graph = PartitionGraph::build(request.state);
        let communities = if graph.len() <= self.config.target_partition_min {
            // Small brains stay whole; a single partition sweeps fine.
            vec![(0..graph.len()).collect::<Vec<usize>>()]
        } else {
            let mut rng = match request.seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            let detected = detect_communities(&graph, &mut rng);
            let merged =
                merge_small_communities(detected, &graph, self.config.min_community_size);
            split_oversize_communities(merged, &graph, self.config.target_partition_max)
        };

        let partitions =
            enrich_partitions(request.state, request.cache, &graph, &communities);
        save_partitions(&path, &hash, &partitions).await?;
        Ok(partitions)
    }

    fn route_for_mode<'p>(
        &self,
        partitions: &'p [Partition],
        request: &PgsRequest<'_>,
        searched: &BTreeSet<String>,
    ) -> Vec<&'p Partition> {
        match request.mode {
            PgsMode::Full => {
                route_partitions(partitions, request.query, request.query_vec, self.config)
            }
            PgsMode::Continue => {
                route_partitions(partitions, request.query, request.query_vec, self.config)
                    .into_iter()
                    .filter(|p| !searched.contains(&p.id))
                    .collect()
            }
            PgsMode::Targeted => {
                let unsearched: Vec<Partition> = partitions
                    .iter()
                    .filter(|p| !searched.contains(&p.id))
                    .cloned()
                    .collect();
                let routed_ids: BTreeSet<String> = route_partitions(
                    &unsearched,
                    request.query,
                    request.query_vec,
                    self.config,
                )
                .into_iter()
                .map(|p| p.id.clone())
                .collect();
                partitions
                    .iter()
                    .filter(|p| routed_ids.contains(&p.id))
                    .collect()
            }
        }
    }

    /// Execute sweeps in batches of `max_concurrent_sweeps`; within a batch
    /// all sweeps run in parallel. Failures are reported and dropped.
    async fn sweep_all(
        &self,
        request: &PgsRequest<'_>,
        sweeping: &[&Partition],
        summaries: &HashMap<String, String>,
        events: &dyn EventSink,
    ) -> (Vec<SweepReport>, usize) {
        let nodes_by_id: HashMap<&str, &Node> = request
            .state
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();

        let total = sweeping.len();
        let batch_size = self.config.max_concurrent_sweeps.max(1);
        let mut reports = Vec::new();
        let mut failed = 0usize;

        for (batch_index, batch) in sweeping.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let futures = batch.iter().enumerate().map(|(i, partition)| {
                let index = offset + i;
                events.emit(ProgressEvent::PgsSweepProgress {
                    partition_index: index,
                    total,
                    status: SweepStatus::Started,
                });
                self.sweep_one(request, partition, &nodes_by_id, summaries)
            });

            for (i, result) in join_all(futures).await.into_iter().enumerate() {
                let index = offset + i;
                match result {
                    Some(report) => {
                        events.emit(ProgressEvent::PgsSweepProgress {
                            partition_index: index,
                            total,
                            status: SweepStatus::Complete,
                        });
                        reports.push(report);
                    }
                    None => {
                        failed += 1;
                        events.emit(ProgressEvent::PgsSweepProgress {
                            partition_index: index,
                            total,
                            status: SweepStatus::Failed,
                        });
                    }
                }
            }
        }
        (reports, failed)
    }

    async fn sweep_one(
        &self,
        request: &PgsRequest<'_>,
        partition: &Partition,
        nodes_by_id: &HashMap<&str, &Node>,
        summaries: &HashMap<String, String>,
    ) -> Option<SweepReport> {
        let prompt = sweep_prompt(request.query, partition, nodes_by_id, summaries);
        let response = generate_with_retry(
            self.llm,
            self.retry,
            GenerateRequest {
                model: self.model.to_string(),
                instructions: SWEEP_INSTRUCTIONS.to_string(),
                input: prompt,
                max_tokens: self.config.sweep_max_tokens,
                reasoning_effort: ReasoningEffort::Medium,
            },
            None,
        )
        .await;

        if response.had_error {
            warn!(partition = %partition.id, "sweep failed, excluding from synthesis");
            return None;
        }
        Some(SweepReport {
            partition_id: partition.id.clone(),
            content: response.content,
        })
    }

    async fn synthesize(
        &self,
        query: &str,
        sweeps: &[SweepReport],
    ) -> cerebra_llm::GenerateResponse {
        let mut input = format!("QUESTION:\n{query}\n\nPARTITION SWEEPS:\n");
        for sweep in sweeps {
            input.push_str(&format!(
                "=== Partition {} ===\n{}\n\n",
                sweep.partition_id, sweep.content
            ));
        }

        generate_with_retry(
            self.llm,
            self.retry,
            GenerateRequest {
                model: self.model.to_string(),
                instructions: SYNTHESIS_INSTRUCTIONS.to_string(),
                input,
                max_tokens: self.config.synthesis_max_tokens,
                reasoning_effort: ReasoningEffort::High,
            },
            None,
        )
        .await
    }
}

const SWEEP_INSTRUCTIONS: &str = "\
You are sweeping one partition of a larger knowledge graph. Work only from \
the partition content below; adjacent partition summaries exist solely so \
you can flag leads that leave this partition. Respond with exactly four \
sections:\n\
Domain State: what this partition covers and how mature the knowledge is.\n\
Findings: concrete, evidence-backed findings relevant to the question.\n\
Outbound Flags: leads that point into adjacent partitions.\n\
Absences: what is conspicuously missing from this partition.";

const SYNTHESIS_INSTRUCTIONS: &str = "\
You are synthesizing partition sweeps of a knowledge graph into one answer. \
Chase outbound flags across partitions, aggregate the absence signals, and \
identify findings that converge across partitions. Commit to a thesis: do \
not survey, argue.";

fn sweep_prompt(
    query: &str,
    partition: &Partition,
    nodes_by_id: &HashMap<&str, &Node>,
    summaries: &HashMap<String, String>,
) -> String {
    let mut prompt = format!(
        "QUESTION:\n{query}\n\nPARTITION {} ({} nodes)\nKeywords: {}\n",
        partition.id,
        partition.node_count,
        partition.keywords.join(", "),
    );

    if !partition.adjacent_partitions.is_empty() {
        prompt.push_str("\nADJACENT PARTITIONS:\n");
        for adjacent in &partition.adjacent_partitions {
            let summary = summaries
                .get(adjacent.id.as_str())
                .map(String::as_str)
                .unwrap_or("");
            prompt.push_str(&format!(
                "- {} ({} shared links): {}\n",
                adjacent.id, adjacent.shared_edges, summary
            ));
        }
    }

    prompt.push_str("\nCONTENT:\n");
    let mut used = prompt.chars().count();
    for node_id in &partition.node_ids {
        let Some(node) = nodes_by_id.get(node_id.as_str()) else { continue };
        let tags: Vec<&str> = node.tags.iter().map(String::as_str).collect();
        let line = format!("[{}] ({}) {}\n", node.id, tags.join("/"), node.concept);
        let line_len = line.chars().count();
        if used + line_len > SWEEP_CONTENT_BUDGET {
            prompt.push_str("(content truncated at budget)\n");
            break;
        }
        prompt.push_str(&line);
        used += line_len;
    }
    prompt
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use cerebra_brain::schema::Edge;
    use cerebra_llm::{GenerateResponse, LlmError};

    use crate::events::test_support::RecordingSink;

    use super::*;

    /// Provider that answers sweeps with a canned body and records
    /// concurrency high-water marks.
    struct SweepProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_partitions: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl SweepProvider {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_partitions: vec![],
                calls: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for SweepProvider {
        async fn generate(
            &self,
            request: GenerateRequest,
            _chunks: Option<&dyn cerebra_llm::ChunkSink>,
        ) -> Result<GenerateResponse, LlmError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(request.input.clone());
            for failing in &self.fail_partitions {
                if request.input.contains(&format!("PARTITION {failing} ")) {
                    return Err(LlmError::Fatal("sweep exploded".to_string()));
                }
            }
            Ok(GenerateResponse {
                content: "Domain State: ok\nFindings: f\nOutbound Flags: none\nAbsences: none"
                    .to_string(),
                ..Default::default()
            })
        }
    }

    fn state(nodes: usize) -> BrainState {
        let mut all = Vec::new();
        for i in 0..nodes {
            let mut n = Node::new(format!("n{i}"), format!("concept number {i}"));
            n.weight = 0.5;
            n.activation = 0.5;
            all.push(n);
        }
        BrainState {
            nodes: all,
            edges: vec![Edge {
                source: "n0".to_string(),
                target: "n1".to_string(),
                weight: 1.0,
            }],
            clusters: None,
            cycle_count: 1,
            timestamp: 0,
            run_metadata: None,
            is_cluster: false,
        }
    }

    fn config() -> PgsConfig {
        PgsConfig {
            max_concurrent_sweeps: 2,
            target_partition_min: 2,
            min_community_size: 1,
            ..PgsConfig::default()
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: std::time::Duration::from_millis(1),
            factor: 2,
        }
    }

    async fn run_once(
        provider: &SweepProvider,
        paths: &BrainPaths,
        state: &BrainState,
        mode: PgsMode,
        session_id: &str,
        sink: &RecordingSink,
    ) -> Result<PgsOutcome, PgsError> {
        let config = config();
        let retry = retry();
        let cache = EmbeddingCache::empty(2);
        let runner = PgsRunner {
            llm: provider,
            retry: &retry,
            config: &config,
            paths,
            model: "default-model",
        };
        runner
            .run(
                &PgsRequest {
                    state,
                    cache: &cache,
                    query: "what happened",
                    query_vec: None,
                    mode,
                    session_id,
                    seed: Some(7),
                },
                sink,
            )
            .await
    }

    #[tokio::test]
    async fn full_then_continue_resumes_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BrainPaths::new(dir.path());
        let provider = SweepProvider::new();
        let state = state(6);
        let sink = RecordingSink::default();

        let first = run_once(&provider, &paths, &state, PgsMode::Full, "s1", &sink)
            .await
            .unwrap();
        assert!(!first.sweeps.is_empty());
        let total = first.total_partitions;
        assert_eq!(first.session.searched_partition_ids.len(), total);

        // Continue on a stable brain: nothing unsearched, session event says
        // so, then the full-sweep fallback covers everything again.
        let sink2 = RecordingSink::default();
        let second = run_once(&provider, &paths, &state, PgsMode::Continue, "s1", &sink2)
            .await
            .unwrap();
        let events = sink2.events.lock().unwrap();
        let session_event = events
            .iter()
            .find_map(|e| match e {
                ProgressEvent::PgsSession { sweeping, remaining, .. } => {
                    Some((*sweeping, *remaining))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(session_event, (0, 0));
        assert_eq!(second.session.searched_partition_ids.len(), total);
    }

    #[tokio::test]
    async fn sweep_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BrainPaths::new(dir.path());
        let provider = SweepProvider::new();
        // Many singleton partitions: min_community_size 1 keeps them apart.
        let state = state(8);
        let sink = RecordingSink::default();

        run_once(&provider, &paths, &state, PgsMode::Full, "s1", &sink)
            .await
            .unwrap();
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_sweeps_are_excluded_and_all_failed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BrainPaths::new(dir.path());
        let mut provider = SweepProvider::new();
        provider.fail_partitions = vec!["p0".to_string(), "p1".to_string()];
        let state = state(2);
        let sink = RecordingSink::default();

        let result = run_once(&provider, &paths, &state, PgsMode::Full, "s1", &sink).await;
        assert!(matches!(result, Err(PgsError::AllSweepsFailed(_))));
        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::PgsSweepProgress { status: SweepStatus::Failed, .. }
        )));
    }

    #[tokio::test]
    async fn partition_cache_is_reused_for_same_brain() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BrainPaths::new(dir.path());
        let provider = SweepProvider::new();
        let state = state(6);
        let sink = RecordingSink::default();

        run_once(&provider, &paths, &state, PgsMode::Full, "s1", &sink)
            .await
            .unwrap();
        let first_cache = std::fs::read_to_string(paths.partitions()).unwrap();
        run_once(&provider, &paths, &state, PgsMode::Full, "s2", &sink)
            .await
            .unwrap();
        let second_cache = std::fs::read_to_string(paths.partitions()).unwrap();
        assert_eq!(first_cache, second_cache);
    }
}
