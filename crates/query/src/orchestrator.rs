//! The query orchestrator: evidence selection → context assembly → LLM call
//! → caching, wrapped in sessions and progress events.
//!
//! All stores are injected at construction so tests can run against fakes;
//! nothing here owns global state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cerebra_brain::{
    BrainError, BrainStore, EmbeddingCache, RankOptions, analyze_evidence, rank_nodes,
    rank_thoughts, state_hash, synthesize_insights,
};
use cerebra_config::AppConfig;
use cerebra_llm::{
    ChunkSink, EmbeddingProvider, GenerateRequest, LlmProvider, RetryPolicy,
    generate_with_retry,
};

use crate::actions::{ArtifactWriter, DetectedAction, detect_action, extract_artifacts};
use crate::context::{ContextRequest, OutputFileSet, PriorContext, build_context};
use crate::events::{EventSink, ProgressEvent};
use crate::modes::QueryMode;
use crate::pgs::executor::{PgsError, PgsRequest, PgsRunner};
use crate::pgs::session::PgsMode;
use crate::query_cache::{CacheKey, QueryCache};
use crate::result::QueryResult;
use crate::session::SessionTracker;

/// Default embedding dimension when no embedder is wired in; matches the
/// reference brains.
const DEFAULT_EMBEDDING_DIMENSION: usize = 512;

/// Executive-mode output bound: ~600 tokens.
const EXECUTIVE_CHAR_CAP: usize = 2400;

/// Optional collaborator that can act on runtime intents (spawning agents,
/// creating goals). Absent in most deployments.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action: &DetectedAction, query: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub mode: QueryMode,
    pub model: String,
    pub session_id: Option<String>,
    /// Engage Partitioned Graph Synthesis in the given session mode.
    pub pgs: Option<PgsMode>,
    pub pgs_seed: Option<u64>,
    pub filter_tags: Option<BTreeSet<String>>,
    pub include_connected: bool,
    /// Prior answer to compress; required by (and only used in) executive mode.
    pub base_answer: Option<String>,
    /// Explicit follow-up context; otherwise derived from the session.
    pub prior: Option<PriorContext>,
    pub output_files: Option<OutputFileSet>,
}

impl QueryOptions {
    pub fn new(mode: QueryMode, model: impl Into<String>) -> Self {
        Self {
            mode,
            model: model.into(),
            session_id: None,
            pgs: None,
            pgs_seed: None,
            filter_tags: None,
            include_connected: false,
            base_answer: None,
            prior: None,
            output_files: None,
        }
    }
}

pub struct QueryEngine {
    store: BrainStore,
    llm: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    retry: RetryPolicy,
    config: AppConfig,
    query_cache: Mutex<QueryCache>,
    sessions: Mutex<SessionTracker>,
    action_runner: Option<Arc<dyn ActionRunner>>,
}

impl QueryEngine {
    pub fn new(
        store: BrainStore,
        llm: Arc<dyn LlmProvider>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            retry: RetryPolicy::default(),
            config,
            query_cache: Mutex::new(QueryCache::new()),
            sessions: Mutex::new(SessionTracker::new()),
            action_runner: None,
        }
    }

    pub fn with_action_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.action_runner = Some(runner);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Answer `query`. Never returns an error: every failure collapses into
    /// the `[Error: …]` envelope with `had_error` set.
    pub async fn answer(
        &self,
        query: &str,
        options: &QueryOptions,
        events: &dyn EventSink,
        chunks: Option<&dyn ChunkSink>,
    ) -> QueryResult {
        let started = Instant::now();
        let result = self.answer_inner(query, options, events, chunks, started).await;
        match &result {
            Ok(result) => result.clone(),
            Err(message) => {
                events.emit(ProgressEvent::Error { message: message.clone() });
                QueryResult::error(
                    message.clone(),
                    json!({
                        "model": options.model,
                        "mode": options.mode.as_str(),
                    }),
                )
            }
        }
    }

    async fn answer_inner(
        &self,
        query: &str,
        options: &QueryOptions,
        events: &dyn EventSink,
        chunks: Option<&dyn ChunkSink>,
        started: Instant,
    ) -> Result<QueryResult, String> {
        if options.model.trim().is_empty() {
            return Err("invalid input: no model specified".to_string());
        }
        if let Some(prior) = &options.prior {
            if prior.prev_query.trim().is_empty() || prior.prev_answer.trim().is_empty() {
                return Err("invalid input: malformed follow-up context".to_string());
            }
        }

        // Executive mode compresses a prior answer and never touches the brain.
        if options.mode == QueryMode::Executive {
            return self.executive_answer(query, options, chunks).await;
        }

        events.emit(ProgressEvent::Progress { message: "loading brain state".to_string() });
        let mut state = match self.store.load_state().await {
            Ok(state) => state,
            Err(BrainError::StateUnavailable(reason)) => {
                return Err(format!("brain state unavailable: {reason}"));
            }
            Err(err) => return Err(err.to_string()),
        };
        let journal_scan = self.store.load_journals().await.map_err(|e| e.to_string())?;
        let merge_stats = BrainStore::merge_journals(&mut state, &journal_scan.entries);
        let thoughts = self.store.load_thoughts().await.map_err(|e| e.to_string())?;
        let hash = state_hash(&state);

        let cache_key = CacheKey {
            state_hash: hash.clone(),
            query: query.to_string(),
            model: options.model.clone(),
            mode: options.mode,
        };
        if let Some(hit) = self.query_cache.lock().await.get(&cache_key) {
            debug!("query cache hit");
            events.emit(ProgressEvent::Result {
                answer: hit.answer.clone(),
                metadata: hit.metadata.clone(),
            });
            return Ok(hit);
        }

        // Embedder degradation: missing provider or failed embed call both
        // mean keyword-only scoring.
        let dimension = self
            .embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSION);
        let query_vec = match &self.embedder {
            Some(embedder) => embedder.embed(query).await,
            None => None,
        };
        let embedding_cache = EmbeddingCache::load(
            &self.store.paths().embeddings_cache(),
            &hash,
            dimension,
        )
        .await
        .map_err(|e| e.to_string())?;

        events.emit(ProgressEvent::Progress { message: "ranking evidence".to_string() });
        let rank_options = RankOptions {
            limit: crate::modes::max_nodes(&options.model),
            include_connected: options.include_connected || options.mode == QueryMode::Dive,
            deep: options.mode == QueryMode::Dive,
            filter_tags: options.filter_tags.clone(),
        };
        let ranked = rank_nodes(
            &state,
            query,
            query_vec.as_deref(),
            &embedding_cache,
            &rank_options,
        );
        let ranked_thoughts =
            rank_thoughts(&thoughts, query, query_vec.as_deref(), &embedding_cache, 40);

        // PGS path, with fallback to the standard pipeline on total failure.
        if let Some(pgs_mode) = options.pgs {
            match self
                .run_pgs(query, options, &state, &embedding_cache, query_vec.as_deref(), pgs_mode, events)
                .await
            {
                Ok(result) => {
                    self.record_session(options, query, &result).await;
                    events.emit(ProgressEvent::Result {
                        answer: result.answer.clone(),
                        metadata: result.metadata.clone(),
                    });
                    return Ok(result);
                }
                Err(PgsError::AllSweepsFailed(count)) => {
                    warn!(failed = count, "all sweeps failed, using standard path");
                    events.emit(ProgressEvent::Progress {
                        message: "partitioned synthesis failed, answering directly".to_string(),
                    });
                }
                Err(PgsError::NothingRouted) => {
                    debug!("no partitions routed, using standard path");
                }
                Err(PgsError::NotEligible { nodes, min }) => {
                    debug!(nodes, min, "brain below pgs threshold, using standard path");
                }
                Err(PgsError::Io(err)) => return Err(err.to_string()),
            }
        }

        let prior = self.resolve_prior(options).await;
        let review = self.store.load_latest_review().await.map_err(|e| e.to_string())?;
        let built = build_context(&ContextRequest {
            state: &state,
            ranked: &ranked,
            thoughts: &thoughts,
            ranked_thoughts: &ranked_thoughts,
            review: review.as_ref(),
            output_files: options.output_files.as_ref(),
            prior: prior.as_ref(),
            mode: options.mode,
            model: &options.model,
        });

        let thought_refs: Vec<&cerebra_brain::Thought> = ranked_thoughts
            .iter()
            .map(|r| &thoughts[r.index])
            .collect();
        let evidence = analyze_evidence(&state, &built.included, &thought_refs, query);
        let insights = matches!(options.mode, QueryMode::Report | QueryMode::Dive)
            .then(|| synthesize_insights(&state, &thoughts));

        events.emit(ProgressEvent::Progress { message: "generating answer".to_string() });
        let profile = options.mode.profile();
        let response = generate_with_retry(
            self.llm.as_ref(),
            &self.retry,
            GenerateRequest {
                model: options.model.clone(),
                instructions: instructions_for(options.mode),
                input: format!("{}\nQUESTION:\n{query}", built.text),
                max_tokens: profile.max_output_tokens,
                reasoning_effort: profile.reasoning_effort,
            },
            chunks,
        )
        .await;

        let mut metadata = json!({
            "model": options.model,
            "mode": options.mode.as_str(),
            "stateHash": hash,
            "evidence": serde_json::to_value(&evidence).unwrap_or_default(),
            "journals": {
                "merged": merge_stats.added,
                "shadowed": merge_stats.shadowed,
                "agents": journal_scan.agents_scanned,
            },
            "context": {
                "estimatedTokens": built.estimated_tokens,
                "adaptiveLimit": built.adaptive_limit,
                "memoriesIncluded": built.included.len(),
            },
            "performance": {
                "cached": false,
                "durationMs": started.elapsed().as_millis() as u64,
            },
        });
        if let Some(insights) = insights {
            metadata["insights"] = serde_json::to_value(&insights).unwrap_or_default();
        }

        if response.had_error {
            let result = QueryResult {
                answer: response.content.clone(),
                metadata,
                had_error: true,
            };
            events.emit(ProgressEvent::Error { message: response.content });
            return Ok(result);
        }

        self.apply_actions(query, &response.content, &mut metadata).await;

        let result = QueryResult {
            answer: response.content,
            metadata,
            had_error: false,
        };
        self.query_cache
            .lock()
            .await
            .insert(cache_key, result.clone());
        self.record_session(options, query, &result).await;

        info!(
            mode = options.mode.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        events.emit(ProgressEvent::Result {
            answer: result.answer.clone(),
            metadata: result.metadata.clone(),
        });
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pgs(
        &self,
        query: &str,
        options: &QueryOptions,
        state: &cerebra_brain::BrainState,
        embedding_cache: &EmbeddingCache,
        query_vec: Option<&[f32]>,
        mode: PgsMode,
        events: &dyn EventSink,
    ) -> Result<QueryResult, PgsError> {
        let runner = PgsRunner {
            llm: self.llm.as_ref(),
            retry: &self.retry,
            config: &self.config.pgs,
            paths: self.store.paths(),
            model: &options.model,
        };
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let outcome = runner
            .run(
                &PgsRequest {
                    state,
                    cache: embedding_cache,
                    query,
                    query_vec,
                    mode,
                    session_id: &session_id,
                    seed: options.pgs_seed,
                },
                events,
            )
            .await?;

        let metadata = json!({
            "model": options.model,
            "mode": options.mode.as_str(),
            "pgs": {
                "sessionId": session_id,
                "sessionMode": mode.as_str(),
                "totalPartitions": outcome.total_partitions,
                "swept": outcome.sweeps.len(),
                "failedSweeps": outcome.failed_sweeps,
                "searched": outcome.session.searched_partition_ids.len(),
            },
            "performance": { "cached": false },
        });
        Ok(QueryResult {
            answer: outcome.answer,
            metadata,
            had_error: outcome.had_error,
        })
    }

    /// Compression-only path: five labeled sections, no brain access, no
    /// memory or cycle citations in the output.
    async fn executive_answer(
        &self,
        query: &str,
        options: &QueryOptions,
        chunks: Option<&dyn ChunkSink>,
    ) -> Result<QueryResult, String> {
        let Some(base_answer) = options.base_answer.as_deref() else {
            return Err("invalid input: executive mode requires a base answer".to_string());
        };

        let profile = QueryMode::Executive.profile();
        let response = generate_with_retry(
            self.llm.as_ref(),
            &self.retry,
            GenerateRequest {
                model: options.model.clone(),
                instructions: EXECUTIVE_INSTRUCTIONS.to_string(),
                input: format!("REQUEST:\n{query}\n\nFULL ANSWER:\n{base_answer}"),
                max_tokens: profile.max_output_tokens,
                reasoning_effort: profile.reasoning_effort,
            },
            chunks,
        )
        .await;
        if response.had_error {
            return Ok(QueryResult {
                answer: response.content,
                metadata: json!({ "mode": "executive", "model": options.model }),
                had_error: true,
            });
        }

        let cleaned = strip_evidence_citations(&response.content);
        let bounded = crate::context::truncate_chars(&cleaned, EXECUTIVE_CHAR_CAP);
        Ok(QueryResult {
            answer: bounded,
            metadata: json!({
                "mode": "executive",
                "model": options.model,
                "compressedFrom": base_answer.chars().count(),
            }),
            had_error: false,
        })
    }

    async fn resolve_prior(&self, options: &QueryOptions) -> Option<PriorContext> {
        if options.prior.is_some() {
            return options.prior.clone();
        }
        let session_id = options.session_id.as_deref()?;
        let sessions = self.sessions.lock().await;
        sessions.last_turn(session_id).map(|turn| PriorContext {
            prev_query: turn.query.clone(),
            prev_answer: turn.answer.clone(),
        })
    }

    async fn record_session(&self, options: &QueryOptions, query: &str, result: &QueryResult) {
        let Some(session_id) = options.session_id.as_deref() else { return };
        self.sessions.lock().await.record_turn(
            session_id,
            query,
            &result.answer,
            result.metadata.clone(),
        );
    }

    /// Detect an intent, extract artifacts, and either run or report
    /// runtime-needing actions.
    async fn apply_actions(
        &self,
        query: &str,
        answer: &str,
        metadata: &mut serde_json::Value,
    ) {
        let Some(detected) = detect_action(query) else { return };
        metadata["action"] = serde_json::to_value(&detected).unwrap_or_default();

        if detected.action.needs_runtime() {
            match &self.action_runner {
                Some(runner) => match runner.run(&detected, query).await {
                    Ok(outcome) => metadata["actionOutcome"] = json!(outcome),
                    Err(err) => metadata["actionOutcome"] = json!(format!("failed: {err}")),
                },
                None => {
                    metadata["actionOutcome"] =
                        json!("unsupported in this runtime: no agent collaborator attached");
                }
            }
            return;
        }

        let artifacts = extract_artifacts(answer);
        if artifacts.is_empty() {
            return;
        }
        let writer = ArtifactWriter::new(self.store.paths().outputs_dir());
        match writer.write(&artifacts).await {
            Ok(paths) => {
                let listed: Vec<String> =
                    paths.iter().map(|p| p.display().to_string()).collect();
                metadata["artifacts"] = json!(listed);
            }
            Err(err) => {
                warn!(error = %err, "artifact write failed");
                metadata["artifacts"] = json!(format!("write failed: {err}"));
            }
        }
    }
}

const EXECUTIVE_INSTRUCTIONS: &str = "\
Compress the full answer below into an executive brief of at most 600 \
tokens. Use exactly five labeled sections:\n\
A. Bottom line\n\
B. Key evidence\n\
C. Risks and unknowns\n\
D. Recommended next steps\n\
E. Confidence\n\
Do not cite memory or cycle identifiers; write for a reader who will never \
see the underlying graph.";

fn instructions_for(mode: QueryMode) -> String {
    let base = "You answer questions over a persisted knowledge graph. Ground \
every claim in the supplied context; when the context is silent, say so \
rather than guessing.";
    match mode {
        QueryMode::Grounded => format!(
            "{base} Cite supporting memories inline as [Mem N]. Claims without \
a citation must be flagged as inference."
        ),
        QueryMode::Report => format!(
            "{base} Produce a structured report with sections and a closing \
synthesis."
        ),
        _ => base.to_string(),
    }
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[Mem \d+\]|\[Cycle \d+\]").expect("static pattern compiles")
    })
}

fn strip_evidence_citations(text: &str) -> String {
    citation_re().replace_all(text, "").to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
