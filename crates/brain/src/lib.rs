pub mod embedding_cache;
pub mod error;
pub mod evidence;
pub mod insights;
pub mod ranker;
pub mod schema;
pub mod store;

pub use embedding_cache::{EMBEDDING_CACHE_VERSION, EmbeddingCache, thought_key};
pub use error::BrainError;
pub use evidence::{EvidenceReport, analyze_evidence};
pub use insights::{InsightReport, synthesize_insights};
pub use ranker::{RankOptions, RankedNode, RankedThought, rank_nodes, rank_thoughts};
pub use schema::{
    BrainState, CoordinatorReview, Edge, LiveEntry, LiveEntryKind, Node, Thought, brain_hash,
    state_hash,
};
pub use store::{BrainStore, JournalScan, MergeStats};
