pub mod actions;
pub mod context;
pub mod events;
pub mod modes;
pub mod orchestrator;
pub mod pgs;
pub mod query_cache;
pub mod result;
pub mod session;

pub use actions::{ActionKind, Artifact, ArtifactWriter, DetectedAction, detect_action, extract_artifacts};
pub use context::{BuiltContext, ContextRequest, OutputFile, OutputFileSet, PriorContext, build_context};
pub use events::{ChannelEventSink, EventSink, NullEventSink, ProgressEvent, SweepStatus};
pub use modes::{ModeProfile, QueryMode, context_window, max_nodes};
pub use orchestrator::{ActionRunner, QueryEngine, QueryOptions};
pub use query_cache::{CacheKey, QueryCache, QueryCacheStats};
pub use result::QueryResult;
pub use session::{SessionContext, SessionTracker, extract_context, merge_contexts};
