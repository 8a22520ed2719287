//! Partitioned Graph Synthesis: community detection over the brain graph,
//! partition enrichment and caching, centroid routing, bounded-parallel
//! sweeps and cross-partition synthesis.

pub mod cache;
pub mod enrich;
pub mod executor;
pub mod graph;
pub mod louvain;
pub mod router;
pub mod session;

pub use cache::{PARTITION_CACHE_VERSION, load_partitions, save_partitions};
pub use enrich::{AdjacentPartition, Partition, enrich_partitions};
pub use executor::{PgsOutcome, PgsRunner, SweepReport};
pub use graph::PartitionGraph;
pub use louvain::{detect_communities, merge_small_communities, split_oversize_communities};
pub use router::route_partitions;
pub use session::{PgsMode, PgsSessionRecord, PgsSessionStore};
