pub mod aggregator;
pub mod conflict;
pub mod engine;
pub mod pool;
pub mod router;
pub mod walker;

pub use aggregator::{ResultAggregator, RunCounters, RunSummary};
pub use conflict::{ConflictResolver, DestinationState, SkipReason, SyncDecision};
pub use engine::{MirrorEngine, RunReport};
pub use pool::{PoolConfig, TransferHandle, TransferOutcome, TransferTask, TransferWorkerPool};
pub use router::{destination_key, PatternRouter, RawRule, RoutingRule};
pub use walker::TreeWalker;
