pub mod adapters;
pub mod cache;
pub mod catalog;
pub mod observability;
pub mod pipeline;
pub mod rls;
pub mod semantic;
pub mod sql;

pub use adapters::{AdapterRegistry, AdapterResult, EngineAdapter, SourceConfig};
pub use cache::{
    CacheSettings, CacheStore, CoalesceFallback, MemoryCacheStore, QueryCache, RedisCacheStore,
};
pub use catalog::{CatalogProvider, MemoryCatalog, MemorySources, SourceConfigProvider};
pub use observability::{QueryStatsRecord, RecordingStatsSink, StatsSink, StatsSummary};
pub use pipeline::{GuardLimits, QueryPipeline};
pub use rls::RlsOutcome;
pub use semantic::{CompileInput, CompiledQuery};
pub use sql::SqlDialect;
