pub mod merger;
pub mod object_store;
pub mod partition;
pub mod pipeline;
pub mod readiness;

pub use merger::{IngestError, IngestReport, IngestionMerger, MergerSettings};
pub use object_store::{
    InMemoryObjectStore, LocalObjectStore, ObjectStore, ObjectStoreError, ObjectSummary,
};
pub use partition::{parse_partition, ParsedPartition};
pub use pipeline::{IngestPipeline, PollOutcome};
pub use readiness::{partition_keys, ReadinessTracker};
