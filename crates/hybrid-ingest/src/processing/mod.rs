//! Pipeline engine: per-document state, stage queues, streaming worker
//! pools, progress aggregation and the document driver

pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod resources;
pub mod state;

pub use orchestrator::{OrchestratorSettings, StreamInput, StreamOutput, StreamingOrchestrator};
pub use pipeline::{DocumentPipeline, DocumentReport, StageReport};
pub use progress::{
    ProgressSink, ProgressSnapshot, ProgressTracker, StageCounters, StageSnapshot,
    ThrottledEmitter, TracingProgressSink, WatchProgressSink,
};
pub use queue::{QueueItem, QueueMessage, StageQueue};
pub use resources::{FixedResourceMonitor, ResourceMonitor, SystemResourceMonitor};
pub use state::{PipelineState, StageError, StageRecord};
