pub mod lifecycle;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use lifecycle::{ManagedTask, TaskHarness, TaskRoutine, TaskState};
pub use pipeline::{Pipeline, PipelineReport};
pub use sink::{FailurePolicy, SinkSettings, SinkTask};
pub use source::{ConnectionState, SourceSettings, SourceTask};
