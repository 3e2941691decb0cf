pub mod auto_iterate;
pub mod candidate;
pub mod config;
pub mod context;
pub mod diagnosis;
pub mod knowledge;
pub mod sample;
pub mod validation;

pub use auto_iterate::{regression_set, AutoIterateConfig, AutoIterateState, AutoIterateStatus};
pub use candidate::Candidate;
pub use config::{
    AutoIterateDefaults, Config, DatabaseConfig, LlmConfig, LoggingConfig, PipelineConfig,
    RateLimitConfig, RetryConfig,
};
pub use context::{
    OptimizationContext, OptimizationResult, OptimizeRequest, PipelineState, ProgressEvent,
    ProgressSink, PromptVerdict, ShouldStop, StrategyMode,
};
pub use diagnosis::{ConfusionPair, DiagnosisReport};
pub use knowledge::{line_diff, KnowledgeNote, KnowledgeRecord, RecordInput};
pub use sample::{format_error_records, ErrorRecord, Project, Sample};
pub use validation::{SampleResult, ValidationRun, ValidationStatus};
