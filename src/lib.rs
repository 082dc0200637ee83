pub mod config;
pub mod error;
pub mod gateway;
pub mod pipelines;
pub mod profiler;
pub mod prompts;
pub mod refinement;
pub mod stages;

pub use config::GatewayConfig;
pub use error::{AutoprocessError, Result};
pub use gateway::{
    CompletionBackend, GatewayError, GeminiBackend, ModelGateway, ScriptedBackend, Transcript,
};
pub use pipelines::{
    CleaningTask, DataCleaningPipeline, DataTransformationPipeline, FeatureEngineeringPipeline,
    FeatureTask, PipelineOutcome, SkewCorrectionPipeline, SkewTask, TransformationTask,
};
pub use profiler::{profile_dataset, DatasetProfile};
