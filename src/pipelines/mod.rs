//! Pipeline Orchestrators
//!
//! Four compositions of the same chain:
//! profile → strategy → code → refinement loop.
//! They differ in prompt text, generated-column suffix, optional sub-tasks and
//! how they react to failures. Those differences are spelled out in each
//! pipeline's [`PipelineDefinition`] rather than unified.

pub mod cleaning;
pub mod feature_engineering;
pub mod skew_correction;
pub mod transformation;

pub use cleaning::{CleaningTask, DataCleaningPipeline};
pub use feature_engineering::{FeatureEngineeringPipeline, FeatureTask};
pub use skew_correction::{SkewCorrectionPipeline, SkewTask};
pub use transformation::{DataTransformationPipeline, TransformationTask};

use crate::error::{AutoprocessError, Result};
use crate::gateway::{CompletionBackend, CredentialPolicy, ModelGateway};
use crate::profiler::{profile_dataset, DatasetProfile};
use crate::prompts::{join_lines, PromptTemplates};
use crate::refinement::{
    FailurePolicy, RefinementLoop, RefinementOutcome, RefinementPrompts, SuccessSignal,
};
use crate::stages::{self, CodeArtifact, PostProcessing};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Error payload returned by a pipeline whose credential check failed.
pub const API_NOT_VALID: &str = "API not valid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Cleaning,
    Transformation,
    FeatureEngineering,
    SkewCorrection,
}

impl PipelineKind {
    /// Marker appended to columns the generated code derives.
    pub fn column_suffix(&self) -> &'static str {
        match self {
            PipelineKind::Cleaning => "_cleaned",
            PipelineKind::Transformation => "_transformed",
            PipelineKind::FeatureEngineering => "_engineered",
            PipelineKind::SkewCorrection => "_unskewed",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Cleaning => write!(f, "cleaning"),
            PipelineKind::Transformation => write!(f, "transformation"),
            PipelineKind::FeatureEngineering => write!(f, "feature_engineering"),
            PipelineKind::SkewCorrection => write!(f, "skew_correction"),
        }
    }
}

/// Immutable per-pipeline configuration, shareable across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub kind: PipelineKind,
    pub templates: PromptTemplates,
    pub credential_policy: CredentialPolicy,
    pub failure_policy: FailurePolicy,
    pub success_signal: SuccessSignal,
    pub post_processing: PostProcessing,
}

/// `{"code": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineOutcome {
    Code(CodeArtifact),
    Error(String),
}

impl PipelineOutcome {
    pub fn code(&self) -> Option<&str> {
        match self {
            PipelineOutcome::Code(code) => Some(code),
            PipelineOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PipelineOutcome::Code(_) => None,
            PipelineOutcome::Error(reason) => Some(reason),
        }
    }

    pub fn into_result(self) -> std::result::Result<CodeArtifact, String> {
        match self {
            PipelineOutcome::Code(code) => Ok(code),
            PipelineOutcome::Error(reason) => Err(reason),
        }
    }
}

/// Validation and refinement prompts built by joining lines, shared by the
/// cleaning, transformation and skew-correction pipelines.
pub struct JoinedLayout {
    templates: PromptTemplates,
}

impl JoinedLayout {
    pub fn new(templates: PromptTemplates) -> Self {
        Self { templates }
    }
}

impl RefinementPrompts for JoinedLayout {
    fn validation(&self, code: &str) -> Vec<String> {
        vec![join_lines(&[self.templates.validation, code])]
    }

    fn refinement(&self, feedback: &str, code: &str) -> Vec<String> {
        vec![join_lines(&[
            format!("Feedback: {}", feedback),
            self.templates.refinement.to_string(),
            format!("Current Code:\n{}", code),
        ])]
    }
}

/// Connect a backend according to the pipeline's credential policy.
///
/// `Ok(None)` means the credential failed under `CredentialPolicy::Report`.
pub(crate) async fn open_gateway(
    backend: Arc<dyn CompletionBackend>,
    definition: &PipelineDefinition,
) -> Result<Option<ModelGateway>> {
    match ModelGateway::connect(backend).await {
        Ok(gateway) => {
            info!(kind = %definition.kind, model = gateway.model_name(), "model gateway ready");
            Ok(Some(gateway))
        }
        Err(e) => match definition.credential_policy {
            CredentialPolicy::Report => {
                error!(kind = %definition.kind, "{}: {}", API_NOT_VALID, e);
                Ok(None)
            }
            CredentialPolicy::Reject => Err(AutoprocessError::InvalidCredential(e.to_string())),
        },
    }
}

/// Profile the dataset for prompt context.
pub(crate) fn dataset_context(
    dataset: &DataFrame,
    sample_size: usize,
) -> Result<(DatasetProfile, String)> {
    let profile = profile_dataset(dataset, sample_size)?;
    let text = profile.to_prompt_text()?;
    info!(
        rows = profile.num_rows,
        columns = profile.num_columns,
        "dataset profiled"
    );
    Ok((profile, format!("Dataset Context: {}", text)))
}

/// Log when a caller names a column the dataset does not have.
pub(crate) fn check_column(profile: &DatasetProfile, role: &str, name: &str) {
    if name.is_empty() || profile.has_column(name) {
        return;
    }
    match profile.suggest_column(name) {
        Some(candidate) => warn!(
            "{} column '{}' not found in dataset, did you mean '{}'?",
            role, name, candidate
        ),
        None => warn!("{} column '{}' not found in dataset", role, name),
    }
}

/// Strategy call, code call, then the refinement loop.
pub(crate) async fn run_stages<F>(
    gateway: &ModelGateway,
    definition: &PipelineDefinition,
    strategy_parts: Vec<String>,
    code_parts: F,
    prompts: &dyn RefinementPrompts,
    max_iterations: usize,
) -> Result<RefinementOutcome>
where
    F: FnOnce(&str) -> Vec<String>,
{
    let strategy = stages::propose_strategy(gateway, &strategy_parts).await?;
    let code =
        stages::synthesize_code(gateway, &code_parts(&strategy), definition.post_processing)
            .await?;

    let outcome = RefinementLoop::new(
        gateway,
        prompts,
        definition.failure_policy,
        definition.success_signal,
    )
        .with_post_processing(definition.post_processing)
        .with_max_iterations(max_iterations)
        .run(code)
        .await?;

    info!(
        kind = %definition.kind,
        iterations = outcome.iterations,
        validations = outcome.validations,
        converged = outcome.converged,
        "pipeline finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_envelope_shape() {
        let code = PipelineOutcome::Code("import pandas as pd".to_string());
        assert_eq!(
            serde_json::to_string(&code).unwrap(),
            r#"{"code":"import pandas as pd"}"#
        );

        let error = PipelineOutcome::Error(API_NOT_VALID.to_string());
        assert_eq!(serde_json::to_string(&error).unwrap(), r#"{"error":"API not valid"}"#);

        let parsed: PipelineOutcome = serde_json::from_str(r#"{"code":"x"}"#).unwrap();
        assert_eq!(parsed.code(), Some("x"));
        assert_eq!(error.into_result(), Err(API_NOT_VALID.to_string()));
    }

    #[test]
    fn test_column_suffixes() {
        assert_eq!(PipelineKind::Cleaning.column_suffix(), "_cleaned");
        assert_eq!(PipelineKind::Transformation.column_suffix(), "_transformed");
        assert_eq!(PipelineKind::FeatureEngineering.column_suffix(), "_engineered");
        assert_eq!(PipelineKind::SkewCorrection.column_suffix(), "_unskewed");
    }

    #[test]
    fn test_joined_layout() {
        let layout = JoinedLayout::new(cleaning::TEMPLATES);
        let validation = layout.validation("import os");
        assert_eq!(validation.len(), 1);
        assert!(validation[0].starts_with(cleaning::TEMPLATES.validation));
        assert!(validation[0].ends_with("\nimport os"));

        let refinement = layout.refinement("rename columns", "import os");
        assert!(refinement[0].starts_with("Feedback: rename columns\n"));
        assert!(refinement[0].ends_with("Current Code:\nimport os"));
    }
}
