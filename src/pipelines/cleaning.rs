//! Data cleaning pipeline
//!
//! Missing values, outliers and duplicates, each of which can be switched off.
//! A failed credential check leaves the pipeline in place but every call
//! answers with `{"error": "API not valid"}`.

use super::{
    check_column, dataset_context, open_gateway, run_stages, JoinedLayout, PipelineDefinition,
    PipelineKind, PipelineOutcome, API_NOT_VALID,
};
use crate::config::{GatewayConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_SAMPLE_SIZE};
use crate::error::Result;
use crate::gateway::{CompletionBackend, CredentialPolicy, GeminiBackend, ModelGateway};
use crate::prompts::{join_lines, PromptTemplates};
use crate::refinement::{FailurePolicy, SuccessSignal};
use crate::stages::PostProcessing;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

const STRATEGY: &str = "You are a senior data scientist specializing in data cleaning. Analyze the dataset context to recommend a comprehensive cleaning strategy. Your strategy should include:
- Missing value handling: Recommend imputation or removal methods based on feature distribution.
- Outlier handling: Recommend robust methods (e.g., IQR filtering, winsorization) for detecting and treating outliers.
- Duplicate handling: Suggest criteria for identifying and removing duplicate rows.

If any of these tasks are not required, exclude them from the strategy.

Return the strategy in the following JSON format:
{
  \"missing_values\": { \"method\": \"impute|remove\", \"parameters\": { ... }, \"reason\": \"...\" },
  \"outlier_handling\": { \"method\": \"IQR|winsorization|custom\", \"parameters\": { ... }, \"reason\": \"...\" },
  \"duplicate_handling\": { \"action\": \"drop\", \"parameters\": { ... }, \"reason\": \"...\" },
  \"recommendations\": [\"Any additional advice\"]
}";

const CODE: &str = "Generate production-ready Python code that implements the following data cleaning strategy on a Pandas DataFrame named 'df'.
- Handle missing values as recommended (imputation/removal).
- Detect and handle outliers using the suggested method (e.g., IQR filtering, winsorization).
- Remove duplicate rows according to best practices.

Requirements:
- Preserve original data by adding '_cleaned' suffix to transformed columns if applicable.
- Include necessary imports and comments explaining each step.

If any task is excluded from the strategy, ensure it is not included in the code.
Output only the final Python code without any additional commentary.";

const VALIDATION: &str = "Validate the following Python code for data cleaning. Check for:
- Correct handling of missing values, outliers, and duplicates (if applicable).
- Proper use of function parameters and safety checks.
- Clear column naming (e.g., '_cleaned' suffix) for transformed columns.
- Necessary imports and compatibility with sklearn pipelines if needed.

If the code is production-ready, respond with 'production-ready' or 'no errors'. Otherwise, provide specific feedback for improvement.";

const REFINEMENT: &str =
    "Refine the Python code accordingly. Output only the refined Python code without any additional commentary.";

pub const TEMPLATES: PromptTemplates = PromptTemplates {
    strategy: STRATEGY,
    code: CODE,
    validation: VALIDATION,
    refinement: REFINEMENT,
};

pub const DEFINITION: PipelineDefinition = PipelineDefinition {
    kind: PipelineKind::Cleaning,
    templates: TEMPLATES,
    credential_policy: CredentialPolicy::Report,
    failure_policy: FailurePolicy::Raise,
    success_signal: SuccessSignal::ProductionReady,
    post_processing: PostProcessing {
        trim_synthesized: true,
        imports_after_synthesis: true,
        imports_after_refinement: true,
    },
};

/// Which cleaning sub-tasks to request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningTask {
    pub target: Option<String>,
    pub missing: bool,
    pub outlier: bool,
    pub duplicate: bool,
    pub max_iterations: usize,
}

impl Default for CleaningTask {
    fn default() -> Self {
        Self {
            target: None,
            missing: true,
            outlier: true,
            duplicate: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl CleaningTask {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// `Tasks to include: ...` line, listing only the enabled sub-tasks.
    pub fn tasks_line(&self) -> String {
        let enabled: Vec<&str> = [
            (self.missing, "Missing Values"),
            (self.outlier, "Outliers"),
            (self.duplicate, "Duplicates"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();

        if enabled.is_empty() {
            "Tasks to include: none".to_string()
        } else {
            format!("Tasks to include: {}", enabled.join(", "))
        }
    }
}

pub struct DataCleaningPipeline {
    gateway: Option<ModelGateway>,
    definition: PipelineDefinition,
    sample_size: usize,
}

impl DataCleaningPipeline {
    /// Connect to Gemini with the default model.
    pub async fn connect(api_key: &str) -> Self {
        let backend = GeminiBackend::new(&GatewayConfig::new(api_key));
        Self::with_backend(Arc::new(backend)).await
    }

    pub async fn with_backend(backend: Arc<dyn CompletionBackend>) -> Self {
        let definition = DEFINITION;
        // Report policy never fails construction.
        let gateway = open_gateway(backend, &definition).await.ok().flatten();
        Self {
            gateway,
            definition,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.definition.templates = templates;
        self
    }

    /// `false` when the credential check failed.
    pub fn is_usable(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn gateway(&self) -> Option<&ModelGateway> {
        self.gateway.as_ref()
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Generate, validate and refine cleaning code for `dataset`.
    pub async fn clean(&self, dataset: &DataFrame, task: &CleaningTask) -> Result<PipelineOutcome> {
        let Some(gateway) = self.gateway.as_ref() else {
            return Ok(PipelineOutcome::Error(API_NOT_VALID.to_string()));
        };

        let span = info_span!(
            "pipeline",
            kind = %self.definition.kind,
            run_id = %uuid::Uuid::new_v4()
        );
        async move {
            let (profile, context) = dataset_context(dataset, self.sample_size)?;
            if let Some(target) = &task.target {
                check_column(&profile, "target", target);
            }

            let templates = self.definition.templates;
            let target_line = match &task.target {
                Some(target) => format!("Target Variable: {}", target),
                None => String::new(),
            };
            let strategy_parts = vec![join_lines(&[
                templates.strategy.to_string(),
                context,
                target_line,
                task.tasks_line(),
            ])];
            info!(tasks = %task.tasks_line(), "requesting cleaning strategy");

            let layout = JoinedLayout::new(templates);
            let outcome = run_stages(
                gateway,
                &self.definition,
                strategy_parts,
                |strategy| {
                    vec![join_lines(&[
                        templates.code.to_string(),
                        format!("Strategy: {}", strategy),
                    ])]
                },
                &layout,
                task.max_iterations,
            )
            .await?;

            Ok(PipelineOutcome::Code(outcome.code))
        }
        .instrument(span)
        .await
    }
}
