//! Skew correction pipeline
//!
//! Picks a distribution transform for one numeric column and generates code
//! producing `<column>_unskewed`. The model is selectable; every failure is
//! raised to the caller.

use super::{
    check_column, dataset_context, open_gateway, run_stages, JoinedLayout, PipelineDefinition,
    PipelineKind, API_NOT_VALID,
};
use crate::config::{GatewayConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, DEFAULT_SAMPLE_SIZE};
use crate::error::{AutoprocessError, Result};
use crate::gateway::{CompletionBackend, CredentialPolicy, GeminiBackend, ModelGateway};
use crate::prompts::{join_lines, render, PromptTemplates};
use crate::refinement::{FailurePolicy, SuccessSignal};
use crate::stages::{CodeArtifact, PostProcessing};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

const STRATEGY: &str = "You are a senior data scientist specializing in statistical distributions. Analyze the following dataset context and column statistics to recommend an optimal skew correction method. Consider:
- Data range and presence of zeros/negatives
- Current skew direction and magnitude
- Domain-specific requirements
- Compatibility with downstream ML tasks

Available methods:
1. log_transform
2. box_cox
3. yeo_johnson
4. quantile_transform
5. custom_scaling";

const CODE: &str = "Generate production-ready Python code implementing a skew correction method as described. Requirements:
- Input is a clean DataFrame named 'df' (nulls and dtypes already handled)
- For the target column '{column}', apply the recommended transformation and create a new column '{column}_unskewed'
- Handle edge cases (e.g. zeros/negatives) if needed
- Preserve the original data
- Include all necessary imports and clear comments explaining your choices
- Don't use sample data, just consider df as the name of the dataset and perform the strategy";

const VALIDATION: &str = "Validate the following Python code for skew correction. Check for:
1. Proper handling of data boundaries (e.g., zeros/negatives)
2. Correct use of function parameters
3. Appropriate naming for the new column
4. Inclusion of safety checks and comments
5. Compatibility with sklearn pipelines

If the code is production-ready, respond with 'production-ready' or 'no errors'. Otherwise, provide specific feedback for necessary improvements.";

const REFINEMENT: &str = "Refine the previously generated Python code accordingly. Output only the refined code.";

pub const TEMPLATES: PromptTemplates = PromptTemplates {
    strategy: STRATEGY,
    code: CODE,
    validation: VALIDATION,
    refinement: REFINEMENT,
};

pub const DEFINITION: PipelineDefinition = PipelineDefinition {
    kind: PipelineKind::SkewCorrection,
    templates: TEMPLATES,
    credential_policy: CredentialPolicy::Reject,
    failure_policy: FailurePolicy::Raise,
    success_signal: SuccessSignal::ProductionReady,
    post_processing: PostProcessing {
        trim_synthesized: false,
        imports_after_synthesis: false,
        imports_after_refinement: false,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkewTask {
    pub column: String,
    pub max_iterations: usize,
}

impl SkewTask {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

pub struct SkewCorrectionPipeline {
    gateway: ModelGateway,
    definition: PipelineDefinition,
    sample_size: usize,
}

impl SkewCorrectionPipeline {
    /// `model` defaults to the shared default when `None`.
    pub async fn connect(api_key: &str, model: Option<&str>) -> Result<Self> {
        let config = GatewayConfig::new(api_key).with_model(model.unwrap_or(DEFAULT_MODEL));
        Self::with_backend(Arc::new(GeminiBackend::new(&config))).await
    }

    pub async fn with_backend(backend: Arc<dyn CompletionBackend>) -> Result<Self> {
        let definition = DEFINITION;
        let gateway = open_gateway(backend, &definition)
            .await?
            .ok_or_else(|| AutoprocessError::InvalidCredential(API_NOT_VALID.to_string()))?;
        Ok(Self {
            gateway,
            definition,
            sample_size: DEFAULT_SAMPLE_SIZE,
        })
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.definition.templates = templates;
        self
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub async fn correct_skew(
        &self,
        dataset: &DataFrame,
        task: &SkewTask,
    ) -> Result<CodeArtifact> {
        let span = info_span!(
            "pipeline",
            kind = %self.definition.kind,
            run_id = %uuid::Uuid::new_v4()
        );
        async move {
            let (profile, context) = dataset_context(dataset, self.sample_size)?;
            check_column(&profile, "skew", &task.column);
            let current = profile
                .column(&task.column)
                .and_then(|c| c.numeric.as_ref())
                .and_then(|n| n.skew);
            if let Some(skew) = current {
                info!(column = %task.column, skew, "current skew");
            }

            let templates = self.definition.templates;
            let strategy_parts = vec![join_lines(&[
                templates.strategy.to_string(),
                context,
                format!("Column: {}", task.column),
            ])];

            let layout = JoinedLayout::new(templates);
            let outcome = run_stages(
                &self.gateway,
                &self.definition,
                strategy_parts,
                |strategy| {
                    vec![join_lines(&[
                        render(templates.code, &[("column", task.column.as_str())]),
                        format!("Strategy: {}", strategy),
                    ])]
                },
                &layout,
                task.max_iterations,
            )
            .await?;

            Ok(outcome.code)
        }
        .instrument(span)
        .await
    }
}
