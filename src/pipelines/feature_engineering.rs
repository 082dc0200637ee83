//! Feature engineering pipeline
//!
//! Interaction, domain, datetime and encoding features, plus optional removal
//! of irrelevant columns. Unlike the other pipelines this one never returns
//! `Err`: failures become an error envelope, and validation or refinement
//! problems quietly keep the best code seen so far.

use super::{
    check_column, dataset_context, open_gateway, run_stages, PipelineDefinition, PipelineKind,
    PipelineOutcome,
};
use crate::config::{GatewayConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_SAMPLE_SIZE};
use crate::error::{AutoprocessError, Result};
use crate::gateway::{
    CompletionBackend, CredentialPolicy, GatewayError, GeminiBackend, ModelGateway,
};
use crate::prompts::{render, PromptTemplates};
use crate::refinement::{FailurePolicy, RefinementPrompts, SuccessSignal};
use crate::stages::{CodeArtifact, PostProcessing};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

const STRATEGY: &str = "You are an expert feature engineering strategist. Analyze this dataset context and target variable to create a comprehensive feature engineering plan. Focus exclusively on:
- Interaction/polynomial features for numerical columns
- Domain-specific feature creation
- Advanced datetime feature extraction
- Context-aware categorical encoding
- Irrelevant feature removal (if requested)

Provide the strategy in this JSON format:
{
\"feature_creation\": [{\"method\": \"...\", \"columns\": \"...\", \"reason\": \"...\"}],
\"feature_transformation\": [{\"method\": \"...\", \"columns\": \"...\", \"reason\": \"...\"}],
\"columns_to_drop\": [\"...\"]
}";

const CODE: &str = "Generate production-ready Python code implementing this feature engineering strategy on DataFrame 'df'. Requirements:
- Preserve original columns
- Add '_engineered' suffix to new features
- Include necessary imports
- Detailed comments explaining each step
- No data cleaning/preprocessing

Strategy:
{strategy}

Output only the code without explanations.";

const VALIDATION: &str = "Validate this feature engineering code. Check:
1. Faithful strategy implementation
2. Proper column naming
3. Absence of data cleaning steps
4. Presence of safety checks
5. Production-readiness

Code:
{code}

Respond 'VALID' or list specific improvements.";

const REFINEMENT: &str = "Output only the improved code without comments:";

pub const TEMPLATES: PromptTemplates = PromptTemplates {
    strategy: STRATEGY,
    code: CODE,
    validation: VALIDATION,
    refinement: REFINEMENT,
};

pub const DEFINITION: PipelineDefinition = PipelineDefinition {
    kind: PipelineKind::FeatureEngineering,
    templates: TEMPLATES,
    credential_policy: CredentialPolicy::Reject,
    failure_policy: FailurePolicy::Degrade,
    success_signal: SuccessSignal::Valid,
    post_processing: PostProcessing {
        trim_synthesized: false,
        imports_after_synthesis: true,
        imports_after_refinement: false,
    },
};

pub const STRATEGY_FAILED: &str = "Failed to generate strategy";
pub const CODE_FAILED: &str = "Failed to generate initial code";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTask {
    pub target: String,
    /// Ask the model to drop columns it considers irrelevant.
    pub drop_irrelevant: bool,
    pub max_iterations: usize,
}

impl FeatureTask {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            drop_irrelevant: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Placeholder templates for validation, fragment list for refinement.
struct FeatureLayout {
    templates: PromptTemplates,
}

impl RefinementPrompts for FeatureLayout {
    fn validation(&self, code: &str) -> Vec<String> {
        vec![render(self.templates.validation, &[("code", code)])]
    }

    fn refinement(&self, feedback: &str, code: &str) -> Vec<String> {
        vec![
            format!("Refinement Instructions: {}", feedback),
            format!("Current Code:\n{}", code),
            self.templates.refinement.to_string(),
        ]
    }
}

pub struct FeatureEngineeringPipeline {
    gateway: ModelGateway,
    definition: PipelineDefinition,
    sample_size: usize,
}

impl FeatureEngineeringPipeline {
    /// Fails with `InvalidCredential` when the key does not work.
    pub async fn connect(api_key: &str) -> Result<Self> {
        let backend = GeminiBackend::new(&GatewayConfig::new(api_key));
        Self::with_backend(Arc::new(backend)).await
    }

    pub async fn with_backend(backend: Arc<dyn CompletionBackend>) -> Result<Self> {
        let definition = DEFINITION;
        let gateway = open_gateway(backend, &definition)
            .await?
            .ok_or_else(|| AutoprocessError::InvalidCredential(super::API_NOT_VALID.to_string()))?;
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

    pub async fn engineer_features(
        &self,
        dataset: &DataFrame,
        task: &FeatureTask,
    ) -> PipelineOutcome {
        let span = info_span!(
            "pipeline",
            kind = %self.definition.kind,
            run_id = %uuid::Uuid::new_v4()
        );
        match self.run(dataset, task).instrument(span).await {
            Ok(code) => PipelineOutcome::Code(code),
            Err(e) => {
                let reason = failure_message(&e);
                error!(cause = ?e.gateway_cause(), "feature engineering failed: {}", reason);
                PipelineOutcome::Error(reason)
            }
        }
    }

    async fn run(&self, dataset: &DataFrame, task: &FeatureTask) -> Result<CodeArtifact> {
        let (profile, context) = dataset_context(dataset, self.sample_size)?;
        check_column(&profile, "target", &task.target);

        let templates = self.definition.templates;
        let strategy_parts = vec![
            templates.strategy.to_string(),
            context,
            format!("Target Variable: {}", task.target),
            if task.drop_irrelevant {
                "Remove irrelevant columns: Yes".to_string()
            } else {
                String::new()
            },
        ];
        info!(
            target_column = %task.target,
            drop_irrelevant = task.drop_irrelevant,
            "requesting feature strategy"
        );

        let layout = FeatureLayout { templates };
        let outcome = run_stages(
            &self.gateway,
            &self.definition,
            strategy_parts,
            |strategy| vec![render(templates.code, &[("strategy", strategy)])],
            &layout,
            task.max_iterations,
        )
        .await?;

        Ok(outcome.code)
    }
}

/// Error payload for a failed run.
fn failure_message(err: &AutoprocessError) -> String {
    match err {
        AutoprocessError::StrategyGenerationFailed(GatewayError::EmptyCompletion) => {
            STRATEGY_FAILED.to_string()
        }
        AutoprocessError::CodeGenerationFailed(GatewayError::EmptyCompletion) => {
            CODE_FAILED.to_string()
        }
        AutoprocessError::PipelineFailed(_) => err.to_string(),
        other => AutoprocessError::PipelineFailed(other.to_string()).to_string(),
    }
}
