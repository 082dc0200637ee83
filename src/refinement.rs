//! Refinement Loop
//!
//! Bounded validate/rewrite cycle over a single code artifact:
//!
//! ```text
//! Validating ──affirmative──────────────▶ Done
//!     │ feedback
//!     ▼
//! Refining ──iterations == cap──────────▶ Done
//!     │ rewrite, iterations += 1
//!     └──────────▶ Validating (or Done once the cap is reached)
//! ```
//!
//! The same model writes and judges the code, so convergence is best effort.
//! Exhausting the cap is not an error; the latest artifact is returned.

use crate::error::{AutoprocessError, Result};
use crate::gateway::{CallKind, GatewayError, ModelGateway};
use crate::stages::{CodeArtifact, PostProcessing};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How a pipeline reacts when a validation or refinement call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Surface `ValidationCallFailed` / `RefinementCallFailed`.
    Raise,
    /// Stop on a failed validation, keep the previous code on a failed refinement.
    Degrade,
}

/// Textual verdict that ends the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuccessSignal {
    /// `production-ready` or `no errors`.
    ProductionReady,
    /// `valid`. Note that `invalid` contains it too.
    Valid,
}

impl SuccessSignal {
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            SuccessSignal::ProductionReady => &["production-ready", "no errors"],
            SuccessSignal::Valid => &["valid"],
        }
    }

    /// Case-insensitive substring match against any marker.
    pub fn is_affirmative(&self, feedback: &str) -> bool {
        let feedback = feedback.to_lowercase();
        self.markers().iter().any(|m| feedback.contains(m))
    }
}

/// Prompt layout for the two calls the loop makes.
pub trait RefinementPrompts: Send + Sync {
    fn validation(&self, code: &str) -> Vec<String>;

    /// `feedback` is the full, unmodified validation text.
    fn refinement(&self, feedback: &str, code: &str) -> Vec<String>;
}

#[derive(Debug)]
pub enum LoopState {
    Validating,
    Refining { feedback: String },
    Done { converged: bool },
    Failed(AutoprocessError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub code: CodeArtifact,
    /// Refinement rounds performed, failed ones included.
    pub iterations: usize,
    pub validations: usize,
    /// The last validation verdict was affirmative.
    pub converged: bool,
}

pub struct RefinementLoop<'a> {
    gateway: &'a ModelGateway,
    prompts: &'a dyn RefinementPrompts,
    policy: FailurePolicy,
    signal: SuccessSignal,
    post: PostProcessing,
    max_iterations: usize,
}

impl<'a> RefinementLoop<'a> {
    pub fn new(
        gateway: &'a ModelGateway,
        prompts: &'a dyn RefinementPrompts,
        policy: FailurePolicy,
        signal: SuccessSignal,
    ) -> Self {
        Self {
            gateway,
            prompts,
            policy,
            signal,
            post: PostProcessing::default(),
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_post_processing(mut self, post: PostProcessing) -> Self {
        self.post = post;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn run(&self, initial: CodeArtifact) -> Result<RefinementOutcome> {
        let mut code = initial;
        let mut iterations = 0usize;
        let mut validations = 0usize;
        let mut state = LoopState::Validating;

        loop {
            state = match state {
                LoopState::Validating => {
                    validations += 1;
                    let parts = self.prompts.validation(&code);
                    match self.gateway.complete(CallKind::Validation, &parts).await {
                        Ok(feedback) if self.signal.is_affirmative(&feedback) => {
                            info!(validations, iterations, "code accepted by validator");
                            LoopState::Done { converged: true }
                        }
                        Ok(feedback) => LoopState::Refining { feedback },
                        Err(e) => self.on_validation_failure(e),
                    }
                }
                LoopState::Refining { feedback } => {
                    if iterations >= self.max_iterations {
                        info!(iterations, "iteration cap reached, returning latest code");
                        LoopState::Done { converged: false }
                    } else {
                        let parts = self.prompts.refinement(&feedback, &code);
                        match self.gateway.complete(CallKind::Refinement, &parts).await {
                            Ok(text) => {
                                code = self.post.refined(&text);
                                iterations += 1;
                                info!(iteration = iterations, "code refined");
                                self.after_refinement(iterations)
                            }
                            Err(e) => match self.policy {
                                FailurePolicy::Raise => {
                                    LoopState::Failed(AutoprocessError::RefinementCallFailed(e))
                                }
                                FailurePolicy::Degrade => {
                                    warn!("refinement call failed, keeping previous code: {}", e);
                                    iterations += 1;
                                    self.after_refinement(iterations)
                                }
                            },
                        }
                    }
                }
                LoopState::Done { converged } => {
                    return Ok(RefinementOutcome {
                        code,
                        iterations,
                        validations,
                        converged,
                    });
                }
                LoopState::Failed(e) => return Err(e),
            };
        }
    }

    fn on_validation_failure(&self, e: GatewayError) -> LoopState {
        match self.policy {
            FailurePolicy::Raise => LoopState::Failed(AutoprocessError::ValidationCallFailed(e)),
            FailurePolicy::Degrade => {
                warn!("validation call failed, returning current code: {}", e);
                LoopState::Done { converged: false }
            }
        }
    }

    fn after_refinement(&self, iterations: usize) -> LoopState {
        if iterations >= self.max_iterations {
            info!(iterations, "iteration cap reached, returning latest code");
            LoopState::Done { converged: false }
        } else {
            LoopState::Validating
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedBackend;
    use std::sync::Arc;

    struct PlainPrompts;

    impl RefinementPrompts for PlainPrompts {
        fn validation(&self, code: &str) -> Vec<String> {
            vec![format!("Validate:\n{}", code)]
        }

        fn refinement(&self, feedback: &str, code: &str) -> Vec<String> {
            vec![format!("Feedback: {}", feedback), format!("Current Code:\n{}", code)]
        }
    }

    async fn gateway_with(
        responses: Vec<std::result::Result<String, GatewayError>>,
    ) -> (ModelGateway, Arc<ScriptedBackend>) {
        let mut all = vec![Ok("ok".to_string())];
        all.extend(responses);
        let backend = Arc::new(ScriptedBackend::new(all));
        let gateway = ModelGateway::connect(backend.clone()).await.unwrap();
        (gateway, backend)
    }

    fn text(s: &str) -> std::result::Result<String, GatewayError> {
        Ok(s.to_string())
    }

    /// Raise on failure, converge on "production-ready".
    fn strict(gateway: &ModelGateway) -> RefinementLoop<'_> {
        RefinementLoop::new(
            gateway,
            &PlainPrompts,
            FailurePolicy::Raise,
            SuccessSignal::ProductionReady,
        )
    }

    /// Keep the best code on failure, converge on "valid".
    fn lenient(gateway: &ModelGateway) -> RefinementLoop<'_> {
        RefinementLoop::new(gateway, &PlainPrompts, FailurePolicy::Degrade, SuccessSignal::Valid)
    }

    #[test]
    fn test_success_signals() {
        assert!(SuccessSignal::ProductionReady.is_affirmative("The code is Production-Ready."));
        assert!(SuccessSignal::ProductionReady.is_affirmative("NO ERRORS found"));
        assert!(!SuccessSignal::ProductionReady.is_affirmative("productionready"));
        assert!(!SuccessSignal::ProductionReady.is_affirmative("VALID"));
        assert!(SuccessSignal::Valid.is_affirmative("VALID"));
        assert!(SuccessSignal::Valid.is_affirmative("This code is invalid"));
        assert!(!SuccessSignal::Valid.is_affirmative("Add a null check"));
    }

    #[tokio::test]
    async fn test_affirmative_first_verdict() {
        let (gateway, _) = gateway_with(vec![text("production-ready")]).await;
        let outcome = strict(&gateway)
            .run("import pandas as pd".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "import pandas as pd");
        assert_eq!(outcome.validations, 1);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.converged);

        let transcript = gateway.transcript();
        assert_eq!(transcript.count(CallKind::Validation), 1);
        assert_eq!(transcript.count(CallKind::Refinement), 0);
    }

    #[tokio::test]
    async fn test_cap_exhaustion_returns_latest_code() {
        let (gateway, _) = gateway_with(vec![
            text("fix a"),
            text("v1"),
            text("fix b"),
            text("v2"),
            text("fix c"),
            text("  v3  "),
        ])
        .await;

        let outcome = strict(&gateway)
            .with_max_iterations(3)
            .run("v0".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "v3");
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.validations, 3);
        assert!(!outcome.converged);
        assert!(gateway.transcript().count(CallKind::Validation) <= 4);
    }

    #[tokio::test]
    async fn test_zero_cap_validates_once() {
        let (gateway, backend) = gateway_with(vec![text("needs work")]).await;
        let outcome = strict(&gateway)
            .with_max_iterations(0)
            .run("v0".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "v0");
        assert_eq!(outcome.validations, 1);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(backend.remaining(), 0);
    }

    #[tokio::test]
    async fn test_converges_after_refinement() {
        let (gateway, backend) = gateway_with(vec![
            text("Missing import for numpy"),
            text("import numpy as np\nv1"),
            text("no errors"),
        ])
        .await;

        let outcome = strict(&gateway)
            .run("v0".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "import numpy as np\nv1");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.validations, 2);
        assert!(outcome.converged);

        let refinement_prompt = backend.prompt_text(2).unwrap();
        assert!(refinement_prompt.contains("Feedback: Missing import for numpy"));
        assert!(refinement_prompt.contains("Current Code:\nv0"));
    }

    #[tokio::test]
    async fn test_refined_code_post_processing() {
        let (gateway, _) = gateway_with(vec![text("fix"), text("Sure!\nimport os\nv1\n")]).await;
        let post = PostProcessing {
            trim_synthesized: true,
            imports_after_synthesis: true,
            imports_after_refinement: true,
        };

        let outcome = strict(&gateway)
            .with_post_processing(post)
            .with_max_iterations(1)
            .run("v0".to_string())
            .await
            .unwrap();
        assert_eq!(outcome.code, "import os\nv1");
    }

    #[tokio::test]
    async fn test_raise_on_validation_failure() {
        let (gateway, _) = gateway_with(vec![text("")]).await;
        let err = strict(&gateway)
            .run("v0".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutoprocessError::ValidationCallFailed(GatewayError::EmptyCompletion)
        ));
    }

    #[tokio::test]
    async fn test_raise_on_refinement_failure() {
        let (gateway, _) = gateway_with(vec![
            text("fix"),
            Err(GatewayError::Transport("timeout".to_string())),
        ])
        .await;
        let err = strict(&gateway)
            .run("v0".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AutoprocessError::RefinementCallFailed(_)));
    }

    #[tokio::test]
    async fn test_degrade_on_validation_failure() {
        let (gateway, _) = gateway_with(vec![text("improve naming"), text("v1"), text("")]).await;
        let outcome = lenient(&gateway)
            .run("v0".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "v1");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.validations, 2);
        assert!(!outcome.converged);
    }

    #[tokio::test]
    async fn test_degrade_keeps_code_on_refinement_failure() {
        let (gateway, _) = gateway_with(vec![
            text("improve naming"),
            text(""),
            text("add checks"),
            text("v2"),
            text("VALID"),
        ])
        .await;

        let outcome = lenient(&gateway)
            .run("v0".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.code, "v2");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.validations, 3);
        assert!(outcome.converged);
    }

    #[tokio::test]
    async fn test_validation_calls_bounded_by_cap() {
        for cap in 0..5 {
            let mut responses = Vec::new();
            for i in 0..(cap + 1) {
                responses.push(text("still wrong"));
                responses.push(text(&format!("v{}", i + 1)));
            }
            let (gateway, _) = gateway_with(responses).await;

            let outcome = strict(&gateway)
                .with_max_iterations(cap)
                .run("v0".to_string())
                .await
                .unwrap();

            assert_eq!(outcome.iterations, cap);
            assert!(outcome.validations <= cap + 1);
            assert_eq!(gateway.transcript().count(CallKind::Refinement), cap);
        }
    }
}
