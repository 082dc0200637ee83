//! Strategy and Code Synthesis stages
//!
//! Both stages are one gateway call each. The strategy is opaque text that is
//! threaded into the code prompt; nothing here parses it.

use crate::error::{AutoprocessError, Result};
use crate::gateway::{CallKind, ModelGateway};
use tracing::info;

/// Model-proposed plan. Free-form text that is meant to be JSON but is never parsed.
pub type Strategy = String;

/// Generated source code. Replaced wholesale on every refinement.
pub type CodeArtifact = String;

/// Text clean-up applied to generated code, chosen per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostProcessing {
    /// Trim surrounding whitespace from the synthesized code.
    pub trim_synthesized: bool,
    /// Drop any preamble before the first `import` in the synthesized code.
    pub imports_after_synthesis: bool,
    /// Same, for every refined version.
    pub imports_after_refinement: bool,
}

impl PostProcessing {
    pub fn synthesized(&self, text: &str) -> CodeArtifact {
        let text = if self.trim_synthesized { text.trim() } else { text };
        if self.imports_after_synthesis {
            trim_to_first_import(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Refined code is always trimmed.
    pub fn refined(&self, text: &str) -> CodeArtifact {
        let text = text.trim();
        if self.imports_after_refinement {
            trim_to_first_import(text).to_string()
        } else {
            text.to_string()
        }
    }
}

/// Suffix of `text` starting at the first occurrence of `import`.
///
/// Case-sensitive, first occurrence wins, input returned unchanged if absent.
pub fn trim_to_first_import(text: &str) -> &str {
    match text.find("import") {
        Some(idx) => &text[idx..],
        None => text,
    }
}

/// Ask for a strategy. `parts` already carries instruction, profile and task context.
pub async fn propose_strategy(gateway: &ModelGateway, parts: &[String]) -> Result<Strategy> {
    let text = gateway
        .complete(CallKind::Strategy, parts)
        .await
        .map_err(AutoprocessError::StrategyGenerationFailed)?;

    let strategy = text.trim().to_string();
    info!(chars = strategy.len(), "strategy generated");
    Ok(strategy)
}

/// Ask for code implementing the strategy embedded in `parts`.
pub async fn synthesize_code(
    gateway: &ModelGateway,
    parts: &[String],
    post: PostProcessing,
) -> Result<CodeArtifact> {
    let text = gateway
        .complete(CallKind::Code, parts)
        .await
        .map_err(AutoprocessError::CodeGenerationFailed)?;

    let code = post.synthesized(&text);
    info!(chars = code.len(), "initial code generated");
    Ok(code)
}
