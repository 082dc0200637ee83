//! Prompt templates
//!
//! Each pipeline carries one immutable `PromptTemplates` record. Templates may
//! contain `{name}` placeholders which are filled by [`render`].

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// The fixed instructions a pipeline sends at each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplates {
    /// Strategy instruction, followed by dataset context.
    pub strategy: &'static str,
    /// Code-generation instruction.
    pub code: &'static str,
    /// Validation instruction listing the checks for this pipeline kind.
    pub validation: &'static str,
    /// Instruction sent with validation feedback to request a rewrite.
    pub refinement: &'static str,
}

/// Fill `{name}` placeholders in a single pass.
///
/// Unknown placeholders are left untouched, and substituted values are never
/// re-scanned, so braces inside values (e.g. generated code) are safe.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Join prompt lines with newlines, the layout used by single-string prompts.
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines.iter().map(|l| l.as_ref()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_known_placeholders() {
        let out = render("column '{col}' becomes '{col}_unskewed'", &[("col", "price")]);
        assert_eq!(out, "column 'price' becomes 'price_unskewed'");
    }

    #[test]
    fn test_render_leaves_unknown_and_value_braces() {
        let out = render("Code:\n{code}\n{other}", &[("code", "d = {k: v}\nf'{x}'")]);
        assert_eq!(out, "Code:\nd = {k: v}\nf'{x}'\n{other}");
    }

    #[test]
    fn test_render_ignores_json_braces() {
        let template = "{\n  \"missing_values\": { \"method\": \"impute\" }\n}";
        assert_eq!(render(template, &[("code", "x")]), template);
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines(&["a", "", "b"]), "a\n\nb");
    }
}
