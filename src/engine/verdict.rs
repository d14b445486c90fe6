use serde::{Deserialize, Serialize};

use super::eligibility::Verdict;

const ERRORS_HEADER: &str = "❌ Cannot register:";
const WARNINGS_HEADER: &str = "⚠️ Warning:";

/// Render a verdict for people. Output only; never parse it back.
pub fn format_verdict(verdict: &Verdict) -> String {
    let mut out = String::new();

    if !verdict.errors.is_empty() {
        out.push_str(ERRORS_HEADER);
        for e in &verdict.errors {
            out.push_str("\n• ");
            out.push_str(&e.to_string());
        }
    }

    if !verdict.warnings.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(WARNINGS_HEADER);
        for w in &verdict.warnings {
            out.push_str("\n• ");
            out.push_str(&w.to_string());
        }
    }

    out
}

/// Flat `{valid, errors, warnings}` form of a verdict with rendered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictView {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl From<&Verdict> for VerdictView {
    fn from(v: &Verdict) -> Self {
        Self {
            valid: v.is_valid(),
            errors: v.errors.iter().map(|e| e.to_string()).collect(),
            warnings: v.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }
}
