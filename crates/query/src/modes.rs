//! Query modes and model capability tables.
//!
//! A mode bundles context budget, coverage target, reasoning effort and
//! output budget; the model tables bound how much context we may assemble.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cerebra_llm::ReasoningEffort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Quick,
    Full,
    Expert,
    Dive,
    Report,
    Grounded,
    /// Compression-only: rewrites a prior answer without touching the brain.
    Executive,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
            Self::Expert => "expert",
            Self::Dive => "dive",
            Self::Report => "report",
            Self::Grounded => "grounded",
            Self::Executive => "executive",
        }
    }

    pub fn profile(self) -> ModeProfile {
        match self {
            Self::Quick => ModeProfile::new(150, 0.10, ReasoningEffort::Low, 10_000),
            Self::Full => ModeProfile::new(400, 0.20, ReasoningEffort::Medium, 20_000),
            Self::Expert => ModeProfile::new(800, 0.30, ReasoningEffort::High, 30_000),
            Self::Dive => ModeProfile::new(1000, 0.35, ReasoningEffort::High, 32_000),
            Self::Report => ModeProfile::new(600, 0.35, ReasoningEffort::High, 16_000),
            Self::Grounded => ModeProfile::new(300, 0.20, ReasoningEffort::Medium, 18_000),
            Self::Executive => ModeProfile::new(0, 0.0, ReasoningEffort::Medium, 8_000),
        }
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            "expert" => Ok(Self::Expert),
            "dive" => Ok(Self::Dive),
            "report" => Ok(Self::Report),
            "grounded" => Ok(Self::Grounded),
            "executive" => Ok(Self::Executive),
            other => Err(format!("unknown query mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModeProfile {
    pub base_limit: usize,
    pub target_coverage: f64,
    pub reasoning_effort: ReasoningEffort,
    pub max_output_tokens: u32,
}

impl ModeProfile {
    const fn new(
        base_limit: usize,
        target_coverage: f64,
        reasoning_effort: ReasoningEffort,
        max_output_tokens: u32,
    ) -> Self {
        Self { base_limit, target_coverage, reasoning_effort, max_output_tokens }
    }
}

// ── model capability tables ───────────────────────────────────────────────────

const DEFAULT_CONTEXT_WINDOW: usize = 128_000;
const DEFAULT_MAX_NODES: usize = 2500;

/// Substring-matched entries for higher-capacity model families.
const LARGE_MODELS: &[(&str, usize, usize)] = &[
    ("gpt-5", 200_000, 4000),
    ("o3", 200_000, 4000),
    ("opus", 200_000, 4000),
    ("sonnet", 200_000, 4000),
];

pub fn context_window(model: &str) -> usize {
    let lower = model.to_lowercase();
    LARGE_MODELS
        .iter()
        .find(|(marker, _, _)| lower.contains(marker))
        .map(|(_, window, _)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

pub fn max_nodes(model: &str) -> usize {
    let lower = model.to_lowercase();
    LARGE_MODELS
        .iter()
        .find(|(marker, _, _)| lower.contains(marker))
        .map(|(_, _, nodes)| *nodes)
        .unwrap_or(DEFAULT_MAX_NODES)
}

/// Hard ceiling on assembled context characters for `model`.
///
/// Tokens ≈ chars/4; only 65% of the window is given to context so the
/// question, instructions and output all fit.
pub fn context_char_ceiling(model: &str) -> usize {
    (context_window(model) as f64 * 4.0 * 0.65) as usize
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_profiles_match_matrix() {
        let quick = QueryMode::Quick.profile();
        assert_eq!(quick.base_limit, 150);
        assert_eq!(quick.max_output_tokens, 10_000);
        assert_eq!(quick.reasoning_effort, ReasoningEffort::Low);

        let dive = QueryMode::Dive.profile();
        assert_eq!(dive.base_limit, 1000);
        assert!((dive.target_coverage - 0.35).abs() < f64::EPSILON);

        let executive = QueryMode::Executive.profile();
        assert_eq!(executive.base_limit, 0);
        assert_eq!(executive.max_output_tokens, 8_000);
    }

    #[test]
    fn model_tables_default_and_large() {
        assert_eq!(context_window("small-local-model"), 128_000);
        assert_eq!(max_nodes("small-local-model"), 2500);
        assert_eq!(context_window("gpt-5.2"), 200_000);
        assert_eq!(max_nodes("claude-opus-x"), 4000);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Expert".parse::<QueryMode>().unwrap(), QueryMode::Expert);
        assert!("mystery".parse::<QueryMode>().is_err());
    }
}
