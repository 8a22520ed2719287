//! Pattern-based intent classification over the user query, plus extraction
//! of complete-file artifacts from the LLM answer.
//!
//! Detection is pure; acting on detected intents that need an agent runtime
//! (spawning agents, creating goals) requires the optional collaborator
//! wired into the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    CreateFile,
    WriteFile,
    ReadFullFile,
    SpawnAgent,
    CreateGoal,
    ExportData,
    GenerateCode,
    AnalyzeFiles,
    ListFiles,
}

impl ActionKind {
    /// Intents that need the external agent runtime to act.
    pub fn needs_runtime(self) -> bool {
        matches!(self, Self::SpawnAgent | Self::CreateGoal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLanguage {
    Html,
    Python,
    Js,
    Json,
    Css,
    Markdown,
    Svg,
    Yaml,
    Text,
}

impl ArtifactLanguage {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Python => "py",
            Self::Js => "js",
            Self::Json => "json",
            Self::Css => "css",
            Self::Markdown => "md",
            Self::Svg => "svg",
            Self::Yaml => "yaml",
            Self::Text => "txt",
        }
    }

    /// Landing-zone category under `outputs/`.
    pub fn category(self) -> &'static str {
        match self {
            Self::Html | Self::Css | Self::Svg => "web-assets",
            Self::Python | Self::Js => "code-snippets",
            _ => "document-creation",
        }
    }

    fn from_fence_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "html" => Some(Self::Html),
            "python" | "py" => Some(Self::Python),
            "javascript" | "js" => Some(Self::Js),
            "json" => Some(Self::Json),
            "css" => Some(Self::Css),
            "markdown" | "md" => Some(Self::Markdown),
            "svg" | "xml" => Some(Self::Svg),
            "yaml" | "yml" => Some(Self::Yaml),
            "text" | "txt" | "" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedAction {
    pub action: ActionKind,
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_language: Option<ArtifactLanguage>,
}

macro_rules! action_re {
    ($name:ident, $pattern:literal) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static pattern compiles"))
        }
    };
}

action_re!(create_file_re, r"(?i)\b(create|make|build|write)\b.*\b(file|page|document|script)\b");
action_re!(write_file_re, r"(?i)\bsave\b.*\b(to|as)\b.*\bfile\b");
action_re!(read_full_re, r"(?i)\b(read|show|display)\b.*\b(full|entire|whole)\b.*\bfile\b");
action_re!(spawn_agent_re, r"(?i)\b(spawn|launch|start)\b.*\bagent\b");
action_re!(create_goal_re, r"(?i)\b(create|add|set)\b.*\bgoal\b");
action_re!(export_re, r"(?i)\bexport\b.*\b(data|nodes|memories|graph)\b");
action_re!(generate_code_re, r"(?i)\b(generate|write)\b.*\bcode\b");
action_re!(analyze_files_re, r"(?i)\banaly[sz]e\b.*\bfiles?\b");
action_re!(list_files_re, r"(?i)\b(list|enumerate)\b.*\b(files|outputs|artifacts)\b");

/// Classify the query. First matching pattern wins; `None` for plain
/// retrieval questions.
pub fn detect_action(query: &str) -> Option<DetectedAction> {
    let action = if create_file_re().is_match(query) {
        ActionKind::CreateFile
    } else if write_file_re().is_match(query) {
        ActionKind::WriteFile
    } else if read_full_re().is_match(query) {
        ActionKind::ReadFullFile
    } else if spawn_agent_re().is_match(query) {
        ActionKind::SpawnAgent
    } else if create_goal_re().is_match(query) {
        ActionKind::CreateGoal
    } else if export_re().is_match(query) {
        ActionKind::ExportData
    } else if generate_code_re().is_match(query) {
        ActionKind::GenerateCode
    } else if analyze_files_re().is_match(query) {
        ActionKind::AnalyzeFiles
    } else if list_files_re().is_match(query) {
        ActionKind::ListFiles
    } else {
        return None;
    };

    let expected_language = (action == ActionKind::CreateFile)
        .then(|| infer_language(query))
        .flatten();
    Some(DetectedAction { action, detected: true, expected_language })
}

fn infer_language(query: &str) -> Option<ArtifactLanguage> {
    let lower = query.to_lowercase();
    let table: &[(&str, ArtifactLanguage)] = &[
        ("html", ArtifactLanguage::Html),
        ("web page", ArtifactLanguage::Html),
        ("python", ArtifactLanguage::Python),
        ("javascript", ArtifactLanguage::Js),
        (" js ", ArtifactLanguage::Js),
        ("json", ArtifactLanguage::Json),
        ("css", ArtifactLanguage::Css),
        ("stylesheet", ArtifactLanguage::Css),
        ("markdown", ArtifactLanguage::Markdown),
        ("svg", ArtifactLanguage::Svg),
        ("yaml", ArtifactLanguage::Yaml),
    ];
    table
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, lang)| *lang)
        .or(Some(ArtifactLanguage::Text))
}

// ── artifact extraction ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Artifact {
    pub language: ArtifactLanguage,
    pub content: String,
}

const MIN_ARTIFACT_CHARS: usize = 50;
/// Languages without a structural marker must be substantial to count as a
/// complete file rather than an inline snippet.
const MIN_UNSTRUCTURED_CHARS: usize = 200;

/// Pull complete-file artifacts out of fenced code blocks, largest first.
pub fn extract_artifacts(answer: &str) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    let mut rest = answer;

    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(label_end) = after_open.find('\n') else { break };
        let label = &after_open[..label_end];
        let body_start = label_end + 1;
        let Some(close) = after_open[body_start..].find("```") else { break };
        let body = after_open[body_start..body_start + close].trim();

        if let Some(language) = ArtifactLanguage::from_fence_label(label) {
            if body.chars().count() >= MIN_ARTIFACT_CHARS && is_complete_file(language, body) {
                artifacts.push(Artifact { language, content: body.to_string() });
            }
        }
        rest = &after_open[body_start + close + 3..];
    }

    artifacts.sort_by(|a, b| b.content.len().cmp(&a.content.len()));
    artifacts
}

fn is_complete_file(language: ArtifactLanguage, body: &str) -> bool {
    match language {
        ArtifactLanguage::Html => body.contains("<!DOCTYPE") || body.contains("<html"),
        ArtifactLanguage::Json => serde_json::from_str::<serde_json::Value>(body).is_ok(),
        ArtifactLanguage::Svg => body.contains("<svg"),
        ArtifactLanguage::Css => body.contains('{') && body.contains('}'),
        _ => body.chars().count() > MIN_UNSTRUCTURED_CHARS,
    }
}

// ── artifact landing zone ─────────────────────────────────────────────────────

/// Writes extracted artifacts under
/// `outputs/<category>/query_<ts>/artifact_<n>.<ext>` plus a manifest.
pub struct ArtifactWriter {
    outputs_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    file: String,
    language: ArtifactLanguage,
    bytes: usize,
}

impl ArtifactWriter {
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Self {
        Self { outputs_dir: outputs_dir.into() }
    }

    pub async fn write(&self, artifacts: &[Artifact]) -> anyhow::Result<Vec<PathBuf>> {
        self.write_stamped(artifacts, &Utc::now().format("%Y%m%dT%H%M%S%3f").to_string())
            .await
    }

    pub async fn write_stamped(
        &self,
        artifacts: &[Artifact],
        stamp: &str,
    ) -> anyhow::Result<Vec<PathBuf>> {
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        let mut manifest: Vec<ManifestEntry> = Vec::new();
        for (index, artifact) in artifacts.iter().enumerate() {
            let dir = self
                .outputs_dir
                .join(artifact.language.category())
                .join(format!("query_{stamp}"));
            tokio::fs::create_dir_all(&dir).await?;
            let filename =
                format!("artifact_{index}.{}", artifact.language.extension());
            let path = dir.join(&filename);
            tokio::fs::write(&path, &artifact.content).await?;
            manifest.push(ManifestEntry {
                file: relative_display(&path, &self.outputs_dir),
                language: artifact.language,
                bytes: artifact.content.len(),
            });
            written.push(path);
        }

        let manifest_dir = self.outputs_dir.join("manifests");
        tokio::fs::create_dir_all(&manifest_dir).await?;
        let manifest_path = manifest_dir.join(format!("query_{stamp}.json"));
        tokio::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?).await?;

        debug!(count = written.len(), "artifacts written");
        Ok(written)
    }
}

fn relative_display(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_create_file_with_language() {
        let detected = detect_action("please create an html page about the findings").unwrap();
        assert_eq!(detected.action, ActionKind::CreateFile);
        assert_eq!(detected.expected_language, Some(ArtifactLanguage::Html));
    }

    #[test]
    fn detects_runtime_actions() {
        let spawn = detect_action("spawn a research agent for this").unwrap();
        assert_eq!(spawn.action, ActionKind::SpawnAgent);
        assert!(spawn.action.needs_runtime());

        let goal = detect_action("set a goal to track latency").unwrap();
        assert_eq!(goal.action, ActionKind::CreateGoal);
    }

    #[test]
    fn plain_questions_detect_nothing() {
        assert!(detect_action("what did we learn about caching?").is_none());
    }

    #[test]
    fn extracts_complete_html_but_not_fragments() {
        let answer = format!(
            "Here you go:\n```html\n<!DOCTYPE html><html><body>{}</body></html>\n```\n\
             And a fragment:\n```html\n<div>too partial but long enough {}</div>\n```",
            "content ".repeat(20),
            "x".repeat(60),
        );
        let artifacts = extract_artifacts(&answer);
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].content.contains("<!DOCTYPE"));
    }

    #[test]
    fn json_must_parse_to_count() {
        let answer = format!(
            "```json\n{{\"ok\": true, \"data\": \"{}\"}}\n```\n```json\n{{broken: {}}}\n```",
            "v".repeat(60),
            "y".repeat(60),
        );
        let artifacts = extract_artifacts(&answer);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].language, ArtifactLanguage::Json);
    }

    #[test]
    fn largest_artifact_first() {
        let answer = format!(
            "```python\n{}\n```\n```python\n{}\n```",
            "print('small')\n".repeat(20),
            "print('large')\n".repeat(60),
        );
        let artifacts = extract_artifacts(&answer);
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts[0].content.len() > artifacts[1].content.len());
    }

    #[tokio::test]
    async fn writer_places_artifacts_by_category_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let artifacts = vec![
            Artifact {
                language: ArtifactLanguage::Html,
                content: "<!DOCTYPE html><html></html>".to_string(),
            },
            Artifact {
                language: ArtifactLanguage::Python,
                content: "print('hello')".to_string(),
            },
        ];

        let written = writer.write_stamped(&artifacts, "20260101T000000000").await.unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].starts_with(dir.path().join("web-assets")));
        assert!(written[1].starts_with(dir.path().join("code-snippets")));

        let manifest = dir
            .path()
            .join("manifests/query_20260101T000000000.json");
        let raw = std::fs::read_to_string(manifest).unwrap();
        assert!(raw.contains("artifact_0.html"));
    }
}
