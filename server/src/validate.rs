//! AI code review and repair

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use walkdir::WalkDir;

use crate::errors::DeployError;
use crate::models::{DeploymentMode, ValidationReport};
use crate::storage::settings::AiSettings;

/// Reviews an extracted project tree before deployment. Implementations
/// never fail the pipeline: errors degrade to a passing report.
#[async_trait]
pub trait ValidationAdapter: Send + Sync {
    async fn inspect(
        &self,
        source_root: &Path,
        mode: DeploymentMode,
        base_path: Option<&str>,
    ) -> ValidationReport;
}

/// Per-file ceiling for source sent to a reviewer
const MAX_FILE_BYTES: u64 = 256 * 1024;

/// Total ceiling across all collected files
const MAX_TOTAL_BYTES: u64 = 400 * 1024;

/// Directories never sent for review
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    ".git",
    ".next",
    ".cache",
    "coverage",
    "__MACOSX",
];

/// Extensions worth reviewing
const REVIEW_EXTENSIONS: &[&str] = &[
    "html", "htm", "css", "js", "mjs", "cjs", "jsx", "ts", "tsx", "vue", "svelte", "json", "svg",
    "md", "txt",
];

/// Retries after the first attempt, with 2s, 4s, 8s backoff
const MAX_RETRIES: u32 = 3;

/// Reviews an extracted project with an AI model and applies the returned
/// full-file fixes. Designed to degrade rather than fail: any error in
/// collection, transport, or parsing yields a passing report so the pipeline
/// continues.
#[derive(Debug, Clone)]
pub struct CodeValidationAdapter {
    http: reqwest::Client,
    settings: AiSettings,
}

impl CodeValidationAdapter {
    pub fn new(settings: AiSettings) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self { http, settings })
    }

    async fn call_with_fallback(&self, prompt: &str) -> Result<String, DeployError> {
        if !self.settings.primary_api_key.is_empty() {
            match self.call_primary(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    tracing::warn!("Primary reviewer failed, trying fallback: {}", e);
                }
            }
        }

        if !self.settings.fallback_api_key.is_empty() {
            return self.call_fallback(prompt).await;
        }

        Err(DeployError::ValidationError(
            "primary reviewer failed and no fallback is configured".to_string(),
        ))
    }
}

#[async_trait]
impl ValidationAdapter for CodeValidationAdapter {
    /// Collect source, ask the reviewers, parse defensively. Never fatal.
    async fn inspect(
        &self,
        source_root: &Path,
        mode: DeploymentMode,
        base_path: Option<&str>,
    ) -> ValidationReport {
        if !self.settings.enabled {
            return ValidationReport::pass_through("AI review disabled in settings");
        }
        if self.settings.primary_api_key.is_empty() && self.settings.fallback_api_key.is_empty() {
            return ValidationReport::pass_through("No reviewer API key configured");
        }

        let files = match collect_source_files(source_root).await {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => {
                return ValidationReport::pass_through("No reviewable source files found");
            }
            Err(e) => {
                tracing::warn!("Source collection failed, skipping review: {}", e);
                return ValidationReport::pass_through(format!(
                    "Source collection failed: {}",
                    e
                ));
            }
        };

        let prompt = build_prompt(&files, mode, base_path);

        let raw = match self.call_with_fallback(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("All reviewers unavailable: {}", e);
                return ValidationReport::pass_through(format!("Reviewers unavailable: {}", e));
            }
        };

        parse_reviewer_output(&raw)
    }
}

/// Write a report's full-file replacements into the project tree. Returns
/// the number of files rewritten. Paths that escape the project root are
/// refused and counted as skipped.
pub async fn apply_fixes(
    source_root: &Path,
    report: &ValidationReport,
) -> Result<usize, DeployError> {
    let mut applied = 0;
    for (rel_path, contents) in &report.fixes {
        if !is_safe_relative_path(rel_path) {
            tracing::warn!("Refusing fix outside the project tree: {}", rel_path);
            continue;
        }
        let target = source_root.join(rel_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, contents).await?;
        applied += 1;
    }
    Ok(applied)
}

impl CodeValidationAdapter {
    /// Anthropic-style messages API
    async fn call_primary(&self, prompt: &str) -> Result<String, DeployError> {
        let url = format!(
            "{}/v1/messages",
            self.settings.primary_base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.settings.primary_model,
            "max_tokens": 8192,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .request_with_retries(|| {
                self.http
                    .post(&url)
                    .header("x-api-key", &self.settings.primary_api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
            })
            .await?;

        response["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                DeployError::ValidationError("primary reviewer returned no text".to_string())
            })
    }

    /// OpenAI-compatible chat completions
    async fn call_fallback(&self, prompt: &str) -> Result<String, DeployError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.fallback_base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.settings.fallback_model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .request_with_retries(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&self.settings.fallback_api_key)
                    .json(&body)
            })
            .await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                DeployError::ValidationError("fallback reviewer returned no text".to_string())
            })
    }

    /// Retries 429/5xx/connect errors with 2s, 4s, 8s backoff
    async fn request_with_retries<F>(&self, make: F) -> Result<serde_json::Value, DeployError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << attempt);
                tokio::time::sleep(backoff).await;
            }

            match make().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = format!("reviewer returned {}", status);
                        tracing::warn!(
                            "Reviewer attempt {} of {} failed: {}",
                            attempt + 1,
                            MAX_RETRIES + 1,
                            last_error
                        );
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(DeployError::ValidationError(format!(
                        "reviewer rejected the request ({}): {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "Reviewer attempt {} of {} failed: {}",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        last_error
                    );
                }
            }
        }
        Err(DeployError::ValidationError(format!(
            "reviewer failed after {} attempts: {}",
            MAX_RETRIES + 1, last_error
        )))
    }
}

/// Relative path with no parent components, no root, no drive prefix
fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    }) && path.components().count() > 0
}

/// Collect reviewable files under the size caps, smallest paths first for a
/// deterministic prompt.
async fn collect_source_files(source_root: &Path) -> Result<Vec<(String, String)>, DeployError> {
    let root = source_root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_source_files_blocking(&root))
        .await
        .map_err(|e| DeployError::ValidationError(format!("collection task failed: {}", e)))??;
    Ok(files)
}

fn collect_source_files_blocking(
    source_root: &Path,
) -> Result<Vec<(String, String)>, DeployError> {
    let mut files = Vec::new();

    let walker = WalkDir::new(source_root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(e.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
    });

    for entry in walker {
        let entry = entry.map_err(|e| DeployError::ValidationError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !REVIEW_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        if size > MAX_FILE_BYTES {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        files.push((rel, entry.path().to_path_buf(), size));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut collected = Vec::new();
    let mut total: u64 = 0;
    for (rel, path, size) in files {
        if total + size > MAX_TOTAL_BYTES {
            break;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                total += size;
                collected.push((rel, contents));
            }
            // Binary file with a text extension, skip it.
            Err(_) => continue,
        }
    }

    Ok(collected)
}

fn build_prompt(files: &[(String, String)], mode: DeploymentMode, base_path: Option<&str>) -> String {
    let mut prompt = String::with_capacity(MAX_TOTAL_BYTES as usize + 2048);
    prompt.push_str(
        "You are reviewing a website project before deployment. Check for broken \
         asset references, absolute paths that will not resolve under the serving \
         prefix, missing files, and obvious runtime errors.\n\n",
    );
    prompt.push_str(&format!("Hosting mode: {}\n", mode));
    if let Some(base) = base_path {
        prompt.push_str(&format!(
            "The site is served under the path prefix {:?}; root-relative URLs must \
             account for it.\n",
            base
        ));
    }
    prompt.push_str(
        "\nRespond with JSON only, no prose: \
         {\"pass\": bool, \"summary\": string, \"fixes\": {\"relative/path\": \"full replacement file contents\"}}. \
         Each fix is the complete new contents of that file. Use an empty fixes \
         object when nothing needs changing.\n\n",
    );
    for (rel, contents) in files {
        prompt.push_str(&format!("===== {} =====\n{}\n\n", rel, contents));
    }
    prompt
}

/// Parse a reviewer's output. Fenced JSON is unwrapped; anything unparseable
/// degrades to a pass with a summary saying so, not a silent approval.
pub fn parse_reviewer_output(raw: &str) -> ValidationReport {
    let trimmed = strip_markdown_fences(raw);

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => {
            let pass = value.get("pass").and_then(|v| v.as_bool()).unwrap_or(true);
            let summary = value
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("Reviewer returned no summary")
                .to_string();
            let fixes = value
                .get("fixes")
                .and_then(|v| v.as_object())
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default();
            ValidationReport { pass, summary, fixes }
        }
        Err(_) => ValidationReport::pass_through("Reviewer returned unparseable output"),
    }
}

fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_report() {
        let report = parse_reviewer_output(
            r#"{"pass": false, "summary": "broken link", "fixes": {"index.html": "<html></html>"}}"#,
        );
        assert!(!report.pass);
        assert_eq!(report.summary, "broken link");
        assert_eq!(report.fixes["index.html"], "<html></html>");
    }

    #[test]
    fn strips_markdown_fences() {
        let report = parse_reviewer_output(
            "```json\n{\"pass\": true, \"summary\": \"looks fine\", \"fixes\": {}}\n```",
        );
        assert!(report.pass);
        assert_eq!(report.summary, "looks fine");
    }

    #[test]
    fn malformed_output_degrades_to_pass_with_distinct_summary() {
        let report = parse_reviewer_output("I could not produce JSON, sorry.");
        assert!(report.pass);
        assert!(report.fixes.is_empty());
        assert_eq!(report.summary, "Reviewer returned unparseable output");
    }

    #[test]
    fn rejects_escaping_fix_paths() {
        assert!(is_safe_relative_path("src/app.js"));
        assert!(is_safe_relative_path("index.html"));
        assert!(!is_safe_relative_path("../outside.txt"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("a/../../b"));
        assert!(!is_safe_relative_path(""));
    }

    #[tokio::test]
    async fn apply_fixes_skips_unsafe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixes = BTreeMap::new();
        fixes.insert("index.html".to_string(), "<h1>fixed</h1>".to_string());
        fixes.insert("../escape.txt".to_string(), "nope".to_string());
        let report = ValidationReport {
            pass: false,
            summary: "fixes".to_string(),
            fixes,
        };

        let applied = apply_fixes(dir.path(), &report).await.unwrap();
        assert_eq!(applied, 1);
        assert!(dir.path().join("index.html").exists());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn collection_respects_skip_dirs_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("node_modules/pkg"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("node_modules/pkg/index.js"), ";")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("index.html"), "<h1>hi</h1>")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("photo.png"), [0u8; 16])
            .await
            .unwrap();

        let files = collect_source_files(dir.path()).await.unwrap();
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["index.html"]);
    }

    #[tokio::test]
    async fn disabled_settings_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CodeValidationAdapter::new(AiSettings {
            enabled: false,
            ..AiSettings::default()
        })
        .unwrap();
        let report = adapter
            .inspect(dir.path(), DeploymentMode::PathShared, None)
            .await;
        assert!(report.pass);
        assert!(report.fixes.is_empty());
    }
}
