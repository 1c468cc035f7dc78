//! Analysis agent: an external LLM that decides what to offload.
//!
//! The agent receives strategic samples of a tool payload plus the tool
//! context and answers with a strict JSON object declaring which dot
//! paths hold the bulk data, which paths should stay inline, and how the
//! dataset should be described and visualized downstream.
//!
//! # Reply contract
//!
//! Required fields: `semanticDescription`, `offloadRecommendation`,
//! `dataExtractionPaths`, `preserveInlinePaths`. Everything else is
//! optional and defaulted. Before parsing, the reply is unwrapped from a
//! fenced code block if present, and `//` line comments and trailing
//! commas are stripped (LLMs emit all three despite instructions); the
//! stripping is string-aware so a `"https://..."` value survives intact.
//!
//! # Failure semantics
//!
//! Any failure — HTTP error, deadline, malformed JSON, missing required
//! field — is an [`AnalysisFailure`](crate::error::VaultError::AnalysisFailure).
//! The pipeline never falls back to heuristic extraction; retrying is the
//! upstream caller's call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::AnalysisConfig;
use crate::error::{Result, VaultError};
use crate::models::DataKind;
use crate::sample::SamplePack;

/// What the agent recommends doing with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadRecommendation {
    /// The whole payload is bulk data.
    OffloadAll,
    /// One or more array paths are bulk data; the rest stays inline.
    OffloadArray,
    /// Small or context-critical payload: leave it in the conversation.
    KeepInline,
    /// The data should be aggregated before a human sees it.
    AggregateFirst,
}

/// The agent's structured reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReply {
    pub semantic_description: String,
    #[serde(default)]
    pub data_type: DataKind,
    pub offload_recommendation: OffloadRecommendation,
    #[serde(default)]
    pub offload_reason: Option<String>,
    #[serde(default)]
    pub visualization_suggestions: Vec<String>,
    #[serde(default)]
    pub visualization_rationale: Option<String>,
    #[serde(default)]
    pub quality_insights: Vec<String>,
    #[serde(default)]
    pub metadata_enhancements: Value,
    pub data_extraction_paths: Vec<String>,
    pub preserve_inline_paths: Vec<String>,
}

/// Tool call context forwarded to the agent.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_name: String,
    pub tool_args: Value,
    pub user_query: Option<String>,
}

/// Cheap facts about the payload, computed before analysis.
#[derive(Debug, Clone)]
pub struct BasicMeta {
    pub byte_size: usize,
    pub estimated_tokens: usize,
    /// One-line shape description, e.g. `array of 200 items`.
    pub shape: String,
}

/// An analysis agent. Implemented by [`LlmAnalyst`] in production and by
/// scripted stubs in tests.
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(
        &self,
        samples: &SamplePack,
        context: &ToolContext,
        meta: &BasicMeta,
    ) -> Result<AnalysisReply>;
}

// ============ Reply cleaning & parsing ============

/// Unwrap a fenced code block, if the reply is wrapped in one.
fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    // Drop the opening fence line (which may carry a language tag) and
    // the closing fence.
    let body = match trimmed.find('\n') {
        Some(nl) => &trimmed[nl + 1..],
        None => return trimmed,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Strip `//` line comments and trailing commas, tracking string state so
/// slashes and commas inside JSON strings are untouched.
fn strip_json_noise(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ',' => {
                let mut lookahead = chars.clone();
                let next_significant = loop {
                    match lookahead.next() {
                        Some(n) if n.is_whitespace() => continue,
                        other => break other,
                    }
                };
                if !matches!(next_significant, Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse an agent reply into an [`AnalysisReply`].
///
/// # Errors
///
/// `AnalysisFailure` on malformed JSON or a missing required field.
pub fn parse_reply(reply: &str) -> Result<AnalysisReply> {
    let cleaned = strip_json_noise(strip_fence(reply));
    serde_json::from_str(&cleaned)
        .map_err(|e| VaultError::AnalysisFailure(format!("malformed analysis reply: {e}")))
}

// ============ LLM-backed analyst ============

const SYSTEM_PROMPT: &str = "You are a data analyst embedded in a tool pipeline. You are shown \
samples of a tool result and must reply with a single JSON object and nothing else: no prose, \
no markdown fences. Fields: semanticDescription (string), dataType (one of timeseries, tabular, \
hierarchical, geospatial, text, mixed), offloadRecommendation (one of offload_all, \
offload_array, keep_inline, aggregate_first), offloadReason (string), visualizationSuggestions \
(string array), visualizationRationale (string), qualityInsights (string array), \
metadataEnhancements (object), dataExtractionPaths (dot-path string array addressing the bulk \
record arrays; use \"\" for the whole payload), preserveInlinePaths (dot-path string array for \
the small fields the conversation still needs).";

/// Analysis agent backed by an OpenAI-compatible chat-completions API.
///
/// Uses the `OPENAI_API_KEY` environment variable; the request deadline
/// and retry count come from [`AnalysisConfig`]. Only 429 and 5xx
/// responses are retried, with exponential backoff; other client errors
/// fail immediately.
pub struct LlmAnalyst {
    config: AnalysisConfig,
    client: reqwest::Client,
    api_key: String,
}

impl LlmAnalyst {
    /// Build the analyst from configuration.
    ///
    /// # Errors
    ///
    /// `ValidationError` when `OPENAI_API_KEY` is not set.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            VaultError::ValidationError("OPENAI_API_KEY environment variable not set".into())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VaultError::AnalysisFailure(format!("http client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
            api_key,
        })
    }

    fn user_prompt(samples: &SamplePack, context: &ToolContext, meta: &BasicMeta) -> String {
        let mut prompt = format!(
            "Tool: {}\nArguments: {}\nUser query: {}\nPayload: {} ({} bytes, ~{} tokens)\n\n",
            context.tool_name,
            context.tool_args,
            context.user_query.as_deref().unwrap_or("(none)"),
            meta.shape,
            meta.byte_size,
            meta.estimated_tokens,
        );
        prompt.push_str("--- sample: start ---\n");
        prompt.push_str(&samples.first);
        for (i, slice) in samples.middle.iter().enumerate() {
            prompt.push_str(&format!("\n--- sample: interior {} ---\n", i + 1));
            prompt.push_str(slice);
        }
        if !samples.last.is_empty() {
            prompt.push_str("\n--- sample: end ---\n");
            prompt.push_str(&samples.last);
        }
        prompt
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    async fn analyze(
        &self,
        samples: &SamplePack,
        context: &ToolContext,
        meta: &BasicMeta,
    ) -> Result<AnalysisReply> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::user_prompt(samples, context, meta) },
            ],
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await.map_err(|e| {
                            VaultError::AnalysisFailure(format!("unreadable reply: {e}"))
                        })?;
                        let content = json["choices"][0]["message"]["content"]
                            .as_str()
                            .ok_or_else(|| {
                                VaultError::AnalysisFailure(
                                    "reply missing choices[0].message.content".into(),
                                )
                            })?;
                        return parse_reply(content);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(VaultError::AnalysisFailure(format!(
                            "analysis API error {status}: {text}"
                        )));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(VaultError::AnalysisFailure(format!(
                        "analysis API error {status}: {text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(VaultError::AnalysisFailure(format!(
                        "analysis request failed: {e}"
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| VaultError::AnalysisFailure("analysis retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "semanticDescription": "payments by day",
        "offloadRecommendation": "offload_array",
        "dataExtractionPaths": ["data.rows"],
        "preserveInlinePaths": ["status"]
    }"#;

    #[test]
    fn test_parse_minimal_reply() {
        let reply = parse_reply(MINIMAL).unwrap();
        assert_eq!(reply.semantic_description, "payments by day");
        assert_eq!(reply.offload_recommendation, OffloadRecommendation::OffloadArray);
        assert_eq!(reply.data_extraction_paths, vec!["data.rows"]);
        assert_eq!(reply.data_type, DataKind::Mixed); // defaulted
        assert!(reply.visualization_suggestions.is_empty());
    }

    #[test]
    fn test_parse_fenced_reply() {
        let fenced = format!("```json\n{MINIMAL}\n```");
        assert!(parse_reply(&fenced).is_ok());
    }

    #[test]
    fn test_parse_strips_comments_and_trailing_commas() {
        let noisy = r#"{
            // the big array lives under data.rows
            "semanticDescription": "rows",
            "offloadRecommendation": "offload_array",
            "dataExtractionPaths": ["data.rows",],
            "preserveInlinePaths": [],
        }"#;
        let reply = parse_reply(noisy).unwrap();
        assert_eq!(reply.data_extraction_paths, vec!["data.rows"]);
    }

    #[test]
    fn test_parse_preserves_slashes_and_commas_in_strings() {
        let reply = r#"{
            "semanticDescription": "see https://example.com/a//b, then act",
            "offloadRecommendation": "keep_inline",
            "dataExtractionPaths": [],
            "preserveInlinePaths": []
        }"#;
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(
            parsed.semantic_description,
            "see https://example.com/a//b, then act"
        );
    }

    #[test]
    fn test_parse_missing_required_field_fails() {
        let missing = r#"{
            "semanticDescription": "rows",
            "offloadRecommendation": "offload_array",
            "preserveInlinePaths": []
        }"#;
        let err = parse_reply(missing).unwrap_err();
        assert!(matches!(err, VaultError::AnalysisFailure(_)));
    }

    #[test]
    fn test_parse_unknown_recommendation_fails() {
        let bad = r#"{
            "semanticDescription": "rows",
            "offloadRecommendation": "shrug",
            "dataExtractionPaths": [],
            "preserveInlinePaths": []
        }"#;
        assert!(parse_reply(bad).is_err());
    }
}
