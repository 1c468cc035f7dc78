//! The offload pipeline: response interception end to end.
//!
//! Runs on every upstream tool completion:
//!
//! ```text
//! raw result → normalize (string re-parse, wrapper unwrap)
//!            → sample → analysis agent → extract paths
//!            → vault puts (arrays only) → merge envelope into residual
//! ```
//!
//! The returned string is what the LLM sees: either the original payload
//! re-serialized (no analyst configured, or the agent said keep it
//! inline), or the residual merged with the metadata envelope(s), where
//! `_offloaded: true` marks that bulk data moved to the vault.
//!
//! # Normalization order
//!
//! A string result is parsed as JSON first; the `{lc_serializable,
//! content}` wrapper envelope is then unwrapped, re-parsing a string
//! `content`. Payloads that fail either parse stay opaque strings.
//!
//! # Failure semantics
//!
//! Analysis failures propagate — there is no heuristic fallback, and no
//! vault write happens before analysis succeeds. Vault writes themselves
//! are sequential; a write that fails mid-sequence propagates too, and
//! any entries already written are simply collected by TTL expiry.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::analysis::{Analyst, BasicMeta, OffloadRecommendation, ToolContext};
use crate::error::{Result, VaultError};
use crate::models::Semantics;
use crate::paths;
use crate::sample::sample_payload;
use crate::store::{Provenance, VaultStore};

/// The response interceptor. One instance serves all principals; each
/// call is independent.
pub struct OffloadPipeline {
    store: Arc<VaultStore>,
    analyst: Option<Arc<dyn Analyst>>,
}

impl OffloadPipeline {
    /// Build a pipeline. Passing `None` for the analyst turns the
    /// pipeline into a passthrough, for tools that opt out of offloading.
    pub fn new(store: Arc<VaultStore>, analyst: Option<Arc<dyn Analyst>>) -> Self {
        Self { store, analyst }
    }

    /// Intercept one tool result.
    ///
    /// # Arguments
    ///
    /// * `owner_id` / `session_id` — identity and scope of the calling
    ///   principal; recorded on every vault entry.
    /// * `tool_name` / `tool_args` / `user_query` — provenance of the
    ///   result, forwarded to the analysis agent and the envelope.
    /// * `raw_result` — the tool's response, as produced upstream.
    ///
    /// # Returns
    ///
    /// The JSON string to hand back to the LLM.
    pub async fn process(
        &self,
        owner_id: &str,
        session_id: &str,
        tool_name: &str,
        tool_args: &Value,
        user_query: Option<&str>,
        raw_result: Value,
    ) -> Result<String> {
        let serialized = serde_json::to_string(&raw_result)?;
        debug!(
            tool = tool_name,
            bytes = serialized.len(),
            est_tokens = serialized.len() / 4,
            "intercepted tool result"
        );

        let payload = normalize(raw_result);

        let Some(analyst) = &self.analyst else {
            return Ok(serde_json::to_string(&payload)?);
        };

        let serialized_payload = serde_json::to_string(&payload)?;
        let samples = sample_payload(&serialized_payload);
        let context = ToolContext {
            tool_name: tool_name.to_string(),
            tool_args: tool_args.clone(),
            user_query: user_query.map(str::to_string),
        };
        let meta = BasicMeta {
            byte_size: serialized_payload.len(),
            estimated_tokens: serialized_payload.len() / 4,
            shape: shape_of(&payload),
        };

        let reply = analyst.analyze(&samples, &context, &meta).await?;

        if reply.offload_recommendation == OffloadRecommendation::KeepInline {
            debug!(tool = tool_name, "analysis says keep inline");
            return Ok(serde_json::to_string(&payload)?);
        }

        if reply.data_extraction_paths.is_empty() {
            return Err(VaultError::ValidationError(format!(
                "analysis recommended {:?} but declared no extraction paths",
                reply.offload_recommendation
            )));
        }

        let (extracted, residual) = paths::extract(
            &payload,
            &reply.data_extraction_paths,
            &reply.preserve_inline_paths,
        )?;

        let semantics = Semantics {
            description: reply.semantic_description.clone(),
            data_type: reply.data_type,
            suggested_visualizations: reply.visualization_suggestions.clone(),
            visualization_rationale: reply.visualization_rationale.clone(),
            quality_insights: reply.quality_insights.clone(),
            enhancements: reply.metadata_enhancements.clone(),
        };

        // Vault each extracted array; later envelopes overwrite earlier
        // keys in the accumulator. Non-arrays and empty arrays stay out
        // of the vault.
        let mut accumulator = Map::new();
        for (path, value) in extracted {
            let Some(rows) = value.as_array() else {
                debug!(tool = tool_name, path = %path, "extracted value is not an array; skipped");
                continue;
            };
            if rows.is_empty() {
                debug!(tool = tool_name, path = %path, "extracted array is empty; skipped");
                continue;
            }

            let (handle, envelope) = self
                .store
                .put(
                    rows.clone(),
                    owner_id,
                    session_id,
                    tool_name,
                    Some(Provenance {
                        tool_args: tool_args.clone(),
                        user_query: user_query.map(str::to_string),
                    }),
                    Some(semantics.clone()),
                )
                .await?;

            info!(tool = tool_name, path = %path, handle = %handle, rows = rows.len(), "offloaded");

            if let Value::Object(fields) = serde_json::to_value(&envelope)? {
                for (k, v) in fields {
                    accumulator.insert(k, v);
                }
            }
        }

        if accumulator.is_empty() {
            return Ok(serde_json::to_string(&residual)?);
        }

        // Residual first, envelope second, so the handle/token fields win
        // any key collision.
        let mut output = match residual {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (k, v) in accumulator {
            output.insert(k, v);
        }
        Ok(serde_json::to_string(&Value::Object(output))?)
    }
}

/// Steps 2–3: re-parse string results and unwrap the serialization
/// envelope some upstream frameworks add around tool content.
fn normalize(raw: Value) -> Value {
    let parsed = match raw {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v) => v,
            Err(_) => Value::String(s),
        },
        other => other,
    };

    match parsed {
        Value::Object(mut map)
            if map.contains_key("lc_serializable") && map.contains_key("content") =>
        {
            match map.remove("content").expect("checked above") {
                Value::String(s) => match serde_json::from_str::<Value>(&s) {
                    Ok(v) => v,
                    Err(_) => Value::String(s),
                },
                other => other,
            }
        }
        other => other,
    }
}

/// One-line payload shape description for the analysis prompt.
fn shape_of(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("array of {} items", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(8).map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        Value::String(_) => "string".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Null => "null".to_string(),
    }
}
