//! Shared retry and parse machinery for concrete backends.
//!
//! Two nested retry loops, per the protocol contract:
//!
//! - transport: one retry after a short fixed delay, then `LMError`;
//! - parse/validation: one retry with the validator message as a correction
//!   hint, then `FillError` (or `LMError` for an unparseable choice).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use nodeflow_core::{validate_filled, Chosen, EngineError, NodeDescriptor, Result};
use serde_json::{Map, Value};
use tracing::warn;

pub(crate) const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);
const CORRECTION_HINT_MAX: usize = 200;
const PARSE_ATTEMPTS: u32 = 2;

/// Run one transport call with the fixed-delay single retry.
pub(crate) async fn with_transport_retry<F, Fut>(op: F) -> Result<String>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    match op().await {
        Ok(text) => Ok(text),
        Err(first) => {
            warn!(error = %first, "backend transport failed, retrying once");
            tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
            op().await.map_err(|second| EngineError::lm(second, 2))
        }
    }
}

/// Drive a `fill` through transport and validation retries. `transport`
/// receives the correction hint for the second attempt.
pub(crate) async fn fill_via<F, Fut>(
    target: &Arc<NodeDescriptor>,
    transport: F,
) -> Result<Map<String, Value>>
where
    F: Fn(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    let mut parse_errors: Vec<String> = Vec::new();
    let mut hint: Option<String> = None;
    for _ in 0..PARSE_ATTEMPTS {
        let text = with_transport_retry(|| transport(hint.clone())).await?;
        match extract_json(&text).and_then(|raw| validate_filled(target, &raw)) {
            Ok(fields) => return Ok(fields),
            Err(message) => {
                warn!(target = %target.name, error = %message, "fill output failed validation");
                hint = Some(truncate_hint(&message));
                parse_errors.push(message);
            }
        }
    }
    Err(EngineError::fill(&target.name, parse_errors, PARSE_ATTEMPTS))
}

/// Drive a `choose_type` through transport and validation retries.
pub(crate) async fn choose_via<F, Fut>(
    candidates: &[Arc<NodeDescriptor>],
    allows_end: bool,
    transport: F,
) -> Result<Chosen>
where
    F: Fn(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    let mut hint: Option<String> = None;
    let mut last_error = String::new();
    for _ in 0..PARSE_ATTEMPTS {
        let text = with_transport_retry(|| transport(hint.clone())).await?;
        match parse_choice(&text, candidates, allows_end) {
            Ok(chosen) => return Ok(chosen),
            Err(message) => {
                warn!(error = %message, "choice failed validation");
                hint = Some(truncate_hint(&message));
                last_error = message;
            }
        }
    }
    Err(EngineError::lm(
        anyhow!("backend failed to choose a successor: {}", last_error),
        PARSE_ATTEMPTS,
    ))
}

/// Pull the first JSON object out of a model response, tolerating code
/// fences and surrounding prose.
pub(crate) fn extract_json(text: &str) -> std::result::Result<Value, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let start = trimmed
        .find('{')
        .ok_or_else(|| format!("no JSON object in response: {}", truncate_hint(trimmed)))?;
    let end = trimmed
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| format!("unterminated JSON object: {}", truncate_hint(trimmed)))?;
    serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| format!("invalid JSON in response: {}", e))
}

fn parse_choice(
    text: &str,
    candidates: &[Arc<NodeDescriptor>],
    allows_end: bool,
) -> std::result::Result<Chosen, String> {
    let name = match extract_json(text) {
        Ok(Value::Object(map)) => map
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "response object has no 'type' key".to_string())?,
        Ok(Value::String(name)) => name,
        _ => text.trim().to_string(),
    };

    if name == "__end__" {
        return if allows_end {
            Ok(Chosen::End)
        } else {
            Err("'__end__' is not allowed for this union".to_string())
        };
    }
    candidates
        .iter()
        .find(|c| c.name == name)
        .map(|c| Chosen::Node(Arc::clone(c)))
        .ok_or_else(|| {
            format!(
                "'{}' is not a candidate (expected one of: {})",
                name,
                candidates
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
}

fn truncate_hint(message: &str) -> String {
    message.chars().take(CORRECTION_HINT_MAX).collect()
}
