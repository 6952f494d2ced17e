//! Turns a matched rule's action into what the adapter should deliver.

use crate::config::EngineSettings;
use crate::error::TransportError;
use crate::metrics;
use crate::reporter::{deliver_diagnostic, ActivityReporter, DiagnosticKind, RuleDiagnostic};
use crate::response::{ResponseBuilder, SyntheticResponse};
use crate::rule::{Action, Patch, PatchAction, Rule};
use crate::transport::FetchResponse;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Deliver this response instead of the network's
    Respond(SyntheticResponse),
    /// Forward the original call with its original arguments
    PassThrough,
    /// Patch could not be applied; deliver the real response as received
    Unmodified {
        response: FetchResponse,
        reason: String,
    },
}

pub async fn apply_delay(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Execute an action.
///
/// `upstream` performs the real call and is only invoked for `patch`
/// actions. The action's delay always elapses before the response is built.
pub async fn execute<F, Fut>(action: &Action, upstream: F) -> Result<Outcome, TransportError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse, TransportError>>,
{
    apply_delay(action.delay_ms()).await;

    match action {
        Action::Delay(_) => Ok(Outcome::PassThrough),
        Action::Replace(synthetic) | Action::Status(synthetic) => {
            Ok(Outcome::Respond(SyntheticResponse::from_action(synthetic)))
        }
        Action::Patch(patch) => {
            let started = Instant::now();
            let real = upstream().await?;
            metrics::record_upstream_duration(
                real.status,
                started.elapsed().as_secs_f64() * 1000.0,
            );
            Ok(patch_response(patch, real))
        }
    }
}

fn patch_response(action: &PatchAction, real: FetchResponse) -> Outcome {
    let original: Value = match serde_json::from_slice(&real.body) {
        Ok(value) => value,
        Err(e) => {
            return Outcome::Unmodified {
                response: real,
                reason: format!("upstream body is not JSON: {e}"),
            }
        }
    };

    let patched = apply_patches(&original, &action.patches);
    let body = serde_json::to_string(&patched).unwrap_or_default();

    Outcome::Respond(
        ResponseBuilder::new(action.status_code.unwrap_or(real.status))
            .content_type("application/json")
            .body(body)
            .merge_headers(&action.headers)
            .build(),
    )
}

/// Apply patches in order to a deep copy of `target`.
///
/// Missing or non-container intermediate levels become empty objects; a
/// numeric segment addresses an existing array element.
pub fn apply_patches(target: &Value, patches: &[Patch]) -> Value {
    let mut patched = target.clone();
    for patch in patches {
        set_path(&mut patched, &patch.path, patch.value.clone());
    }
    patched
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cursor = root;
    for segment in parents {
        cursor = child(cursor, segment);
    }
    *child(cursor, last) = value;
}

fn child<'v>(node: &'v mut Value, key: &str) -> &'v mut Value {
    let index = match &*node {
        Value::Array(items) => key.parse::<usize>().ok().filter(|i| *i < items.len()),
        _ => None,
    };
    if index.is_none() && !node.is_object() {
        *node = Value::Object(Map::new());
    }

    match (node, index) {
        (Value::Array(items), Some(i)) => &mut items[i],
        (Value::Object(map), _) => map.entry(key.to_string()).or_insert(Value::Null),
        (other, _) => other,
    }
}

/// Executes rules on behalf of the adapters: reports diagnostics, records
/// metrics and applies the response marker.
#[derive(Clone)]
pub struct ActionExecutor {
    settings: EngineSettings,
    reporter: Arc<dyn ActivityReporter>,
}

impl ActionExecutor {
    pub fn new(settings: EngineSettings, reporter: Arc<dyn ActivityReporter>) -> Self {
        Self { settings, reporter }
    }

    pub async fn execute<F, Fut>(&self, rule: &Rule, upstream: F) -> Result<Outcome, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchResponse, TransportError>>,
    {
        let delay_ms = rule.action.delay_ms();
        if delay_ms > 0 {
            debug!(rule_id = %rule.id, delay_ms, "Delaying response");
            metrics::record_delay(&rule.id, delay_ms);
        }

        match execute(&rule.action, upstream).await {
            Ok(Outcome::Respond(mut response)) => {
                if self.settings.mark_responses {
                    response.mark(&self.settings.marker_header, &self.settings.marker_value);
                }
                Ok(Outcome::Respond(response))
            }
            Ok(Outcome::Unmodified { response, reason }) => {
                error!(rule_id = %rule.id, "Patch not applied: {}", reason);
                deliver_diagnostic(
                    self.reporter.as_ref(),
                    &RuleDiagnostic::new(rule, DiagnosticKind::PatchNotJson, reason.clone()),
                );
                Ok(Outcome::Unmodified { response, reason })
            }
            Ok(Outcome::PassThrough) => Ok(Outcome::PassThrough),
            Err(e) => {
                error!(rule_id = %rule.id, error = %e, "Upstream call for patch failed");
                deliver_diagnostic(
                    self.reporter.as_ref(),
                    &RuleDiagnostic::new(rule, DiagnosticKind::PatchUpstreamFailed, e.to_string()),
                );
                Err(e)
            }
        }
    }
}
