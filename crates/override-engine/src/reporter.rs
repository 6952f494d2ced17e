//! Best-effort activity reporting.
//!
//! Reporters see every rule match and every "rule did not apply" diagnostic.
//! Nothing a reporter does (including panicking) may reach the request path.

use crate::rule::Rule;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Call convention through which a request was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Fetch,
    Xhr,
    Promise,
    Ajax,
    Fluent,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Fetch => "fetch",
            Transport::Xhr => "xhr",
            Transport::Promise => "promise",
            Transport::Ajax => "ajax",
            Transport::Fluent => "fluent",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub url: String,
    pub method: String,
    pub rule_id: String,
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub transport: Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// URL regex or flags failed to compile
    InvalidPattern,
    /// Upstream body for a patch action was not JSON
    PatchNotJson,
    /// Upstream call for a patch action failed
    PatchUpstreamFailed,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidPattern => "invalid_pattern",
            DiagnosticKind::PatchNotJson => "patch_not_json",
            DiagnosticKind::PatchUpstreamFailed => "patch_upstream_failed",
        }
    }
}

/// Why a rule did not apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDiagnostic {
    pub rule_id: String,
    pub rule_name: String,
    pub kind: DiagnosticKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RuleDiagnostic {
    pub fn new(rule: &Rule, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of match notifications.
///
/// Implementations must return promptly; they are called inline on the
/// request path before the response is delivered.
pub trait ActivityReporter: Send + Sync {
    fn report(&self, event: &MatchEvent);

    fn diagnostic(&self, _diagnostic: &RuleDiagnostic) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ActivityReporter for TracingReporter {
    fn report(&self, event: &MatchEvent) {
        info!(
            url = %event.url,
            method = %event.method,
            rule_id = %event.rule_id,
            rule_name = %event.rule_name,
            transport = %event.transport,
            "Request intercepted"
        );
    }

    fn diagnostic(&self, diagnostic: &RuleDiagnostic) {
        warn!(
            rule_id = %diagnostic.rule_id,
            rule_name = %diagnostic.rule_name,
            kind = diagnostic.kind.as_str(),
            "Rule did not apply: {}",
            diagnostic.message
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ActivityReporter for NoopReporter {
    fn report(&self, _event: &MatchEvent) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReporterMessage {
    Match(MatchEvent),
    Diagnostic(RuleDiagnostic),
}

/// Forwards events over an unbounded channel; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ReporterMessage>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::UnboundedSender<ReporterMessage>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReporterMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ActivityReporter for ChannelReporter {
    fn report(&self, event: &MatchEvent) {
        let _ = self.tx.send(ReporterMessage::Match(event.clone()));
    }

    fn diagnostic(&self, diagnostic: &RuleDiagnostic) {
        let _ = self.tx.send(ReporterMessage::Diagnostic(diagnostic.clone()));
    }
}

pub(crate) fn deliver_match(reporter: &dyn ActivityReporter, event: &MatchEvent) {
    if catch_unwind(AssertUnwindSafe(|| reporter.report(event))).is_err() {
        warn!(rule_id = %event.rule_id, "Activity reporter panicked, event dropped");
    }
}

pub(crate) fn deliver_diagnostic(reporter: &dyn ActivityReporter, diagnostic: &RuleDiagnostic) {
    crate::metrics::record_rule_error(&diagnostic.rule_id, diagnostic.kind.as_str());
    if catch_unwind(AssertUnwindSafe(|| reporter.diagnostic(diagnostic))).is_err() {
        warn!(rule_id = %diagnostic.rule_id, "Activity reporter panicked, diagnostic dropped");
    }
}
