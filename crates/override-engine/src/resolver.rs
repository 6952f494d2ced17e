//! First-match-wins rule resolution.

use crate::matcher::CompiledMatcher;
use crate::reporter::{DiagnosticKind, RuleDiagnostic};
use crate::request::InterceptedRequest;
use crate::rule::Rule;
use std::sync::Arc;
use tracing::{debug, warn};

/// A rule with its matcher compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Arc<Rule>,
    matcher: CompiledMatcher,
}

impl CompiledRule {
    pub fn matches(&self, request: &InterceptedRequest) -> bool {
        self.rule.enabled && self.matcher.matches(request)
    }
}

/// Immutable, ordered snapshot of the rule list plus the global switch.
///
/// A new snapshot is built on every refresh; calls already in flight keep
/// the snapshot they resolved against.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    enabled: bool,
}

impl RuleSet {
    /// Compile `rules` in order.
    ///
    /// Rules whose pattern fails to compile stay in the set but never match;
    /// one diagnostic is returned for each.
    pub fn compile(rules: Vec<Rule>, enabled: bool) -> (Self, Vec<RuleDiagnostic>) {
        let mut diagnostics = Vec::new();
        let compiled = rules
            .into_iter()
            .map(|rule| {
                let matcher = match CompiledMatcher::compile(&rule.matcher) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(rule_id = %rule.id, error = %e, "Rule pattern is invalid, rule will never match");
                        diagnostics.push(RuleDiagnostic::new(
                            &rule,
                            DiagnosticKind::InvalidPattern,
                            e.to_string(),
                        ));
                        CompiledMatcher::never()
                    }
                };
                CompiledRule {
                    rule: Arc::new(rule),
                    matcher,
                }
            })
            .collect();

        (
            Self {
                rules: compiled,
                enabled,
            },
            diagnostics,
        )
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when interception is on and there is at least one rule.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|c| c.rule.as_ref())
    }

    /// Earliest enabled rule whose matcher accepts the request.
    pub fn resolve(&self, request: &InterceptedRequest) -> Option<&CompiledRule> {
        if !self.enabled {
            return None;
        }
        let found = self.rules.iter().find(|r| r.matches(request));
        if let Some(r) = found {
            debug!(
                rule_id = %r.rule.id,
                url = %request.url,
                method = %request.method,
                "Request matched rule"
            );
        }
        found
    }
}

/// Resolve against an uncompiled list; the list order is the priority.
pub fn resolve<'a>(request: &InterceptedRequest, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.enabled)
        .find(|r| crate::matcher::matches(request, &r.matcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Action, DelayAction, RuleMatcher, UrlPattern};

    fn rule(id: &str, url: UrlPattern, method: Option<&str>) -> Rule {
        Rule {
            id: id.to_string(),
            name: format!("rule {id}"),
            enabled: true,
            matcher: RuleMatcher {
                url: Some(url),
                method: method.map(str::to_string),
            },
            action: Action::Delay(DelayAction { delay: 0 }),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            rule("a", UrlPattern::prefix("/api/"), None),
            rule("b", UrlPattern::exact("/api/users"), None),
        ];
        let (set, diags) = RuleSet::compile(rules, true);
        assert!(diags.is_empty());

        let hit = set
            .resolve(&InterceptedRequest::new("/api/users", None))
            .unwrap();
        assert_eq!(hit.rule.id, "a");
    }

    #[test]
    fn test_disabled_rule_skipped() {
        let mut first = rule("a", UrlPattern::prefix("/api/"), None);
        first.enabled = false;
        let rules = vec![first, rule("b", UrlPattern::exact("/api/users"), None)];
        let (set, _) = RuleSet::compile(rules.clone(), true);

        let req = InterceptedRequest::new("/api/users", None);
        assert_eq!(set.resolve(&req).unwrap().rule.id, "b");
        assert_eq!(resolve(&req, &rules).unwrap().id, "b");
    }

    #[test]
    fn test_global_switch_off() {
        let (set, _) = RuleSet::compile(vec![rule("a", UrlPattern::prefix("/"), None)], false);
        assert!(!set.is_active());
        assert!(set.resolve(&InterceptedRequest::new("/x", None)).is_none());
    }

    #[test]
    fn test_method_filter() {
        let (set, _) = RuleSet::compile(
            vec![rule("post", UrlPattern::prefix("/api"), Some("POST"))],
            true,
        );
        assert!(set.resolve(&InterceptedRequest::new("/api", None)).is_none());
        assert!(set
            .resolve(&InterceptedRequest::new("/api", Some("post")))
            .is_some());
    }

    #[test]
    fn test_invalid_regex_reported_and_skipped() {
        let rules = vec![
            rule("bad", UrlPattern::regex("(", None), None),
            rule("good", UrlPattern::prefix("/"), None),
        ];
        let (set, diags) = RuleSet::compile(rules, true);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule_id, "bad");
        assert_eq!(diags[0].kind, DiagnosticKind::InvalidPattern);

        let hit = set.resolve(&InterceptedRequest::new("(", None)).unwrap();
        assert_eq!(hit.rule.id, "good");
    }

    #[test]
    fn test_empty_list_resolves_nothing() {
        let req = InterceptedRequest::new("/x", None);
        assert!(resolve(&req, &[]).is_none());
        assert!(RuleSet::empty().resolve(&req).is_none());
    }
}
