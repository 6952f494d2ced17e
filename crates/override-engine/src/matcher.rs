//! URL/method matching for rules.
//!
//! Rule matchers are compiled once per rule snapshot; a regex that fails to
//! compile leaves the rule permanently non-matching for that snapshot.

use crate::request::InterceptedRequest;
use crate::rule::{RuleMatcher, UrlMatchType, UrlPattern};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: fancy_regex::Error,
    },

    #[error("invalid regex flag '{flag}' for '{pattern}'")]
    InvalidFlag { pattern: String, flag: char },

    #[error("duplicate regex flag '{flag}' for '{pattern}'")]
    DuplicateFlag { pattern: String, flag: char },
}

#[derive(Debug, Clone)]
pub enum UrlMatcher {
    /// No pattern configured
    Any,
    /// Trimmed equality
    Exact(String),
    Prefix(String),
    Regex(JsRegex),
    /// Pattern failed to compile; never matches
    Never,
}

impl UrlMatcher {
    pub fn compile(pattern: Option<&UrlPattern>) -> Result<Self, MatchError> {
        let Some(pattern) = pattern else {
            return Ok(UrlMatcher::Any);
        };
        match pattern.match_type {
            UrlMatchType::Exact => Ok(UrlMatcher::Exact(pattern.value.trim().to_string())),
            UrlMatchType::Prefix => Ok(UrlMatcher::Prefix(pattern.value.clone())),
            UrlMatchType::Regex => {
                let flags = pattern.flags.as_deref().unwrap_or("");
                compile_js_regex(&pattern.value, flags).map(UrlMatcher::Regex)
            }
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Any => true,
            UrlMatcher::Exact(p) => url.trim() == p,
            UrlMatcher::Prefix(p) => url.starts_with(p.as_str()),
            UrlMatcher::Regex(r) => r.is_match(url),
            UrlMatcher::Never => false,
        }
    }
}

/// A compiled `RegExp`.
///
/// Patterns the linear-time engine accepts run on it; look-around and
/// backreferences fall back to the backtracking engine.
#[derive(Debug, Clone)]
pub enum JsRegex {
    Linear(regex::Regex),
    Backtracking(fancy_regex::Regex),
}

impl JsRegex {
    pub fn is_match(&self, haystack: &str) -> bool {
        match self {
            JsRegex::Linear(r) => r.is_match(haystack),
            // Exceeding the backtrack limit counts as no match
            JsRegex::Backtracking(r) => r.is_match(haystack).unwrap_or_else(|e| {
                warn!(pattern = r.as_str(), error = %e, "Regex evaluation aborted");
                false
            }),
        }
    }

    pub fn is_backtracking(&self) -> bool {
        matches!(self, JsRegex::Backtracking(_))
    }
}

/// Compile a regex written with JavaScript `RegExp` flags.
///
/// `g` and `d` do not change a stateless test and are accepted; `y` anchors
/// the match at the start of the input.
pub fn compile_js_regex(source: &str, flags: &str) -> Result<JsRegex, MatchError> {
    let mut seen = HashSet::new();
    let mut inline = String::new();
    let mut sticky = false;

    for flag in flags.chars() {
        if !seen.insert(flag) {
            return Err(MatchError::DuplicateFlag {
                pattern: source.to_string(),
                flag,
            });
        }
        match flag {
            'i' | 'm' | 's' => inline.push(flag),
            'y' => sticky = true,
            'g' | 'd' | 'u' | 'v' => {}
            other => {
                return Err(MatchError::InvalidFlag {
                    pattern: source.to_string(),
                    flag: other,
                })
            }
        }
    }

    let mut pattern = String::new();
    if !inline.is_empty() {
        pattern.push_str(&format!("(?{inline})"));
    }
    if sticky {
        pattern.push_str(&format!(r"\A(?:{source})"));
    } else {
        pattern.push_str(source);
    }

    if let Ok(linear) = regex::Regex::new(&pattern) {
        return Ok(JsRegex::Linear(linear));
    }
    fancy_regex::Regex::new(&pattern)
        .map(JsRegex::Backtracking)
        .map_err(|source_err| MatchError::InvalidRegex {
            pattern: source.to_string(),
            source: source_err,
        })
}

/// Compiled URL + method predicate of one rule.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    url: UrlMatcher,
    method: Option<String>,
}

impl CompiledMatcher {
    pub fn compile(matcher: &RuleMatcher) -> Result<Self, MatchError> {
        Ok(Self {
            url: UrlMatcher::compile(matcher.url.as_ref())?,
            method: matcher.method.clone(),
        })
    }

    /// Matcher that rejects every request.
    pub fn never() -> Self {
        Self {
            url: UrlMatcher::Never,
            method: None,
        }
    }

    /// The request method is expected upper-case already; comparison is exact.
    pub fn matches(&self, request: &InterceptedRequest) -> bool {
        if !self.url.matches(&request.url) {
            return false;
        }
        match &self.method {
            Some(method) => *method == request.method,
            None => true,
        }
    }
}

/// Evaluate an uncompiled matcher against a request.
///
/// A pattern that fails to compile is a non-match, logged as a warning.
pub fn matches(request: &InterceptedRequest, matcher: &RuleMatcher) -> bool {
    match CompiledMatcher::compile(matcher) {
        Ok(compiled) => compiled.matches(request),
        Err(e) => {
            warn!(error = %e, "Rule matcher failed to compile, treating as no match");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str, method: &str) -> InterceptedRequest {
        InterceptedRequest::new(url, Some(method))
    }

    #[test]
    fn test_exact_url() {
        let m = UrlMatcher::compile(Some(&UrlPattern::exact("https://api.x/ping"))).unwrap();
        assert!(m.matches("https://api.x/ping"));
        assert!(m.matches("  https://api.x/ping "));
        assert!(!m.matches("https://api.x/ping2"));
        assert!(!m.matches("https://api.x/pinG"));
    }

    #[test]
    fn test_exact_pattern_trimmed() {
        let m = UrlMatcher::compile(Some(&UrlPattern::exact(" /a "))).unwrap();
        assert!(m.matches("/a"));
    }

    #[test]
    fn test_prefix_url() {
        let m = UrlMatcher::compile(Some(&UrlPattern::prefix("/api/"))).unwrap();
        assert!(m.matches("/api/"));
        assert!(m.matches("/api/users?page=2"));
        assert!(!m.matches("/apx/users"));
        // Prefix is not trimmed
        assert!(!m.matches(" /api/users"));
    }

    #[test]
    fn test_regex_url() {
        let m = UrlMatcher::compile(Some(&UrlPattern::regex(r"/api/v\d+/", None))).unwrap();
        assert!(m.matches("https://host/api/v2/items"));
        assert!(!m.matches("https://host/api/vx/items"));
    }

    #[test]
    fn test_regex_flags() {
        let m = UrlMatcher::compile(Some(&UrlPattern::regex("/USERS", Some("i")))).unwrap();
        assert!(m.matches("/api/users"));

        let sticky = UrlMatcher::compile(Some(&UrlPattern::regex("/api", Some("y")))).unwrap();
        assert!(sticky.matches("/api/users"));
        assert!(!sticky.matches("https://h/api/users"));

        let global = UrlMatcher::compile(Some(&UrlPattern::regex("users", Some("g")))).unwrap();
        assert!(global.matches("/users"));
    }

    #[test]
    fn test_lookaround_and_backreference() {
        let m =
            UrlMatcher::compile(Some(&UrlPattern::regex("^/api/(?!admin)", None))).unwrap();
        assert!(m.matches("/api/users"));
        assert!(!m.matches("/api/admin/keys"));

        let behind =
            UrlMatcher::compile(Some(&UrlPattern::regex(r"(?<=/v2)/items", Some("i")))).unwrap();
        assert!(behind.matches("/API/V2/ITEMS"));
        assert!(!behind.matches("/api/v1/items"));

        let repeated =
            UrlMatcher::compile(Some(&UrlPattern::regex(r"/(\w+)/\1$", None))).unwrap();
        assert!(repeated.matches("/echo/echo"));
        assert!(!repeated.matches("/echo/other"));
    }

    #[test]
    fn test_plain_patterns_stay_linear() {
        assert!(!compile_js_regex(r"/api/v\d+/", "i").unwrap().is_backtracking());
        assert!(compile_js_regex("^/a(?=b)", "").unwrap().is_backtracking());
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let err = UrlMatcher::compile(Some(&UrlPattern::regex("(unclosed", None)));
        assert!(matches!(err, Err(MatchError::InvalidRegex { .. })));

        let err = UrlMatcher::compile(Some(&UrlPattern::regex("ok", Some("x"))));
        assert!(matches!(err, Err(MatchError::InvalidFlag { flag: 'x', .. })));

        let err = UrlMatcher::compile(Some(&UrlPattern::regex("ok", Some("ii"))));
        assert!(matches!(err, Err(MatchError::DuplicateFlag { flag: 'i', .. })));
    }

    #[test]
    fn test_absent_pattern_matches_anything() {
        let m = UrlMatcher::compile(None).unwrap();
        assert!(m.matches(""));
        assert!(m.matches("https://anything"));
    }

    #[test]
    fn test_method_is_case_sensitive_against_normalized() {
        let matcher = RuleMatcher {
            url: Some(UrlPattern::prefix("/api")),
            method: Some("POST".to_string()),
        };
        assert!(matches(&req("/api/a", "post"), &matcher));
        assert!(!matches(&req("/api/a", "GET"), &matcher));

        let lower = RuleMatcher {
            url: None,
            method: Some("post".to_string()),
        };
        assert!(!matches(&req("/api/a", "post"), &lower));
    }

    #[test]
    fn test_malformed_regex_never_matches() {
        let matcher = RuleMatcher {
            url: Some(UrlPattern::regex("[", None)),
            method: None,
        };
        assert!(!matches(&req("[", "GET"), &matcher));
        assert!(!CompiledMatcher::never().matches(&req("/x", "GET")));
    }
}
