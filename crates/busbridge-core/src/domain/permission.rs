//! Permission rules and the first-match rule evaluator.
//!
//! The bridge keeps two ordered rule lists:
//!
//! - **inbound** rules decide which client messages may enter the bus
//!   (`send` and `publish`);
//! - **outbound** rules decide which bus addresses a client may subscribe to,
//!   and which messages on them may leave the bus towards the client.
//!
//! # How a rule list is evaluated
//!
//! ```text
//! for rule in rules (in order):
//!     address ok?   exact `address`, else `address_regex`, else wildcard
//!     body ok?      structure_matches(rule.match, body)
//!     both ok  →    matched, with rule.required_authority
//! nothing matched → denied
//! ```
//!
//! An empty list therefore denies everything, and a single rule with no
//! fields at all (`{}`) permits everything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::authority::Authority;
use crate::domain::patterns::PatternCache;
use crate::domain::structure::structure_matches;

/// One entry of a rule list.
///
/// # Serde representation (TOML)
///
/// ```toml
/// [[bridge.outbound]]
/// address_regex = "news\\..+"
/// required_authority = "news:read"
///
/// [[bridge.inbound]]
/// address = "orders"
/// match = { kind = "create" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Exact address.  Takes precedence over `address_regex`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Regular expression that must match the entire address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_regex: Option<String>,

    /// Partial body template; see [`structure_matches`].
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub structure: Option<Map<String, Value>>,

    /// Authority the connection's principal must hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_authority: Option<Authority>,
}

impl PermissionRule {
    /// A rule matching exactly one address.
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// A rule matching every address the pattern fully matches.
    pub fn address_regex(pattern: impl Into<String>) -> Self {
        Self {
            address_regex: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Adds a body template.
    pub fn with_structure(mut self, template: Map<String, Value>) -> Self {
        self.structure = Some(template);
        self
    }

    /// Adds a required authority.
    pub fn with_authority(mut self, authority: impl Into<Authority>) -> Self {
        self.required_authority = Some(authority.into());
        self
    }
}

/// The outcome of evaluating a rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub required_authority: Option<Authority>,
}

impl MatchResult {
    pub fn denied() -> Self {
        Self {
            matched: false,
            required_authority: None,
        }
    }

    pub fn allowed(required_authority: Option<Authority>) -> Self {
        Self {
            matched: true,
            required_authority,
        }
    }
}

/// An ordered rule list bound to a shared pattern cache.
#[derive(Debug, Clone)]
pub struct PermissionMatcher {
    rules: Vec<PermissionRule>,
    patterns: Arc<PatternCache>,
}

impl PermissionMatcher {
    pub fn new(rules: Vec<PermissionRule>, patterns: Arc<PatternCache>) -> Self {
        Self { rules, patterns }
    }

    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    /// Evaluates the rules against `address` and `body`; the first rule whose
    /// address and structure both match wins.
    ///
    /// Pass `None` as the body to check the address alone.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use busbridge_core::{PatternCache, PermissionMatcher, PermissionRule};
    ///
    /// let matcher = PermissionMatcher::new(
    ///     vec![PermissionRule::address("echo")],
    ///     Arc::new(PatternCache::new()),
    /// );
    /// assert!(matcher.evaluate("echo", None).matched);
    /// assert!(!matcher.evaluate("other", None).matched);
    /// ```
    pub fn evaluate(&self, address: &str, body: Option<&Value>) -> MatchResult {
        self.rules
            .iter()
            .find(|rule| self.address_matches(rule, address) && structure_matches(rule.structure.as_ref(), body))
            .map(|rule| MatchResult::allowed(rule.required_authority.clone()))
            .unwrap_or_else(MatchResult::denied)
    }

    fn address_matches(&self, rule: &PermissionRule, address: &str) -> bool {
        match (&rule.address, &rule.address_regex) {
            (Some(exact), _) => exact == address,
            (None, Some(pattern)) => self.patterns.is_match(pattern, address),
            (None, None) => true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(rules: Vec<PermissionRule>) -> PermissionMatcher {
        PermissionMatcher::new(rules, Arc::new(PatternCache::new()))
    }

    fn template(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_rule_list_denies_everything() {
        let m = matcher(vec![]);
        assert_eq!(m.evaluate("anything", None), MatchResult::denied());
        assert!(!m.evaluate("anything", Some(&json!({"a": 1}))).matched);
    }

    #[test]
    fn test_empty_rule_permits_everything() {
        let m = matcher(vec![PermissionRule::default()]);
        assert!(m.evaluate("a", Some(&json!("x"))).matched);
        assert!(m.evaluate("b.c.d", None).matched);
    }

    #[test]
    fn test_exact_address_match() {
        let m = matcher(vec![PermissionRule::address("echo")]);
        assert!(m.evaluate("echo", None).matched);
        assert!(!m.evaluate("echo2", None).matched);
    }

    #[test]
    fn test_exact_address_wins_over_regex() {
        // Both fields set: the regex is ignored.
        let rule = PermissionRule {
            address: Some("exact".to_string()),
            address_regex: Some(".*".to_string()),
            ..PermissionRule::default()
        };
        let m = matcher(vec![rule]);
        assert!(m.evaluate("exact", None).matched);
        assert!(!m.evaluate("other", None).matched);
    }

    #[test]
    fn test_regex_address_match() {
        let m = matcher(vec![PermissionRule::address_regex(r"news\..+")]);
        assert!(m.evaluate("news.sports", None).matched);
        assert!(!m.evaluate("news", None).matched);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Arrange: two rules match "a"; only the first one's authority counts
        let m = matcher(vec![
            PermissionRule::address("b").with_authority("never"),
            PermissionRule::address_regex("a|b").with_authority("first"),
            PermissionRule::default().with_authority("second"),
        ]);

        // Act
        let result = m.evaluate("a", None);

        // Assert
        assert_eq!(result, MatchResult::allowed(Some(Authority::new("first"))));
    }

    #[test]
    fn test_structure_failure_falls_through_to_next_rule() {
        let m = matcher(vec![
            PermissionRule::address("orders")
                .with_structure(template(json!({"kind": "create"})))
                .with_authority("writer"),
            PermissionRule::address("orders"),
        ]);

        let create = m.evaluate("orders", Some(&json!({"kind": "create"})));
        let other = m.evaluate("orders", Some(&json!({"kind": "delete"})));

        assert_eq!(create.required_authority, Some(Authority::new("writer")));
        assert!(other.matched);
        assert_eq!(other.required_authority, None);
    }

    #[test]
    fn test_null_body_passes_structural_rule() {
        // Registration evaluates with no body, so only the address gates it.
        let m = matcher(vec![
            PermissionRule::address("orders").with_structure(template(json!({"kind": "create"})))
        ]);
        assert!(m.evaluate("orders", None).matched);
        assert!(!m.evaluate("orders", Some(&json!({"kind": "x"}))).matched);
    }

    #[test]
    fn test_matchers_share_pattern_cache() {
        let cache = Arc::new(PatternCache::new());
        let inbound = PermissionMatcher::new(vec![PermissionRule::address_regex("p.*")], Arc::clone(&cache));
        let outbound = PermissionMatcher::new(vec![PermissionRule::address_regex("p.*")], Arc::clone(&cache));

        inbound.evaluate("pa", None);
        outbound.evaluate("pb", None);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        // Arrange
        let text = r#"
address_regex = "news\\..+"
required_authority = "news:read"
match = { kind = "headline", meta = { lang = "en" } }
"#;

        // Act
        let rule: PermissionRule = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(rule.address_regex.as_deref(), Some(r"news\..+"));
        assert_eq!(rule.required_authority, Some(Authority::new("news:read")));
        assert_eq!(
            Value::Object(rule.structure.unwrap()),
            json!({"kind": "headline", "meta": {"lang": "en"}})
        );
    }
}
