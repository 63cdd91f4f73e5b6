//! Rule matching
//!
//! Evaluates a [`Rule`] against a [`RequestContext`]. Categories are checked
//! in a fixed order (Url, Header, Cookie, Query, Callback) and evaluation stops
//! at the first failing condition. Every satisfied condition adds a part to
//! the key fragment; the fragment then decides the cache key.

use std::collections::BTreeMap;

use crate::callback::CallbackResult;
use crate::key::derive_fragment_hash;
use crate::request::{CONTROL_HEADERS, RequestContext, canonical_header_name};
use crate::rule::{Category, FieldPredicate, Rule};

/// Ordered key material produced by a successful match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    parts: Vec<(Category, String)>,
}

impl Fragment {
    pub fn push(&mut self, category: Category, value: impl Into<String>) {
        self.parts.push((category, value.into()));
    }

    pub fn parts(&self) -> &[(Category, String)] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Whether any part equals `value`
    pub fn contains(&self, value: &str) -> bool {
        self.parts.iter().any(|(_, v)| v == value)
    }

    /// The string the fragment hash is computed from
    pub fn material(&self) -> String {
        self.parts
            .iter()
            .map(|(category, value)| format!("{}-{}", category, value))
            .collect()
    }
}

/// A rule that matched a request, with the fragment it produced.
///
/// Owns its own copy of the rule so per-request changes such as extra tags
/// never leak into the rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    pub rule: Rule,
    pub fragment: Fragment,
}

impl MatchedRule {
    pub fn new(rule: Rule, fragment: Fragment) -> Self {
        Self { rule, fragment }
    }

    pub fn fragment_hash(&self) -> String {
        derive_fragment_hash(&self.fragment)
    }
}

/// Evaluate `rule` against `request`, returning the key fragment on a match
pub fn match_rule(rule: &Rule, request: &RequestContext) -> Option<Fragment> {
    let predicates = rule.predicates();
    if predicates.is_empty() {
        return None;
    }

    let mut fragment = Fragment::default();

    if let Some(pattern) = &predicates.url {
        if !pattern.is_match(request.url()) {
            return None;
        }
        fragment.push(Category::Url, request.url());
    }

    let fields = [
        (Category::Header, &predicates.headers, request.headers()),
        (Category::Cookie, &predicates.cookies, request.cookies()),
        (Category::Query, &predicates.query, request.query_params()),
    ];
    for (category, conditions, values) in fields {
        if !match_fields(category, conditions, values, &mut fragment) {
            return None;
        }
    }

    for callback in &predicates.callbacks {
        match callback.call(request, rule) {
            CallbackResult::Reject => return None,
            CallbackResult::Accept => fragment.push(Category::Callback, "true"),
            CallbackResult::Value(value) => fragment.push(Category::Callback, value),
        }
    }

    // Absence conditions alone never identify anything worth caching
    if fragment.is_empty() {
        return None;
    }

    augment(rule, request, &mut fragment);
    Some(fragment)
}

fn match_fields(
    category: Category,
    conditions: &BTreeMap<String, FieldPredicate>,
    values: &BTreeMap<String, String>,
    fragment: &mut Fragment,
) -> bool {
    for (field, condition) in conditions {
        let value = values.get(field);
        match (condition, value) {
            (FieldPredicate::Present, Some(_)) => fragment.push(category, field.as_str()),
            (FieldPredicate::Absent, None) => {}
            (FieldPredicate::Matches(pattern), Some(value)) if pattern.is_match(value) => {
                fragment.push(category, format!("{}:{}", field, value))
            }
            _ => return false,
        }
    }
    true
}

/// Fold headers the rule did not inspect into the fragment.
///
/// Without an allowlist every such header counts, so two requests only share
/// a key when they agree on all of them. Control headers never count.
fn augment(rule: &Rule, request: &RequestContext, fragment: &mut Fragment) {
    let consumed = &rule.predicates().headers;
    let control: Vec<String> = CONTROL_HEADERS
        .iter()
        .map(|h| canonical_header_name(h))
        .collect();

    for (name, value) in request.headers() {
        if consumed.contains_key(name) || control.contains(name) {
            continue;
        }
        if rule.allowlist().is_some_and(|allow| !allow.contains(name)) {
            continue;
        }
        fragment.push(Category::Header, format!("{}:{}", name, value));
    }
}
