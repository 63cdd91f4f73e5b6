//! Cache rules

use std::collections::BTreeMap;
use std::fmt;

use crate::callback::Callback;
use crate::error::CoreError;
use crate::pattern::Pattern;
use crate::request::canonical_header_name;

/// Predicate categories, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Url,
    Header,
    Cookie,
    Query,
    Callback,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Url => "Url",
            Category::Header => "Header",
            Category::Cookie => "Cookie",
            Category::Query => "Query",
            Category::Callback => "Callback",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition on a single header, cookie or query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    /// Field must be present with any value
    Present,
    /// Field must be absent
    Absent,
    /// Field must be present and its value must match
    Matches(Pattern),
}

impl FieldPredicate {
    pub fn from_flag(present: bool) -> Self {
        if present {
            FieldPredicate::Present
        } else {
            FieldPredicate::Absent
        }
    }

    pub fn pattern(source: &str) -> Result<Self, CoreError> {
        Ok(FieldPredicate::Matches(Pattern::new(source)?))
    }
}

/// Match conditions of a rule, grouped by category.
///
/// Field maps are ordered by name, so evaluation order never depends on the
/// order conditions were declared in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicates {
    pub url: Option<Pattern>,
    pub headers: BTreeMap<String, FieldPredicate>,
    pub cookies: BTreeMap<String, FieldPredicate>,
    pub query: BTreeMap<String, FieldPredicate>,
    pub callbacks: Vec<Callback>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, pattern: &str) -> Result<Self, CoreError> {
        self.url = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn header(mut self, name: &str, predicate: FieldPredicate) -> Self {
        self.headers.insert(canonical_header_name(name), predicate);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, predicate: FieldPredicate) -> Self {
        self.cookies.insert(name.into(), predicate);
        self
    }

    pub fn query(mut self, name: impl Into<String>, predicate: FieldPredicate) -> Self {
        self.query.insert(name.into(), predicate);
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Whether no condition at all is declared
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.headers.is_empty()
            && self.cookies.is_empty()
            && self.query.is_empty()
            && self.callbacks.is_empty()
    }
}

/// A named cache policy
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    name: String,
    ttl: u64,
    tags: Vec<String>,
    predicates: Predicates,
    allowlist: Option<Vec<String>>,
}

impl Rule {
    /// Build a rule. The name and every tag must be non-empty and at least
    /// one tag is required.
    pub fn new(
        name: impl Into<String>,
        ttl: u64,
        tags: Vec<String>,
        predicates: Predicates,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::Configuration(
                "A cache rule must have a name".to_string(),
            ));
        }
        if tags.is_empty() || tags.iter().any(|t| t.is_empty()) {
            return Err(CoreError::Configuration(format!(
                "Cache rule {:?} must contain at least one non-empty tag",
                name
            )));
        }

        Ok(Self {
            name,
            ttl,
            tags,
            predicates,
            allowlist: None,
        })
    }

    /// Restrict key augmentation to the listed header names
    pub fn with_allowlist(mut self, fields: Vec<String>) -> Self {
        self.allowlist = Some(fields.iter().map(|f| canonical_header_name(f)).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time to live in seconds; zero disables caching
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn predicates(&self) -> &Predicates {
        &self.predicates
    }

    pub fn allowlist(&self) -> Option<&[String]> {
        self.allowlist.as_deref()
    }

    /// Merge extra tags in front of the existing ones, skipping duplicates
    pub fn add_tags(&mut self, extra: &[String]) {
        let mut merged: Vec<String> = Vec::with_capacity(extra.len() + self.tags.len());
        for tag in extra.iter().chain(self.tags.iter()) {
            if !tag.is_empty() && !merged.contains(tag) {
                merged.push(tag.clone());
            }
        }
        self.tags = merged;
    }
}
