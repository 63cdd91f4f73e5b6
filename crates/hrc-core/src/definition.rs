//! Rule definitions
//!
//! The declarative rule format:
//!
//! ```toml
//! [Blog]
//! Ttl = 3600
//! Tags = ["blog"]
//! QueryParams = ["Accept-Language"]
//! Match = { Url = "/blog/*", Cookie = { session = false } }
//! ```
//!
//! Rules are tried in declaration order and the first match wins, so the
//! definition list keeps the order of the source document.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::callback::CallbackRegistry;
use crate::error::CoreError;
use crate::rule::{FieldPredicate, Predicates, Rule};

/// `true`/`false` presence flag or a value pattern
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Flag(bool),
    Pattern(String),
}

impl PredicateValue {
    fn into_predicate(self) -> Result<FieldPredicate, CoreError> {
        match self {
            PredicateValue::Flag(present) => Ok(FieldPredicate::from_flag(present)),
            PredicateValue::Pattern(p) => FieldPredicate::pattern(&p),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchDefinition {
    #[serde(rename = "Url")]
    pub url: Option<String>,
    #[serde(rename = "Header", default)]
    pub header: BTreeMap<String, PredicateValue>,
    #[serde(rename = "Cookie", default)]
    pub cookie: BTreeMap<String, PredicateValue>,
    #[serde(rename = "Query", default)]
    pub query: BTreeMap<String, PredicateValue>,
    #[serde(rename = "Callback", default)]
    pub callback: Vec<String>,
}

/// One rule as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleDefinition {
    #[serde(rename = "Ttl")]
    pub ttl: Option<i64>,
    #[serde(rename = "Tags")]
    pub tags: Option<Vec<String>>,
    #[serde(rename = "Match")]
    pub matches: Option<MatchDefinition>,
    #[serde(rename = "QueryParams")]
    pub query_params: Option<Vec<String>>,
}

impl RuleDefinition {
    /// Build a rule, resolving callbacks against `callbacks`.
    ///
    /// A negative TTL is treated as zero, which disables caching for the rule.
    pub fn build(&self, name: &str, callbacks: &CallbackRegistry) -> Result<Rule, CoreError> {
        let (Some(ttl), Some(tags), Some(matches)) = (self.ttl, &self.tags, &self.matches) else {
            return Err(CoreError::Configuration(format!(
                "Unable to parse {:?} rule. The rule is missing a definition for one of these attributes: Ttl, Tags or Match",
                name
            )));
        };

        let mut predicates = Predicates::new();
        if let Some(url) = &matches.url {
            predicates = predicates.url(url)?;
        }
        for (field, value) in &matches.header {
            predicates = predicates.header(field, value.clone().into_predicate()?);
        }
        for (field, value) in &matches.cookie {
            predicates = predicates.cookie(field.as_str(), value.clone().into_predicate()?);
        }
        for (field, value) in &matches.query {
            predicates = predicates.query(field.as_str(), value.clone().into_predicate()?);
        }
        for callback in &matches.callback {
            predicates = predicates.callback(callbacks.resolve(callback)?);
        }

        let rule = Rule::new(name, ttl.max(0) as u64, tags.clone(), predicates)?;
        Ok(match &self.query_params {
            Some(fields) => rule.with_allowlist(fields.clone()),
            None => rule,
        })
    }
}

/// Named rule definitions in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDefinitions(pub Vec<(String, RuleDefinition)>);

impl RuleDefinitions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    /// Build every rule, failing on the first invalid one
    pub fn build(&self, callbacks: &CallbackRegistry) -> Result<Vec<Rule>, CoreError> {
        self.0
            .iter()
            .map(|(name, def)| def.build(name, callbacks))
            .collect()
    }
}

impl<'de> Deserialize<'de> for RuleDefinitions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = RuleDefinitions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of rule names to rule definitions")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut rules: Vec<(String, RuleDefinition)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, def)) = map.next_entry::<String, RuleDefinition>()? {
                    if rules.iter().any(|(n, _)| *n == name) {
                        return Err(de::Error::custom(format!("duplicate rule {:?}", name)));
                    }
                    rules.push((name, def));
                }
                Ok(RuleDefinitions(rules))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}
