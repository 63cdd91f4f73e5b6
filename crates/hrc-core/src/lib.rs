//! Hrc Core
//!
//! Rule matching, cache key derivation and the orchestrator that drives the
//! primary store and the tag index.

pub mod callback;
pub mod definition;
pub mod error;
pub mod hooks;
pub mod key;
pub mod log;
pub mod matcher;
pub mod orchestrator;
pub mod pattern;
pub mod request;
pub mod rule;
pub mod stats;

pub use callback::{CallbackRegistry, CallbackResult};
pub use definition::{PredicateValue, RuleDefinition, RuleDefinitions};
pub use error::CoreError;
pub use hooks::{CacheHook, ReadPayload, SavePayload};
pub use log::{DebugLog, Traced};
pub use matcher::{Fragment, MatchedRule, match_rule};
pub use orchestrator::{Hrc, ReadOutcome, SaveOutcome};
pub use pattern::Pattern;
pub use request::RequestContext;
pub use rule::{Category, FieldPredicate, Predicates, Rule};
pub use stats::CacheStats;
