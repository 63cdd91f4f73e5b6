//! Named match callbacks
//!
//! Rules refer to callbacks by an `Module::function` identifier. The
//! identifier is looked up in a [`CallbackRegistry`] once, when the rule is
//! built, so an unknown name is a configuration error at load time.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::CoreError;
use crate::request::RequestContext;
use crate::rule::Rule;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*::[A-Za-z_][A-Za-z0-9_]*$")
        .expect("Invalid regex pattern for callback identifier")
});

/// What a callback decided about a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// The rule does not match
    Reject,
    /// The rule matches; contributes `true` to the key
    Accept,
    /// The rule matches; contributes the value to the key
    Value(String),
}

impl From<bool> for CallbackResult {
    fn from(accept: bool) -> Self {
        if accept {
            CallbackResult::Accept
        } else {
            CallbackResult::Reject
        }
    }
}

impl From<Option<String>> for CallbackResult {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => CallbackResult::Value(v),
            _ => CallbackResult::Reject,
        }
    }
}

pub type CallbackFn = dyn Fn(&RequestContext, &Rule) -> CallbackResult + Send + Sync;

/// A callback resolved from the registry
#[derive(Clone)]
pub struct Callback {
    name: String,
    func: Arc<CallbackFn>,
}

impl Callback {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, request: &RequestContext, rule: &Rule) -> CallbackResult {
        (self.func)(request, rule)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.name).finish()
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Check that `name` has the `Identifier::Identifier` form
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(CoreError::Configuration(format!(
            "Invalid callback {:?}: expected the form Module::function",
            name
        )))
    }
}

#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<CallbackFn>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`, replacing any earlier registration
    pub fn register<F>(&mut self, name: &str, func: F) -> Result<(), CoreError>
    where
        F: Fn(&RequestContext, &Rule) -> CallbackResult + Send + Sync + 'static,
    {
        validate_identifier(name)?;
        self.callbacks.insert(name.to_string(), Arc::new(func));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Callback, CoreError> {
        validate_identifier(name)?;
        let func = self.callbacks.get(name).ok_or_else(|| {
            CoreError::Configuration(format!("Unknown callback {:?}", name))
        })?;

        Ok(Callback {
            name: name.to_string(),
            func: func.clone(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("Auth::isLoggedIn").is_ok());
        assert!(validate_identifier("my_mod::_check2").is_ok());
        assert!(validate_identifier("isLoggedIn").is_err());
        assert!(validate_identifier("A::b::c").is_err());
        assert!(validate_identifier("A:b").is_err());
        assert!(validate_identifier("1A::b").is_err());
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = CallbackRegistry::new();
        registry
            .register("Lang::code", |req, _| req.header("Accept-Language").map(String::from).into())
            .unwrap();

        assert!(registry.contains("Lang::code"));
        assert_eq!(registry.resolve("Lang::code").unwrap().name(), "Lang::code");
        assert!(matches!(
            registry.resolve("Lang::missing"),
            Err(CoreError::Configuration(_))
        ));
        assert!(registry.register("bad name", |_, _| CallbackResult::Accept).is_err());
    }

    #[test]
    fn test_result_conversions() {
        assert_eq!(CallbackResult::from(true), CallbackResult::Accept);
        assert_eq!(CallbackResult::from(false), CallbackResult::Reject);
        assert_eq!(
            CallbackResult::from(Some("en".to_string())),
            CallbackResult::Value("en".to_string())
        );
        assert_eq!(CallbackResult::from(Some(String::new())), CallbackResult::Reject);
        assert_eq!(CallbackResult::from(None), CallbackResult::Reject);
    }
}
