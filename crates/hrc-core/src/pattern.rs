//! Value patterns used by rule predicates

use regex::Regex;
use std::fmt;

use crate::error::CoreError;

/// A compiled value pattern.
///
/// - containing `*`: wildcard, every `*` matches one or more characters and
///   everything else is literal
/// - containing `(`, `[` or `\`: an anchored regular expression
/// - anything else: exact string equality
#[derive(Clone)]
pub enum Pattern {
    Wildcard { source: String, regex: Regex },
    Regex { source: String, regex: Regex },
    Exact(String),
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, CoreError> {
        if source.contains('*') {
            let body = regex::escape(source).replace(r"\*", "(.+)");
            Ok(Pattern::Wildcard {
                source: source.to_string(),
                regex: compile(source, &format!("^{}$", body))?,
            })
        } else if source.contains(['(', '[', '\\']) {
            Ok(Pattern::Regex {
                source: source.to_string(),
                regex: compile(source, &format!("^(?:{})$", source))?,
            })
        } else {
            Ok(Pattern::Exact(source.to_string()))
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Pattern::Wildcard { regex, .. } | Pattern::Regex { regex, .. } => regex.is_match(value),
            Pattern::Exact(expected) => expected == value,
        }
    }

    /// The pattern as it was written
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Wildcard { source, .. } | Pattern::Regex { source, .. } => source,
            Pattern::Exact(source) => source,
        }
    }
}

fn compile(source: &str, regex: &str) -> Result<Regex, CoreError> {
    Regex::new(regex)
        .map_err(|e| CoreError::Configuration(format!("Invalid pattern {:?}: {}", source, e)))
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Pattern::Wildcard { .. } => "Wildcard",
            Pattern::Regex { .. } => "Regex",
            Pattern::Exact(_) => "Exact",
        };
        f.debug_tuple(kind).field(&self.as_str()).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.as_str() == other.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        let p = Pattern::new("/blog/*").unwrap();
        assert!(matches!(p, Pattern::Wildcard { .. }));
        assert!(p.is_match("/blog/post"));
        assert!(p.is_match("/blog/a/b"));
        assert!(!p.is_match("/blog/"));
        assert!(!p.is_match("/about"));

        // Everything but `*` is literal
        let p = Pattern::new("v1.*").unwrap();
        assert!(p.is_match("v1.2"));
        assert!(!p.is_match("v122"));
    }

    #[test]
    fn test_catch_all() {
        let p = Pattern::new("*").unwrap();
        assert!(p.is_match("/"));
        assert!(p.is_match("/anything/at/all"));
    }

    #[test]
    fn test_regex_is_anchored() {
        let p = Pattern::new(r"foo (\w+)").unwrap();
        assert!(matches!(p, Pattern::Regex { .. }));
        assert!(p.is_match("foo bar"));
        assert!(!p.is_match("foo bar baz"));
        assert!(!p.is_match("xfoo bar"));

        let p = Pattern::new("[0-9]+|abc").unwrap();
        assert!(p.is_match("123"));
        assert!(p.is_match("abc"));
        assert!(!p.is_match("123abc"));
    }

    #[test]
    fn test_exact() {
        let p = Pattern::new("/about").unwrap();
        assert_eq!(p, Pattern::Exact("/about".to_string()));
        assert!(p.is_match("/about"));
        assert!(!p.is_match("/about/"));
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        assert!(matches!(
            Pattern::new("(unclosed"),
            Err(CoreError::Configuration(_))
        ));
    }
}
