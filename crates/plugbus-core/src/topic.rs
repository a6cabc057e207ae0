//! Topic pattern matching.
//!
//! Topics are `/`-separated segments such as `orders/items/added`. Patterns
//! may use two wildcards:
//!
//! - `*` matches exactly one segment (one or more non-`/` characters)
//! - `**` matches one or more characters of any kind, crossing segments
//!
//! ```rust,ignore
//! use plugbus_core::topic::matches_topic;
//!
//! assert!(matches_topic("orders/created", "orders/*"));
//! assert!(!matches_topic("orders/items/added", "orders/*"));
//! assert!(matches_topic("orders/items/added", "orders/**"));
//! ```

use regex::Regex;

use crate::error::{BusError, Result};

/// Regex fragment for `**`.
const MULTI_LEVEL: &str = ".+";
/// Regex fragment for `*`.
const SINGLE_LEVEL: &str = "[^/]+";

#[derive(Debug, Clone)]
enum Matcher {
    /// Pattern without wildcards; plain string equality.
    Exact,
    /// Pattern with at least one wildcard.
    Wildcard(Regex),
}

/// A compiled topic pattern
#[derive(Debug, Clone)]
pub struct TopicMatcher {
    pattern: String,
    matcher: Matcher,
}

impl TopicMatcher {
    /// Compile a pattern, reporting regex construction failures.
    pub fn try_compile(pattern: &str) -> Result<Self> {
        if !pattern.contains('*') {
            return Ok(Self::exact(pattern));
        }

        let regex = Regex::new(&pattern_to_regex(pattern)).map_err(|err| {
            BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            }
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: Matcher::Wildcard(regex),
        })
    }

    /// Compile a pattern. Never fails: a pattern the regex engine rejects
    /// degrades to an exact-match matcher.
    pub fn compile(pattern: &str) -> Self {
        match Self::try_compile(pattern) {
            Ok(matcher) => matcher,
            Err(err) => {
                tracing::warn!("{}; falling back to exact matching", err);
                Self::exact(pattern)
            }
        }
    }

    fn exact(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            matcher: Matcher::Exact,
        }
    }

    /// Test a concrete topic against this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => self.pattern == topic,
            Matcher::Wildcard(regex) => regex.is_match(topic),
        }
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern contains any wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.matcher, Matcher::Wildcard(_))
    }
}

/// Translate a topic pattern into an anchored regular expression.
///
/// `**` must be substituted before `*`; the other order would split it into
/// two single-segment wildcards.
pub fn pattern_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", MULTI_LEVEL)
        .replace(r"\*", SINGLE_LEVEL);
    format!("^{}$", escaped)
}

/// Check whether `topic` matches `pattern` without keeping the compiled form.
pub fn matches_topic(topic: &str, pattern: &str) -> bool {
    TopicMatcher::compile(pattern).matches(topic)
}
