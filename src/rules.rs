use crate::error::ConfigError;
use regex::bytes::{NoExpand, Regex};
use std::borrow::Cow;

/// A compiled pattern and the literal bytes that replace its matches.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: Vec<u8>,
}

impl Rule {
    /// Compiles a single rule.
    pub fn new(pattern: &str, replacement: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let compiled = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }

    /// Returns the pattern source.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns the replacement bytes.
    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Replaces every non-overlapping match in `input`.
    ///
    /// The replacement is inserted literally; `$1` and friends are not expanded.
    pub fn apply<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        self.pattern
            .replace_all(input, NoExpand(self.replacement.as_slice()))
    }
}

/// An ordered list of rules, each one fed the output of the previous one.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Creates an empty rule set, which leaves every body untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `(pattern, replacement)` pairs in order.
    ///
    /// Fails on the first pattern that does not compile; no partial set is
    /// returned.
    pub fn compile<I, P, R>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (P, R)>,
        P: AsRef<str>,
        R: Into<Vec<u8>>,
    {
        let rules = pairs
            .into_iter()
            .map(|(pattern, replacement)| Rule::new(pattern.as_ref(), replacement))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Appends an already compiled rule.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the rules in application order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Runs every rule over `body` in order.
    pub fn apply_all(&self, body: Vec<u8>) -> Vec<u8> {
        self.rules.iter().fold(body, |body, rule| {
            let replaced = match rule.apply(&body) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            replaced.unwrap_or(body)
        })
    }
}
