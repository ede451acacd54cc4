//! Configuration schema.
//!
//! Keys are camelCase so the same document can be shared with proxies that
//! describe rewrites as `{"lastModified": true, "rewrites": [{"regex": ..,
//! "replacement": ..}]}`.

use crate::error::ConfigError;
use crate::rules::RuleSet;
use serde::{Deserialize, Serialize};

/// One configured substitution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rewrite {
    /// Pattern to search for.
    pub regex: String,

    /// Literal text inserted in place of each match.
    #[serde(default)]
    pub replacement: String,
}

impl Rewrite {
    /// Creates a rewrite from a pattern and its replacement.
    pub fn new(regex: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            replacement: replacement.into(),
        }
    }
}

/// Root configuration for the rewrite middleware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RewriteConfig {
    /// Keep the upstream `Last-Modified` header.
    pub last_modified: bool,

    /// Substitutions, applied in order.
    pub rewrites: Vec<Rewrite>,

    /// Decode and recompress `deflate` bodies the same way as `gzip` ones.
    ///
    /// When disabled, `deflate` is treated like any other unsupported coding
    /// and the body is forwarded untouched.
    pub decode_deflate: bool,

    /// Media-type prefixes eligible for rewriting. Empty means every response.
    pub content_types: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            last_modified: false,
            rewrites: Vec::new(),
            decode_deflate: true,
            content_types: Vec::new(),
        }
    }
}

impl RewriteConfig {
    /// Compiles the configured rewrites.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::compile(
            self.rewrites
                .iter()
                .map(|rewrite| (rewrite.regex.as_str(), rewrite.replacement.as_str())),
        )
    }
}
