use crate::config::RewriteConfig;
use crate::error::ConfigError;
use crate::interceptor::Rewriter;
use crate::rules::RuleSet;
use crate::service::RewriteService;
use tower::Layer;

/// A Tower layer that rewrites HTTP response bodies.
///
/// This layer wraps services and runs every eligible response body through
/// the configured rules, decoding and re-encoding gzip and deflate bodies on
/// the way.
#[derive(Debug, Clone)]
pub struct RewriteLayer {
    rewriter: Rewriter,
}

impl RewriteLayer {
    /// Creates a rewrite layer applying `rules` with default settings.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rewriter: Rewriter::new(rules),
        }
    }

    /// Creates a rewrite layer from configuration.
    ///
    /// Fails if any configured pattern does not compile.
    pub fn from_config(config: &RewriteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            rewriter: Rewriter::from_config(config)?,
        })
    }

    /// Keeps the upstream `Last-Modified` header.
    ///
    /// By default it is removed, since the rewritten body no longer matches
    /// what the origin last modified.
    pub fn preserve_last_modified(mut self, preserve: bool) -> Self {
        self.rewriter = self.rewriter.preserve_last_modified(preserve);
        self
    }

    /// Sets whether `deflate` bodies are decoded and rewritten like `gzip`.
    pub fn decode_deflate(mut self, decode: bool) -> Self {
        self.rewriter = self.rewriter.decode_deflate(decode);
        self
    }

    /// Restricts rewriting to the given media-type prefixes.
    pub fn content_types<I, T>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.rewriter = self.rewriter.content_types(prefixes);
        self
    }
}

impl From<Rewriter> for RewriteLayer {
    fn from(rewriter: Rewriter) -> Self {
        Self { rewriter }
    }
}

impl<S> Layer<S> for RewriteLayer {
    type Service = RewriteService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RewriteService::new(inner, self.rewriter.clone())
    }
}
