//! HTTP response body rewriting middleware for Tower.
//!
//! This crate buffers a response produced by an upstream service, runs an
//! ordered list of regex substitutions over its body, and sends the result on
//! with corrected headers. Gzip and deflate bodies are decoded before the
//! rules run and re-encoded afterwards.
//!
//! # Example
//!
//! ```ignore
//! use http_body_rewrite::{RewriteConfig, RewriteLayer};
//! use tower::ServiceBuilder;
//!
//! let config: RewriteConfig = serde_json::from_str(
//!     r#"{"rewrites": [{"regex": "foo", "replacement": "bar"}]}"#,
//! )?;
//! let service = ServiceBuilder::new()
//!     .layer(RewriteLayer::from_config(&config)?)
//!     .service(my_service);
//! ```
//!
//! Hosts that push responses instead of returning them can drive the
//! [`Interceptor`] directly through the [`ResponseSink`] trait:
//!
//! ```ignore
//! let mut interceptor = rewriter.intercept(connection_sink);
//! upstream.serve(&request, &mut interceptor);
//! interceptor.finish();
//! ```
//!
//! # Rewrite Rules
//!
//! Rules are applied in order, each to the output of the previous one.
//! Replacements are literal. The body is rewritten when `Content-Encoding` is:
//! - absent, empty or `identity`
//! - `gzip` (decoded, rewritten, re-encoded)
//! - `deflate`, unless disabled with `decodeDeflate: false`
//!
//! Any other coding (for example `br`) is forwarded byte for byte.
//!
//! The middleware will **not** buffer the response at all when:
//! - The status is `101 Switching Protocols`, `204 No Content` or `304 Not Modified`
//! - The request method is `HEAD`
//! - `X-Accel-Buffering: no` is present, or `Content-Type` is
//!   `text/event-stream` or `application/grpc-web*`
//! - A content-type allow-list is configured and does not match
//!
//! # Response Modifications
//!
//! When a response is rewritten:
//! - `Content-Length` header is removed (the body reports its exact size instead)
//! - `Last-Modified` header is removed, unless configured to be preserved
//!
//! Responses that skip rewriting get the same header changes, except for
//! `101 Switching Protocols`, which is forwarded as-is.

#![deny(missing_docs)]

mod body;
pub mod codec;
mod config;
mod error;
mod future;
mod interceptor;
mod layer;
mod rules;
mod service;
mod sink;

pub use body::RewriteBody;
pub use codec::Codec;
pub use config::{Rewrite, RewriteConfig};
pub use error::{Capability, CodecError, ConfigError, SinkError};
pub use future::ResponseFuture;
pub use interceptor::{Interceptor, Phase, Rewriter};
pub use layer::RewriteLayer;
pub use rules::{Rule, RuleSet};
pub use service::RewriteService;
pub use sink::{Capabilities, ResponseCollector, ResponseSink};
