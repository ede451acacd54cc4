use crate::codec::Codec;
use crate::config::RewriteConfig;
use crate::error::{ConfigError, SinkError};
use crate::rules::RuleSet;
use crate::sink::{Capabilities, ResponseSink};
use bytes::BytesMut;
use http::{HeaderMap, StatusCode, header};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared, read-only rewrite settings.
///
/// Cheap to clone; every exchange gets its own [`Interceptor`] through
/// [`intercept`](Self::intercept).
#[derive(Debug, Clone)]
pub struct Rewriter {
    rules: Arc<RuleSet>,
    preserve_last_modified: bool,
    decode_deflate: bool,
    content_types: Arc<[String]>,
}

impl Rewriter {
    /// Creates a rewriter applying `rules`.
    ///
    /// `Last-Modified` is dropped, deflate bodies are decoded, and every
    /// content type is rewritten.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
            preserve_last_modified: false,
            decode_deflate: true,
            content_types: Arc::from(Vec::new()),
        }
    }

    /// Compiles a rewriter from configuration.
    pub fn from_config(config: &RewriteConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.rule_set()?)
            .preserve_last_modified(config.last_modified)
            .decode_deflate(config.decode_deflate)
            .content_types(config.content_types.iter().cloned()))
    }

    /// Keeps the upstream `Last-Modified` header instead of removing it.
    pub fn preserve_last_modified(mut self, preserve: bool) -> Self {
        self.preserve_last_modified = preserve;
        self
    }

    /// Sets whether `deflate` bodies are decoded and rewritten like `gzip`.
    pub fn decode_deflate(mut self, decode: bool) -> Self {
        self.decode_deflate = decode;
        self
    }

    /// Restricts rewriting to responses whose `Content-Type` starts with one
    /// of `prefixes` (ASCII case-insensitive). An empty list allows all.
    pub fn content_types<I, T>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.content_types = prefixes
            .into_iter()
            .map(|prefix| prefix.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Returns the rule set.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Wraps `sink` for a single exchange.
    pub fn intercept<K: ResponseSink>(&self, sink: K) -> Interceptor<K> {
        Interceptor {
            inner: sink,
            rewriter: self.clone(),
            status: StatusCode::OK,
            buffer: BytesMut::new(),
            phase: Phase::Idle,
        }
    }

    /// Returns `true` if a response with these headers is eligible for rewriting.
    pub fn monitors(&self, headers: &HeaderMap) -> bool {
        if self.content_types.is_empty() {
            return true;
        }

        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let content_type = content_type.trim().to_ascii_lowercase();

        self.content_types
            .iter()
            .any(|prefix| content_type.starts_with(prefix.as_str()))
    }

    /// Drops the headers a rewritten body invalidates.
    pub(crate) fn strip_headers(&self, headers: &mut HeaderMap) {
        if !self.preserve_last_modified {
            headers.remove(header::LAST_MODIFIED);
        }
        // The final write decides the length.
        headers.remove(header::CONTENT_LENGTH);
    }

    fn classify(&self, headers: &HeaderMap) -> BodyEncoding {
        let mut values = headers.get_all(header::CONTENT_ENCODING).into_iter();
        let (Some(value), None) = (values.next(), values.next()) else {
            return if headers.contains_key(header::CONTENT_ENCODING) {
                BodyEncoding::Opaque
            } else {
                BodyEncoding::Identity
            };
        };
        let Ok(token) = value.to_str() else {
            return BodyEncoding::Opaque;
        };
        let token = token.trim();

        if token.is_empty() || token.eq_ignore_ascii_case("identity") {
            return BodyEncoding::Identity;
        }
        match Codec::from_content_encoding(token) {
            Some(codec) if self.decode_deflate || !codec.is_deflate() => {
                BodyEncoding::Compressed(codec)
            }
            _ => BodyEncoding::Opaque,
        }
    }

    /// Runs the decode, rewrite and re-encode steps over a complete body.
    ///
    /// Never fails: codec errors are logged and the best available bytes are
    /// returned.
    pub fn transform(&self, headers: &HeaderMap, body: Vec<u8>) -> Vec<u8> {
        if !self.monitors(headers) {
            debug!("content type not monitored, body forwarded unchanged");
            return body;
        }

        match self.classify(headers) {
            BodyEncoding::Opaque => {
                debug!(
                    encoding = ?headers.get(header::CONTENT_ENCODING),
                    "unsupported content encoding, body forwarded unchanged"
                );
                body
            }
            BodyEncoding::Identity => self.rewrite(body),
            BodyEncoding::Compressed(codec) => {
                let mut plain = Vec::with_capacity(body.len() * 2);
                if let Err(error) = codec.decode_into(&body, &mut plain) {
                    warn!(
                        encoding = codec.content_encoding(),
                        %error,
                        recovered = plain.len(),
                        "unable to decode response body"
                    );
                }

                let rewritten = self.rewrite(plain);
                match codec.encode(&rewritten) {
                    Ok(encoded) => encoded,
                    Err(error) => {
                        warn!(
                            encoding = codec.content_encoding(),
                            %error,
                            "unable to recompress rewritten body, sending it uncompressed"
                        );
                        rewritten
                    }
                }
            }
        }
    }

    fn rewrite(&self, body: Vec<u8>) -> Vec<u8> {
        let original_size = body.len();
        let rewritten = self.rules.apply_all(body);
        debug!(
            original_size,
            rewritten_size = rewritten.len(),
            rules = self.rules.len(),
            "response body rewritten"
        );
        rewritten
    }
}

enum BodyEncoding {
    Identity,
    Compressed(Codec),
    Opaque,
}

/// Progress of a single intercepted exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// The upstream is editing headers.
    HeaderPending,
    /// Status and headers are frozen but not yet sent.
    HeaderFinalized,
    /// Body bytes are being collected.
    BodyBuffering,
    /// The transformed response went to the real sink.
    Flushed,
    /// The connection was handed over; nothing more is sent.
    Hijacked,
}

/// Per-exchange decorator that buffers a response and rewrites it on
/// [`finish`](Self::finish).
///
/// Nothing reaches the wrapped sink until `finish`, apart from the
/// [`flush`](ResponseSink::flush) and [`hijack`](ResponseSink::hijack)
/// escape hatches, which are forwarded as-is.
#[derive(Debug)]
pub struct Interceptor<K> {
    inner: K,
    rewriter: Rewriter,
    status: StatusCode,
    buffer: BytesMut,
    phase: Phase,
}

impl<K: ResponseSink> Interceptor<K> {
    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the number of body bytes buffered so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns a reference to the wrapped sink.
    pub fn inner(&self) -> &K {
        &self.inner
    }

    /// Abandons the exchange and returns the wrapped sink without writing
    /// anything to it.
    pub fn into_inner(self) -> K {
        self.inner
    }

    fn head_written(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::HeaderPending)
    }

    /// Transforms the buffered body and emits the response to the wrapped
    /// sink, returning it.
    ///
    /// Write failures are logged and not retried.
    pub fn finish(mut self) -> K {
        if self.phase == Phase::Hijacked {
            return self.inner;
        }
        if !self.head_written() {
            self.finalize_head(StatusCode::OK);
        }

        let body = std::mem::take(&mut self.buffer).to_vec();
        let body = self.rewriter.transform(self.inner.headers(), body);

        // Headers stay editable until now; enforce the invariants once more.
        self.rewriter.strip_headers(self.inner.headers_mut());

        if let Err(error) = self.inner.write_head(self.status) {
            warn!(%error, "unable to write response head");
        } else if let Err(error) = self.inner.write(&body) {
            warn!(%error, "unable to write rewritten body");
        }
        self.phase = Phase::Flushed;
        self.inner
    }

    fn finalize_head(&mut self, status: StatusCode) {
        self.rewriter.strip_headers(self.inner.headers_mut());
        self.status = status;
        self.phase = Phase::HeaderFinalized;
    }
}

impl<K: ResponseSink> ResponseSink for Interceptor<K> {
    type Conn = K::Conn;

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        if self.phase == Phase::Idle {
            self.phase = Phase::HeaderPending;
        }
        self.inner.headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) -> Result<(), SinkError> {
        if self.phase == Phase::Hijacked {
            return Err(SinkError::Hijacked);
        }
        if self.head_written() {
            debug!(%status, "superfluous write_head call ignored");
            return Ok(());
        }
        self.finalize_head(status);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        if self.phase == Phase::Hijacked {
            return Err(SinkError::Hijacked);
        }
        if !self.head_written() {
            self.finalize_head(StatusCode::OK);
        }
        self.buffer.extend_from_slice(chunk);
        self.phase = Phase::BodyBuffering;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn hijack(&mut self) -> Result<Self::Conn, SinkError> {
        let conn = self.inner.hijack()?;
        self.phase = Phase::Hijacked;
        Ok(conn)
    }
}
