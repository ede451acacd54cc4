use std::fmt;
use std::io;
use thiserror::Error;

/// Error returned when a rewrite configuration cannot be turned into a rule set.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A rewrite pattern failed to compile.
    #[error("error compiling regex {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as configured.
        pattern: String,
        /// Why the regex engine rejected it.
        source: regex::Error,
    },
}

/// Error produced while encoding or decoding a body.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The source stream could not be read.
    #[error("failed to read {encoding} body: {source}")]
    Io {
        /// Content-Encoding being processed.
        encoding: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The bytes are not a valid stream for the encoding.
    #[error("malformed {encoding} stream: {source}")]
    Malformed {
        /// Content-Encoding being processed.
        encoding: &'static str,
        /// Error reported by the codec.
        source: io::Error,
    },

    /// The stream ended before the codec saw its trailer.
    #[error("truncated {encoding} stream")]
    Truncated {
        /// Content-Encoding being processed.
        encoding: &'static str,
    },

    /// The encoder stopped consuming input without producing output.
    #[error("{encoding} encoder made no progress")]
    Stalled {
        /// Content-Encoding being processed.
        encoding: &'static str,
    },
}

/// Optional sink capabilities used as escape hatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Taking over the raw connection (protocol upgrades).
    Hijack,
    /// Pushing buffered bytes to the client early (streaming).
    Flush,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Hijack => f.write_str("hijack"),
            Capability::Flush => f.write_str("flush"),
        }
    }
}

/// Error raised by a [`ResponseSink`](crate::ResponseSink).
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink does not offer the requested capability.
    #[error("response sink does not support {0}")]
    Unsupported(Capability),

    /// The connection was handed over and the sink accepts no more output.
    #[error("connection has been hijacked")]
    Hijacked,

    /// Writing to the underlying transport failed.
    #[error("failed to write response: {0}")]
    Io(#[from] io::Error),
}
