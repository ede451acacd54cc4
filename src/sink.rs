use crate::error::{Capability, SinkError};
use bytes::{Bytes, BytesMut};
use http::response::Parts;
use http::{HeaderMap, StatusCode};

/// Optional features a sink offers beyond writing a head and a body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// [`ResponseSink::hijack`] hands over the connection.
    pub hijack: bool,
    /// [`ResponseSink::flush`] pushes output to the client.
    pub flush: bool,
}

/// Where a response is written.
///
/// Headers are edited in place through [`headers_mut`](Self::headers_mut)
/// and frozen by [`write_head`](Self::write_head). Hijack and flush are
/// optional; sinks advertise them through [`capabilities`](Self::capabilities)
/// and the default implementations report them as unsupported.
pub trait ResponseSink {
    /// Raw connection handed out by [`hijack`](Self::hijack).
    type Conn;

    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for editing.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Finalizes the status line and headers.
    fn write_head(&mut self, status: StatusCode) -> Result<(), SinkError>;

    /// Writes a chunk of body.
    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Returns the optional features this sink supports.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Pushes anything written so far to the client.
    fn flush(&mut self) -> Result<(), SinkError> {
        Err(SinkError::Unsupported(Capability::Flush))
    }

    /// Takes over the underlying connection.
    fn hijack(&mut self) -> Result<Self::Conn, SinkError> {
        Err(SinkError::Unsupported(Capability::Hijack))
    }
}

/// A sink that assembles the response in memory.
///
/// Version and extensions of the original response head are carried through
/// untouched.
#[derive(Debug)]
pub struct ResponseCollector {
    parts: Parts,
    body: BytesMut,
}

impl ResponseCollector {
    /// Creates a collector seeded with a response head.
    pub fn new(parts: Parts) -> Self {
        Self {
            parts,
            body: BytesMut::new(),
        }
    }

    /// Returns the collected head and body.
    pub fn into_parts(self) -> (Parts, Bytes) {
        (self.parts, self.body.freeze())
    }
}

impl ResponseSink for ResponseCollector {
    type Conn = std::convert::Infallible;

    fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    fn write_head(&mut self, status: StatusCode) -> Result<(), SinkError> {
        self.parts.status = status;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}
