//! Whole-body encoding and decoding for the content codings the rewrite
//! pipeline understands.
//!
//! Unknown codings are not an error: bytes are handed back untouched.

use crate::error::CodecError;
use compression_codecs::{DecodeV2, EncodeV2};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io::{self, Read};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output window

/// Content codings the rewrite pipeline can decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Gzip (RFC 1952).
    #[cfg(feature = "gzip")]
    Gzip,
    /// Zlib-wrapped deflate (RFC 1950), as sent under `Content-Encoding: deflate`.
    #[cfg(feature = "deflate")]
    Deflate,
}

impl Codec {
    /// Returns the codec for a `Content-Encoding` token.
    ///
    /// Returns `None` for `identity`, the empty string and any coding this
    /// build cannot handle.
    pub fn from_content_encoding(token: &str) -> Option<Codec> {
        let token = token.trim();
        #[cfg(feature = "gzip")]
        if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            return Some(Codec::Gzip);
        }
        #[cfg(feature = "deflate")]
        if token.eq_ignore_ascii_case("deflate") {
            return Some(Codec::Deflate);
        }
        #[cfg(not(any(feature = "gzip", feature = "deflate")))]
        let _ = token;
        None
    }

    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match *self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            Codec::Deflate => "deflate",
        }
    }

    pub(crate) fn is_deflate(&self) -> bool {
        match *self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => false,
            #[cfg(feature = "deflate")]
            Codec::Deflate => true,
        }
    }

    // RFC 1952 streams may be a series of members.
    fn allows_multiple_members(&self) -> bool {
        match *self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => true,
            #[cfg(feature = "deflate")]
            Codec::Deflate => false,
        }
    }

    fn encoder(&self) -> Box<dyn EncodeV2 + Send> {
        match *self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => Box::new(compression_codecs::gzip::GzipEncoder::new(
                Level::Default.into(),
            )),
            #[cfg(feature = "deflate")]
            Codec::Deflate => Box::new(compression_codecs::zlib::ZlibEncoder::new(
                Level::Default.into(),
            )),
        }
    }

    fn decoder(&self) -> Box<dyn DecodeV2 + Send> {
        match *self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => Box::new(compression_codecs::gzip::GzipDecoder::new()),
            #[cfg(feature = "deflate")]
            Codec::Deflate => Box::new(compression_codecs::zlib::ZlibDecoder::new()),
        }
    }

    /// Compresses `data` into a single complete stream.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let encoding = self.content_encoding();
        let mut encoder = self.encoder();
        let mut window = vec![0u8; OUTPUT_BUFFER_SIZE];
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let mut input = PartialBuffer::new(data);

        while input.written_len() < data.len() {
            let consumed = input.written_len();
            let mut output = WriteBuffer::new_initialized(window.as_mut_slice());
            encoder
                .encode(&mut input, &mut output)
                .map_err(|source| CodecError::Malformed { encoding, source })?;
            let written = output.written_len();
            out.extend_from_slice(&window[..written]);

            if written == 0 && input.written_len() == consumed {
                return Err(CodecError::Stalled { encoding });
            }
        }

        loop {
            let mut output = WriteBuffer::new_initialized(window.as_mut_slice());
            let done = encoder
                .finish(&mut output)
                .map_err(|source| CodecError::Malformed { encoding, source })?;
            let written = output.written_len();
            out.extend_from_slice(&window[..written]);

            if done {
                return Ok(out);
            }
            if written == 0 {
                return Err(CodecError::Stalled { encoding });
            }
        }
    }

    /// Decompresses a single complete stream.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(data.len() * 2);
        self.decode_into(data, &mut out)?;
        Ok(out)
    }

    /// Decompresses `data`, appending plain bytes to `out` as they are produced.
    ///
    /// Gzip input may hold several concatenated members; their contents are
    /// joined. Any other bytes after the end of the stream are an error.
    ///
    /// On error, `out` keeps whatever was recovered before the failure.
    pub(crate) fn decode_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        let encoding = self.content_encoding();
        let mut decoder = self.decoder();
        let mut window = vec![0u8; OUTPUT_BUFFER_SIZE];
        let mut input = PartialBuffer::new(data);

        loop {
            let consumed = input.written_len();
            let mut output = WriteBuffer::new_initialized(window.as_mut_slice());
            let result = decoder.decode(&mut input, &mut output);
            let written = output.written_len();
            out.extend_from_slice(&window[..written]);

            match result {
                Ok(true) if input.unwritten().is_empty() => return Ok(()),
                Ok(true) if self.allows_multiple_members() => decoder
                    .reinit()
                    .map_err(|source| CodecError::Malformed { encoding, source })?,
                Ok(true) => {
                    return Err(CodecError::Malformed {
                        encoding,
                        source: io::Error::new(
                            io::ErrorKind::InvalidData,
                            "trailing data after end of stream",
                        ),
                    });
                }
                Ok(false) if written == 0 && input.written_len() == consumed => {
                    return Err(CodecError::Truncated { encoding });
                }
                Ok(false) => {}
                Err(source) => return Err(CodecError::Malformed { encoding, source }),
            }
        }
    }
}

/// Encodes `data` under the named content coding.
///
/// `identity`, the empty string and unsupported codings (including `br`)
/// return the input unchanged.
pub fn encode(data: &[u8], encoding: &str) -> Result<Vec<u8>, CodecError> {
    match Codec::from_content_encoding(encoding) {
        Some(codec) => codec.encode(data),
        None => Ok(data.to_vec()),
    }
}

/// Reads `source` to the end and decodes it under the named content coding.
///
/// `identity`, the empty string and unsupported codings return the bytes
/// read, untouched.
pub fn decode<R: Read>(mut source: R, encoding: &str) -> Result<Vec<u8>, CodecError> {
    let mut data = Vec::new();
    source
        .read_to_end(&mut data)
        .map_err(|source| CodecError::Io {
            encoding: encoding.to_string(),
            source,
        })?;

    match Codec::from_content_encoding(encoding) {
        Some(codec) => codec.decode(&data),
        None => Ok(data),
    }
}
