use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that was either rewritten in full or left alone.
    #[project = RewriteBodyProj]
    #[allow(missing_docs)]
    pub enum RewriteBody<B> {
        /// Rewritten body, emitted as one data frame followed by any trailers.
        Buffered {
            data: Option<Bytes>,
            trailers: Option<HeaderMap>,
        },
        /// The upstream body failed while it was being buffered.
        Failed {
            error: Option<io::Error>,
        },
        /// Body forwarded without rewriting.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

impl<B> RewriteBody<B> {
    /// Creates a body from fully rewritten bytes.
    pub fn buffered(data: Bytes, trailers: Option<HeaderMap>) -> Self {
        Self::Buffered {
            data: (!data.is_empty()).then_some(data),
            trailers,
        }
    }

    /// Creates a body that yields `error` on first poll.
    pub fn failed(error: io::Error) -> Self {
        Self::Failed { error: Some(error) }
    }

    /// Creates a passthrough body.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for RewriteBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            RewriteBodyProj::Buffered { data, trailers } => {
                if let Some(data) = data.take() {
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                Poll::Ready(trailers.take().map(|trailers| Ok(Frame::trailers(trailers))))
            }
            RewriteBodyProj::Failed { error } => Poll::Ready(error.take().map(Err)),
            RewriteBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| {
                        let mut bytes = BytesMut::with_capacity(data.remaining());
                        while data.has_remaining() {
                            let chunk = data.chunk();
                            let len = chunk.len();
                            bytes.extend_from_slice(chunk);
                            data.advance(len);
                        }
                        bytes.freeze()
                    });
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            RewriteBody::Buffered { data, trailers } => data.is_none() && trailers.is_none(),
            RewriteBody::Failed { error } => error.is_none(),
            RewriteBody::Passthrough { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            RewriteBody::Buffered { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
            RewriteBody::Failed { .. } => SizeHint::default(),
            RewriteBody::Passthrough { inner } => inner.size_hint(),
        }
    }
}
