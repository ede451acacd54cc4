use crate::body::RewriteBody;
use crate::interceptor::{Interceptor, Rewriter};
use crate::sink::{ResponseCollector, ResponseSink};
use bytes::Buf;
use http::response::Parts;
use http::{HeaderMap, Response, StatusCode, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::{debug, warn};

pin_project! {
    /// Future for rewrite service responses.
    pub struct ResponseFuture<F, B> {
        #[pin]
        state: State<F, B>,
        rewriter: Rewriter,
        is_head: bool,
    }
}

pin_project! {
    #[project = StateProj]
    #[project_replace = StateReplace]
    enum State<F, B> {
        /// Waiting for the inner service.
        Waiting {
            #[pin]
            inner: F,
        },
        /// Collecting the upstream body.
        Buffering {
            #[pin]
            body: B,
            interceptor: Interceptor<ResponseCollector>,
            trailers: Option<HeaderMap>,
        },
        Done,
    }
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, rewriter: Rewriter, is_head: bool) -> Self {
        Self {
            state: State::Waiting { inner },
            rewriter,
            is_head,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<RewriteBody<B>>, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            let mut this = self.as_mut().project();

            match this.state.as_mut().project() {
                StateProj::Waiting { inner } => {
                    let response = match ready!(inner.poll(cx)) {
                        Ok(response) => response,
                        Err(e) => {
                            this.state.set(State::Done);
                            return Poll::Ready(Err(e));
                        }
                    };
                    let (mut parts, body) = response.into_parts();

                    if let Some(reason) = bypass_reason(&parts, *this.is_head, this.rewriter) {
                        debug!(reason, status = %parts.status, "response not rewritten");
                        // An upgraded connection keeps its head as sent.
                        if parts.status != StatusCode::SWITCHING_PROTOCOLS {
                            this.rewriter.strip_headers(&mut parts.headers);
                        }
                        this.state.set(State::Done);
                        return Poll::Ready(Ok(Response::from_parts(
                            parts,
                            RewriteBody::passthrough(body),
                        )));
                    }

                    let status = parts.status;
                    let mut interceptor = this.rewriter.intercept(ResponseCollector::new(parts));
                    if let Err(error) = interceptor.write_head(status) {
                        warn!(%error, "unable to finalize response head");
                    }
                    this.state.set(State::Buffering {
                        body,
                        interceptor,
                        trailers: None,
                    });
                }

                StateProj::Buffering {
                    mut body,
                    interceptor,
                    trailers,
                } => match ready!(body.as_mut().poll_frame(cx)) {
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(mut data) => {
                            while data.has_remaining() {
                                let chunk = data.chunk();
                                let len = chunk.len();
                                if let Err(error) = interceptor.write(chunk) {
                                    warn!(%error, "unable to buffer response body");
                                }
                                data.advance(len);
                            }
                        }
                        Err(frame) => {
                            if let Ok(frame_trailers) = frame.into_trailers() {
                                trailers
                                    .get_or_insert_with(HeaderMap::new)
                                    .extend(frame_trailers);
                            }
                        }
                    },
                    Some(Err(e)) => {
                        let error = io::Error::other(e.into());
                        warn!(%error, "upstream body failed while buffering");

                        if let StateReplace::Buffering { interceptor, .. } =
                            this.state.project_replace(State::Done)
                        {
                            let (parts, _) = interceptor.into_inner().into_parts();
                            return Poll::Ready(Ok(Response::from_parts(
                                parts,
                                RewriteBody::failed(error),
                            )));
                        }
                    }
                    None => {
                        if let StateReplace::Buffering {
                            interceptor,
                            trailers,
                            ..
                        } = this.state.project_replace(State::Done)
                        {
                            let (parts, data) = interceptor.finish().into_parts();
                            return Poll::Ready(Ok(Response::from_parts(
                                parts,
                                RewriteBody::buffered(data, trailers),
                            )));
                        }
                    }
                },

                StateProj::Done => panic!("ResponseFuture polled after completion"),
            }
        }
    }
}

/// Returns why a response skips the rewrite pipeline, if it does.
fn bypass_reason(parts: &Parts, is_head: bool, rewriter: &Rewriter) -> Option<&'static str> {
    if parts.status == StatusCode::SWITCHING_PROTOCOLS {
        return Some("protocol upgrade");
    }
    if is_head || parts.status == StatusCode::NO_CONTENT || parts.status == StatusCode::NOT_MODIFIED
    {
        return Some("no body");
    }
    if is_streaming(&parts.headers) {
        return Some("streaming response");
    }
    if !rewriter.monitors(&parts.headers) {
        return Some("content type not monitored");
    }
    None
}

/// Checks if the response must reach the client as it is produced.
fn is_streaming(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::config::{Rewrite, RewriteConfig};
    use crate::layer::RewriteLayer;
    use bytes::Bytes;
    use http::{HeaderValue, Method, Request};
    use http_body::Frame;
    use http_body_util::Full;
    use std::collections::VecDeque;
    use tower::{Layer, Service};

    const LAST_MODIFIED: &str = "Thu, 02 Jun 2016 06:01:08 GMT";

    /// A test body that yields predefined frames, or fails.
    struct FrameBody {
        frames: VecDeque<Result<Frame<Bytes>, io::Error>>,
    }

    impl FrameBody {
        fn new(frames: Vec<Result<Frame<Bytes>, io::Error>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl Body for FrameBody {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.frames.pop_front())
        }
    }

    fn layer(rewrites: &[(&str, &str)]) -> RewriteLayer {
        let config = RewriteConfig {
            rewrites: rewrites
                .iter()
                .map(|(regex, replacement)| Rewrite::new(*regex, *replacement))
                .collect(),
            ..Default::default()
        };
        RewriteLayer::from_config(&config).unwrap()
    }

    fn upstream_response(
        content_encoding: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Response<Full<Bytes>> {
        Response::builder()
            .header(header::CONTENT_ENCODING, content_encoding)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::LAST_MODIFIED, LAST_MODIFIED)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    fn call_with<B>(
        layer: &RewriteLayer,
        method: Method,
        response: Result<Response<B>, &'static str>,
    ) -> Result<Response<RewriteBody<B>>, &'static str>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut response = Some(response);
        let mut service = layer.layer(tower::service_fn(move |_req: Request<()>| {
            std::future::ready(response.take().expect("upstream called once"))
        }));

        let request = Request::builder().method(method).body(()).unwrap();
        let mut future = std::pin::pin!(service.call(request));

        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => panic!("response future should be ready"),
        }
    }

    fn call<B>(layer: &RewriteLayer, response: Response<B>) -> Response<RewriteBody<B>>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        call_with(layer, Method::GET, Ok(response)).unwrap()
    }

    /// Drains a body into its data and trailers.
    fn collect<B>(body: &mut RewriteBody<B>) -> Result<(Vec<u8>, Option<HeaderMap>), io::Error>
    where
        B: Body + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut data = Vec::new();
        let mut trailers = None;
        while let Poll::Ready(Some(frame)) = Pin::new(&mut *body).poll_frame(&mut cx) {
            match frame?.into_data() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(frame) => trailers = frame.into_trailers().ok(),
            }
        }
        Ok((data, trailers))
    }

    #[test]
    fn test_identity_body_rewritten() {
        let response = upstream_response("identity", "text/html", b"foo is the new bar".to_vec());
        let mut response = call(&layer(&[("foo", "bar")]), response);

        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::LAST_MODIFIED).is_none());
        assert_eq!(response.body().size_hint().exact(), Some(18));

        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"bar is the new bar");
    }

    #[test]
    fn test_missing_content_encoding_rewritten() {
        let response = Response::new(Full::new(Bytes::from("foo is the new bar")));
        let mut response = call(&layer(&[("foo", "bar"), ("bar", "foo")]), response);

        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"foo is the new foo");
    }

    #[test]
    fn test_other_encoding_not_rewritten() {
        let response = upstream_response("other", "text/html", b"foo is the new bar".to_vec());
        let mut response = call(&layer(&[("foo", "bar")]), response);

        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"foo is the new bar");
    }

    #[test]
    fn test_last_modified_preserved() {
        let response = upstream_response("identity", "text/html", b"foo".to_vec());
        let mut response = call(&layer(&[("foo", "bar")]).preserve_last_modified(true), response);

        assert_eq!(
            response.headers().get(header::LAST_MODIFIED).unwrap(),
            LAST_MODIFIED
        );
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"bar");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip_body_rewritten() {
        let upstream = codec::encode(b"foo is the new bar", "gzip").unwrap();
        let response = upstream_response("gzip", "text/html", upstream);
        let mut response = call(&layer(&[("foo", "bar")]), response);

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(
            codec::decode(data.as_slice(), "gzip").unwrap(),
            b"bar is the new bar"
        );
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_multi_member_gzip_body_rewritten() {
        let mut upstream = codec::encode(b"foo is ", "gzip").unwrap();
        upstream.extend_from_slice(&codec::encode(b"the new foo", "gzip").unwrap());
        let response = upstream_response("gzip", "text/html", upstream);
        let mut response = call(&layer(&[("foo", "bar")]), response);

        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(
            codec::decode(data.as_slice(), "gzip").unwrap(),
            b"bar is the new bar"
        );
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn test_deflate_body_rewritten() {
        let upstream = codec::encode(b"foo is the new bar", "deflate").unwrap();
        let response = upstream_response("deflate", "text/html", upstream);
        let mut response = call(&layer(&[("foo", "bar")]), response);

        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(
            codec::decode(data.as_slice(), "deflate").unwrap(),
            b"bar is the new bar"
        );
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn test_deflate_body_untouched_when_disabled() {
        let upstream = codec::encode(b"foo is the new bar", "deflate").unwrap();
        let response = upstream_response("deflate", "text/html", upstream.clone());
        let mut response = call(&layer(&[("foo", "bar")]).decode_deflate(false), response);

        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, upstream);
    }

    #[test]
    fn test_head_request_bypassed() {
        let response = upstream_response("identity", "text/html", b"foo".to_vec());
        let mut response = call_with(&layer(&[("foo", "bar")]), Method::HEAD, Ok(response)).unwrap();

        assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::LAST_MODIFIED).is_none());
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"foo");
    }

    #[test]
    fn test_no_body_statuses_bypassed() {
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let mut response = upstream_response("gzip", "text/html", Vec::new());
            *response.status_mut() = status;
            let response = call(&layer(&[("foo", "bar")]), response);

            assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
            assert!(response.headers().get(header::LAST_MODIFIED).is_none());
            assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        }
    }

    #[test]
    fn test_bypassed_last_modified_preserved() {
        let mut response = upstream_response("identity", "text/html", b"foo".to_vec());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let layer = layer(&[("foo", "bar")]).preserve_last_modified(true);
        let response = call(&layer, response);

        assert_eq!(
            response.headers().get(header::LAST_MODIFIED).unwrap(),
            LAST_MODIFIED
        );
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_upgrade_bypassed() {
        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::LAST_MODIFIED, LAST_MODIFIED)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = call(&layer(&[("foo", "bar")]), response);

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
        assert_eq!(response.headers().get(header::UPGRADE).unwrap(), "websocket");
        assert!(response.headers().get(header::LAST_MODIFIED).is_some());
    }

    #[test]
    fn test_streaming_bypassed() {
        let response = upstream_response("", "text/event-stream", b"data: foo\n\n".to_vec());
        let mut response = call(&layer(&[("foo", "bar")]), response);
        assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::LAST_MODIFIED).is_none());
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"data: foo\n\n");

        let mut response = upstream_response("", "text/plain", b"foo".to_vec());
        response
            .headers_mut()
            .insert("x-accel-buffering", HeaderValue::from_static("NO"));
        let response = call(&layer(&[("foo", "bar")]), response);
        assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::LAST_MODIFIED).is_none());
    }

    #[test]
    fn test_unmonitored_content_type_bypassed() {
        let layer = layer(&[("foo", "bar")]).content_types(["text/"]);

        let response = upstream_response("", "image/png", b"foo".to_vec());
        let mut response = call(&layer, response);
        assert!(matches!(response.body(), RewriteBody::Passthrough { .. }));
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::LAST_MODIFIED).is_none());
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"foo");

        let response = upstream_response("", "text/html; charset=utf-8", b"foo".to_vec());
        let mut response = call(&layer, response);
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"bar");
    }

    #[test]
    fn test_match_across_frames_and_trailers_kept() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc123"));
        let body = FrameBody::new(vec![
            Ok(Frame::data(Bytes::from("f"))),
            Ok(Frame::data(Bytes::from("oo is the new "))),
            Ok(Frame::data(Bytes::from("bar"))),
            Ok(Frame::trailers(trailers)),
        ]);
        let mut response = call(&layer(&[("foo", "bar")]), Response::new(body));

        let (data, trailers) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"bar is the new bar");
        assert_eq!(trailers.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_upstream_body_error_surfaces() {
        let body = FrameBody::new(vec![
            Ok(Frame::data(Bytes::from("foo"))),
            Err(io::Error::other("connection reset")),
        ]);
        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));
        let mut response = call(&layer(&[("foo", "bar")]), response);

        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let err = collect(response.body_mut()).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_inner_error_propagates() {
        let result = call_with::<Full<Bytes>>(&layer(&[]), Method::GET, Err("upstream down"));
        assert!(matches!(result, Err("upstream down")));
    }

    #[test]
    fn test_status_and_version_kept() {
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .version(http::Version::HTTP_2)
            .body(Full::new(Bytes::from("no foo here")))
            .unwrap();
        let mut response = call(&layer(&[("foo", "bar")]), response);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.version(), http::Version::HTTP_2);
        let (data, _) = collect(response.body_mut()).unwrap();
        assert_eq!(data, b"no bar here");
    }

    #[test]
    fn test_bypass_reason() {
        let rewriter = Rewriter::new(Default::default());
        let (mut parts, ()) = Response::new(()).into_parts();
        assert_eq!(bypass_reason(&parts, false, &rewriter), None);
        assert_eq!(bypass_reason(&parts, true, &rewriter), Some("no body"));

        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/grpc-web+proto"),
        );
        assert_eq!(
            bypass_reason(&parts, false, &rewriter),
            Some("streaming response")
        );
    }

    #[test]
    fn test_layer_rejects_bad_pattern() {
        let config = RewriteConfig {
            rewrites: vec![Rewrite::new("*", "bar")],
            ..Default::default()
        };
        assert!(RewriteLayer::from_config(&config).is_err());
    }
}
