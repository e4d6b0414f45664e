//! Request handlers served by the mTLS server

use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use tracing::debug;

use crate::shutdown::ShutdownSignal;

pub const HELLO_PATH: &str = "/hello";
pub const HELLO_BODY: &str = "Hello, world!\n";

/// Produces a response for a fully received request
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request<Bytes>) -> Response<Full<Bytes>>;
}

/// Answers every request with a fixed greeting
#[derive(Clone, Copy, Debug, Default)]
pub struct HelloHandler;

#[async_trait]
impl RequestHandler for HelloHandler {
    async fn handle(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        debug!("Greeting {} {}", request.method(), request.uri().path());
        text_response(StatusCode::OK, HELLO_BODY)
    }
}

/// Wraps a handler so that its first completed invocation requests server shutdown
pub struct ShutdownTrigger {
    inner: Arc<dyn RequestHandler>,
    signal: Arc<ShutdownSignal>,
}

impl ShutdownTrigger {
    pub fn new(inner: Arc<dyn RequestHandler>, signal: Arc<ShutdownSignal>) -> Self {
        Self { inner, signal }
    }
}

#[async_trait]
impl RequestHandler for ShutdownTrigger {
    async fn handle(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        let response = self.inner.handle(request).await;
        if self.signal.request_shutdown() {
            debug!("First request served, server will shut down");
        }
        response
    }
}

/// Plain text response with the given status
pub fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hello_request() -> Request<Bytes> {
        Request::builder()
            .uri(HELLO_PATH)
            .body(Bytes::new())
            .unwrap()
    }

    async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for CountingHandler {
        async fn handle(&self, _request: Request<Bytes>) -> Response<Full<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            text_response(StatusCode::OK, "counted\n")
        }
    }

    #[tokio::test]
    async fn test_hello_handler() {
        let response = HelloHandler.handle(hello_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_of(response).await, HELLO_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_trigger_requests_shutdown_after_response() {
        let signal = Arc::new(ShutdownSignal::new());
        let trigger = ShutdownTrigger::new(Arc::new(HelloHandler), signal.clone());
        assert!(!signal.is_shutdown_requested());

        let response = trigger.handle(hello_request()).await;
        assert_eq!(body_of(response).await, HELLO_BODY.as_bytes());
        assert!(signal.is_shutdown_requested());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_trigger_fires_once_under_concurrency() {
        let signal = Arc::new(ShutdownSignal::new());
        let counting = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let trigger = Arc::new(ShutdownTrigger::new(counting.clone(), signal.clone()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let trigger = trigger.clone();
            handles.push(tokio::spawn(async move {
                trigger.handle(hello_request()).await.status()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), StatusCode::OK);
        }

        assert_eq!(counting.calls.load(Ordering::SeqCst), 32);
        assert_eq!(signal.timeline(), (Some(1), None));
    }
}
