//! Per-session HTTP transport
//!
//! Every account session owns one [`HttpTransport`]. The live implementation
//! is backed by `reqwest`; middleware such as the auth adapter wraps another
//! transport and is itself a transport, so sessions can be assembled from
//! layers and tested against an in-memory fake.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

/// Outbound HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Build a `GET` request with no headers
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Build a `POST` request carrying a body
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }
}

/// Inbound HTTP response, fully buffered
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// A channel able to perform HTTP exchanges for one session
pub trait HttpTransport: Send + Sync {
    /// Send a request and buffer the full response
    ///
    /// Non-2xx statuses are returned as responses, not errors; only failures
    /// to complete the exchange are errors.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, AppResult<HttpResponse>>;
}

/// Shared, type-erased transport handle
pub type SharedTransport = Arc<dyn HttpTransport>;

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the configured connect and request timeouts
    ///
    /// Each session gets its own client so no connection state or default
    /// headers are shared between accounts.
    pub fn new(config: &ServerConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("jmap-mcp-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, AppResult<HttpResponse>> {
        Box::pin(async move {
            let url = request.url.clone();
            let mut builder = self
                .client
                .request(request.method, request.url.as_str())
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    AppError::Connectivity(format!("request to {url} timed out"))
                } else {
                    AppError::Connectivity(format!("request to {url} failed: {e}"))
                }
            })?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| AppError::Connectivity(format!("reading response from {url}: {e}")))?
                .to_vec();
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory transport for tests

    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use reqwest::StatusCode;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

    use super::{HttpRequest, HttpResponse, HttpTransport};
    use crate::errors::AppResult;

    type Responder = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

    /// Records every request and answers with a caller-supplied responder
    pub struct FakeTransport {
        responder: Responder,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub fn new(responder: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
            Self {
                responder: Box::new(responder),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("fake transport lock").clone()
        }
    }

    impl HttpTransport for FakeTransport {
        fn send(&self, request: HttpRequest) -> BoxFuture<'_, AppResult<HttpResponse>> {
            let response = (self.responder)(&request);
            self.requests
                .lock()
                .expect("fake transport lock")
                .push(request);
            Box::pin(async move { Ok(response) })
        }
    }

    pub fn json_response(value: &serde_json::Value) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        HttpResponse {
            status: StatusCode::OK,
            headers,
            body: serde_json::to_vec(value).expect("serializable"),
        }
    }

    pub fn text_response(status: StatusCode, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }
}
