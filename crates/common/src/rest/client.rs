use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use super::error::RestError;

/// A response body, consumed lazily
pub type ByteStream = BoxStream<'static, Result<Bytes, RestError>>;

/// An outgoing request, fully buffered
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: http::HeaderName, value: &str) -> Result<Self, RestError> {
        self.headers.insert(name, http::HeaderValue::from_str(value)?);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Build a response around an in-memory body
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: futures::stream::once(async move { Ok::<_, RestError>(body) }).boxed(),
        }
    }

    /// Drain the body into memory
    pub async fn bytes(self) -> Result<Bytes, RestError> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Drain the body and read it as (lossy) text, for error reporting
    pub async fn text(self) -> String {
        match self.bytes().await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(e) => format!("<unreadable body: {}>", e),
        }
    }
}

/// The seam between the transport client and the network.
///  `ReqwestClient` talks to the real platform, tests
///  plug in `testkit::MockPlatform`.
#[async_trait]
pub trait HttpClient: Send + Sync + Debug + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError>;
}

/// Production client backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

pub const USER_AGENT: &str = concat!("attache/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

impl ReqwestClient {
    pub fn new() -> Result<Self, RestError> {
        // NOTE: no overall timeout, chunk transfers can legitimately
        //  take longer than any sane value
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(RestError::from).boxed();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
