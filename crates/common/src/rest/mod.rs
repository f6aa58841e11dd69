/**
 * Transport client for the remote platform.
 *  Composes credential/channel rotation, per-bucket
 *  rate limiting and transient-failure retry on top of
 *  an injectable HTTP client.
 */
mod client;
mod error;
pub mod limiter;
mod retry;
mod rotator;
pub(crate) mod types;
mod upload;

use std::future::Future;
use std::sync::Arc;

use ::http::header::{AUTHORIZATION, RANGE};
use ::http::{Method, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::node::Node;

pub use client::{ByteStream, HttpClient, HttpRequest, HttpResponse, ReqwestClient, USER_AGENT};
pub use error::{is_transient, RestError};
pub use limiter::{has_wait_hint, BucketState, Limiter, Permit};
pub use retry::{retry_delay, RetryPolicy};
pub use rotator::{Credential, Rotator};
pub use types::{Attachment, Message, UploadTarget};
pub use upload::{multipart_body, UploadProtocol, UploadState, MULTIPART_BOUNDARY};

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";
/// Page size of a message lookup, the platform's maximum
pub const MESSAGES_PAGE_LIMIT: usize = 100;

/// Rate-limit bucket of a credential posting to / reading from a channel
pub fn bucket_key(credential: &Credential, channel: &str, resource: &str) -> String {
    format!("{}/channels/{}/{}", credential.slot, channel, resource)
}

#[derive(Debug)]
pub struct Rest {
    client: Arc<dyn HttpClient>,
    rotator: Rotator,
    limiter: Limiter,
    retry: RetryPolicy,
    protocol: UploadProtocol,
    // no trailing slash
    api_url: String,
}

impl Rest {
    pub fn new(client: Arc<dyn HttpClient>, rotator: Rotator, api_url: &Url) -> Self {
        Self {
            client,
            rotator,
            limiter: Limiter::new(),
            retry: RetryPolicy::default(),
            protocol: UploadProtocol::default(),
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_protocol(mut self, protocol: UploadProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn protocol(&self) -> UploadProtocol {
        self.protocol
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    /// How many uploads are worth running at once
    pub fn concurrency(&self) -> usize {
        self.rotator.credentials().max(self.rotator.channels())
    }

    fn endpoint(&self, path: &str) -> Result<Url, RestError> {
        Ok(Url::parse(&format!("{}{}", self.api_url, path))?)
    }

    /// Issue one request, going through the limiter when a bucket is given
    async fn send(
        &self,
        bucket: Option<&str>,
        request: HttpRequest,
    ) -> Result<HttpResponse, RestError> {
        tracing::debug!("{} {}", request.method, redact(&request.url));

        let Some(bucket) = bucket else {
            return self.client.execute(request).await;
        };

        let permit = self.limiter.acquire(bucket).await;
        match self.client.execute(request).await {
            Ok(response) => {
                self.limiter.release(permit, Some(&response.headers));
                Ok(response)
            }
            Err(e) => {
                self.limiter.release(permit, None);
                Err(e)
            }
        }
    }

    /// Run `attempt` until it succeeds or fails for good.
    ///  429 and 5xx restart the whole attempt after a backoff, except
    ///  a 429 whose headers already had the limiter hold the bucket.
    async fn retrying<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, RestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RestError>>,
    {
        let mut attempts = 0;
        loop {
            match attempt().await {
                Err(RestError::Status {
                    status,
                    wait_hinted,
                    ..
                }) if is_transient(status) => {
                    attempts += 1;
                    if !self.retry.allows(attempts) {
                        return Err(RestError::RetriesExhausted {
                            op,
                            attempts,
                            status,
                        });
                    }
                    tracing::warn!("{}: received {}, retrying (attempt {})", op, status, attempts);
                    if status.is_server_error() || !wait_hinted {
                        tokio::time::sleep(self.retry.delay(attempts)).await;
                    }
                }
                result => return result,
            }
        }
    }

    /// Upload one chunk as an attachment. The returned node
    ///  is at position 0, the caller assigns the real index.
    pub async fn create_attachment(&self, data: Bytes) -> Result<Node, RestError> {
        match self.protocol {
            UploadProtocol::Multipart => {
                self.retrying("create attachment", move || {
                    self.upload_multipart(data.clone())
                })
                .await
            }
            UploadProtocol::TwoPhase => {
                self.retrying("create attachment", move || {
                    self.upload_two_phase(data.clone())
                })
                .await
            }
        }
    }

    /// Ranged download of `start..=end` (chunk-local offsets)
    pub async fn read_attachment(
        &self,
        node: &Node,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, RestError> {
        let url = Url::parse(&node.signed_url())?;
        let range = format!("bytes={}-{}", start, end);

        let mut attempts = 0;
        loop {
            let request = HttpRequest::new(Method::GET, url.clone()).header(RANGE, &range)?;
            let response = self.send(None, request).await?;

            let status = response.status;
            if status.is_server_error() {
                attempts += 1;
                if !self.retry.allows(attempts) {
                    return Err(RestError::RetriesExhausted {
                        op: "read attachment",
                        attempts,
                        status,
                    });
                }
                tracing::warn!(
                    "read attachment {}: received {}, retrying (attempt {})",
                    node.mid,
                    status,
                    attempts
                );
                tokio::time::sleep(self.retry.delay(attempts)).await;
                continue;
            }

            let response =
                expect_status("read attachment", StatusCode::PARTIAL_CONTENT, response).await?;
            return Ok(response.body);
        }
    }

    /// One page of messages in `channel`, oldest first, strictly after `after`
    pub async fn get_messages(
        &self,
        channel: &str,
        after: Option<u64>,
    ) -> Result<Vec<Message>, RestError> {
        self.retrying("get messages", move || self.get_messages_once(channel, after))
            .await
    }

    async fn get_messages_once(
        &self,
        channel: &str,
        after: Option<u64>,
    ) -> Result<Vec<Message>, RestError> {
        let credential = self.rotator.next_credential();
        let mut url = self.endpoint(&format!("/channels/{}/messages", channel))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &MESSAGES_PAGE_LIMIT.to_string());
            if let Some(after) = after {
                query.append_pair("after", &after.to_string());
            }
        }

        let request =
            HttpRequest::new(Method::GET, url).header(AUTHORIZATION, &credential.authorization)?;
        let bucket = bucket_key(&credential, channel, "messages");
        let response = self.send(Some(&bucket), request).await?;
        let response = expect_status("get messages", StatusCode::OK, response).await?;
        read_json(response).await
    }
}

/// Pass the response through if it has the expected status,
///  otherwise turn it into a `RestError::Status` carrying the body
async fn expect_status(
    op: &'static str,
    expected: StatusCode,
    response: HttpResponse,
) -> Result<HttpResponse, RestError> {
    if response.status == expected {
        return Ok(response);
    }
    let status = response.status;
    let wait_hinted = has_wait_hint(&response.headers);
    let body = response.text().await;
    Err(RestError::Status {
        op,
        expected,
        status,
        body,
        wait_hinted,
    })
}

async fn read_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, RestError> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Signed URLs are credentials of their own, keep them out of logs
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
