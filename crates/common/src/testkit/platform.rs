use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, RANGE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use crate::node::unix_now;
use crate::rest::limiter::HEADER_RETRY_AFTER;
use crate::rest::{
    HttpClient, HttpRequest, HttpResponse, RestError, MESSAGES_PAGE_LIMIT, MULTIPART_BOUNDARY,
};
use crate::rest::types::{FinalizeRequest, UploadTargetRequest};

const API_HOST: &str = "api.mock.test";
const CDN_HOST: &str = "cdn.mock.test";
const UPLOAD_HOST: &str = "upload.mock.test";
const DEFAULT_TTL: i64 = 24 * 60 * 60;

/// The kinds of request the platform serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Multipart POST to the messages endpoint
    Multipart,
    /// First leg of a two-phase upload
    RequestUrl,
    /// Second leg, the pre-signed PUT
    Put,
    /// Third leg, the message referencing the uploaded file
    Finalize,
    /// Message history page
    Lookup,
    /// Ranged CDN download
    Download,
}

type UploadDelay = Arc<dyn Fn(&[u8]) -> Duration + Send + Sync>;

struct Stored {
    channel: String,
    attachment_id: u64,
    filename: String,
    data: Bytes,
    hidden: bool,
}

struct Staged {
    declared: u64,
    data: Option<Bytes>,
}

struct Inner {
    next_id: u64,
    messages: BTreeMap<u64, Stored>,
    staged: HashMap<String, Staged>,
    failures: HashMap<Leg, VecDeque<StatusCode>>,
    requests: HashMap<Leg, usize>,
    put_authorizations: Vec<Option<String>>,
    ranges: Vec<String>,
    ttl: i64,
    short_downloads: bool,
    bare_rate_limits: bool,
    upload_delay: Option<UploadDelay>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            next_id: 1_000_000,
            messages: BTreeMap::new(),
            staged: HashMap::new(),
            failures: HashMap::new(),
            requests: HashMap::new(),
            put_authorizations: Vec::new(),
            ranges: Vec::new(),
            ttl: DEFAULT_TTL,
            short_downloads: false,
            bare_rate_limits: false,
            upload_delay: None,
        }
    }
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn store(&mut self, channel: &str, filename: &str, data: Bytes) -> u64 {
        let mid = self.next_id();
        let attachment_id = self.next_id();
        self.messages.insert(
            mid,
            Stored {
                channel: channel.to_string(),
                attachment_id,
                filename: filename.to_string(),
                data,
                hidden: false,
            },
        );
        mid
    }

    /// The message as the platform would return it, freshly signed
    fn message_json(&self, mid: u64) -> serde_json::Value {
        let Some(stored) = self.messages.get(&mid) else {
            return serde_json::Value::Null;
        };
        let issued = unix_now();
        let ex = issued + self.ttl;
        let is = format!("{:x}", issued);
        let hm = sign(stored.attachment_id, ex, &is);
        let url = format!(
            "https://{}/attachments/{}/{}/{}?ex={:x}&is={}&hm={}&",
            CDN_HOST, stored.channel, stored.attachment_id, stored.filename, ex, is, hm
        );
        json!({
            "id": mid.to_string(),
            "channel_id": stored.channel,
            "content": "",
            "attachments": [{
                "id": stored.attachment_id.to_string(),
                "filename": stored.filename,
                "size": stored.data.len(),
                "url": url,
                "content_type": "application/octet-stream",
            }],
        })
    }
}

fn sign(attachment_id: u64, ex: i64, is: &str) -> String {
    let mut hasher = DefaultHasher::new();
    ("attache-mock", attachment_id, ex, is).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// An in-process stand-in for the remote platform: message uploads
///  (both protocols), message history and a CDN that checks signatures
///  and serves byte ranges. Failures, latency and signature expiry can
///  be scripted per test.
pub struct MockPlatform {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MockPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MockPlatform")
            .field("messages", &inner.messages.len())
            .field("requests", &inner.requests)
            .finish_non_exhaustive()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn api_url(&self) -> Url {
        Url::parse(&format!("https://{}/api/v10", API_HOST)).expect("hardcoded URL must parse")
    }

    /* Scripting */

    /// Answer the next `n` requests of `leg` with `status`
    pub fn fail_leg(&self, leg: Leg, status: StatusCode, n: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.failures.entry(leg).or_default();
        queue.extend(std::iter::repeat(status).take(n));
    }

    pub fn fail_next_uploads(&self, status: StatusCode, n: usize) {
        self.fail_leg(Leg::Multipart, status, n);
    }

    /// Send scripted 429s without any `retry-after` header
    pub fn set_bare_rate_limits(&self, bare: bool) {
        self.inner.lock().bare_rate_limits = bare;
    }

    /// Delay every upload by a duration chosen from its payload
    pub fn set_upload_delay<F>(&self, delay: F)
    where
        F: Fn(&[u8]) -> Duration + Send + Sync + 'static,
    {
        self.inner.lock().upload_delay = Some(Arc::new(delay));
    }

    /// Lifetime of signatures issued from now on, negative to hand out
    ///  already expired ones
    pub fn set_signature_ttl(&self, ttl: i64) {
        self.inner.lock().ttl = ttl;
    }

    /// Leave a message out of history lookups
    pub fn hide_message(&self, mid: u64) {
        if let Some(stored) = self.inner.lock().messages.get_mut(&mid) {
            stored.hidden = true;
        }
    }

    /// Serve one byte less than asked for
    pub fn set_short_downloads(&self, short: bool) {
        self.inner.lock().short_downloads = short;
    }

    /* Inspection */

    pub fn leg_requests(&self, leg: Leg) -> usize {
        self.inner.lock().requests.get(&leg).copied().unwrap_or(0)
    }

    pub fn upload_requests(&self) -> usize {
        self.leg_requests(Leg::Multipart)
    }

    pub fn lookup_requests(&self) -> usize {
        self.leg_requests(Leg::Lookup)
    }

    pub fn download_requests(&self) -> usize {
        self.leg_requests(Leg::Download)
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Content of the attachment posted in message `mid`
    pub fn stored(&self, mid: u64) -> Option<Bytes> {
        self.inner.lock().messages.get(&mid).map(|s| s.data.clone())
    }

    /// `Authorization` header seen by each pre-signed PUT
    pub fn put_authorizations(&self) -> Vec<Option<String>> {
        self.inner.lock().put_authorizations.clone()
    }

    /// `Range` header of each download, in order
    pub fn requested_ranges(&self) -> Vec<String> {
        self.inner.lock().ranges.clone()
    }

    /* Serving */

    /// Count the request, and answer it with a scripted failure if one is queued
    fn begin(&self, leg: Leg) -> Option<HttpResponse> {
        let mut inner = self.inner.lock();
        *inner.requests.entry(leg).or_default() += 1;
        let status = inner.failures.get_mut(&leg).and_then(|q| q.pop_front())?;

        let mut headers = HeaderMap::new();
        if status == StatusCode::TOO_MANY_REQUESTS && !inner.bare_rate_limits {
            headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("0.05"));
        }
        Some(error(status, headers, "scripted failure"))
    }

    async fn delay_upload(&self, payload: &[u8]) {
        let delay = self.inner.lock().upload_delay.clone();
        if let Some(delay) = delay {
            tokio::time::sleep(delay(payload)).await;
        }
    }

    async fn api(&self, request: HttpRequest) -> HttpResponse {
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| s.map(str::to_string).collect())
            .unwrap_or_default();
        let (channel, resource) = match segments.as_slice() {
            [_, _, channels, channel, resource] if channels == "channels" => {
                (channel.clone(), resource.clone())
            }
            _ => return error(StatusCode::NOT_FOUND, HeaderMap::new(), "unknown route"),
        };

        if !request.headers.contains_key(AUTHORIZATION) {
            return error(StatusCode::UNAUTHORIZED, HeaderMap::new(), "missing credential");
        }

        let multipart = request
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        match (request.method.clone(), resource.as_str()) {
            (Method::POST, "messages") if multipart => self.multipart(&channel, request).await,
            (Method::POST, "messages") => self.finalize(&channel, request),
            (Method::GET, "messages") => self.lookup(&channel, &request.url),
            (Method::POST, "attachments") => self.request_url(request),
            _ => error(StatusCode::METHOD_NOT_ALLOWED, HeaderMap::new(), "unsupported"),
        }
    }

    async fn multipart(&self, channel: &str, request: HttpRequest) -> HttpResponse {
        if let Some(failure) = self.begin(Leg::Multipart) {
            return failure;
        }
        let Some(data) = request.body.as_deref().and_then(parse_multipart) else {
            return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "bad multipart body");
        };
        self.delay_upload(&data).await;

        let mut inner = self.inner.lock();
        let mid = inner.store(channel, "blob", data);
        json_response(StatusCode::OK, &inner.message_json(mid))
    }

    fn request_url(&self, request: HttpRequest) -> HttpResponse {
        if let Some(failure) = self.begin(Leg::RequestUrl) {
            return failure;
        }
        let Some(body) = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice::<UploadTargetRequest>(b).ok())
        else {
            return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "bad upload request");
        };
        let Some(file) = body.files.first() else {
            return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "no files");
        };

        let mut inner = self.inner.lock();
        let name = format!("{}-{}", inner.next_id(), file.filename);
        inner.staged.insert(
            format!("uploads/{}", name),
            Staged {
                declared: file.file_size,
                data: None,
            },
        );
        json_response(
            StatusCode::OK,
            &json!({
                "attachments": [{
                    "id": 0,
                    "upload_url": format!("https://{}/upload/{}", UPLOAD_HOST, name),
                    "upload_filename": format!("uploads/{}", name),
                }]
            }),
        )
    }

    async fn put(&self, request: HttpRequest) -> HttpResponse {
        let authorization = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.inner.lock().put_authorizations.push(authorization);

        if let Some(failure) = self.begin(Leg::Put) {
            return failure;
        }
        if request.method != Method::PUT {
            return error(StatusCode::METHOD_NOT_ALLOWED, HeaderMap::new(), "put only");
        }
        let name = request.url.path().trim_start_matches("/upload/").to_string();
        let data = request.body.unwrap_or_default();
        self.delay_upload(&data).await;

        let mut inner = self.inner.lock();
        match inner.staged.get_mut(&format!("uploads/{}", name)) {
            Some(staged) if staged.declared == data.len() as u64 => {
                staged.data = Some(data);
                HttpResponse::buffered(StatusCode::OK, HeaderMap::new(), Bytes::new())
            }
            Some(_) => error(StatusCode::BAD_REQUEST, HeaderMap::new(), "size mismatch"),
            None => error(StatusCode::NOT_FOUND, HeaderMap::new(), "unknown upload"),
        }
    }

    fn finalize(&self, channel: &str, request: HttpRequest) -> HttpResponse {
        if let Some(failure) = self.begin(Leg::Finalize) {
            return failure;
        }
        let Some(body) = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice::<FinalizeRequest>(b).ok())
        else {
            return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "bad message body");
        };
        let Some(attachment) = body.attachments.first() else {
            return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "empty message");
        };

        let mut inner = self.inner.lock();
        let data = match inner.staged.remove(&attachment.uploaded_filename) {
            Some(Staged {
                data: Some(data), ..
            }) => data,
            _ => return error(StatusCode::BAD_REQUEST, HeaderMap::new(), "nothing uploaded"),
        };
        let mid = inner.store(channel, &attachment.filename, data);
        json_response(StatusCode::OK, &inner.message_json(mid))
    }

    fn lookup(&self, channel: &str, url: &Url) -> HttpResponse {
        if let Some(failure) = self.begin(Leg::Lookup) {
            return failure;
        }
        let mut limit = MESSAGES_PAGE_LIMIT;
        let mut after = 0;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "limit" => limit = value.parse().unwrap_or(limit),
                "after" => after = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        let inner = self.inner.lock();
        let page: Vec<serde_json::Value> = inner
            .messages
            .range(after + 1..)
            .filter(|(_, s)| s.channel == channel && !s.hidden)
            .take(limit)
            .map(|(mid, _)| inner.message_json(*mid))
            .collect();
        json_response(StatusCode::OK, &serde_json::Value::Array(page))
    }

    fn download(&self, request: HttpRequest) -> HttpResponse {
        if let Some(failure) = self.begin(Leg::Download) {
            return failure;
        }

        let mut inner = self.inner.lock();
        let range = request
            .headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(range) = &range {
            inner.ranges.push(range.clone());
        }

        let attachment_id: Option<u64> = request
            .url
            .path_segments()
            .and_then(|mut s| s.nth(2))
            .and_then(|s| s.parse().ok());
        let Some(stored) = inner
            .messages
            .values()
            .find(|s| Some(s.attachment_id) == attachment_id)
        else {
            return error(StatusCode::NOT_FOUND, HeaderMap::new(), "no such attachment");
        };

        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let ex = query
            .get("ex")
            .and_then(|ex| i64::from_str_radix(ex, 16).ok())
            .unwrap_or(i64::MIN);
        let is = query.get("is").cloned().unwrap_or_default();
        let valid = query.get("hm") == Some(&sign(stored.attachment_id, ex, &is));
        if !valid || ex < unix_now() {
            return error(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                "This content is no longer available.",
            );
        }

        let len = stored.data.len() as u64;
        let Some((start, end)) = range.as_deref().and_then(|r| parse_range(r, len)) else {
            return error(StatusCode::RANGE_NOT_SATISFIABLE, HeaderMap::new(), "bad range");
        };
        let mut end = end + 1;
        if inner.short_downloads {
            end -= 1;
        }
        let body = stored.data.slice(start as usize..end as usize);
        HttpResponse::buffered(StatusCode::PARTIAL_CONTENT, HeaderMap::new(), body)
    }
}

#[async_trait]
impl HttpClient for MockPlatform {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        match host.as_str() {
            API_HOST => Ok(self.api(request).await),
            UPLOAD_HOST => Ok(self.put(request).await),
            CDN_HOST => Ok(self.download(request)),
            _ => Err(RestError::Transport(format!("unknown host '{}'", host))),
        }
    }
}

fn error(status: StatusCode, mut headers: HeaderMap, message: &str) -> HttpResponse {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = json!({ "message": message, "code": 0 }).to_string();
    HttpResponse::buffered(status, headers, body)
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    HttpResponse::buffered(status, headers, value.to_string())
}

/// The single file part of a body built by `multipart_body`
fn parse_multipart(body: &[u8]) -> Option<Bytes> {
    let head_end = body.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let tail = format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY);
    if !body.starts_with(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes())
        || !body.ends_with(tail.as_bytes())
        || head_end > body.len() - tail.len()
    {
        return None;
    }
    Some(Bytes::copy_from_slice(
        &body[head_end..body.len() - tail.len()],
    ))
}

/// `bytes=a-b` (inclusive) against a body of `len` bytes
fn parse_range(range: &str, len: u64) -> Option<(u64, u64)> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if start > end || start >= len {
        return None;
    }
    Some((start, end.min(len - 1)))
}
