use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Local view of one remote rate-limit bucket
#[derive(Debug, Clone, Default)]
pub struct BucketState {
    /// Requests left before the reset, `None` while unknown
    pub remaining: Option<u64>,
    pub reset_at: Option<Instant>,
    pub last_request_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Bucket {
    // serializes requests sharing the bucket, held across one request
    gate: Arc<tokio::sync::Mutex<()>>,
    // quota counters, never held across an await
    state: Mutex<BucketState>,
}

/// Per-bucket admission control driven by the remote's rate-limit headers.
///
/// Best effort only: it keeps us from throttling ourselves, the
///  remote may still answer 429.
#[derive(Debug, Default)]
pub struct Limiter {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    global_until: Mutex<Option<Instant>>,
}

/// Admission to a bucket. Dropping it without `release`
///  frees the bucket but leaves its quota untouched.
#[derive(Debug)]
pub struct Permit {
    key: String,
    bucket: Arc<Bucket>,
    _gate: OwnedMutexGuard<()>,
}

impl Permit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, key: &str) -> Arc<Bucket> {
        self.buckets
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Wait until `key` may send a request
    pub async fn acquire(&self, key: &str) -> Permit {
        let bucket = self.bucket(key);
        let gate = bucket.gate.clone().lock_owned().await;

        while let Some(wait) = self.admission_delay(&bucket, Instant::now()) {
            tracing::debug!("rate limit: bucket {} waiting {:?}", key, wait);
            tokio::time::sleep(wait).await;
        }

        Permit {
            key: key.to_string(),
            bucket,
            _gate: gate,
        }
    }

    /// Either admit (consuming one unit of quota) or say how long to wait
    fn admission_delay(&self, bucket: &Bucket, now: Instant) -> Option<Duration> {
        if let Some(until) = *self.global_until.lock() {
            if until > now {
                return Some(until - now);
            }
        }

        let mut state = bucket.state.lock();
        if let Some(reset_at) = state.reset_at {
            if reset_at <= now {
                state.remaining = None;
                state.reset_at = None;
            } else if state.remaining == Some(0) {
                return Some(reset_at - now);
            }
        }
        if let Some(remaining) = state.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        state.last_request_at = Some(now);
        None
    }

    /// Feed the response headers back into the bucket and free it.
    ///  `None` means the request never got a response.
    pub fn release(&self, permit: Permit, headers: Option<&HeaderMap>) {
        let now = Instant::now();
        let mut state = permit.bucket.state.lock();
        state.last_request_at = Some(now);

        let Some(headers) = headers else {
            return;
        };

        if let Some(remaining) = header_value::<u64>(headers, HEADER_REMAINING) {
            state.remaining = Some(remaining);
        }
        if let Some(after) = header_secs(headers, HEADER_RESET_AFTER) {
            state.reset_at = Some(now + after);
        } else if let Some(reset) = header_value::<f64>(headers, HEADER_RESET) {
            let epoch_now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            let after = Duration::try_from_secs_f64(reset - epoch_now).unwrap_or_default();
            state.reset_at = Some(now + after);
        }

        if let Some(retry_after) = header_secs(headers, HEADER_RETRY_AFTER) {
            let until = now + retry_after;
            let global = headers
                .get(HEADER_GLOBAL)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));

            if global {
                drop(state);
                tracing::warn!("rate limit: global pause for {:?}", retry_after);
                let mut global_until = self.global_until.lock();
                *global_until = Some(global_until.map_or(until, |g| g.max(until)));
            } else {
                tracing::debug!(
                    "rate limit: bucket {} exhausted for {:?}",
                    permit.key,
                    retry_after
                );
                state.remaining = Some(0);
                state.reset_at = Some(state.reset_at.map_or(until, |r| r.max(until)));
            }
        }
    }

    /// Snapshot of a bucket's state, if it was ever used
    pub fn state(&self, key: &str) -> Option<BucketState> {
        let buckets = self.buckets.lock();
        buckets.get(key).map(|b| b.state.lock().clone())
    }
}

/// Whether a response tells [`Limiter::release`] how long to hold off
pub fn has_wait_hint(headers: &HeaderMap) -> bool {
    if header_secs(headers, HEADER_RETRY_AFTER).is_some() {
        return true;
    }
    let exhausted = header_value::<u64>(headers, HEADER_REMAINING) == Some(0);
    let resets = header_secs(headers, HEADER_RESET_AFTER).is_some()
        || header_value::<f64>(headers, HEADER_RESET).is_some();
    exhausted && resets
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<T>().ok())
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<Duration> {
    header_value::<f64>(headers, name).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
