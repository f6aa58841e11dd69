use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::node::Node;
use crate::rest::{Rest, RestError};

/// Called once per uploaded chunk, in stream order
pub type OnChunk = Box<dyn FnMut(Node) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("chunk upload failed: {0}")]
    Rest(#[from] RestError),
    #[error("write cancelled with {pending} chunk(s) not uploaded")]
    Cancelled { pending: u64 },
    #[error("writer is closed")]
    Closed,
    #[error("an earlier chunk failed, the stream is incomplete")]
    Failed,
    #[error("upload task failed: {0}")]
    Task(String),
}

/// Splits a byte stream into chunks and uploads them, reporting
///  each chunk's node in order through the `on_chunk` callback.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Buffer `data`, uploading every chunk it completes
    async fn write(&mut self, data: &[u8]) -> Result<(), WriteError>;

    /// Upload the trailing partial chunk and wait for every upload.
    ///  Calling it again is a no-op, unless an upload has failed:
    ///  then every call fails with [`WriteError::Failed`].
    async fn close(&mut self) -> Result<(), WriteError>;

    /// Bytes accepted so far
    fn written(&self) -> u64;
}

/* Sequential */

/// One chunk in flight, `write` waits for its upload
pub struct Writer {
    rest: Arc<Rest>,
    chunk_size: usize,
    buf: BytesMut,
    next_index: u64,
    written: u64,
    on_chunk: OnChunk,
    closed: bool,
    failed: bool,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("chunk_size", &self.chunk_size)
            .field("buffered", &self.buf.len())
            .field("next_index", &self.next_index)
            .field("written", &self.written)
            .field("closed", &self.closed)
            .field("failed", &self.failed)
            .finish()
    }
}

impl Writer {
    pub fn new<F>(rest: Arc<Rest>, chunk_size: usize, on_chunk: F) -> Self
    where
        F: FnMut(Node) + Send + 'static,
    {
        let chunk_size = chunk_size.max(1);
        Self {
            rest,
            chunk_size,
            buf: BytesMut::with_capacity(chunk_size),
            next_index: 0,
            written: 0,
            on_chunk: Box::new(on_chunk),
            closed: false,
            failed: false,
        }
    }

    async fn fill(&mut self, mut data: &[u8]) -> Result<(), WriteError> {
        while !data.is_empty() {
            let take = (self.chunk_size - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == self.chunk_size {
                let chunk = self.buf.split().freeze();
                Self::upload(&self.rest, &mut self.next_index, &mut self.on_chunk, chunk).await?;
            }
        }
        Ok(())
    }

    async fn upload(
        rest: &Rest,
        index: &mut u64,
        on_chunk: &mut OnChunk,
        chunk: Bytes,
    ) -> Result<(), WriteError> {
        let mut node = rest.create_attachment(chunk).await?;
        node.index = *index;
        *index += 1;
        tracing::debug!("writer: chunk {} uploaded as message {}", node.index, node.mid);
        on_chunk(node);
        Ok(())
    }
}

#[async_trait]
impl ChunkWriter for Writer {
    async fn write(&mut self, data: &[u8]) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::Closed);
        }

        let result = self.fill(data).await;

        match result {
            Ok(()) => {
                self.written += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                // the stream has a hole now, nothing after it may be uploaded
                self.closed = true;
                self.failed = true;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        if self.failed {
            return Err(WriteError::Failed);
        }
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.buf.is_empty() {
            let chunk = self.buf.split().freeze();
            let uploaded =
                Self::upload(&self.rest, &mut self.next_index, &mut self.on_chunk, chunk).await;
            if uploaded.is_err() {
                self.failed = true;
            }
            uploaded?;
        }
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

/* Concurrent */

/// A finished upload waiting for its predecessors, ordered by index
#[derive(Debug)]
struct Completed(Node);

impl PartialEq for Completed {
    fn eq(&self, other: &Self) -> bool {
        self.0.index == other.0.index
    }
}

impl Eq for Completed {}

impl PartialOrd for Completed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Completed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.index.cmp(&other.0.index)
    }
}

type Completion = (u64, Result<Node, RestError>);

/// Uploads chunks on their own tasks, bounded by the size of the
///  credential/channel pools. Nodes still reach `on_chunk` in order:
///  completions sit in a reorder buffer until their predecessor is out.
pub struct NWriter {
    rest: Arc<Rest>,
    chunk_size: usize,
    buf: BytesMut,
    written: u64,

    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,

    // next index handed to a task
    dispatched: u64,
    // next index handed to on_chunk
    emitted: u64,
    reorder: BinaryHeap<Reverse<Completed>>,
    on_chunk: OnChunk,

    failure: Option<WriteError>,
    closed: bool,
    failed: bool,
}

impl std::fmt::Debug for NWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NWriter")
            .field("chunk_size", &self.chunk_size)
            .field("buffered", &self.buf.len())
            .field("in_flight", &self.tasks.len())
            .field("dispatched", &self.dispatched)
            .field("emitted", &self.emitted)
            .field("reordering", &self.reorder.len())
            .field("closed", &self.closed)
            .field("failed", &self.failed)
            .finish()
    }
}

impl NWriter {
    pub fn new<F>(rest: Arc<Rest>, chunk_size: usize, on_chunk: F) -> Self
    where
        F: FnMut(Node) + Send + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let width = rest.concurrency().max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rest,
            chunk_size,
            buf: BytesMut::with_capacity(chunk_size),
            written: 0,
            slots: Arc::new(Semaphore::new(width)),
            tasks: JoinSet::new(),
            tx,
            rx,
            dispatched: 0,
            emitted: 0,
            reorder: BinaryHeap::new(),
            on_chunk: Box::new(on_chunk),
            failure: None,
            closed: false,
            failed: false,
        }
    }

    /// Chunks uploaded or in flight that have not reached `on_chunk` yet
    pub fn pending(&self) -> u64 {
        self.dispatched - self.emitted
    }

    async fn dispatch(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        // waiting for a slot is our back-pressure
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| WriteError::Task(e.to_string()))?;

        let index = self.dispatched;
        self.dispatched += 1;

        let rest = self.rest.clone();
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let result = rest.create_attachment(chunk).await;
            // receiver only goes away with the writer
            let _ = tx.send((index, result));
            drop(slot);
        });
        tracing::debug!("nwriter: chunk {} dispatched", index);

        self.drain();
        self.check()
    }

    /// Take in every completion that has arrived so far
    fn drain(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            self.accept(completion);
        }
    }

    fn accept(&mut self, (index, result): Completion) {
        match result {
            Ok(mut node) => {
                node.index = index;
                tracing::debug!("nwriter: chunk {} uploaded as message {}", index, node.mid);
                self.reorder.push(Reverse(Completed(node)));
            }
            Err(e) => {
                tracing::warn!("nwriter: chunk {} failed: {}", index, e);
                if self.failure.is_none() {
                    self.failure = Some(e.into());
                }
            }
        }

        while self
            .reorder
            .peek()
            .is_some_and(|Reverse(Completed(node))| node.index == self.emitted)
        {
            if let Some(Reverse(Completed(node))) = self.reorder.pop() {
                self.emitted += 1;
                (self.on_chunk)(node);
            }
        }
    }

    /// Surface the first failure, stopping everything still running
    fn check(&mut self) -> Result<(), WriteError> {
        match self.failure.take() {
            Some(e) => {
                self.abort();
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// No further chunk may be uploaded or reported as complete
    fn abort(&mut self) {
        self.closed = true;
        self.failed = true;
        self.tasks.abort_all();
    }

    /// Wait for every in-flight upload
    async fn join(&mut self) -> Result<(), WriteError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    self.abort();
                    return Err(WriteError::Task(e.to_string()));
                }
            }
            self.drain();
            self.check()?;
        }
        self.drain();
        self.check()
    }

    /// Abort every in-flight upload. Chunks that completed before the
    ///  abort are still reported in order, the rest are lost.
    pub async fn cancel(&mut self) -> Result<(), WriteError> {
        self.abort();
        while self.tasks.join_next().await.is_some() {}
        self.drain();

        let pending = self.pending();
        if pending > 0 {
            tracing::warn!("nwriter: cancelled with {} chunk(s) pending", pending);
            return Err(WriteError::Cancelled { pending });
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkWriter for NWriter {
    async fn write(&mut self, mut data: &[u8]) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::Closed);
        }
        let len = data.len() as u64;

        while !data.is_empty() {
            let take = (self.chunk_size - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == self.chunk_size {
                let chunk = self.buf.split().freeze();
                self.dispatch(chunk).await?;
            }
        }

        self.written += len;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        if self.failed {
            return Err(WriteError::Failed);
        }
        if self.closed {
            return Ok(());
        }

        if !self.buf.is_empty() {
            let chunk = self.buf.split().freeze();
            self.dispatch(chunk).await?;
        }
        self.closed = true;
        self.join().await?;

        if self.pending() > 0 {
            self.failed = true;
            return Err(WriteError::Task(format!(
                "{} chunk(s) never reported back",
                self.pending()
            )));
        }
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use parking_lot::Mutex;

    use super::*;
    use crate::rest::Rotator;
    use crate::testkit::MockPlatform;

    fn rest(platform: &Arc<MockPlatform>, pool: usize) -> Arc<Rest> {
        let rotator = Rotator::new(
            (0..pool).map(|i| format!("token-{}", i)).collect(),
            (0..pool).map(|i| format!("{}", 500 + i)).collect(),
        )
        .unwrap();
        Arc::new(Rest::new(platform.clone(), rotator, &platform.api_url()))
    }

    fn collector() -> (Arc<Mutex<Vec<Node>>>, impl FnMut(Node) + Send + 'static) {
        let nodes = Arc::new(Mutex::new(Vec::new()));
        let sink = nodes.clone();
        (nodes, move |node| sink.lock().push(node))
    }

    #[tokio::test]
    async fn test_sequential_chunking() {
        let platform = Arc::new(MockPlatform::new());
        let (nodes, on_chunk) = collector();
        let mut writer = Writer::new(rest(&platform, 1), 4, on_chunk);

        writer.write(b"abcdef").await.unwrap();
        assert_eq!(nodes.lock().len(), 1);
        writer.write(b"gh").await.unwrap();
        assert_eq!(nodes.lock().len(), 2);
        writer.write(b"i").await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let nodes = nodes.lock();
        let sizes: Vec<u64> = nodes.iter().map(|n| n.size).collect();
        let indices: Vec<u64> = nodes.iter().map(|n| n.index).collect();
        assert_eq!(sizes, [4, 4, 1]);
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(writer.written(), 9);
        assert!(matches!(writer.write(b"x").await, Err(WriteError::Closed)));
    }

    #[tokio::test]
    async fn test_empty_stream_uploads_nothing() {
        let platform = Arc::new(MockPlatform::new());
        let (nodes, on_chunk) = collector();
        let mut writer = NWriter::new(rest(&platform, 2), 4, on_chunk);

        writer.close().await.unwrap();
        assert!(nodes.lock().is_empty());
        assert_eq!(platform.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_emission_under_adversarial_delays() {
        let platform = Arc::new(MockPlatform::new());
        // earlier chunks take longer, completion order is the reverse of stream order
        platform.set_upload_delay(|payload| {
            Duration::from_millis(100 * (16 - payload.first().copied().unwrap_or(0) as u64))
        });

        let (nodes, on_chunk) = collector();
        let mut writer = NWriter::new(rest(&platform, 4), 3, on_chunk);

        let data: Vec<u8> = (0..10u8).flat_map(|i| [i; 3]).collect();
        writer.write(&data).await.unwrap();
        writer.close().await.unwrap();

        let nodes = nodes.lock();
        let indices: Vec<u64> = nodes.iter().map(|n| n.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());

        // message ids are handed out at completion, so they prove the reordering
        let mids: Vec<u64> = nodes.iter().map(|n| n.mid).collect();
        let mut sorted = mids.clone();
        sorted.sort();
        assert_ne!(mids, sorted);

        for node in nodes.iter() {
            assert_eq!(platform.stored(node.mid).unwrap(), vec![node.index as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_nwriter_surfaces_failure() {
        let platform = Arc::new(MockPlatform::new());
        platform.fail_next_uploads(StatusCode::BAD_REQUEST, 1);

        let (nodes, on_chunk) = collector();
        let mut writer = NWriter::new(rest(&platform, 1), 2, on_chunk);

        let mut result = writer.write(b"aabbcc").await;
        if result.is_ok() {
            result = writer.close().await;
        }
        assert!(matches!(result, Err(WriteError::Rest(_))));
        assert!(nodes.lock().is_empty());
        assert!(matches!(writer.write(b"x").await, Err(WriteError::Closed)));
        assert!(matches!(writer.close().await, Err(WriteError::Failed)));
    }

    #[tokio::test]
    async fn test_close_after_failed_write_is_an_error() {
        let platform = Arc::new(MockPlatform::new());
        let (nodes, on_chunk) = collector();
        let mut writer = Writer::new(rest(&platform, 1), 4, on_chunk);

        writer.write(b"aaaa").await.unwrap();
        platform.fail_next_uploads(StatusCode::BAD_REQUEST, 1);
        let err = writer.write(b"bbbbcccc").await.unwrap_err();
        assert!(matches!(err, WriteError::Rest(_)));

        assert!(matches!(writer.close().await, Err(WriteError::Failed)));
        assert!(matches!(writer.close().await, Err(WriteError::Failed)));
        assert_eq!(nodes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_trailing_chunk_fails_close() {
        let platform = Arc::new(MockPlatform::new());
        let (_nodes, on_chunk) = collector();
        let mut writer = Writer::new(rest(&platform, 1), 4, on_chunk);

        writer.write(b"ab").await.unwrap();
        platform.fail_next_uploads(StatusCode::BAD_REQUEST, 1);
        assert!(matches!(writer.close().await, Err(WriteError::Rest(_))));
        assert!(matches!(writer.close().await, Err(WriteError::Failed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_pending_chunks() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_upload_delay(|_| Duration::from_secs(60));

        let (nodes, on_chunk) = collector();
        let mut writer = NWriter::new(rest(&platform, 4), 2, on_chunk);

        writer.write(b"aabbcc").await.unwrap();
        assert_eq!(writer.pending(), 3);

        let err = writer.cancel().await.unwrap_err();
        assert!(matches!(err, WriteError::Cancelled { pending: 3 }));
        assert!(nodes.lock().is_empty());
        assert_eq!(platform.message_count(), 0);
        assert!(matches!(writer.close().await, Err(WriteError::Failed)));
    }
}
