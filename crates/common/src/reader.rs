use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::node::{unix_now, Node};
use crate::refresher::{self, RefreshError};
use crate::rest::{ByteStream, Rest, RestError};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("chunk download failed: {0}")]
    Rest(#[from] RestError),
    #[error("chunk from message {mid} has an expired signature that could not be refreshed")]
    Stale { mid: u64 },
    #[error("chunk body ended {missing} byte(s) early")]
    UnexpectedEof { missing: u64 },
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

/// The body of the chunk currently being read
struct Current {
    body: ByteStream,
    // bytes still expected from this body
    remaining: u64,
}

/// Reads a byte range of a content stream, downloading the chunks it
///  spans one after another, only when the previous one is used up.
///
/// Expired chunks are re-signed on the way; the reader then holds the
///  updated nodes, which the caller should persist (see [`Reader::nodes`]).
pub struct Reader {
    rest: Arc<Rest>,
    nodes: Vec<Node>,
    // [start, end) of each node within the stream
    offsets: Vec<(u64, u64)>,
    pos: u64,
    end: u64,
    // node the next download starts at
    cursor: usize,
    current: Option<Current>,
    // downloaded but not yet handed out by `read`
    leftover: Bytes,
    refreshed: bool,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("nodes", &self.nodes.len())
            .field("pos", &self.pos)
            .field("end", &self.end)
            .field("cursor", &self.cursor)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}

impl Reader {
    /// Read from `pos` to the end of the stream
    pub fn new(rest: Arc<Rest>, nodes: Vec<Node>, pos: u64) -> Self {
        Self::with_range(rest, nodes, pos, u64::MAX)
    }

    /// Read `[start, end)`, clamped to the stream length
    pub fn with_range(rest: Arc<Rest>, nodes: Vec<Node>, start: u64, end: u64) -> Self {
        let mut offsets = Vec::with_capacity(nodes.len());
        let mut total = 0;
        for node in &nodes {
            offsets.push((total, total + node.size));
            total += node.size;
        }

        let end = end.min(total);
        let pos = start.min(end);
        // first node holding `pos`, zero sized nodes never do
        let cursor = offsets.partition_point(|&(_, node_end)| node_end <= pos);

        Self {
            rest,
            nodes,
            offsets,
            pos,
            end,
            cursor,
            current: None,
            leftover: Bytes::new(),
            refreshed: false,
        }
    }

    /// The nodes, including any signature refreshed while reading
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Whether any node was re-signed and should be persisted
    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// Stream offset of the next byte handed out
    pub fn position(&self) -> u64 {
        self.pos - self.leftover.len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.position()
    }

    /// Re-sign the expired nodes from `cursor` on, then make sure
    ///  the node about to be downloaded is usable
    async fn ensure_fresh(&mut self) -> Result<(), ReadError> {
        let now = unix_now();
        if !self.nodes[self.cursor].is_expired(now) {
            return Ok(());
        }

        let report = refresher::refresh(&self.rest, &mut self.nodes[self.cursor..], now).await?;
        if report.refreshed > 0 {
            self.refreshed = true;
        }

        let node = &self.nodes[self.cursor];
        if node.is_expired(now) {
            return Err(ReadError::Stale { mid: node.mid });
        }
        Ok(())
    }

    /// Start downloading the part of the current node we need
    async fn open(&mut self) -> Result<(), ReadError> {
        // skip empty nodes
        while self.offsets[self.cursor].0 == self.offsets[self.cursor].1 {
            self.cursor += 1;
        }
        self.ensure_fresh().await?;

        let (node_start, node_end) = self.offsets[self.cursor];
        let local_start = self.pos - node_start;
        let local_end = self.end.min(node_end) - node_start;
        let node = &self.nodes[self.cursor];

        tracing::debug!(
            "reader: message {} bytes {}..{} (stream offset {})",
            node.mid,
            local_start,
            local_end,
            self.pos
        );
        let body = self
            .rest
            .read_attachment(node, local_start, local_end - 1)
            .await?;

        self.current = Some(Current {
            body,
            remaining: local_end - local_start,
        });
        self.cursor += 1;
        Ok(())
    }

    /// The next piece of the stream, `None` at the end
    pub async fn next_bytes(&mut self) -> Result<Option<Bytes>, ReadError> {
        if !self.leftover.is_empty() {
            return Ok(Some(std::mem::take(&mut self.leftover)));
        }

        loop {
            if self.pos >= self.end {
                self.current = None;
                return Ok(None);
            }

            let Some(current) = self.current.as_mut() else {
                self.open().await?;
                continue;
            };

            match current.body.next().await {
                Some(chunk) => {
                    let mut chunk = chunk?;
                    if chunk.is_empty() {
                        continue;
                    }
                    // never hand out more than the range we asked for
                    if chunk.len() as u64 > current.remaining {
                        chunk.truncate(current.remaining as usize);
                    }
                    current.remaining -= chunk.len() as u64;
                    if current.remaining == 0 {
                        self.current = None;
                    }
                    self.pos += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                None => {
                    let missing = current.remaining;
                    self.current = None;
                    if missing > 0 {
                        return Err(ReadError::UnexpectedEof { missing });
                    }
                }
            }
        }
    }

    /// Fill as much of `buf` as the next piece allows.
    ///  Returns 0 only at the end of the range.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(mut chunk) = self.next_bytes().await? else {
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.leftover = chunk.split_off(n);
        Ok(n)
    }

    /// Read the rest of the range into memory
    pub async fn read_to_end(&mut self) -> Result<Bytes, ReadError> {
        let mut out = BytesMut::with_capacity(self.remaining() as usize);
        while let Some(chunk) = self.next_bytes().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, ReadError>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_bytes().await?.map(|chunk| (chunk, reader)))
        })
    }
}
