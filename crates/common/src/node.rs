use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError, SignedUrl};

/**
 * Nodes
 * =====
 * A node describes one chunk of a content stream: where the chunk
 *  lives on the remote platform, the signature needed to download it,
 *  and its position within the stream.
 * The ordered list of nodes for a file is its content index. Byte
 *  offsets are never stored, they are recomputed from the sizes in
 *  order, so a persisted list must never be reordered.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Bare attachment URL, signature stripped
    pub url: String,
    /// Expiry of the signature, unix seconds
    pub ex: i64,
    /// Issue token, kept verbatim
    pub is: String,
    /// Signature, kept verbatim
    pub hm: String,
    /// Id of the message the attachment was posted in
    pub mid: u64,
    /// Chunk size in bytes
    pub size: u64,
    /// Position of the chunk within its stream
    pub index: u64,
}

impl Node {
    /// Build a node from a freshly signed attachment URL
    pub fn from_signed(
        signed_url: &str,
        mid: u64,
        size: u64,
        index: u64,
    ) -> Result<Self, CodecError> {
        let SignedUrl { base, ex, is, hm } = codec::decode(signed_url)?;
        Ok(Self {
            url: base,
            ex,
            is,
            hm,
            mid,
            size,
            index,
        })
    }

    /// The downloadable URL, signature re-attached
    pub fn signed_url(&self) -> String {
        codec::encode(&self.url, self.ex, &self.is, &self.hm)
    }

    /// Replace the signature with a freshly issued one, in place
    pub fn resign(&mut self, signed_url: &str) -> Result<(), CodecError> {
        let SignedUrl { base, ex, is, hm } = codec::decode(signed_url)?;
        self.url = base;
        self.ex = ex;
        self.is = is;
        self.hm = hm;
        Ok(())
    }

    /// The channel the attachment was posted in
    pub fn channel_id(&self) -> Result<String, CodecError> {
        codec::channel_id(&self.url)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.ex
    }
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Total length of a content stream
pub fn total_size(nodes: &[Node]) -> u64 {
    nodes.iter().map(|n| n.size).sum()
}
