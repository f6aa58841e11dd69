/**
 * Signed attachment URL codec.
 *  Splits download URLs into the stored
 *  base plus `ex`/`is`/`hm` and back.
 */
pub mod codec;
/**
 * Engine configuration and entry point.
 *  Resolves the token class into a chunk size
 *  and upload protocol, and hands out
 *  writers, readers and refreshes.
 */
pub mod driver;
/**
 * Virtual filesystem: the metadata model,
 *  its provider trait and an in-memory provider.
 */
pub mod fs;
/**
 * Chunk descriptors, the unit of a
 *  content index.
 */
pub mod node;
/**
 * Lazy ranged reads over a content index.
 */
pub mod reader;
/**
 * Re-signing of expired chunk descriptors.
 */
pub mod refresher;
/**
 * Transport layer: HTTP client seam, credential
 *  and channel rotation, rate limiting, retries
 *  and the upload protocols.
 */
pub mod rest;
/**
 * In-process stand-in for the remote platform,
 *  for tests.
 */
pub mod testkit;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;
/**
 * Chunked uploads, sequential and concurrent.
 */
pub mod writer;

pub mod prelude {
    pub use crate::codec::CodecError;
    pub use crate::driver::{Config, ConfigError, Driver, TokenType};
    pub use crate::fs::{
        DataProvider, DataProviderError, File, FileWriter, Fs, FsError, MemoryDataProvider,
        Snapshot,
    };
    pub use crate::node::Node;
    pub use crate::reader::{ReadError, Reader};
    pub use crate::refresher::{RefreshError, RefreshReport};
    pub use crate::rest::{RestError, RetryPolicy, UploadProtocol};
    pub use crate::version::build_info;
    pub use crate::writer::{ChunkWriter, NWriter, WriteError, Writer};
}
