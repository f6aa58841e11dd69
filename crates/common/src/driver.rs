use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::node::{unix_now, Node};
use crate::reader::Reader;
use crate::refresher::{self, RefreshError, RefreshReport};
use crate::rest::{
    HttpClient, ReqwestClient, Rest, RestError, RetryPolicy, Rotator, UploadProtocol,
    DEFAULT_API_URL,
};
use crate::writer::{ChunkWriter, NWriter, Writer};

const MIB: u64 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no credentials configured")]
    MissingCredentials,
    #[error("no channels configured")]
    MissingChannels,
    #[error("invalid token type '{0}', expected 0-3 or bot|user|user_nitro|user_nitro_basic")]
    InvalidTokenType(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] RestError),
}

/// Credential class, decides the chunk size cap and the upload protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    #[default]
    Bot,
    User,
    UserNitro,
    UserNitroBasic,
}

impl TokenType {
    pub fn max_chunk_size(self) -> u64 {
        match self {
            TokenType::Bot | TokenType::User => 25 * MIB,
            TokenType::UserNitro => 500 * MIB,
            TokenType::UserNitroBasic => 50 * MIB,
        }
    }

    /// Clamp a requested chunk size to this class's cap.
    ///  Anything non-positive or above the cap becomes the cap.
    pub fn resolve_chunk_size(self, requested: i64) -> u64 {
        let cap = self.max_chunk_size();
        match u64::try_from(requested) {
            Ok(size) if size > 0 && size <= cap => size,
            _ => cap,
        }
    }

    /// Only large nitro chunks need the pre-signed upload path
    pub fn upload_protocol(self, chunk_size: u64) -> UploadProtocol {
        match self {
            TokenType::UserNitro if chunk_size > 100 * MIB => UploadProtocol::TwoPhase,
            _ => UploadProtocol::Multipart,
        }
    }

    /// Value of the `Authorization` header for `token`
    pub fn authorization(self, token: &str) -> String {
        match self {
            TokenType::Bot => format!("Bot {}", token),
            _ => token.to_string(),
        }
    }
}

impl TryFrom<u8> for TokenType {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TokenType::Bot),
            1 => Ok(TokenType::User),
            2 => Ok(TokenType::UserNitro),
            3 => Ok(TokenType::UserNitroBasic),
            other => Err(ConfigError::InvalidTokenType(other.to_string())),
        }
    }
}

impl FromStr for TokenType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return TokenType::try_from(n);
        }
        match s.to_ascii_lowercase().as_str() {
            "bot" => Ok(TokenType::Bot),
            "user" => Ok(TokenType::User),
            "user_nitro" => Ok(TokenType::UserNitro),
            "user_nitro_basic" => Ok(TokenType::UserNitroBasic),
            _ => Err(ConfigError::InvalidTokenType(s.to_string())),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenType::Bot => "bot",
            TokenType::User => "user",
            TokenType::UserNitro => "user_nitro",
            TokenType::UserNitroBasic => "user_nitro_basic",
        };
        write!(f, "{}", name)
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("hardcoded URL must parse")
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Comma separated credentials
    pub token: String,
    #[serde(default)]
    pub token_type: TokenType,
    /// Comma separated channel ids
    pub channels: String,
    /// Requested chunk size in bytes, clamped to the token class cap
    #[serde(default)]
    pub chunk_size: i64,
    /// Upload chunks concurrently
    #[serde(default)]
    pub async_write: bool,
    /// Give up after this many transient failures, retry forever if unset
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_api_url")]
    pub api_url: Url,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_type: TokenType::default(),
            channels: String::new(),
            chunk_size: 0,
            async_write: false,
            max_retries: None,
            api_url: default_api_url(),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Credentials as `Authorization` header values
    pub fn credentials(&self) -> Vec<String> {
        split_list(&self.token)
            .iter()
            .map(|t| self.token_type.authorization(t))
            .collect()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        split_list(&self.channels)
    }
}

/// Entry point to the storage engine.
///  Cheap to clone, every clone shares one transport client
///  (and so one set of rotation cursors and rate-limit buckets).
#[derive(Debug, Clone)]
pub struct Driver {
    rest: Arc<Rest>,
    chunk_size: usize,
    async_write: bool,
}

impl Driver {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let client = ReqwestClient::new()?;
        Self::with_client(config, Arc::new(client))
    }

    /// Build a driver on top of a custom HTTP client
    pub fn with_client(config: &Config, client: Arc<dyn HttpClient>) -> Result<Self, ConfigError> {
        let rotator = Rotator::new(config.credentials(), config.channel_ids())?;

        let chunk_size = config.token_type.resolve_chunk_size(config.chunk_size);
        let protocol = config.token_type.upload_protocol(chunk_size);
        let retry = RetryPolicy::default().with_max_attempts(config.max_retries);

        tracing::info!(
            "driver: {} credential(s), {} channel(s), {} tokens, chunk size {} bytes, {:?} uploads",
            rotator.credentials(),
            rotator.channels(),
            config.token_type,
            chunk_size,
            protocol
        );

        let rest = Rest::new(client, rotator, &config.api_url)
            .with_protocol(protocol)
            .with_retry_policy(retry);

        Ok(Self {
            rest: Arc::new(rest),
            chunk_size: chunk_size as usize,
            async_write: config.async_write,
        })
    }

    pub fn rest(&self) -> &Arc<Rest> {
        &self.rest
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn protocol(&self) -> UploadProtocol {
        self.rest.protocol()
    }

    pub fn async_write(&self) -> bool {
        self.async_write
    }

    /// Sequential writer, one chunk in flight
    pub fn new_writer<F>(&self, on_chunk: F) -> Writer
    where
        F: FnMut(Node) + Send + 'static,
    {
        Writer::new(self.rest.clone(), self.chunk_size, on_chunk)
    }

    /// Concurrent writer, as many chunks in flight as the pools allow
    pub fn new_nwriter<F>(&self, on_chunk: F) -> NWriter
    where
        F: FnMut(Node) + Send + 'static,
    {
        NWriter::new(self.rest.clone(), self.chunk_size, on_chunk)
    }

    /// The writer selected by `async_write`
    pub fn writer<F>(&self, on_chunk: F) -> Box<dyn ChunkWriter>
    where
        F: FnMut(Node) + Send + 'static,
    {
        if self.async_write {
            Box::new(self.new_nwriter(on_chunk))
        } else {
            Box::new(self.new_writer(on_chunk))
        }
    }

    /// Reader over the whole stream, starting at `pos`
    pub fn new_reader(&self, nodes: Vec<Node>, pos: u64) -> Reader {
        Reader::new(self.rest.clone(), nodes, pos)
    }

    /// Reader over `[start, end)`
    pub fn new_range_reader(&self, nodes: Vec<Node>, start: u64, end: u64) -> Reader {
        Reader::with_range(self.rest.clone(), nodes, start, end)
    }

    /// Re-sign every expired node in place
    pub async fn update_nodes(&self, nodes: &mut [Node]) -> Result<RefreshReport, RefreshError> {
        refresher::refresh(&self.rest, nodes, unix_now()).await
    }
}
