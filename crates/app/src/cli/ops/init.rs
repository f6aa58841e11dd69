use std::path::PathBuf;

use clap::Args;
use common::driver::{Config, TokenType};
use url::Url;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Comma separated credentials
    #[arg(long)]
    pub token: String,

    /// Credential class: bot, user, user_nitro, user_nitro_basic (or 0-3)
    #[arg(long, default_value = "bot")]
    pub token_type: TokenType,

    /// Comma separated channel ids to store chunks in
    #[arg(long)]
    pub channels: String,

    /// Chunk size in bytes, 0 for the largest the credential class allows
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub chunk_size: i64,

    /// Upload chunks concurrently
    #[arg(long)]
    pub async_write: bool,

    /// Give up after this many transient failures (retry forever if unset)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Platform API base URL
    #[arg(long)]
    pub api_url: Option<Url>,

    /// Default log level
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Also write daily rolling log files here
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
    #[error("invalid configuration: {0}")]
    Config(#[from] common::driver::ConfigError),
}

impl Init {
    fn config(&self) -> AppConfig {
        let mut driver = Config {
            token: self.token.clone(),
            token_type: self.token_type,
            channels: self.channels.clone(),
            chunk_size: self.chunk_size,
            async_write: self.async_write,
            max_retries: self.max_retries,
            ..Config::default()
        };
        if let Some(api_url) = &self.api_url {
            driver.api_url = api_url.clone();
        }
        AppConfig {
            driver,
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = self.config();
        // reject empty pools before anything is written
        common::rest::Rotator::new(config.driver.credentials(), config.driver.channel_ids())?;

        let state = AppState::init(ctx.config_path.clone(), config)?;
        let driver = &state.config.driver;

        let output = format!(
            "Initialized attache directory at: {}\n\
             - Config: {}\n\
             - Index: {}\n\
             - Credentials: {} ({})\n\
             - Channels: {}\n\
             - Chunk size: {} bytes",
            state.attache_dir.display(),
            state.config_path.display(),
            state.index_path.display(),
            driver.credentials().len(),
            driver.token_type,
            driver.channel_ids().len(),
            driver.token_type.resolve_chunk_size(driver.chunk_size),
        );

        Ok(output)
    }
}
