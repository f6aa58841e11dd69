use std::path::PathBuf;

use clap::Args;
use tokio::io::AsyncWriteExt;

use common::fs::FsError;
use common::reader::ReadError;

use crate::state::StateError;

/// Download a file, or part of it
#[derive(Args, Debug, Clone)]
pub struct Get {
    /// Path to read
    pub path: String,

    /// Local file to write
    pub output: PathBuf,

    /// First byte to read
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to read (to the end if unset)
    #[arg(long)]
    pub length: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("failed to write {0}: {1}")]
    Output(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Get {
    type Error = GetError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        let output_err = |e: std::io::Error| GetError::Output(self.output.clone(), e);

        let mut reader = match self.length {
            Some(length) => {
                fs.open_range(&self.path, self.offset, self.offset.saturating_add(length))
                    .await?
            }
            None => fs.open(&self.path, self.offset).await?,
        };
        // opening may have re-signed chunks
        state.save_fs(&fs)?;

        let mut output = tokio::fs::File::create(&self.output)
            .await
            .map_err(output_err)?;
        let mut written = 0u64;
        while let Some(bytes) = reader.next_bytes().await? {
            output.write_all(&bytes).await.map_err(output_err)?;
            written += bytes.len() as u64;
        }
        output.flush().await.map_err(output_err)?;

        if reader.is_refreshed() {
            fs.save_refreshed(&self.path, reader).await?;
            state.save_fs(&fs)?;
        }

        Ok(format!("wrote {} bytes to {}", written, self.output.display()))
    }
}
