use std::path::PathBuf;

use clap::Args;
use tokio::io::AsyncReadExt;

use common::fs::FsError;

use crate::state::StateError;

const READ_BUFFER: usize = 1 << 20;

/// Upload a local file
#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Local file to upload
    pub source: PathBuf,

    /// Destination path, replaced if it exists
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("failed to read {0}: {1}")]
    Source(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        let source_err = |e: std::io::Error| PutError::Source(self.source.clone(), e);

        let mut source = tokio::fs::File::open(&self.source).await.map_err(source_err)?;
        let mut writer = fs.create(&self.path).await?;
        let mut buf = vec![0u8; READ_BUFFER];
        let mut written = Ok(());
        loop {
            let n = source.read(&mut buf).await.map_err(source_err)?;
            if n == 0 {
                break;
            }
            if let Err(e) = writer.write(&buf[..n]).await {
                written = Err(e);
                break;
            }
        }
        let result = match written {
            Ok(()) => writer.close().await,
            Err(e) => Err(e),
        };

        // an empty entry stays behind on failure, keep the index consistent with it
        state.save_fs(&fs)?;
        let file = result?;
        tracing::info!("stored {} ({} bytes)", file.path, file.size);
        Ok(file.to_string())
    }
}
