use clap::Args;

use super::FsOpError;

/// Create a directory, its parent must exist
#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    pub path: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mkdir {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        fs.mkdir(&self.path).await?;
        state.save_fs(&fs)?;
        Ok(fs.stat(&self.path).await?.to_string())
    }
}
