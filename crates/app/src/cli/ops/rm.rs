use clap::Args;

use super::FsOpError;

/// Remove a file, or a directory with everything below it
#[derive(Args, Debug, Clone)]
pub struct Rm {
    pub path: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        fs.rm(&self.path).await?;
        state.save_fs(&fs)?;
        Ok(format!("removed {}", self.path))
    }
}
