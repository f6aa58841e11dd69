use clap::Args;

use super::FsOpError;

/// Move or rename an entry
#[derive(Args, Debug, Clone)]
pub struct Mv {
    pub from: String,
    pub to: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mv {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        fs.mv(&self.from, &self.to).await?;
        state.save_fs(&fs)?;
        Ok(format!("{} -> {}", self.from, self.to))
    }
}
