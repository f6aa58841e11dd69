use clap::Args;

use super::FsOpError;

/// List a directory
#[derive(Args, Debug, Clone)]
pub struct Ls {
    #[arg(default_value = "/")]
    pub path: String,

    /// Entries to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Page size (everything if unset)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, fs) = ctx.open()?;
        let entries = fs.ls(&self.path, self.limit, self.offset).await?;
        Ok(entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
