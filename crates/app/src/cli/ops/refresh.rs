use clap::Args;

use super::FsOpError;

/// Re-sign the expired chunks of a file
#[derive(Args, Debug, Clone)]
pub struct Refresh {
    pub path: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Refresh {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, fs) = ctx.open()?;
        let report = fs.refresh(&self.path).await?;
        if report.refreshed > 0 {
            state.save_fs(&fs)?;
        }

        let mut output = format!("{}: {} chunk(s) re-signed", self.path, report.refreshed);
        if !report.is_resolved() {
            output.push_str(&format!(
                ", {} unresolved (messages {:?})",
                report.unresolved.len(),
                report.unresolved
            ));
        }
        Ok(output)
    }
}
