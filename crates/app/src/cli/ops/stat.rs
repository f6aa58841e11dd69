use clap::Args;

use super::FsOpError;

/// Show an entry and its chunks
#[derive(Args, Debug, Clone)]
pub struct Stat {
    pub path: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Stat {
    type Error = FsOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, fs) = ctx.open()?;
        let file = fs.stat(&self.path).await?;
        let mut output = format!("{}\nid: {}", file, file.id);
        if !file.dir {
            let nodes = fs.nodes(&file.path).await?;
            output.push_str(&format!("\nchunks: {}", nodes.len()));
            for node in &nodes {
                output.push_str(&format!(
                    "\n  #{} {} bytes, message {}, expires {}",
                    node.index, node.size, node.mid, node.ex
                ));
            }
        }
        Ok(output)
    }
}
