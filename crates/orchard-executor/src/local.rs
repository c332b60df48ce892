use crate::error::Result;
use crate::{process, CommandOutput, RemoteShell};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command as TokioCommand;

/// Runs agent commands through the local `sh`; used for sandbox agents on this host.
pub struct LocalShell {
    name: String,
}

impl LocalShell {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn target(&self) -> &str {
        &self.name
    }

    async fn run_script(&self, script: &str) -> Result<CommandOutput> {
        let mut cmd = TokioCommand::new("sh");
        cmd.arg("-c").arg(script);
        process::run(cmd, &self.name).await
    }

    async fn upload(&self, path: &str, contents: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}
