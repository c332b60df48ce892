mod command;
mod error;
mod local;
mod process;
mod retry;
mod ssh;

pub use command::{shell_quote, RemoteCommand};
pub use error::{ExecutorError, Result};
pub use local::LocalShell;
pub use retry::RetryPolicy;
pub use ssh::SshShell;

use async_trait::async_trait;
use orchard_core::model::Agent;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub directory: Option<String>,
    pub precommand: Option<String>,
    /// Schedulers routinely print informational text on stderr.
    pub allow_stderr: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_precommand(mut self, precommand: impl Into<String>) -> Self {
        self.precommand = Some(precommand.into());
        self
    }

    pub fn allow_stderr(mut self) -> Self {
        self.allow_stderr = true;
        self
    }

    /// `cd <dir> && { <precommand>; } && <command>`
    pub fn compose(&self, command: &str) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = &self.directory {
            parts.push(RemoteCommand::new("cd").arg(dir).to_shell_string());
        }
        if let Some(pre) = self.precommand.as_deref().map(str::trim) {
            if !pre.is_empty() {
                parts.push(format!("{{ {}; }}", pre.trim_end_matches(';')));
            }
        }
        parts.push(command.to_string());
        parts.join(" && ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    fn check(self, target: &str, command: &str, allow_stderr: bool) -> Result<Self> {
        if !self.success() {
            return Err(ExecutorError::CommandFailed {
                target: target.to_string(),
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr_text(),
            });
        }
        if !allow_stderr && self.stderr.iter().any(|l| !l.trim().is_empty()) {
            return Err(ExecutorError::UnexpectedStderr {
                target: target.to_string(),
                command: command.to_string(),
                stderr: self.stderr_text(),
            });
        }
        Ok(self)
    }
}

/// A shell on an agent. Every call owns its session: nothing stays open
/// between calls, and dropping an in-flight call kills the session.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    fn target(&self) -> &str;

    /// Runs an already composed script and reports its output without judging it.
    async fn run_script(&self, script: &str) -> Result<CommandOutput>;

    async fn upload(&self, path: &str, contents: &str) -> Result<()>;

    async fn execute(&self, command: &str, options: &ExecOptions) -> Result<CommandOutput> {
        let script = options.compose(command);
        let output = self.run_script(&script).await?;
        output.check(self.target(), command, options.allow_stderr)
    }
}

/// Runs a command that has no side effects, retrying transient failures.
pub async fn execute_read_only(
    shell: &dyn RemoteShell,
    command: &str,
    options: &ExecOptions,
    policy: &RetryPolicy,
) -> Result<CommandOutput> {
    policy
        .run(command, move || shell.execute(command, options))
        .await
}

pub trait Connector: Send + Sync {
    fn connect(&self, agent: &Agent) -> Arc<dyn RemoteShell>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect(&self, agent: &Agent) -> Arc<dyn RemoteShell> {
        if agent.is_loopback() {
            Arc::new(LocalShell::new(&agent.name))
        } else {
            Arc::new(SshShell::from_agent(agent))
        }
    }
}
