use crate::command::shell_quote;
use crate::error::{ExecutorError, Result};
use crate::{process, CommandOutput, RemoteCommand, RemoteShell};
use async_trait::async_trait;
use orchard_core::{logging, model::Agent, model::AgentAuth};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;

const CONNECT_TIMEOUT_SECS: u32 = 15;
/// ssh reserves this exit status for its own failures.
const SSH_ERROR_EXIT: i32 = 255;

pub struct SshShell {
    name: String,
    address: String,
    port: u16,
    auth: Option<AgentAuth>,
}

impl SshShell {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            name: agent.name.clone(),
            address: agent.address(),
            port: agent.port,
            auth: agent.auth.clone(),
        }
    }

    fn ssh_command(&self) -> TokioCommand {
        let mut cmd = match &self.auth {
            Some(AgentAuth::Password(password)) => {
                let mut cmd = TokioCommand::new("sshpass");
                cmd.arg("-e").env("SSHPASS", password).arg("ssh");
                cmd
            }
            _ => TokioCommand::new("ssh"),
        };
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS));
        if let Some(AgentAuth::Key(path)) = &self.auth {
            let raw = path.to_string_lossy().to_string();
            let expanded = shellexpand::tilde(&raw);
            cmd.arg("-i")
                .arg(expanded.as_ref())
                .arg("-o")
                .arg("BatchMode=yes");
        }
        cmd.arg(&self.address);
        cmd
    }

    fn connectivity(&self, stderr: &str) -> ExecutorError {
        ExecutorError::Connectivity {
            target: self.name.clone(),
            message: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn target(&self) -> &str {
        &self.name
    }

    async fn run_script(&self, script: &str) -> Result<CommandOutput> {
        let mut cmd = self.ssh_command();
        cmd.arg(format!("sh -c {}", shell_quote(script)));

        let output = process::run(cmd, &self.name).await.map_err(|e| match e {
            ExecutorError::Io(io) => self.connectivity(&io.to_string()),
            other => other,
        })?;

        if output.exit_code == SSH_ERROR_EXIT {
            return Err(self.connectivity(&output.stderr_text()));
        }
        Ok(output)
    }

    async fn upload(&self, path: &str, contents: &str) -> Result<()> {
        let parent = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let remote = RemoteCommand::new("mkdir")
            .arg("-p")
            .arg(&parent)
            .and(RemoteCommand::new("cat").redirect_out(path));

        let mut cmd = self.ssh_command();
        cmd.arg(format!("sh -c {}", shell_quote(&remote.to_shell_string())))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        logging::log_command(cmd.as_std());
        let mut child = cmd
            .spawn()
            .map_err(|e| self.connectivity(&e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        match output.status.code() {
            Some(0) => Ok(()),
            Some(SSH_ERROR_EXIT) => Err(self.connectivity(&stderr)),
            _ => Err(ExecutorError::UploadFailed {
                target: self.name.clone(),
                path: path.to_string(),
                message: stderr,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn agent(auth: Option<AgentAuth>) -> Agent {
        let mut agent: Agent = toml_agent();
        agent.auth = auth;
        agent
    }

    fn toml_agent() -> Agent {
        Agent {
            name: "hpc".into(),
            hostname: "login.hpc.example.org".into(),
            port: 2222,
            username: "alice".into(),
            auth: None,
            workdir: PathBuf::from("/scratch/alice"),
            pre_commands: vec![],
            dialect: Default::default(),
            launcher: false,
            job_array: false,
            max_walltime: 60,
            max_cores: 1,
            max_processes: 1,
            max_nodes: 1,
            max_mem: 0,
            gpus: 0,
            queue: None,
            project: None,
            healthy: true,
        }
    }

    fn args(cmd: &TokioCommand) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_key_auth_command() {
        let shell = SshShell::from_agent(&agent(Some(AgentAuth::Key(PathBuf::from(
            "/keys/id_ed25519",
        )))));
        let cmd = shell.ssh_command();
        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args(&cmd);
        assert_eq!(&args[..2], &["-p", "2222"]);
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("alice@login.hpc.example.org"));
    }

    #[test]
    fn test_password_auth_uses_sshpass() {
        let shell = SshShell::from_agent(&agent(Some(AgentAuth::Password("s3cret".into()))));
        let cmd = shell.ssh_command();
        assert_eq!(cmd.as_std().get_program(), "sshpass");
        let args = args(&cmd);
        assert_eq!(&args[..2], &["-e", "ssh"]);
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }
}
