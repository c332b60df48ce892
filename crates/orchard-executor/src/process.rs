use crate::error::Result;
use crate::CommandOutput;
use orchard_core::logging;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;

async fn read_lines<R>(reader: R, target: &str, stream: &str) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Some(line) = lines.next_line().await? {
        tracing::trace!("[{}:{}] {}", target, stream, line);
        collected.push(line);
    }
    Ok(collected)
}

/// Spawns `cmd`, streams both pipes line by line, and waits for exit.
/// The child is killed if this future is dropped.
pub(crate) async fn run(mut cmd: TokioCommand, target: &str) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    logging::log_command(cmd.as_std());
    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    let (out, err) = tokio::join!(
        read_lines(stdout, target, "stdout"),
        read_lines(stderr, target, "stderr")
    );
    let status = child.wait().await?;

    Ok(CommandOutput {
        stdout: out?,
        stderr: err?,
        exit_code: status.code().unwrap_or(-1),
    })
}
