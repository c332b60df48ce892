pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Builder for shell command lines sent to an agent. Arguments are quoted,
/// operators are inserted verbatim.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    parts: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: &str) -> Self {
        Self {
            parts: vec![program.to_string()],
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.parts.push(shell_quote(arg));
        self
    }

    /// Unquoted token, for flags that must stay readable in logs or contain expansions.
    pub fn raw(mut self, s: &str) -> Self {
        self.parts.push(s.to_string());
        self
    }

    pub fn and(self, other: RemoteCommand) -> Self {
        self.raw("&&").merge(other)
    }

    pub fn or(self, other: RemoteCommand) -> Self {
        self.raw("||").merge(other)
    }

    pub fn redirect_out(self, path: &str) -> Self {
        self.raw(">").raw(&shell_quote(path))
    }

    pub fn silence_stderr(self) -> Self {
        self.raw("2>/dev/null")
    }

    fn merge(mut self, other: RemoteCommand) -> Self {
        self.parts.extend(other.parts);
        self
    }

    pub fn to_shell_string(&self) -> String {
        self.parts.join(" ")
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_shell_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_command() {
        let cmd = RemoteCommand::new("mkdir").arg("-p").arg("/scratch/a b");
        assert_eq!(cmd.to_shell_string(), "mkdir '-p' '/scratch/a b'");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_chaining() {
        let cmd = RemoteCommand::new("test")
            .arg("-f")
            .arg("1.exit")
            .and(RemoteCommand::new("cat").arg("1.exit"))
            .or(RemoteCommand::new("true"));
        assert_eq!(
            cmd.to_shell_string(),
            "test '-f' '1.exit' && cat '1.exit' || true"
        );
    }

    #[test]
    fn test_raw_and_redirect() {
        let cmd = RemoteCommand::new("squeue")
            .raw("-h")
            .raw("-o %i")
            .silence_stderr()
            .or(RemoteCommand::new("echo").arg("done").redirect_out("out.txt"));
        assert_eq!(
            cmd.to_shell_string(),
            "squeue -h -o %i 2>/dev/null || echo 'done' > 'out.txt'"
        );
    }
}
