use orchard_core::workflow::BindMount;
use orchard_executor::shell_quote;

/// An environment value passed into the container. `Expand` values are
/// double-quoted so the job shell substitutes variables such as
/// `$SLURM_ARRAY_TASK_ID` before the container starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    Expand(String),
}

impl EnvValue {
    fn render(&self) -> String {
        match self {
            EnvValue::Literal(v) => shell_quote(v),
            EnvValue::Expand(v) => format!("\"{}\"", v.replace('"', "\\\"")),
        }
    }
}

fn env_key(key: &str) -> String {
    key.trim().to_uppercase().replace(' ', "_")
}

/// `SINGULARITYENV_*=... singularity exec --home <workdir> ... <image> sh -c '<commands>'`
#[derive(Debug, Clone)]
pub struct SingularityCommand<'a> {
    workdir: &'a str,
    image: &'a str,
    commands: &'a str,
    env: Vec<(String, EnvValue)>,
    bind_mounts: &'a [BindMount],
    no_cache: bool,
    gpu: bool,
}

impl<'a> SingularityCommand<'a> {
    pub fn new(workdir: &'a str, image: &'a str, commands: &'a str) -> Self {
        Self {
            workdir,
            image,
            commands,
            env: Vec::new(),
            bind_mounts: &[],
            no_cache: false,
            gpu: false,
        }
    }

    pub fn env(mut self, key: &str, value: EnvValue) -> Self {
        let key = env_key(key);
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value));
        self
    }

    pub fn literal(self, key: &str, value: impl Into<String>) -> Self {
        self.env(key, EnvValue::Literal(value.into()))
    }

    pub fn bind_mounts(mut self, mounts: &'a [BindMount]) -> Self {
        self.bind_mounts = mounts;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("SINGULARITYENV_{}={}", k, v.render()))
            .collect();
        parts.push("singularity exec".to_string());
        parts.push(format!("--home {}", shell_quote(self.workdir)));
        if !self.bind_mounts.is_empty() {
            let binds: Vec<String> = self
                .bind_mounts
                .iter()
                .map(|m| m.format(self.workdir))
                .collect();
            parts.push(format!("--bind {}", shell_quote(&binds.join(","))));
        }
        if self.no_cache {
            parts.push("--disable-cache".to_string());
        }
        if self.gpu {
            parts.push("--nv".to_string());
        }
        parts.push(shell_quote(self.image));
        parts.push(format!("sh -c {}", shell_quote(self.commands)));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_full_invocation() {
        let mounts = vec![BindMount::parse("/opt/models").unwrap()];
        let cmd = SingularityCommand::new("/scratch/alice/t1", "docker://alpine", "echo $INPUT")
            .literal("input", "/scratch/alice/t1/input/a.jpg")
            .literal("gpus", "0")
            .bind_mounts(&mounts)
            .no_cache(true)
            .render();
        assert_eq!(
            cmd,
            "SINGULARITYENV_INPUT='/scratch/alice/t1/input/a.jpg' SINGULARITYENV_GPUS='0' \
             singularity exec --home '/scratch/alice/t1' --bind '/scratch/alice/t1:/opt/models' \
             --disable-cache 'docker://alpine' sh -c 'echo $INPUT'"
        );
    }

    #[test]
    fn test_expand_values_are_double_quoted() {
        let cmd = SingularityCommand::new("/w", "img", "run")
            .env("INDEX", EnvValue::Expand("$SLURM_ARRAY_TASK_ID".into()))
            .gpu(true)
            .render();
        assert!(cmd.starts_with("SINGULARITYENV_INDEX=\"$SLURM_ARRAY_TASK_ID\""));
        assert!(cmd.contains("--nv"));
    }

    #[test]
    fn test_keys_are_normalized_and_deduplicated() {
        let cmd = SingularityCommand::new("/w", "img", "run")
            .literal("max depth", "1")
            .literal("MAX_DEPTH", "2")
            .render();
        assert!(cmd.starts_with("SINGULARITYENV_MAX_DEPTH='2' singularity"));
    }
}
