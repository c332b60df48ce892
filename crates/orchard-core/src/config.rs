use crate::constants::{defaults, dirs};
use crate::errors::ConfigError;
use crate::model::Agent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub refresh_seconds: u64,
    pub cleanup_minutes: u64,
    pub stage_time_limit_seconds: u64,
    pub initial_delay_seconds: u64,
    pub healthcheck_minutes: u64,
    /// Zero means one worker per CPU.
    pub workers: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            refresh_seconds: defaults::REFRESH_SECONDS,
            cleanup_minutes: defaults::CLEANUP_MINUTES,
            stage_time_limit_seconds: defaults::STAGE_TIME_LIMIT_SECONDS,
            initial_delay_seconds: defaults::INITIAL_DELAY_SECONDS,
            healthcheck_minutes: defaults::HEALTHCHECK_MINUTES,
            workers: 0,
        }
    }
}

impl TaskSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_minutes * 60)
    }

    pub fn stage_time_limit(&self) -> Duration {
        Duration::from_secs(self.stage_time_limit_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }

    pub fn healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.healthcheck_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub topic: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: dirs::APP.to_string(),
        }
    }
}

/// Shell templates used by the generated pull and push jobs.
/// `{source}` and `{dest}` are replaced with quoted paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub pull_command: String,
    pub push_command: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            pull_command: defaults::PULL_COMMAND.to_string(),
            push_command: defaults::PUSH_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service_account: String,
    pub public_prefix: String,
    pub status_dir: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub tasks: TaskSettings,
    pub logging: LoggingConfig,
    pub notifications: NotificationSettings,
    pub transfer: TransferSettings,
    pub agents: BTreeMap<String, Agent>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_account: defaults::SERVICE_ACCOUNT.to_string(),
            public_prefix: defaults::PUBLIC_PREFIX.to_string(),
            status_dir: None,
            store_path: None,
            tasks: TaskSettings::default(),
            logging: LoggingConfig::default(),
            notifications: NotificationSettings::default(),
            transfer: TransferSettings::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(source)?;
        for (name, agent) in config.agents.iter_mut() {
            agent.name = name.clone();
            if agent.workdir.as_os_str().is_empty() {
                return Err(ConfigError::General(format!(
                    "agent '{}' has an empty workdir",
                    name
                )));
            }
        }
        Ok(config)
    }

    pub fn agent(&self, name: &str) -> Result<&Agent, ConfigError> {
        self.agents
            .get(name)
            .ok_or_else(|| ConfigError::AgentNotFound(name.to_string()))
    }

    pub fn status_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.status_dir {
            Some(dir) => Ok(expand_path(dir)),
            None => Ok(data_home()?.join(dirs::STATUS)),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(path) => Ok(expand_path(path)),
            None => Ok(data_home()?.join("tasks.json")),
        }
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn data_home() -> Result<PathBuf, ConfigError> {
    xdg::BaseDirectories::with_prefix(dirs::APP)
        .get_data_home()
        .ok_or(ConfigError::DirectoryNotFound("data"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    xdg::BaseDirectories::with_prefix(dirs::APP)
        .get_config_home()
        .map(|home| home.join("config.toml"))
        .ok_or(ConfigError::DirectoryNotFound("config"))
}

/// Loads the configuration from `path`, or from the XDG config home when `path` is `None`.
/// A missing default file yields the default configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    if !path.exists() {
        if required {
            return Err(ConfigError::General(format!(
                "config file not found at {}",
                path.display()
            )));
        }
        tracing::debug!(
            "No config file at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let contents = fs_err::read_to_string(&path).map_err(|e| ConfigError::PathIo {
        path: path.clone(),
        source: e,
    })?;
    Config::from_toml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SchedulerDialect;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
service_account = "svc"
status_dir = "/var/lib/orchard/status"

[tasks]
refresh_seconds = 15
cleanup_minutes = 2

[notifications]
enabled = true

[agents.sandbox]
hostname = "localhost"
username = "alice"
workdir = "/tmp/orchard"

[agents.cluster]
hostname = "login.hpc.example.org"
username = "alice"
workdir = "/scratch/alice"
dialect = "slurm"
job_array = true
max_walltime = 720
max_mem = 64
queue = "normal"
pre_commands = ["module load singularity"]
auth = { password = "hunter2" }
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.service_account, "svc");
        assert_eq!(config.public_prefix, defaults::PUBLIC_PREFIX);
        assert_eq!(config.tasks.refresh_interval(), Duration::from_secs(15));
        assert_eq!(config.tasks.cleanup_delay(), Duration::from_secs(120));
        assert_eq!(
            config.tasks.stage_time_limit_seconds,
            defaults::STAGE_TIME_LIMIT_SECONDS
        );
        assert!(config.notifications.enabled);
        assert_eq!(config.notifications.topic, "orchard");

        let cluster = config.agent("cluster").unwrap();
        assert_eq!(cluster.name, "cluster");
        assert_eq!(cluster.dialect, SchedulerDialect::Slurm);
        assert_eq!(cluster.max_walltime, 720);
        assert!(!cluster.uses_virtual_memory());
        assert_eq!(config.agent("sandbox").unwrap().name, "sandbox");
        assert!(matches!(
            config.agent("missing"),
            Err(ConfigError::AgentNotFound(_))
        ));
        assert_eq!(
            config.status_dir().unwrap(),
            PathBuf::from("/var/lib/orchard/status")
        );
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.tasks.refresh_seconds, defaults::REFRESH_SECONDS);
        assert_eq!(config.logging.max_files, 10);
        assert!(config.agents.is_empty());
        assert!(config.transfer.push_command.contains("{dest}"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs_err::write(&path, SAMPLE).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.agents.len(), 2);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("[tasks]\nrefresh_seconds = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
