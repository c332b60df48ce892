//! Workflow configuration: a loosely typed YAML document validated once into
//! an immutable [`WorkflowConfig`].

use crate::constants::defaults::MAX_TIME_LIMIT_SECONDS;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    File,
    Files,
    Directory,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::File => write!(f, "file"),
            InputKind::Files => write!(f, "files"),
            InputKind::Directory => write!(f, "directory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Empty means the task working directory.
    pub host: String,
    pub container: String,
}

impl BindMount {
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        match spec.split_once(':') {
            Some((host, container)) if !container.is_empty() => Some(Self {
                host: host.to_string(),
                container: container.to_string(),
            }),
            Some(_) => None,
            None if !spec.is_empty() => Some(Self {
                host: String::new(),
                container: spec.to_string(),
            }),
            None => None,
        }
    }

    pub fn format(&self, workdir: &str) -> String {
        let host = if self.host.is_empty() {
            workdir
        } else {
            &self.host
        };
        format!("{}:{}", host, self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub kind: InputKind,
    pub path: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl InputSpec {
    /// Lower-cased patterns; `jpg` and `jpeg` always travel together.
    pub fn effective_patterns(&self) -> Vec<String> {
        if self.kind == InputKind::File {
            return Vec::new();
        }
        let mut patterns: Vec<String> = self.patterns.iter().map(|p| p.to_lowercase()).collect();
        let has = |p: &str, all: &[String]| all.iter().any(|x| x == p);
        if has("jpg", &patterns) && !has("jpeg", &patterns) {
            patterns.push("jpeg".to_string());
        } else if has("jpeg", &patterns) && !has("jpg", &patterns) {
            patterns.push("jpg".to_string());
        }
        patterns
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Relative to the task working directory; `None` means the working directory itself.
    #[serde(default)]
    pub from: Option<String>,
    /// Storage destination; without one no push job is submitted.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub include: FileFilter,
    #[serde(default)]
    pub exclude: FileFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnits {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnits {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "seconds" => Some(TimeUnits::Seconds),
            "minutes" => Some(TimeUnits::Minutes),
            "hours" => Some(TimeUnits::Hours),
            "days" => Some(TimeUnits::Days),
            _ => None,
        }
    }

    fn seconds(self) -> u64 {
        match self {
            TimeUnits::Seconds => 1,
            TimeUnits::Minutes => 60,
            TimeUnits::Hours => 60 * 60,
            TimeUnits::Days => 60 * 60 * 24,
        }
    }
}

pub fn parse_time_limit_seconds(limit: u64, units: &str) -> Option<u64> {
    TimeUnits::parse(units).and_then(|u| limit.checked_mul(u.seconds()))
}

/// Parses `HH:MM:SS` (hours may exceed 24).
pub fn parse_walltime(walltime: &str) -> Option<u64> {
    let mut parts = walltime.trim().split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let (h, m, s): (u64, u64, u64) = (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
    if m >= 60 || s >= 60 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueue {
    #[serde(default)]
    pub walltime_seconds: Option<u64>,
    #[serde(default)]
    pub cores: Option<u32>,
    #[serde(default)]
    pub processes: Option<u32>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: Option<String>,
    pub image: String,
    pub commands: String,
    pub env: BTreeMap<String, String>,
    pub parameters: Vec<Parameter>,
    pub bind_mounts: Vec<BindMount>,
    pub input: Option<InputSpec>,
    pub output: OutputSpec,
    pub time_limit_seconds: u64,
    pub gpu: bool,
    pub no_cache: bool,
    pub jobqueue: Option<JobQueue>,
}

impl WorkflowConfig {
    pub fn from_yaml(source: &str) -> Result<Self, ConfigurationError> {
        let raw: RawWorkflow = serde_yaml::from_str(source)
            .map_err(|e| ConfigurationError::single(format!("Malformed workflow document: {}", e)))?;
        raw.validate()
    }

    pub fn time_limit(&self) -> chrono::Duration {
        i64::try_from(self.time_limit_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Re-checks an already built configuration, e.g. one loaded back from storage.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();
        if self.image.trim().is_empty() {
            errors.push("Attribute 'image' must not be empty".to_string());
        }
        if self.commands.trim().is_empty() {
            errors.push("Attribute 'commands' must not be empty".to_string());
        }
        if self.time_limit_seconds == 0 {
            errors.push("Time limit must be positive".to_string());
        }
        if self.time_limit_seconds > MAX_TIME_LIMIT_SECONDS {
            errors.push(too_long(self.time_limit_seconds.to_string(), "Seconds"));
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if p.name.trim().is_empty() || p.value.trim().is_empty() {
                errors.push(format!("Parameter {} must have a non-empty name and value", i));
            }
        }
        if let Some(input) = &self.input {
            if input.path.trim().is_empty() {
                errors.push("Input path must not be empty".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError { errors })
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParameter {
    pub name: Option<String>,
    pub value: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInput {
    pub kind: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTimeLimit {
    pub limit: Option<u64>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobQueue {
    pub walltime: Option<String>,
    pub cores: Option<u32>,
    pub processes: Option<u32>,
    pub memory: Option<String>,
    pub queue: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflow {
    pub name: Option<String>,
    pub image: Option<String>,
    pub commands: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    #[serde(default)]
    pub bind_mounts: Vec<String>,
    pub input: Option<RawInput>,
    pub output: Option<OutputSpec>,
    pub time: Option<RawTimeLimit>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub no_cache: bool,
    pub jobqueue: Option<RawJobQueue>,
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn too_long(limit: String, units: &str) -> String {
    format!(
        "Time limit {} {} exceeds the maximum of {} days",
        limit,
        units,
        MAX_TIME_LIMIT_SECONDS / 86_400
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawWorkflow {
    /// Validates every field and reports all problems at once.
    pub fn validate(self) -> Result<WorkflowConfig, ConfigurationError> {
        let mut errors = Vec::new();

        let image = non_empty(self.image);
        if image.is_none() {
            errors.push("Missing attribute 'image'".to_string());
        }
        let commands = non_empty(self.commands);
        if commands.is_none() {
            errors.push("Missing attribute 'commands'".to_string());
        }

        let mut env = BTreeMap::new();
        for (key, value) in self.env {
            if key.trim().is_empty() || key.contains('=') {
                errors.push(format!("Invalid environment variable name '{}'", key));
                continue;
            }
            match scalar_to_string(&value) {
                Some(v) => {
                    env.insert(key, v);
                }
                None => errors.push(format!("Environment variable '{}' must be a scalar", key)),
            }
        }

        let mut parameters = Vec::new();
        for (i, raw) in self.parameters.into_iter().enumerate() {
            let name = non_empty(raw.name);
            let value = non_empty(raw.value.as_ref().and_then(scalar_to_string));
            match (name, value) {
                (Some(name), Some(value)) => parameters.push(Parameter { name, value }),
                (None, _) => errors.push(format!("Parameter {} is missing a name", i)),
                (Some(name), None) => {
                    errors.push(format!("Parameter '{}' is missing a value", name))
                }
            }
        }

        let mut bind_mounts = Vec::new();
        for spec in &self.bind_mounts {
            match BindMount::parse(spec) {
                Some(mount) => bind_mounts.push(mount),
                None => errors.push(format!(
                    "Invalid bind mount '{}' (expected 'host:container' or 'container')",
                    spec
                )),
            }
        }

        let input = match self.input {
            None => None,
            Some(raw) => {
                let kind = match raw.kind.as_deref() {
                    Some("file") => Some(InputKind::File),
                    Some("files") => Some(InputKind::Files),
                    Some("directory") => Some(InputKind::Directory),
                    Some(other) => {
                        errors.push(format!(
                            "Invalid input kind '{}' (expected file, files, or directory)",
                            other
                        ));
                        None
                    }
                    None => {
                        errors.push("Missing attribute 'input.kind'".to_string());
                        None
                    }
                };
                let path = non_empty(raw.path);
                if path.is_none() {
                    errors.push("Missing attribute 'input.path'".to_string());
                }
                match (kind, path) {
                    (Some(kind), Some(path)) => Some(InputSpec {
                        kind,
                        path,
                        patterns: raw.patterns,
                    }),
                    _ => None,
                }
            }
        };

        let output = self.output.unwrap_or_default();
        if output.to.as_deref().is_some_and(|to| to.trim().is_empty()) {
            errors.push("Attribute 'output.to' must not be empty when present".to_string());
        }

        let time_limit_seconds = match self.time {
            None => {
                errors.push("Missing attribute 'time'".to_string());
                0
            }
            Some(time) => match (time.limit, time.units.as_deref()) {
                (Some(0), _) => {
                    errors.push("Time limit must be positive".to_string());
                    0
                }
                (Some(limit), Some(units)) => match TimeUnits::parse(units) {
                    None => {
                        errors.push(format!(
                            "Invalid time units '{}' (expected Seconds, Minutes, Hours, or Days)",
                            units
                        ));
                        0
                    }
                    Some(unit) => match limit
                        .checked_mul(unit.seconds())
                        .filter(|s| *s <= MAX_TIME_LIMIT_SECONDS)
                    {
                        Some(seconds) => seconds,
                        None => {
                            errors.push(too_long(limit.to_string(), units));
                            0
                        }
                    },
                },
                (None, _) => {
                    errors.push("Missing attribute 'time.limit'".to_string());
                    0
                }
                (_, None) => {
                    errors.push("Missing attribute 'time.units'".to_string());
                    0
                }
            },
        };

        let jobqueue = self.jobqueue.map(|raw| {
            let walltime_seconds = raw.walltime.as_deref().and_then(|w| {
                let parsed = parse_walltime(w);
                if parsed.is_none() {
                    errors.push(format!("Invalid walltime '{}' (expected HH:MM:SS)", w));
                }
                parsed
            });
            if raw.cores == Some(0) {
                errors.push("Attribute 'jobqueue.cores' must be positive".to_string());
            }
            JobQueue {
                walltime_seconds,
                cores: raw.cores,
                processes: raw.processes,
                memory: non_empty(raw.memory),
                queue: non_empty(raw.queue),
                project: non_empty(raw.project),
            }
        });

        match (image, commands) {
            (Some(image), Some(commands)) if errors.is_empty() => Ok(WorkflowConfig {
                name: non_empty(self.name),
                image,
                commands,
                env,
                parameters,
                bind_mounts,
                input,
                output,
                time_limit_seconds,
                gpu: self.gpu,
                no_cache: self.no_cache,
                jobqueue,
            }),
            _ => Err(ConfigurationError { errors }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name: leaf-segmentation
image: docker://computationalplantscience/smart
commands: python3 /opt/smart/segment.py -i $INPUT -o $OUTPUT
env:
  LC_ALL: C.UTF-8
  THREADS: 4
parameters:
  - name: threshold
    value: 0.5
bind_mounts:
  - /data/models:/models
  - scratch
input:
  kind: files
  path: /iplant/home/alice/images
  patterns: [JPG, png]
output:
  from: results
  to: /iplant/home/alice/results
  include:
    names: [summary.csv]
    patterns: [png]
time:
  limit: 2
  units: Hours
gpu: true
jobqueue:
  walltime: "01:30:00"
  cores: 4
  memory: 8GB
"#;

    #[test]
    fn test_full_document_validates() {
        let config = WorkflowConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.name.as_deref(), Some("leaf-segmentation"));
        assert_eq!(config.env.get("THREADS").map(String::as_str), Some("4"));
        assert_eq!(config.parameters[0].value, "0.5");
        assert_eq!(config.bind_mounts.len(), 2);
        assert_eq!(config.bind_mounts[1].format("/work/t1"), "/work/t1:scratch");
        assert_eq!(config.time_limit_seconds, 7200);
        let input = config.input.as_ref().unwrap();
        assert_eq!(input.kind, InputKind::Files);
        assert_eq!(input.effective_patterns(), vec!["jpg", "png", "jpeg"]);
        assert_eq!(
            config.jobqueue.as_ref().unwrap().walltime_seconds,
            Some(5400)
        );
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_errors_are_accumulated() {
        let err = WorkflowConfig::from_yaml(
            r#"
parameters:
  - name: ""
    value: x
  - name: size
input:
  kind: folder
time:
  limit: 3
  units: Fortnights
jobqueue:
  walltime: "1h"
"#,
        )
        .unwrap_err();
        let joined = err.errors.join("\n");
        assert!(joined.contains("Missing attribute 'image'"));
        assert!(joined.contains("Missing attribute 'commands'"));
        assert!(joined.contains("Parameter 0 is missing a name"));
        assert!(joined.contains("Parameter 'size' is missing a value"));
        assert!(joined.contains("Invalid input kind 'folder'"));
        assert!(joined.contains("Missing attribute 'input.path'"));
        assert!(joined.contains("Invalid time units 'Fortnights'"));
        assert!(joined.contains("Invalid walltime '1h'"));
        assert_eq!(err.errors.len(), 8);
    }

    #[test]
    fn test_missing_time_is_an_error() {
        let err = WorkflowConfig::from_yaml("image: alpine\ncommands: ls\n").unwrap_err();
        assert_eq!(err.errors, vec!["Missing attribute 'time'".to_string()]);
    }

    #[test]
    fn test_malformed_document() {
        let err = WorkflowConfig::from_yaml("image: [unclosed").unwrap_err();
        assert!(err.errors[0].starts_with("Malformed workflow document"));
    }

    #[test]
    fn test_parse_walltime() {
        assert_eq!(parse_walltime("00:00:30"), Some(30));
        assert_eq!(parse_walltime("48:00:00"), Some(172_800));
        assert_eq!(parse_walltime("01:61:00"), None);
        assert_eq!(parse_walltime("1:00"), None);
        assert_eq!(parse_walltime("9999999999999999999:00:00"), None);
        assert_eq!(parse_walltime("5124095576030432:00:00"), None);
    }

    #[test]
    fn test_oversized_values_are_rejected() {
        let err = WorkflowConfig::from_yaml(
            r#"
image: alpine
commands: ls
time:
  limit: 100000000000
  units: Days
jobqueue:
  walltime: "9999999999999999999:00:00"
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.errors,
            vec![
                "Time limit 100000000000 Days exceeds the maximum of 365 days".to_string(),
                "Invalid walltime '9999999999999999999:00:00' (expected HH:MM:SS)".to_string(),
            ]
        );

        let err = WorkflowConfig::from_yaml(
            "image: alpine\ncommands: ls\ntime:\n  limit: 366\n  units: Days\n",
        )
        .unwrap_err();
        assert!(err.errors[0].contains("exceeds the maximum"));

        let config = WorkflowConfig::from_yaml(
            "image: alpine\ncommands: ls\ntime:\n  limit: 365\n  units: Days\n",
        )
        .unwrap();
        assert_eq!(config.time_limit_seconds, MAX_TIME_LIMIT_SECONDS);
    }

    #[test]
    fn test_time_limit_never_overflows() {
        let mut config = WorkflowConfig::from_yaml(
            "image: alpine\ncommands: ls\ntime:\n  limit: 1\n  units: Hours\n",
        )
        .unwrap();
        config.time_limit_seconds = u64::MAX;
        assert_eq!(config.time_limit(), chrono::Duration::MAX);
        assert!(config.check().is_err());
    }

    #[test]
    fn test_parse_time_limit_seconds() {
        assert_eq!(parse_time_limit_seconds(2, "Days"), Some(172_800));
        assert_eq!(parse_time_limit_seconds(5, "minutes"), Some(300));
        assert_eq!(parse_time_limit_seconds(5, "weeks"), None);
        assert_eq!(parse_time_limit_seconds(u64::MAX, "Minutes"), None);
    }

    #[test]
    fn test_bind_mount_parse() {
        assert_eq!(BindMount::parse("a:"), None);
        assert_eq!(BindMount::parse(""), None);
        let mount = BindMount::parse("/host:/container").unwrap();
        assert_eq!(mount.format("/ignored"), "/host:/container");
    }
}
