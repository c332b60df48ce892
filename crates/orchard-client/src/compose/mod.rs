//! Builds the files a task needs on its agent: the workflow job script, the
//! optional pull and push transfer scripts, the launcher parameter file and a
//! YAML manifest describing the task.

mod container;
mod resources;
mod selection;

pub use container::{EnvValue, SingularityCommand};
pub use resources::{round_walltime, ResourceRequest};
pub use selection::{matches_any, OutputSelector};

use crate::error::Result;
use orchard_core::config::TransferSettings;
use orchard_core::constants::suffixes;
use orchard_core::model::{Agent, Task};
use orchard_core::workflow::{InputKind, WorkflowConfig};
use orchard_executor::shell_quote;
use selection::case_pattern;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    RunScript,
    PullScript,
    PushScript,
    Manifest,
    LauncherParams,
    InputList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub role: ArtifactRole,
    pub contents: String,
}

#[derive(Debug, Clone, Default)]
pub struct JobBundle {
    pub artifacts: Vec<Artifact>,
    pub requested_walltime: Option<String>,
}

impl JobBundle {
    pub fn artifact(&self, role: ArtifactRole) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.role == role)
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    guid: &'a str,
    name: &'a str,
    owner: &'a str,
    agent: &'a str,
    workdir: &'a str,
    workflow: &'a WorkflowConfig,
    inputs: Vec<&'a str>,
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

fn fill_template(template: &str, source: &str, dest: &str) -> String {
    template.replace("{source}", source).replace("{dest}", dest)
}

pub struct JobComposer<'a> {
    agent: &'a Agent,
    transfer: &'a TransferSettings,
}

impl<'a> JobComposer<'a> {
    pub fn new(agent: &'a Agent, transfer: &'a TransferSettings) -> Self {
        Self { agent, transfer }
    }

    /// `inputs` are full storage paths of the files to stage; empty for a single
    /// `file` input or no input at all.
    pub fn compose(&self, task: &Task, inputs: &[String]) -> Result<JobBundle> {
        task.workflow.check()?;
        let guid = task.guid.0.as_str();
        let task_dir = self.agent.task_dir(task);
        let names: Vec<&str> = inputs.iter().map(|p| base_name(p)).collect();

        let mut bundle = JobBundle::default();
        let (script, walltime) = self.run_script(task, &task_dir, &names);
        bundle.requested_walltime = walltime;
        bundle.artifacts.push(Artifact {
            name: format!("{}{}", guid, suffixes::SCRIPT),
            role: ArtifactRole::RunScript,
            contents: script,
        });

        let manifest = Manifest {
            guid,
            name: &task.name,
            owner: &task.owner,
            agent: &self.agent.name,
            workdir: &task_dir,
            workflow: &task.workflow,
            inputs: names.clone(),
        };
        bundle.artifacts.push(Artifact {
            name: format!("{}{}", guid, suffixes::CONFIG),
            role: ArtifactRole::Manifest,
            contents: serde_yaml::to_string(&manifest)?,
        });

        if self.agent.launcher {
            bundle.artifacts.push(Artifact {
                name: format!("{}{}", guid, suffixes::LAUNCHER),
                role: ArtifactRole::LauncherParams,
                contents: lines(self.container_commands(task, &task_dir, &names, false)),
            });
        }

        let fans_out = task
            .workflow
            .input
            .as_ref()
            .is_some_and(|i| i.kind == InputKind::Files);
        if fans_out && !names.is_empty() {
            bundle.artifacts.push(Artifact {
                name: format!("{}{}", guid, suffixes::INPUTS),
                role: ArtifactRole::InputList,
                contents: lines(names.iter().map(|n| n.to_string()).collect()),
            });
        }

        if let Some(pull) = self.pull_script(task, inputs) {
            bundle.artifacts.push(Artifact {
                name: format!("{}{}", guid, suffixes::PULL_SCRIPT),
                role: ArtifactRole::PullScript,
                contents: pull,
            });
        }

        if let Some(push) = self.push_script(task, &task_dir) {
            bundle.artifacts.push(Artifact {
                name: format!("{}{}", guid, suffixes::PUSH_SCRIPT),
                role: ArtifactRole::PushScript,
                contents: push,
            });
        }

        tracing::debug!(
            "Composed {} artifact(s) for task {}: {}",
            bundle.artifacts.len(),
            guid,
            bundle
                .artifacts
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(bundle)
    }

    fn uses_job_array(&self, task: &Task, names: &[&str]) -> bool {
        self.agent.job_array
            && !self.agent.launcher
            && !self.agent.is_local()
            && !names.is_empty()
            && task
                .workflow
                .input
                .as_ref()
                .is_some_and(|i| i.kind == InputKind::Files)
    }

    fn header(&self, request: Option<ResourceRequest>) -> Vec<String> {
        let mut out = vec!["#!/bin/bash".to_string()];
        if let Some(request) = request.filter(|_| !self.agent.is_local()) {
            out.extend(request.to_directives());
        }
        out.extend(
            self.agent
                .pre_commands
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        );
        out
    }

    fn run_script(&self, task: &Task, task_dir: &str, names: &[&str]) -> (String, Option<String>) {
        let request = ResourceRequest::for_workflow(
            self.agent,
            &task.workflow,
            names.len(),
            task.owner_email.as_deref(),
        );
        let walltime = if self.agent.is_local() {
            None
        } else {
            request.time.clone()
        };

        let mut out = self.header(Some(request));
        out.push(format!("cd {}", shell_quote(task_dir)));

        if self.agent.launcher {
            out.push(format!("export LAUNCHER_WORKDIR={}", shell_quote(task_dir)));
            out.push(format!(
                "export LAUNCHER_JOB_FILE={}",
                shell_quote(&format!("{}{}", task.guid, suffixes::LAUNCHER))
            ));
            out.push("$LAUNCHER_DIR/paramrun".to_string());
        } else {
            let array = self.uses_job_array(task, names);
            if array {
                out.push(format!(
                    "INPUT_FILE=$(sed -n \"${{SLURM_ARRAY_TASK_ID}}p\" {})",
                    shell_quote(&format!("{}{}", task.guid, suffixes::INPUTS))
                ));
            }
            out.extend(self.container_commands(task, task_dir, names, array));
        }

        out.push(self.archive_command(task, task_dir));
        (lines(out), walltime)
    }

    fn container_commands(
        &self,
        task: &Task,
        task_dir: &str,
        names: &[&str],
        array: bool,
    ) -> Vec<String> {
        let workflow = &task.workflow;
        let input_dir = self.agent.input_dir(task);
        let gpus = if workflow.gpu { self.agent.gpus } else { 0 };

        let build = |input: Option<EnvValue>, index: Option<EnvValue>| {
            let mut cmd = SingularityCommand::new(task_dir, &workflow.image, &workflow.commands)
                .bind_mounts(&workflow.bind_mounts)
                .no_cache(workflow.no_cache)
                .gpu(gpus > 0);
            for (key, value) in &workflow.env {
                cmd = cmd.literal(key, value.clone());
            }
            for p in &workflow.parameters {
                cmd = cmd.literal(&p.name, p.value.clone());
            }
            if let Some(input) = input {
                cmd = cmd.env("INPUT", input);
            }
            cmd = cmd
                .literal("OUTPUT", workflow.output.from.as_deref().unwrap_or("."))
                .literal("GPUS", gpus.to_string());
            if let Some(index) = index {
                cmd = cmd.env("INDEX", index);
            }
            cmd.literal("WORKDIR", task_dir).render()
        };

        match &workflow.input {
            None => vec![build(None, None)],
            Some(input) => match input.kind {
                InputKind::File => vec![build(
                    Some(EnvValue::Literal(format!("{}/{}", input_dir, input.file_name()))),
                    None,
                )],
                InputKind::Directory => {
                    vec![build(Some(EnvValue::Literal(input_dir.clone())), None)]
                }
                InputKind::Files if array => vec![build(
                    Some(EnvValue::Expand(format!("{}/$INPUT_FILE", input_dir))),
                    Some(EnvValue::Expand("$SLURM_ARRAY_TASK_ID".to_string())),
                )],
                InputKind::Files if names.is_empty() => {
                    vec![build(Some(EnvValue::Literal(input_dir.clone())), None)]
                }
                InputKind::Files => names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        build(
                            Some(EnvValue::Literal(format!("{}/{}", input_dir, name))),
                            Some(EnvValue::Literal(i.to_string())),
                        )
                    })
                    .collect(),
            },
        }
    }

    fn archive_command(&self, task: &Task, task_dir: &str) -> String {
        let from = task.workflow.output.from.as_deref().unwrap_or(".");
        let archive = format!("{}/{}{}", task_dir, task.guid, suffixes::ARCHIVE);
        let mut cmd = format!(
            "(cd {} && zip -qr {} . -x '*{}'",
            shell_quote(from),
            shell_quote(&archive),
            suffixes::ARCHIVE
        );
        let exclude = &task.workflow.output.exclude;
        for name in &exclude.names {
            cmd.push_str(&format!(" {}", shell_quote(name)));
        }
        for pattern in exclude.patterns.iter().filter(|p| !p.is_empty()) {
            cmd.push_str(&format!(" {}", shell_quote(&format!("*{}*", pattern))));
        }
        cmd.push_str(") || true");
        cmd
    }

    fn pull_script(&self, task: &Task, inputs: &[String]) -> Option<String> {
        let input = task.workflow.input.as_ref()?;
        let input_dir = self.agent.input_dir(task);
        let mut out = self.header(Some(ResourceRequest::for_transfer(self.agent)));
        out.push(format!("mkdir -p {}", shell_quote(&input_dir)));

        let sources: Vec<&str> = match input.kind {
            InputKind::File => vec![input.path.as_str()],
            InputKind::Files | InputKind::Directory => inputs.iter().map(String::as_str).collect(),
        };
        for source in sources {
            out.push(fill_template(
                &self.transfer.pull_command,
                &shell_quote(source),
                &shell_quote(&input_dir),
            ));
        }
        Some(lines(out))
    }

    fn push_script(&self, task: &Task, task_dir: &str) -> Option<String> {
        let output = &task.workflow.output;
        let to = output.to.as_deref()?;
        let from = output.from.as_deref().unwrap_or(".");
        let selector = OutputSelector::new(output);
        let archive = format!("{}{}", task.guid, suffixes::ARCHIVE);

        let mut out = self.header(Some(ResourceRequest::for_transfer(self.agent)));
        out.push(format!("cd {}", shell_quote(task_dir)));
        out.push(format!(
            "for f in {}/* {} *{} *{}; do",
            shell_quote(from),
            shell_quote(&archive),
            suffixes::STDOUT,
            suffixes::STDERR
        ));
        out.push("  [ -f \"$f\" ] || continue".to_string());
        out.push("  name=$(basename \"$f\")".to_string());
        if let Some(exclude) = selector.exclude_case() {
            out.push(format!("  case \"$name\" in {}) continue ;; esac", exclude));
        }

        let mut arms: Vec<String> = output
            .include
            .names
            .iter()
            .map(|n| case_pattern(n).trim_matches('*').to_string())
            .collect();
        if !arms.is_empty() || selector.include_case().is_some() {
            arms.push(archive.clone());
            arms.push(format!("*{}", suffixes::STDOUT));
            arms.push(format!("*{}", suffixes::STDERR));
            if let Some(patterns) = selector.include_case() {
                arms.push(patterns);
            }
            out.push(format!(
                "  case \"$name\" in {}) ;; *) continue ;; esac",
                arms.join("|")
            ));
        }
        out.push(format!(
            "  {}",
            fill_template(&self.transfer.push_command, "\"$f\"", &shell_quote(to))
        ));
        out.push("done".to_string());
        Some(lines(out))
    }
}

fn lines(lines: Vec<String>) -> String {
    let mut s = lines.join("\n");
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/iplant/home/alice/images/a.jpg"), "a.jpg");
        assert_eq!(base_name("/iplant/home/alice/images/"), "images");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn test_fill_template() {
        assert_eq!(
            fill_template("iget -r {source} {dest}/", "'/a b'", "'/in'"),
            "iget -r '/a b' '/in'/"
        );
    }
}
