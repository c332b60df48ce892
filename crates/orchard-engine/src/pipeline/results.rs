use super::{Pipeline, StageOutcome};
use crate::error::Result;
use orchard_client::compose::OutputSelector;
use orchard_core::constants::{cache_keys, suffixes};
use orchard_core::model::{Guid, Stage, Task};
use orchard_executor::{execute_read_only, shell_quote, ExecOptions};

pub fn results_key(guid: &Guid) -> String {
    format!("{}/{}", cache_keys::RESULTS, guid)
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Records which expected outputs exist on the agent. Missing files are
/// reported, never fatal.
pub(super) async fn run(pipeline: &Pipeline, task: Task) -> Result<StageOutcome> {
    let ctx = pipeline.context();
    let agent = ctx.agents.get(&task.agent)?;
    let shell = ctx.shell(&agent);
    let dir = agent.task_dir(&task);
    let output = &task.workflow.output;
    let selector = OutputSelector::new(output);
    let from_dir = match output.from.as_deref() {
        Some(from) if !from.is_empty() && from != "." => format!("{}/{}", dir, from),
        _ => dir.clone(),
    };

    let mut expected: Vec<String> = selector
        .included_names()
        .map(|name| format!("{}/{}", from_dir, name))
        .collect();
    expected.push(format!("{}/{}{}", dir, task.guid, suffixes::ARCHIVE));
    if !agent.is_local() {
        for job_id in &task.job_ids {
            expected.push(format!("{}/{}{}", dir, job_id, suffixes::STDOUT));
            expected.push(format!("{}/{}{}", dir, job_id, suffixes::STDERR));
        }
    }

    let quoted: Vec<String> = expected.iter().map(|p| shell_quote(p)).collect();
    let check = format!(
        "for f in {}; do [ -e \"$f\" ] && echo \"$f\" || true; done",
        quoted.join(" ")
    );
    let options = ExecOptions::new();
    let existing = execute_read_only(shell.as_ref(), &check, &options, &ctx.retry).await?;
    let existing: Vec<&str> = existing.stdout.iter().map(|l| l.trim()).collect();

    let mut found: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for path in &expected {
        let name = base_name(path).to_string();
        if existing.contains(&path.as_str()) {
            found.push(name);
        } else {
            missing.push(name);
        }
    }

    let listing = format!("ls -1 {} 2>/dev/null || true", shell_quote(&from_dir));
    let listed = execute_read_only(shell.as_ref(), &listing, &options, &ctx.retry).await?;
    for name in listed.stdout.iter().map(|l| l.trim()) {
        if !name.is_empty() && selector.matches_pattern(name) && !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    }

    ctx.cache
        .set(&results_key(&task.guid), &serde_json::to_string(&found)?, None);

    let mut message = format!("Found {} results, missing {}", found.len(), missing.len());
    if !missing.is_empty() {
        message.push_str(&format!(": {}", missing.join(", ")));
    }
    pipeline.note(&task.guid, &message, &mut |t| t.results_retrieved = true)?;
    Ok(StageOutcome::Next(Stage::TestPush))
}
