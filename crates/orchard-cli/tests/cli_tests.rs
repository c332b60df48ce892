
use harness::CliHarness;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;

#[test]
fn test_validate_accepts_workflow() {
    let h = CliHarness::new();
    h.cmd()
        .arg("validate")
        .arg(&h.workflow_path)
        .assert()
        .success()
        .stdout(contains("workflow 'hello' is valid"));
}

#[test]
fn test_validate_reports_every_problem() {
    let h = CliHarness::new();
    let path = h.write(
        "broken.yaml",
        "commands: ''\nparameters:\n  - name: threshold\ntime:\n  limit: 5\n  units: Minutes\n",
    );
    h.cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("Missing attribute 'image'"))
        .stderr(contains("Missing attribute 'commands'"))
        .stderr(contains("Parameter 'threshold' is missing a value"));
}

#[test]
fn test_validate_previews_job_script() {
    let h = CliHarness::new();
    h.cmd()
        .arg("validate")
        .arg(&h.workflow_path)
        .arg("--agent")
        .arg("cluster")
        .assert()
        .success()
        .stdout(contains("Requested walltime: 00:30:00"))
        .stdout(contains("#SBATCH"))
        .stdout(contains("module load singularity"));
}

#[test]
fn test_submit_then_status_and_logs() {
    let h = CliHarness::new();
    let guid = h.submit("sandbox");
    let short = guid.split('-').next().unwrap_or(&guid).to_string();

    h.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(contains(&short))
        .stdout(contains("hello"))
        .stdout(contains("CREATED"));

    h.cmd()
        .arg("status")
        .arg(&short)
        .assert()
        .success()
        .stdout(contains(&guid))
        .stdout(contains("Owner:    alice"))
        .stdout(contains("prepare-environment"));

    h.cmd()
        .arg("logs")
        .arg(&guid)
        .assert()
        .success()
        .stdout(contains("Created task 'hello' on sandbox"));
}

#[test]
fn test_status_json_filters_by_owner() {
    let h = CliHarness::new();
    let guid = h.submit("sandbox");

    let output = h
        .cmd()
        .args(["status", "--json", "--owner", "alice"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let tasks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["guid"].as_str(), Some(guid.as_str()));
    assert_eq!(tasks[0]["state"].as_str(), Some("CREATED"));

    h.cmd()
        .args(["status", "--owner", "bob"])
        .assert()
        .success()
        .stdout(contains("No tasks."));
}

#[test]
fn test_cancel_created_task() {
    let h = CliHarness::new();
    let guid = h.submit("sandbox");

    h.cmd()
        .arg("cancel")
        .arg(&guid)
        .assert()
        .success()
        .stdout(contains("CANCELED"));

    h.cmd()
        .arg("cancel")
        .arg(&guid)
        .assert()
        .success()
        .stdout(contains("already finished"));

    h.cmd()
        .arg("logs")
        .arg(&guid)
        .assert()
        .success()
        .stdout(contains("Canceled by user"));

    h.cmd()
        .args(["status", "--json"])
        .arg(&guid)
        .assert()
        .success()
        .stdout(contains("\"unshare-data\"").and(contains("\"tidy-up\"")));
}

#[test]
fn test_unknown_task_fails() {
    let h = CliHarness::new();
    h.cmd()
        .args(["status", "does-not-exist"])
        .assert()
        .failure()
        .stderr(contains("Task 'does-not-exist' not found."));
}

#[test]
fn test_submit_to_unknown_agent_fails() {
    let h = CliHarness::new();
    h.cmd()
        .arg("submit")
        .arg(&h.workflow_path)
        .args(["--agent", "nowhere"])
        .assert()
        .failure()
        .stderr(contains("Agent 'nowhere' is not defined"));
}

#[test]
fn test_agents_lists_configuration() {
    let h = CliHarness::new();
    h.cmd()
        .arg("agents")
        .assert()
        .success()
        .stdout(contains("sandbox"))
        .stdout(contains("alice@login.hpc.example.org"))
        .stdout(contains("slurm"));
}

#[test]
fn test_missing_config_file_fails() {
    let h = CliHarness::new();
    let mut cmd = assert_cmd::Command::new(env!("CARGO_BIN_EXE_orchard"));
    cmd.env("XDG_CACHE_HOME", h.root.path().join("xdg-cache"))
        .args(["--config"])
        .arg(h.root.path().join("absent.toml"))
        .arg("agents")
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}
