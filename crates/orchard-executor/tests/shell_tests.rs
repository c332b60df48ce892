use orchard_executor::{
    execute_read_only, ExecOptions, ExecutorError, LocalShell, RemoteShell, RetryPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn test_local_shell_separates_streams() {
    let shell = LocalShell::new("sandbox");
    let output = shell
        .run_script("echo one; echo two; echo oops 1>&2")
        .await
        .unwrap();
    assert_eq!(output.stdout, vec!["one", "two"]);
    assert_eq!(output.stderr, vec!["oops"]);
    assert_eq!(output.exit_code, 0);
}

#[tokio::test]
async fn test_execute_runs_in_directory_after_precommand() {
    let temp = tempdir().unwrap();
    let dir = temp.path().to_string_lossy().to_string();
    let shell = LocalShell::new("sandbox");
    let options = ExecOptions::new()
        .in_dir(&dir)
        .with_precommand("export GREETING=hello");

    let output = shell
        .execute("echo \"$GREETING\" && pwd", &options)
        .await
        .unwrap();
    assert_eq!(output.stdout[0], "hello");
    assert!(output.stdout[1].ends_with(temp.path().file_name().unwrap().to_str().unwrap()));
}

#[tokio::test]
async fn test_execute_rejects_stderr_unless_allowed() {
    let shell = LocalShell::new("sandbox");
    let err = shell
        .execute("echo noisy 1>&2", &ExecOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::UnexpectedStderr { .. }));

    let output = shell
        .execute("echo noisy 1>&2", &ExecOptions::new().allow_stderr())
        .await
        .unwrap();
    assert_eq!(output.stderr, vec!["noisy"]);
}

#[tokio::test]
async fn test_execute_reports_exit_code() {
    let shell = LocalShell::new("sandbox");
    let err = shell
        .execute("exit 3", &ExecOptions::new())
        .await
        .unwrap_err();
    match err {
        ExecutorError::CommandFailed { code, target, .. } => {
            assert_eq!(code, 3);
            assert_eq!(target, "sandbox");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_directory_fails_before_command() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("ran");
    let shell = LocalShell::new("sandbox");
    let options = ExecOptions::new().in_dir(temp.path().join("absent").to_string_lossy());

    let result = shell
        .execute(&format!("touch '{}'", marker.display()), &options.allow_stderr())
        .await;
    assert!(result.is_err());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_upload_creates_parent_directories() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("task/input/job.sh");
    let shell = LocalShell::new("sandbox");

    shell
        .upload(&path.to_string_lossy(), "#!/bin/bash\necho hi\n")
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "#!/bin/bash\necho hi\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_connectivity_failures() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let policy = RetryPolicy::read_only();

    let value = policy
        .run("pwd", move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ExecutorError::Connectivity {
                    target: "hpc".into(),
                    message: "Connection reset".into(),
                })
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let started = tokio::time::Instant::now();

    let err = RetryPolicy::read_only()
        .run("pwd", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ExecutorError::Connectivity {
                target: "hpc".into(),
                message: "No route to host".into(),
            })
        })
        .await
        .unwrap_err();

    assert!(err.is_connectivity());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_retry_does_not_repeat_command_failures() {
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let err = RetryPolicy::read_only()
        .run("ls", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ExecutorError::CommandFailed {
                target: "hpc".into(),
                command: "ls".into(),
                code: 2,
                stderr: "No such file or directory".into(),
            })
        })
        .await
        .unwrap_err();

    assert!(!err.is_connectivity());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_read_only_returns_output() {
    let shell = LocalShell::new("sandbox");
    let output = execute_read_only(&shell, "pwd", &ExecOptions::new(), &RetryPolicy::read_only())
        .await
        .unwrap();
    assert_eq!(output.stdout.len(), 1);
}
