use std::sync::Arc;
use tokio::time::{Duration, Instant};

use super::utils::{test_profile, wait_until_gone, ShellBackend};
use crate::{isolation::IsolationBackend, ExecutionOutcome, ExecutionSupervisor};

fn supervisor(command: &str) -> ExecutionSupervisor {
    ExecutionSupervisor::new(Arc::new(ShellBackend::new(command))).with_grace(Duration::ZERO)
}

#[tokio::test]
async fn test_envelope_from_shell_child() {
    let outcome = supervisor(r#"cat >/dev/null; echo '{"result": {"x": 1}, "stdout": ""}'"#)
        .run("def main(): pass", &test_profile().with_wall_clock(5))
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Success {
            result: serde_json::json!({"x": 1}),
            stdout: String::new()
        }
    );
}

#[tokio::test]
async fn test_deadline_yields_timeout() {
    let start = Instant::now();
    let outcome = supervisor("echo partial; sleep 30")
        .run("def main(): pass", &test_profile().with_wall_clock(1))
        .await;
    assert_eq!(outcome, ExecutionOutcome::Timeout);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_timeout_leaves_no_orphans() {
    let backend = ShellBackend::new("sleep 30 & echo $!; wait");
    let profile = test_profile().with_wall_clock(1);

    let raw = backend
        .spawn("", &profile, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(raw.killed_by_timeout);

    let pid: u32 = raw.stdout.trim().parse().expect("background pid");
    assert!(
        wait_until_gone(pid, Duration::from_secs(3)).await,
        "background process {} survived",
        pid
    );
}

#[tokio::test]
async fn test_background_process_is_swept_after_clean_exit() {
    let backend = ShellBackend::new("sleep 30 >/dev/null 2>&1 & echo $!");
    let raw = backend
        .spawn("", &test_profile(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(raw.exit_code, Some(0));
    assert!(!raw.killed_by_timeout);

    let pid: u32 = raw.stdout.trim().parse().expect("background pid");
    assert!(wait_until_gone(pid, Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_crash_is_sandbox_fault() {
    let outcome = supervisor("echo 'jail setup failed' >&2; exit 255")
        .run("def main(): pass", &test_profile())
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::SandboxFault {
            exit_code: Some(255),
            stderr: "jail setup failed\n".to_string(),
            stdout: String::new(),
        }
    );
}

#[tokio::test]
async fn test_nsjail_style_kill_code_is_timeout() {
    let outcome = supervisor("exit 109")
        .run("def main(): pass", &test_profile())
        .await;
    assert_eq!(outcome, ExecutionOutcome::Timeout);
}

fn setsid_available() -> bool {
    if which::which("setsid").is_ok() {
        return true;
    }
    eprintln!("Skipping test: setsid not available");
    false
}

#[tokio::test]
async fn test_new_session_is_killed_on_timeout() {
    if !setsid_available() {
        return;
    }
    let backend = ShellBackend::new("setsid sleep 30 & echo $!; wait");
    let raw = backend
        .spawn("", &test_profile(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(raw.killed_by_timeout);

    let pid: u32 = raw.stdout.trim().parse().expect("session leader pid");
    assert!(
        wait_until_gone(pid, Duration::from_secs(3)).await,
        "process in new session {} survived",
        pid
    );
}

#[tokio::test]
async fn test_new_session_holding_stdout_keeps_envelope() {
    if !setsid_available() {
        return;
    }
    let start = Instant::now();
    let backend = ShellBackend::new(
        r#"cat >/dev/null; setsid sleep 30 & echo $! >&2; echo '{"result": 1, "stdout": ""}'"#,
    );
    let raw = backend
        .spawn("def main(): pass", &test_profile(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(raw.exit_code, Some(0));
    assert_eq!(
        crate::decode(&raw.stdout),
        ExecutionOutcome::Success {
            result: serde_json::json!(1),
            stdout: String::new()
        }
    );
    assert!(start.elapsed() < Duration::from_secs(5));

    let pid: u32 = raw.stderr.trim().parse().expect("session leader pid");
    assert!(wait_until_gone(pid, Duration::from_secs(3)).await);
}
