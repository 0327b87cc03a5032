use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::{
    error::Error,
    isolation::{BackendKind, IsolationBackend, SelfLimitingFallback},
    profile::ResourceLimitProfile,
    service::ExecutionService,
    supervisor::ExecutionSupervisor,
};

pub const PYTHON: &str = "/usr/bin/python3";

pub fn test_profile() -> ResourceLimitProfile {
    ResourceLimitProfile {
        wall_clock_secs: 5,
        cpu_secs: 5,
        ..ResourceLimitProfile::default()
    }
}

/// Python-backed tests skip themselves on hosts without an interpreter
pub fn python_available() -> bool {
    if Path::new(PYTHON).is_file() {
        return true;
    }
    eprintln!("Skipping test: {} not available", PYTHON);
    false
}

/// A service running scripts through the self-limiting backend with a short
/// wall clock and grace period
pub fn python_service(wall_clock_secs: u64) -> ExecutionService {
    let supervisor = ExecutionSupervisor::new(std::sync::Arc::new(SelfLimitingFallback::default()))
        .with_grace(Duration::from_secs(1));
    let profile = test_profile().with_wall_clock(wall_clock_secs);
    ExecutionService::with_supervisor(supervisor, profile, 4).expect("service builds")
}

/// Runs a fixed shell command instead of the interpreter. Lets the deadline
/// and kill path be tested without Python.
pub struct ShellBackend {
    command: String,
}

impl ShellBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl IsolationBackend for ShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SelfLimiting
    }

    fn command(&self, _profile: &ResourceLimitProfile) -> Result<Command, Error> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&self.command);
        Ok(command)
    }
}

/// True once `pid` no longer exists or is a zombie awaiting its reaper
pub fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| matches!(rest.trim_start().chars().next(), Some('Z' | 'X')))
            .unwrap_or(false),
    }
}

pub async fn wait_until_gone(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if process_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    process_gone(pid)
}
