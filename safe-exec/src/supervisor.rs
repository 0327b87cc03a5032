use nix::sys::signal::Signal;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

use crate::{
    codec,
    isolation::IsolationBackend,
    profile::ResourceLimitProfile,
    types::{ExecutionOutcome, RawProcessResult},
};

/// Extra time on top of the wall-clock limit, so a backend's own limit fires first
pub const SUPERVISOR_GRACE: Duration = Duration::from_secs(5);

/// Signals that mean the child ran out of time
const TIMEOUT_SIGNALS: [Signal; 3] = [Signal::SIGKILL, Signal::SIGTERM, Signal::SIGXCPU];

/// Offsets at which wrappers report "killed by signal N" as an exit code:
/// nsjail uses 100 + N, shells use 128 + N.
const SIGNAL_EXIT_BASES: [i32; 2] = [100, 128];

/// Runs one script per call through an isolation backend and classifies the result
pub struct ExecutionSupervisor {
    backend: Arc<dyn IsolationBackend>,
    grace: Duration,
}

impl ExecutionSupervisor {
    pub fn new(backend: Arc<dyn IsolationBackend>) -> Self {
        Self {
            backend,
            grace: SUPERVISOR_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn backend(&self) -> &dyn IsolationBackend {
        self.backend.as_ref()
    }

    /// Hard deadline after which the process group is killed
    pub fn deadline(&self, profile: &ResourceLimitProfile) -> Duration {
        profile.wall_clock() + self.grace
    }

    /// Execute an already validated script. Never fails: every problem is an outcome.
    pub async fn run(&self, script: &str, profile: &ResourceLimitProfile) -> ExecutionOutcome {
        let deadline = self.deadline(profile);

        match self.backend.spawn(script, profile, deadline).await {
            Ok(raw) => classify(raw),
            Err(e) => {
                error!("{} backend failed to run script: {}", self.backend.kind(), e);
                ExecutionOutcome::SandboxFault {
                    exit_code: None,
                    stderr: e.to_string(),
                    stdout: String::new(),
                }
            }
        }
    }
}

/// Turn a raw process result into exactly one outcome
pub(crate) fn classify(raw: RawProcessResult) -> ExecutionOutcome {
    debug!(
        "Classifying exit_code={:?} signal={:?} killed_by_timeout={}",
        raw.exit_code, raw.signal, raw.killed_by_timeout
    );

    if raw.killed_by_timeout || raw.signal.is_some_and(is_timeout_signal) {
        return ExecutionOutcome::Timeout;
    }

    match raw.exit_code {
        Some(0) => codec::decode(&raw.stdout),
        Some(code) if is_signal_exit_code(code) => ExecutionOutcome::Timeout,
        exit_code => match codec::find_envelope(&raw.stdout) {
            // The wrapper exits nonzero after reporting the script's exception
            Some(envelope @ codec::Envelope::Error { .. }) => envelope.into(),
            _ => ExecutionOutcome::SandboxFault {
                exit_code,
                stderr: raw.stderr,
                stdout: raw.stdout,
            },
        },
    }
}

fn is_timeout_signal(signal: i32) -> bool {
    TIMEOUT_SIGNALS.iter().any(|s| *s as i32 == signal)
}

fn is_signal_exit_code(code: i32) -> bool {
    SIGNAL_EXIT_BASES
        .iter()
        .any(|base| is_timeout_signal(code - base))
}
