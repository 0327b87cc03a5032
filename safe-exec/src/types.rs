use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Raw output of one isolated child process, before classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProcessResult {
    /// Captured stdout (capped at the profile's output limit)
    pub stdout: String,
    /// Captured stderr (capped at the profile's output limit)
    pub stderr: String,
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    /// Set when the supervisor's deadline expired and it killed the process group
    pub killed_by_timeout: bool,
}

/// Classified result of one execution. Exactly one is produced per executed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// `main()` returned a JSON-representable value
    Success { result: Value, stdout: String },
    /// `main()` raised, was missing, or returned something not JSON-representable
    UserError { message: String },
    /// Wall-clock or CPU deadline exceeded
    Timeout,
    /// Clean exit but the envelope was missing or malformed
    ProtocolViolation { raw_output: String },
    /// Nonzero exit not attributable to a timeout, or the sandbox failed to start
    SandboxFault {
        exit_code: Option<i32>,
        stderr: String,
        stdout: String,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::UserError { .. } => "user_error",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::ProtocolViolation { .. } => "protocol_violation",
            ExecutionOutcome::SandboxFault { .. } => "sandbox_fault",
        }
    }
}

/// Caller-facing description. Never includes raw output of a protocol violation.
impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success { .. } => write!(f, "Script executed successfully"),
            ExecutionOutcome::UserError { message } => write!(f, "{}", message),
            ExecutionOutcome::Timeout => write!(f, "Script execution timeout"),
            ExecutionOutcome::ProtocolViolation { .. } => {
                write!(f, "Invalid output format from script execution")
            }
            ExecutionOutcome::SandboxFault {
                exit_code, stderr, ..
            } => {
                match exit_code {
                    Some(code) => write!(f, "Sandbox failed with code {}", code)?,
                    None => write!(f, "Sandbox failed to run")?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr.trim_end())?;
                }
                Ok(())
            }
        }
    }
}
