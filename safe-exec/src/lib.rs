//! # Safe Script Execution
//!
//! Validates untrusted Python scripts and runs them inside an isolated child
//! process with bounded resources and a hard wall-clock deadline. The child
//! reports back through a single JSON envelope on stdout.

mod codec;
mod config;
mod error;
mod isolation;
mod profile;
mod service;
mod supervisor;
mod types;
mod validator;

#[cfg(test)]
mod tests;

pub use codec::{decode, wrapper_program, Envelope};
pub use config::ServiceConfig;
pub use error::Error;
pub use isolation::{
    build_backend, BackendKind, IsolationBackend, NamespaceIsolation, NsjailConfig,
    RlimitIsolation, SelfLimitingFallback,
};
pub use profile::ResourceLimitProfile;
pub use service::ExecutionService;
pub use supervisor::{ExecutionSupervisor, SUPERVISOR_GRACE};
pub use types::{ExecutionOutcome, RawProcessResult};
pub use validator::{Rejection, ScriptValidator, ValidationVerdict, MAX_SCRIPT_CHARS};

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, Error>;
