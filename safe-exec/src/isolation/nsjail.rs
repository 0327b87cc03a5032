use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::{BackendKind, IsolationBackend};
use crate::{codec::wrapper_program, error::Error, profile::ResourceLimitProfile};

const MIB: u64 = 1024 * 1024;

/// Namespaces nsjail would otherwise create. The target hosts cannot grant
/// the privileges they need.
const DISABLED_NAMESPACES: &[&str] = &[
    "--disable_clone_newnet",
    "--disable_clone_newuser",
    "--disable_clone_newns",
    "--disable_clone_newpid",
    "--disable_clone_newipc",
    "--disable_clone_newuts",
    "--disable_clone_newcgroup",
];

/// Where nsjail and the interpreter live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsjailConfig {
    /// nsjail binary
    pub nsjail: PathBuf,
    /// Python interpreter, as seen from inside the jail
    pub python: PathBuf,
    /// nsjail's own log file
    pub log: PathBuf,
}

impl Default for NsjailConfig {
    fn default() -> Self {
        Self {
            nsjail: PathBuf::from("/usr/local/bin/nsjail"),
            python: PathBuf::from("/usr/bin/python3"),
            log: PathBuf::from("/tmp/nsjail.log"),
        }
    }
}

impl NsjailConfig {
    /// Whether the nsjail binary exists, either at the configured path or on `PATH`
    pub fn is_available(&self) -> bool {
        self.nsjail.is_file() || which::which(&self.nsjail).is_ok()
    }

    /// Options shared by every nsjail backend, up to (not including) `--`
    fn base_args(&self, profile: &ResourceLimitProfile) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--mode".into(),
            "o".into(),
            "--time_limit".into(),
            profile.wall_clock_secs.to_string(),
            "--log".into(),
            self.log.display().to_string(),
            "--disable_proc".into(),
        ];
        args.extend(DISABLED_NAMESPACES.iter().map(|s| s.to_string()));
        for pair in profile.env_pairs() {
            args.push("--env".into());
            args.push(pair);
        }
        args.push("--quiet".into());
        args
    }

    /// `-- <python> -c <wrapper>`
    fn interpreter_args(&self) -> Vec<String> {
        vec![
            "--".into(),
            self.python.display().to_string(),
            "-c".into(),
            wrapper_program().to_string(),
        ]
    }

    fn command(&self, args: Vec<String>) -> Command {
        debug!(
            "nsjail command: {} {:?}",
            self.nsjail.display(),
            &args[..args.len().saturating_sub(1)]
        );
        let mut command = Command::new(&self.nsjail);
        command.args(args).env_clear();
        command
    }
}

/// nsjail with namespaces and `/proc` disabled and its own wall-clock limit.
/// Memory and CPU bounds are left to the host (container limits).
#[derive(Debug, Clone, Default)]
pub struct NamespaceIsolation {
    config: NsjailConfig,
}

impl NamespaceIsolation {
    pub fn new(config: NsjailConfig) -> Self {
        Self { config }
    }

    /// Full argument list passed to nsjail
    pub fn args(&self, profile: &ResourceLimitProfile) -> Vec<String> {
        let mut args = self.config.base_args(profile);
        args.extend(self.config.interpreter_args());
        args
    }
}

#[async_trait]
impl IsolationBackend for NamespaceIsolation {
    fn kind(&self) -> BackendKind {
        BackendKind::Namespace
    }

    fn command(&self, profile: &ResourceLimitProfile) -> Result<Command, Error> {
        Ok(self.config.command(self.args(profile)))
    }
}

/// nsjail that also applies rlimits itself, so it needs no cooperation from
/// the host to bound memory and CPU.
#[derive(Debug, Clone, Default)]
pub struct RlimitIsolation {
    config: NsjailConfig,
}

impl RlimitIsolation {
    pub fn new(config: NsjailConfig) -> Self {
        Self { config }
    }

    /// Full argument list passed to nsjail
    pub fn args(&self, profile: &ResourceLimitProfile) -> Vec<String> {
        let mut args = self.config.base_args(profile);
        args.extend([
            "--rlimit_as".into(),
            to_mib(profile.memory_bytes).to_string(),
            "--rlimit_cpu".into(),
            profile.cpu_secs.to_string(),
            "--rlimit_fsize".into(),
            to_mib(profile.max_file_size_bytes).to_string(),
            "--rlimit_nofile".into(),
            profile.max_open_files.to_string(),
            "--rlimit_nproc".into(),
            profile.max_processes.to_string(),
        ]);
        args.extend(self.config.interpreter_args());
        args
    }
}

#[async_trait]
impl IsolationBackend for RlimitIsolation {
    fn kind(&self) -> BackendKind {
        BackendKind::Rlimit
    }

    fn command(&self, profile: &ResourceLimitProfile) -> Result<Command, Error> {
        Ok(self.config.command(self.args(profile)))
    }
}

/// nsjail takes sizes in MiB; round up so a limit never becomes zero
fn to_mib(bytes: u64) -> u64 {
    bytes.div_ceil(MIB).max(1)
}
