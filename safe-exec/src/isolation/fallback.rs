use async_trait::async_trait;
use nix::sys::resource::{setrlimit, Resource};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::{BackendKind, IsolationBackend};
use crate::{codec::wrapper_program, error::Error, profile::ResourceLimitProfile};

/// Runs the interpreter directly. The child sets its own rlimits between
/// fork and exec; there is no namespace separation at all, so this is the
/// weakest backend and only meant for hosts without nsjail.
#[derive(Debug, Clone)]
pub struct SelfLimitingFallback {
    python: PathBuf,
}

impl Default for SelfLimitingFallback {
    fn default() -> Self {
        Self::new(PathBuf::from("/usr/bin/python3"))
    }
}

impl SelfLimitingFallback {
    pub fn new(python: PathBuf) -> Self {
        Self { python }
    }
}

#[async_trait]
impl IsolationBackend for SelfLimitingFallback {
    fn kind(&self) -> BackendKind {
        BackendKind::SelfLimiting
    }

    fn command(&self, profile: &ResourceLimitProfile) -> Result<Command, Error> {
        debug!("Self-limiting command: {} -c <wrapper>", self.python.display());

        let mut command = Command::new(&self.python);
        command
            .arg("-c")
            .arg(wrapper_program())
            .env_clear()
            .envs(&profile.allowed_env_vars)
            .current_dir(std::env::temp_dir());

        // Copy the limits out so the closure owns plain integers
        let memory = profile.memory_bytes;
        let cpu = profile.cpu_secs;
        let file_size = profile.max_file_size_bytes;
        let open_files = profile.max_open_files;

        unsafe {
            command.pre_exec(move || {
                setrlimit(Resource::RLIMIT_AS, memory, memory)?;
                setrlimit(Resource::RLIMIT_CPU, cpu, cpu)?;
                setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size)?;
                setrlimit(Resource::RLIMIT_NOFILE, open_files, open_files)?;
                Ok(())
            });
        }

        Ok(command)
    }
}
