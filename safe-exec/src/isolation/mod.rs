//! Isolation backends
//!
//! Each backend only describes how to launch the interpreter. Spawning,
//! feeding the script, capturing output, enforcing the deadline and killing
//! whatever the script started are shared.

mod fallback;
mod nsjail;
mod process;
mod reaper;

pub use fallback::SelfLimitingFallback;
pub use nsjail::{NamespaceIsolation, NsjailConfig, RlimitIsolation};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{error::Error, profile::ResourceLimitProfile, types::RawProcessResult};

/// Which isolation strategy to use, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// nsjail with namespaces disabled, limits left to the host
    Namespace,
    /// nsjail with rlimits
    Rlimit,
    /// Plain interpreter that limits itself before exec
    SelfLimiting,
    /// `Namespace` if nsjail is installed, `SelfLimiting` otherwise
    #[default]
    Auto,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" => Ok(BackendKind::Namespace),
            "rlimit" => Ok(BackendKind::Rlimit),
            "self-limiting" => Ok(BackendKind::SelfLimiting),
            "auto" => Ok(BackendKind::Auto),
            _ => Err(format!("Unsupported backend: {}", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Namespace => "namespace",
            BackendKind::Rlimit => "rlimit",
            BackendKind::SelfLimiting => "self-limiting",
            BackendKind::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// A way of running the wrapper program in isolation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// The concrete strategy (never `Auto`)
    fn kind(&self) -> BackendKind;

    /// Build the command that runs the wrapper program under this backend
    fn command(&self, profile: &ResourceLimitProfile) -> Result<Command, Error>;

    /// Run one script to completion or until `deadline` expires
    async fn spawn(
        &self,
        script: &str,
        profile: &ResourceLimitProfile,
        deadline: Duration,
    ) -> Result<RawProcessResult, Error> {
        let tree = reaper::ProcessTree::new();
        // Passed through the profile so jailed children inherit it as well
        let profile = profile.clone().with_env(reaper::RUN_MARKER, tree.token());
        let command = self.command(&profile)?;
        process::run(command, script, profile.max_output_bytes, deadline, tree).await
    }
}

/// Build the backend for `kind`, resolving `Auto` against the host
pub fn build_backend(kind: BackendKind, config: &NsjailConfig) -> Arc<dyn IsolationBackend> {
    let resolved = match kind {
        BackendKind::Auto if config.is_available() => BackendKind::Namespace,
        BackendKind::Auto => {
            warn!(
                "nsjail not found at {}, falling back to self-limiting interpreter",
                config.nsjail.display()
            );
            BackendKind::SelfLimiting
        }
        other => other,
    };

    info!("Using {} isolation backend", resolved);

    match resolved {
        BackendKind::Namespace => Arc::new(NamespaceIsolation::new(config.clone())),
        BackendKind::Rlimit => Arc::new(RlimitIsolation::new(config.clone())),
        BackendKind::SelfLimiting | BackendKind::Auto => {
            Arc::new(SelfLimitingFallback::new(config.python.clone()))
        }
    }
}
