use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    error::Error, isolation::BackendKind, isolation::NsjailConfig, profile::ResourceLimitProfile,
};

/// Startup configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Isolation strategy
    pub backend: BackendKind,
    /// Executions allowed to run at the same time
    pub max_concurrent_executions: usize,
    /// Python interpreter
    pub python: PathBuf,
    /// nsjail binary
    pub nsjail: PathBuf,
    /// nsjail log file
    pub nsjail_log: PathBuf,
    /// Limits applied to every execution
    pub limits: ResourceLimitProfile,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let nsjail = NsjailConfig::default();
        Self {
            backend: BackendKind::Auto,
            max_concurrent_executions: 10,
            python: nsjail.python,
            nsjail: nsjail.nsjail,
            nsjail_log: nsjail.log,
            limits: ResourceLimitProfile::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimitProfile) -> Self {
        self.limits = limits;
        self
    }

    pub fn nsjail_config(&self) -> NsjailConfig {
        NsjailConfig {
            nsjail: self.nsjail.clone(),
            python: self.python.clone(),
            log: self.nsjail_log.clone(),
        }
    }

    /// Reject settings that would make every execution fail
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent_executions == 0 {
            return Err(Error::Config(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.limits.wall_clock_secs == 0 {
            return Err(Error::Config(
                "limits.wall_clock_secs must be at least 1".to_string(),
            ));
        }
        if self.limits.cpu_secs == 0 {
            return Err(Error::Config("limits.cpu_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}
