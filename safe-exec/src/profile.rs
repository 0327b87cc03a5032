use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Resource constraints applied to every execution.
///
/// Built once at startup and shared read-only; requests never modify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimitProfile {
    /// Wall-clock limit (seconds)
    pub wall_clock_secs: u64,
    /// CPU time limit (seconds)
    pub cpu_secs: u64,
    /// Address space limit (bytes)
    pub memory_bytes: u64,
    /// Largest file the script may write (bytes)
    pub max_file_size_bytes: u64,
    /// Open file descriptor limit
    pub max_open_files: u64,
    /// Process/thread limit
    pub max_processes: u64,
    /// Cap on captured stdout and stderr, per stream (bytes)
    pub max_output_bytes: usize,
    /// The only environment the child sees
    #[serde(rename = "env")]
    pub allowed_env_vars: BTreeMap<String, String>,
}

impl Default for ResourceLimitProfile {
    fn default() -> Self {
        Self {
            wall_clock_secs: 30,
            cpu_secs: 30,
            memory_bytes: 512 * 1024 * 1024,       // 512MB
            max_file_size_bytes: 10 * 1024 * 1024, // 10MB
            max_open_files: 64,
            max_processes: 32,
            max_output_bytes: 1024 * 1024, // 1MB
            allowed_env_vars: default_env(),
        }
    }
}

impl ResourceLimitProfile {
    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.wall_clock_secs)
    }

    pub fn with_wall_clock(mut self, secs: u64) -> Self {
        self.wall_clock_secs = secs;
        self
    }

    pub fn with_cpu(mut self, secs: u64) -> Self {
        self.cpu_secs = secs;
        self
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.allowed_env_vars.insert(key.into(), value.into());
        self
    }

    /// `KEY=VALUE` pairs in a stable order
    pub fn env_pairs(&self) -> impl Iterator<Item = String> + '_ {
        self.allowed_env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
    }
}

fn default_env() -> BTreeMap<String, String> {
    [
        (
            "PYTHONPATH",
            "/usr/local/lib/python3.11/site-packages:/usr/lib/python3/dist-packages",
        ),
        ("PATH", "/usr/local/bin:/usr/bin:/bin"),
        ("HOME", "/tmp"),
        ("LANG", "C.UTF-8"),
        ("LC_ALL", "C.UTF-8"),
        // numeric libraries: single-threaded, no JIT, headless plotting
        ("OPENBLAS_NUM_THREADS", "1"),
        ("OMP_NUM_THREADS", "1"),
        ("NUMBA_DISABLE_JIT", "1"),
        ("MPLBACKEND", "Agg"),
        ("PYTHONDONTWRITEBYTECODE", "1"),
        ("PYTHONIOENCODING", "utf-8"),
        ("TZ", "UTC"),
        ("TMPDIR", "/tmp"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
