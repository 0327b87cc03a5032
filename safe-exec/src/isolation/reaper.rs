//! Finding and killing everything a run started.
//!
//! A process group is not enough: a script can `setsid()` its way out of the
//! group, and an orphan is reparented away from the child before it can be
//! found by walking parent links. Every run therefore carries a marker in its
//! environment, which descendants inherit, and the kill covers both the
//! current descendants of the child and every process carrying the marker.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::fs;
use tokio::time::{self, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

/// Environment variable tagging every process of one run
pub const RUN_MARKER: &str = "SAFE_EXEC_RUN";

/// Scan-and-kill passes before giving up on a process that keeps forking
const KILL_ROUNDS: usize = 20;

const KILL_INTERVAL: Duration = Duration::from_millis(10);

/// The processes belonging to one run
#[derive(Debug, Clone)]
pub(crate) struct ProcessTree {
    token: String,
    root: Option<u32>,
}

impl ProcessTree {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            root: None,
        }
    }

    /// Value of [`RUN_MARKER`] for this run
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn set_root(&mut self, pid: Option<u32>) {
        self.root = pid;
    }

    /// Live processes of this run, excluding the current process
    pub fn members(&self) -> Vec<u32> {
        let needle = format!("{}={}", RUN_MARKER, self.token);
        let own = std::process::id();

        let mut parents: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut found = HashSet::new();

        for pid in proc_pids() {
            if pid == own {
                continue;
            }
            let Some((state, ppid)) = read_stat(pid) else {
                continue;
            };
            if matches!(state, 'Z' | 'X') {
                continue;
            }
            parents.entry(ppid).or_default().push(pid);
            if carries_marker(pid, &needle) {
                found.insert(pid);
            }
        }

        // Descendants still linked to the root
        let mut pending: Vec<u32> = self.root.into_iter().collect();
        while let Some(pid) = pending.pop() {
            if let Some(children) = parents.get(&pid) {
                for child in children {
                    if found.insert(*child) {
                        pending.push(*child);
                    }
                }
            }
        }
        if let Some(root) = self.root {
            if read_stat(root).is_some_and(|(state, _)| !matches!(state, 'Z' | 'X')) {
                found.insert(root);
            }
        }

        found.into_iter().collect()
    }

    /// SIGKILL every member until none is left. Returns how many kills were sent.
    pub async fn kill(&self) -> usize {
        if let Some(root) = self.root {
            signal_group(root);
        }

        let mut sent = 0;
        for _ in 0..KILL_ROUNDS {
            let members = self.members();
            if members.is_empty() {
                return sent;
            }
            debug!("Killing {} process(es) of run {}", members.len(), self.token);
            for pid in members {
                match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    Ok(()) => sent += 1,
                    Err(Errno::ESRCH) => {}
                    Err(e) => warn!("Failed to kill process {}: {}", pid, e),
                }
            }
            time::sleep(KILL_INTERVAL).await;
        }

        let left = self.members();
        if !left.is_empty() {
            warn!("Processes of run {} still alive: {:?}", self.token, left);
        }
        sent
    }
}

/// SIGKILL the process group led by `pid`
fn signal_group(pid: u32) {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

fn proc_pids() -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect()
}

/// State and parent pid from `/proc/<pid>/stat`
fn read_stat(pid: u32) -> Option<(char, u32)> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&stat)
}

fn parse_stat(stat: &str) -> Option<(char, u32)> {
    // The command name may itself contain spaces and parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

fn carries_marker(pid: u32, needle: &str) -> bool {
    fs::read(format!("/proc/{}/environ", pid))
        .map(|environ| {
            environ
                .split(|b| *b == 0)
                .any(|var| var == needle.as_bytes())
        })
        .unwrap_or(false)
}
