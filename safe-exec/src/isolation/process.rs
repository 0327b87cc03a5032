use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Mutex,
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{debug, warn};

use super::reaper::{ProcessTree, RUN_MARKER};
use crate::{error::Error, types::RawProcessResult};

/// How long to wait for the output pipes to drain once the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Spawn `command` in its own process group, write `script` to its stdin and
/// collect its output. If `deadline` passes first every process of the run is
/// killed; after a normal exit anything the child left behind is killed too.
pub(crate) async fn run(
    mut command: Command,
    script: &str,
    output_limit: usize,
    deadline: Duration,
    mut tree: ProcessTree,
) -> Result<RawProcessResult, Error> {
    command
        .env(RUN_MARKER, tree.token())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;
    let pid = child.id();
    tree.set_root(pid);
    debug!("Spawned sandbox process {:?}", pid);

    let stdin = child.stdin.take();
    let input = script.to_owned();
    let writer = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            // The child may exit without reading; a broken pipe is expected then
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("Failed to write script to stdin: {}", e);
            }
            // Dropping stdin signals EOF
        }
    });

    let stdout = Reader::spawn(child.stdout.take(), output_limit);
    let stderr = Reader::spawn(child.stderr.take(), output_limit);

    let (status, killed_by_timeout) = match time::timeout(deadline, child.wait()).await {
        Ok(status) => (
            status.map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?,
            false,
        ),
        Err(_) => {
            warn!(
                "Process {:?} exceeded deadline of {}s, killing",
                pid,
                deadline.as_secs()
            );
            tree.kill().await;
            let status = child
                .wait()
                .await
                .map_err(|e| Error::Sandbox(format!("Failed to reap process: {}", e)))?;
            (status, true)
        }
    };

    // Anything the script left running goes too, wherever it moved to
    let swept = tree.kill().await;
    if swept > 0 && !killed_by_timeout {
        warn!("Killed {} process(es) left behind by {:?}", swept, pid);
    }
    writer.abort();

    let stdout = stdout.drain().await;
    let stderr = stderr.drain().await;

    debug!(
        "Process {:?} finished in {:?} with {}",
        pid,
        start.elapsed(),
        status
    );

    Ok(RawProcessResult {
        stdout,
        stderr,
        exit_code: status.code(),
        signal: status.signal(),
        killed_by_timeout,
    })
}

/// Background reader for one output pipe. Bytes land in a shared buffer so
/// they survive the reader being cancelled.
struct Reader {
    buffer: OutputBuffer,
    handle: JoinHandle<()>,
}

impl Reader {
    fn spawn<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = OutputBuffer::default();
        let handle = tokio::spawn(read_capped(reader, limit, buffer.clone()));
        Self { buffer, handle }
    }

    /// Wait briefly for EOF, then keep whatever arrived. A pipe held open by
    /// something that escaped the kill does not hold up the result.
    async fn drain(mut self) -> String {
        match time::timeout(DRAIN_TIMEOUT, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader failed: {}", e),
            Err(_) => {
                warn!("Output pipe still open after process exit");
                self.handle.abort();
            }
        }

        let kept = self.buffer.lock().await;
        String::from_utf8_lossy(&kept).into_owned()
    }
}

/// Read to EOF, keeping at most `limit` bytes. The rest is discarded so the
/// child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize, kept: OutputBuffer) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut kept = kept.lock().await;
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                debug!("Output read failed: {}", e);
                break;
            }
        }
    }
}
