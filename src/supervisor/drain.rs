//! Output drain for a supervised process.
//!
//! stdout and stderr are merged into one line stream and consumed on a
//! spawned task, so a full pipe can never block the child while the
//! supervisor is busy elsewhere.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

/// Severity of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Error,
    Warning,
    Info,
}

/// Classify a line by the markers it contains (case-insensitive).
pub fn classify(line: &str) -> LineLevel {
    let upper = line.to_uppercase();
    if upper.contains("ERROR") {
        LineLevel::Error
    } else if upper.contains("WARNING") {
        LineLevel::Warning
    } else {
        LineLevel::Info
    }
}

/// Captured lines, shared between the drain task and the supervisor.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputBuffer {
    pub async fn push(&self, line: String) {
        self.lines.lock().await.push(line);
    }

    pub async fn len(&self) -> usize {
        self.lines.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }
}

/// Spawn the drain task. `done` fires when both streams are exhausted.
pub fn spawn<O, E>(
    label: String,
    stdout: O,
    stderr: E,
    buffer: OutputBuffer,
    done: oneshot::Sender<()>,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let stdout = SplitStream::new(BufReader::new(stdout).split(b'\n'));
        let stderr = SplitStream::new(BufReader::new(stderr).split(b'\n'));
        let mut lines = stdout.merge(stderr);

        while let Some(item) = lines.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(layer = %label, error = %e, "Output read failed");
                    break;
                }
            };

            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() {
                continue;
            }

            match classify(&line) {
                LineLevel::Error => error!(layer = %label, "{line}"),
                LineLevel::Warning => warn!(layer = %label, "{line}"),
                LineLevel::Info => debug!(layer = %label, "{line}"),
            }
            buffer.push(line).await;
        }

        let _ = done.send(());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("ERROR 1: Unable to open datasource"), LineLevel::Error);
        assert_eq!(classify("Warning 6: Normalized field name"), LineLevel::Warning);
        assert_eq!(classify("0...10...20...30"), LineLevel::Info);
        assert_eq!(classify("error and warning"), LineLevel::Error);
    }

    #[tokio::test]
    async fn test_drain_merges_and_skips_blank_lines() {
        let stdout: &[u8] = b"first\n\n  second  \r\n";
        let stderr: &[u8] = b"ERROR 1: broken\nlast without newline";
        let buffer = OutputBuffer::default();
        let (tx, rx) = oneshot::channel();

        let handle = spawn("Routes".into(), stdout, stderr, buffer.clone(), tx);
        rx.await.unwrap();
        handle.await.unwrap();

        let mut lines = buffer.snapshot().await;
        lines.sort();
        assert_eq!(
            lines,
            vec!["ERROR 1: broken", "first", "last without newline", "second"]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_kept_lossily() {
        let stdout: &[u8] = b"caf\xe9\n";
        let buffer = OutputBuffer::default();
        let (tx, rx) = oneshot::channel();

        spawn("Routes".into(), stdout, tokio::io::empty(), buffer.clone(), tx);
        rx.await.unwrap();

        assert_eq!(buffer.snapshot().await, vec!["caf\u{fffd}"]);
    }
}
