//! Console stream relay for the detector process.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc::{self, Receiver};

/// Default buffer size for the console event channel.
pub const DEFAULT_CONSOLE_BUFFER: usize = 64;

/// One observation from the detector's console streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line of standard output.
    Stdout(String),
    /// A line of standard error.
    Stderr(String),
}

/// Forward both console streams into a single channel, line by line.
///
/// The channel closes once both streams reach end of file. The detector can
/// exit without any OS-level error path firing, so the closed channel is the
/// earliest reliable signal that the process is gone.
pub fn spawn_readers(
    stdout: ChildStdout,
    stderr: ChildStderr,
    buffer: usize,
) -> Receiver<ProcessEvent> {
    let (tx, rx) = mpsc::channel(buffer);

    let stdout_tx = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdout_tx.send(ProcessEvent::Stdout(line)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(ProcessEvent::Stderr(line)).await.is_err() {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{DetectorProcess, DetectorProcessBuilder};

    #[cfg(unix)]
    #[tokio::test]
    async fn relays_stdout_lines_and_closes_on_exit() {
        let builder = DetectorProcessBuilder::new("/bin/echo").params("Entering video thread loop");
        let mut process = DetectorProcess::spawn(&builder).unwrap();

        let stdout = process.take_stdout().unwrap();
        let stderr = process.take_stderr().unwrap();
        let mut events = spawn_readers(stdout, stderr, DEFAULT_CONSOLE_BUFFER);

        assert_eq!(
            events.recv().await,
            Some(ProcessEvent::Stdout("Entering video thread loop".to_string()))
        );
        // Both streams hit EOF, so the channel closes.
        assert_eq!(events.recv().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relays_stderr_lines() {
        // `params` is whitespace-split, so the command goes through a script
        // file instead of inline `sh -c` text with spaces.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("noisy.sh");
        std::fs::write(&script, "#!/bin/sh\necho oops >&2\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let mut process =
            DetectorProcess::spawn(&DetectorProcessBuilder::new(&script)).unwrap();
        let stdout = process.take_stdout().unwrap();
        let stderr = process.take_stderr().unwrap();
        let mut events = spawn_readers(stdout, stderr, DEFAULT_CONSOLE_BUFFER);

        assert_eq!(
            events.recv().await,
            Some(ProcessEvent::Stderr("oops".to_string()))
        );
        assert_eq!(events.recv().await, None);
    }
}
