//! Ownership of the two named pipes connecting the supervisor to the detector.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::net::unix::pipe;

/// Size of one bounded read from the inbound pipe.
const READ_BUFFER_SIZE: usize = 4096;

/// Error type for pipe operations.
#[derive(thiserror::Error, Debug)]
pub enum PipeError {
    /// A pipe end could not be opened.
    #[error("cannot open pipe {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The operation needs an open pipe and there is none.
    #[error("pipe is not open")]
    NotOpen,
    /// The detector closed its end of the inbound pipe.
    #[error("inbound pipe closed by peer")]
    Closed,
    /// A read failed.
    #[error("pipe read failed: {0}")]
    Read(std::io::Error),
    /// A write failed.
    #[error("pipe write failed: {0}")]
    Write(std::io::Error),
    /// A write was accepted only partially.
    #[error("short write to outbound pipe ({written} of {len} bytes)")]
    Partial { written: usize, len: usize },
}

/// Both ends of the detector channel.
///
/// The supervisor worker is the exclusive owner. Reads are taken one bounded
/// batch at a time: the worker only re-arms readiness after the previous batch
/// is fully parsed, so a second notification can never interleave with
/// in-progress parsing.
#[derive(Debug, Default)]
pub struct DetectorPipes {
    inbound: Option<pipe::Receiver>,
    outbound: Option<pipe::Sender>,
    carry: String,
}

impl DetectorPipes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both pipe ends are currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inbound.is_some() && self.outbound.is_some()
    }

    /// Open the inbound end read-only non-blocking and the outbound end for
    /// writing.
    ///
    /// Idempotent and retry-friendly: a previously opened outbound end is
    /// closed first so a stale writer from before a detector restart never
    /// lingers, while an inbound end that survived an earlier partial attempt
    /// is reused. Opening the outbound end fails with `ENXIO` until the
    /// detector holds the read side; callers retry on a timer.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Open`] naming the end that failed; the channel is
    /// left not-open and the call can simply be repeated.
    pub fn open(&mut self, inbound: &Path, outbound: &Path) -> Result<(), PipeError> {
        self.outbound.take();

        if self.inbound.is_none() {
            let receiver =
                pipe::OpenOptions::new()
                    .open_receiver(inbound)
                    .map_err(|source| PipeError::Open {
                        path: inbound.to_path_buf(),
                        source,
                    })?;
            self.inbound = Some(receiver);
            self.carry.clear();
        }

        let sender = pipe::OpenOptions::new()
            .open_sender(outbound)
            .map_err(|source| PipeError::Open {
                path: outbound.to_path_buf(),
                source,
            })?;
        self.outbound = Some(sender);

        Ok(())
    }

    /// Wait until the inbound pipe has data.
    ///
    /// Resolves only while the channel is fully open and is parked forever
    /// otherwise, so it can sit unconditionally in a `select!` branch.
    pub async fn readable(&self) {
        match (&self.inbound, &self.outbound) {
            (Some(receiver), Some(_)) => {
                // A readiness error surfaces on the following read attempt.
                let _ = receiver.readable().await;
            }
            _ => std::future::pending().await,
        }
    }

    /// Perform one bounded read and return the complete records it produced,
    /// empties skipped.
    ///
    /// A record split across reads is carried over until its newline arrives.
    ///
    /// # Errors
    ///
    /// [`PipeError::Closed`] when the detector dropped its write end,
    /// [`PipeError::Read`] for anything else; a would-block wakeup is an
    /// empty batch, not an error.
    pub fn read_lines(&mut self) -> Result<Vec<String>, PipeError> {
        let receiver = self.inbound.as_ref().ok_or(PipeError::NotOpen)?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        match receiver.try_read(&mut buf) {
            Ok(0) => Err(PipeError::Closed),
            Ok(n) => {
                self.carry.push_str(&String::from_utf8_lossy(&buf[..n]));
                Ok(self.drain_complete_lines())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(PipeError::Read(e)),
        }
    }

    fn drain_complete_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let record: String = self.carry.drain(..=pos).collect();
            let record = record.trim_end();
            if !record.is_empty() {
                lines.push(record.to_string());
            }
        }
        lines
    }

    /// Write one newline-terminated command and flush it to the detector.
    ///
    /// No buffering across calls; the detector observes the command
    /// immediately.
    ///
    /// # Errors
    ///
    /// [`PipeError::NotOpen`] when the outbound end is closed, otherwise
    /// [`PipeError::Write`] or [`PipeError::Partial`].
    pub fn write_line(&mut self, command: &str) -> Result<(), PipeError> {
        let sender = self.outbound.as_ref().ok_or(PipeError::NotOpen)?;

        let mut payload = String::with_capacity(command.len() + 1);
        payload.push_str(command);
        payload.push('\n');

        match sender.try_write(payload.as_bytes()) {
            Ok(written) if written == payload.len() => Ok(()),
            Ok(written) => Err(PipeError::Partial {
                written,
                len: payload.len(),
            }),
            Err(e) => Err(PipeError::Write(e)),
        }
    }

    /// Close both pipe ends and drop any partial record. Safe to call when
    /// already closed.
    pub fn close(&mut self) {
        self.inbound.take();
        self.outbound.take();
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    struct FifoPair {
        _dir: TempDir,
        inbound: PathBuf,
        outbound: PathBuf,
    }

    fn fifo_pair() -> FifoPair {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("detector.out");
        let outbound = dir.path().join("detector.in");
        mkfifo(&inbound, Mode::S_IRWXU).unwrap();
        mkfifo(&outbound, Mode::S_IRWXU).unwrap();
        FifoPair {
            _dir: dir,
            inbound,
            outbound,
        }
    }

    #[tokio::test]
    async fn write_line_reaches_the_peer() {
        let fifos = fifo_pair();
        let peer = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();

        let mut pipes = DetectorPipes::new();
        tokio_test::assert_ok!(pipes.open(&fifos.inbound, &fifos.outbound));
        assert!(pipes.is_open());

        tokio_test::assert_ok!(pipes.write_line("detect"));

        peer.readable().await.unwrap();
        let mut buf = [0u8; 64];
        let n = peer.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"detect\n");
    }

    #[tokio::test]
    async fn read_lines_reassembles_partial_records() {
        let fifos = fifo_pair();
        let _peer_reader = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();

        let mut pipes = DetectorPipes::new();
        pipes.open(&fifos.inbound, &fifos.outbound).unwrap();

        let peer_writer = pipe::OpenOptions::new()
            .open_sender(&fifos.inbound)
            .unwrap();

        peer_writer.try_write(b"loc: 1 2").unwrap();
        pipes.readable().await;
        assert!(pipes.read_lines().unwrap().is_empty());

        peer_writer.try_write(b" 3\nloc: 4 5 6\n").unwrap();
        pipes.readable().await;
        assert_eq!(pipes.read_lines().unwrap(), vec!["loc: 1 2 3", "loc: 4 5 6"]);
    }

    #[tokio::test]
    async fn empty_records_are_skipped() {
        let fifos = fifo_pair();
        let _peer_reader = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();

        let mut pipes = DetectorPipes::new();
        pipes.open(&fifos.inbound, &fifos.outbound).unwrap();

        let peer_writer = pipe::OpenOptions::new()
            .open_sender(&fifos.inbound)
            .unwrap();
        peer_writer.try_write(b"\n\nloc: 1 2 3\n\n").unwrap();

        pipes.readable().await;
        assert_eq!(pipes.read_lines().unwrap(), vec!["loc: 1 2 3"]);
    }

    #[tokio::test]
    async fn peer_hangup_reports_closed() {
        let fifos = fifo_pair();
        let _peer_reader = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();

        let mut pipes = DetectorPipes::new();
        pipes.open(&fifos.inbound, &fifos.outbound).unwrap();

        let peer_writer = pipe::OpenOptions::new()
            .open_sender(&fifos.inbound)
            .unwrap();
        drop(peer_writer);

        pipes.readable().await;
        assert!(matches!(pipes.read_lines(), Err(PipeError::Closed)));
    }

    #[tokio::test]
    async fn open_without_a_reader_fails_but_keeps_inbound() {
        let fifos = fifo_pair();

        let mut pipes = DetectorPipes::new();
        let err = pipes.open(&fifos.inbound, &fifos.outbound).unwrap_err();
        assert!(matches!(err, PipeError::Open { .. }));
        assert!(!pipes.is_open());

        // Once the peer holds the read side, a retry completes the channel.
        let _peer = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();
        pipes.open(&fifos.inbound, &fifos.outbound).unwrap();
        assert!(pipes.is_open());
    }

    #[tokio::test]
    async fn open_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipes = DetectorPipes::new();
        let err = pipes
            .open(&dir.path().join("nope.out"), &dir.path().join("nope.in"))
            .unwrap_err();
        assert!(matches!(err, PipeError::Open { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let fifos = fifo_pair();
        let _peer = pipe::OpenOptions::new()
            .open_receiver(&fifos.outbound)
            .unwrap();

        let mut pipes = DetectorPipes::new();
        pipes.open(&fifos.inbound, &fifos.outbound).unwrap();

        pipes.close();
        pipes.close();
        assert!(!pipes.is_open());
        assert!(matches!(pipes.write_line("detect"), Err(PipeError::NotOpen)));
        assert!(matches!(pipes.read_lines(), Err(PipeError::NotOpen)));
    }
}
