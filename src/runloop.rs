//! Main-thread housekeeping loop and shutdown requests

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::session::Session;

/// Cancellation flag shared by the loop and whatever requests termination
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown on the first interrupt signal
    pub fn watch_interrupt(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, finalizing"),
                Err(e) => warn!(error = %e, "cannot listen for interrupt, shutting down"),
            }
            shutdown.request();
        });
    }

    /// Request shutdown when standard input reaches end-of-input.
    ///
    /// Runs on a detached OS thread: a blocked stdin read must not hold up
    /// process exit.
    pub fn watch_stdin(&self) -> std::io::Result<()> {
        let shutdown = self.clone();
        thread::Builder::new()
            .name("stdin-watch".into())
            .spawn(move || shutdown.request_at_eof(std::io::stdin().lock()))?;
        Ok(())
    }

    /// Discard `input` until it reports end-of-input, then request shutdown.
    ///
    /// Content is never interpreted. A read error other than an interrupt
    /// leaves the flag untouched: only end-of-input or a signal terminates.
    pub fn request_at_eof<R: Read>(&self, mut input: R) {
        let mut scratch = [0u8; 4096];
        loop {
            match input.read(&mut scratch) {
                Ok(0) => {
                    info!("end of input, finalizing");
                    self.request();
                    return;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "standard input unreadable, no longer watched");
                    return;
                }
            }
        }
    }
}

/// Pump driver housekeeping until shutdown is requested, then stop the session.
///
/// Each iteration writes `heartbeat` on its own line to `out`. Returns the
/// number of completed iterations.
pub async fn run_loop<W>(
    session: &mut Session,
    shutdown: &Shutdown,
    interval: Duration,
    heartbeat: &str,
    out: &mut W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut iterations = 0u64;
    let line = format!("{heartbeat}\n");

    while !shutdown.is_requested() {
        session.housekeeping();
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        iterations += 1;
        tokio::time::sleep(interval).await;
    }

    debug!(iterations, "run loop finished");
    session.stop();
    Ok(iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SyntheticDriver;
    use crate::session::SessionState;
    use crate::Config;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    /// Serves queued reads, then end-of-input
    struct Pipe {
        chunks: VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn binary_input_does_not_end_the_session_before_eof() {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        struct Channel(std::sync::mpsc::Receiver<Vec<u8>>);
        impl Read for Channel {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                // A closed sender is end-of-input.
                let chunk = self.0.recv().unwrap_or_default();
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }

        let shutdown = Shutdown::new();
        let watcher = shutdown.clone();
        let handle = thread::spawn(move || watcher.request_at_eof(Channel(rx)));

        tx.send(b"\xff\xfe\n".to_vec()).unwrap();
        tx.send(b"no newline yet".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!shutdown.is_requested());

        drop(tx);
        handle.join().unwrap();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let shutdown = Shutdown::new();
        shutdown.request_at_eof(Pipe {
            chunks: VecDeque::from([
                Ok(b"\xff\n".to_vec()),
                Err(std::io::Error::from(ErrorKind::Interrupted)),
                Ok(b"more".to_vec()),
            ]),
        });
        assert!(shutdown.is_requested());
    }

    #[test]
    fn read_errors_do_not_request_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.request_at_eof(Pipe {
            chunks: VecDeque::from([Err(std::io::Error::from(ErrorKind::InvalidData))]),
        });
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn loop_emits_heartbeats_until_shutdown() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.publish.directory = dir.path().to_path_buf();
        config.color.resolution = crate::capture::Resolution::Low;
        config.depth.resolution = crate::capture::Resolution::Low;

        let driver = SyntheticDriver::new(1, 60);
        let mut session = Session::init(&driver, &config).unwrap();
        session.start().unwrap();

        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.request();
        });

        let mut out = Vec::new();
        let iterations = run_loop(
            &mut session,
            &shutdown,
            Duration::from_millis(10),
            "#end",
            &mut out,
        )
        .await
        .unwrap();

        assert!(iterations >= 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count() as u64, iterations);
        assert!(text.lines().all(|l| l == "#end"));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn requested_shutdown_skips_the_loop() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.publish.directory = dir.path().to_path_buf();
        let driver = SyntheticDriver::new(1, 30);
        let mut session = Session::init(&driver, &config).unwrap();

        let shutdown = Shutdown::new();
        shutdown.request();
        let mut out = Vec::new();
        let iterations = run_loop(&mut session, &shutdown, Duration::ZERO, "#end", &mut out)
            .await
            .unwrap();

        assert_eq!(iterations, 0);
        assert!(out.is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
        session.stop();
    }
}
