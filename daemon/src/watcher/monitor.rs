//! Locate, follow, classify, emit.
//!
//! One sequential pipeline per server log. Events go out on a single ordered
//! channel; a `watch` flag stops the pipeline.

use std::fs::File;
use std::future::Future;
use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::watcher::classifier::{classify, Event};
use crate::watcher::locator::{locate, open_log};
use crate::watcher::tailer::{LogTailer, TailOptions};

/// Run the monitor until cancelled, the receiver goes away, or a fatal error.
///
/// A locate failure is returned immediately. A read error re-locates the log
/// up to `tail.max_restarts` times before it is returned.
pub async fn monitor(
    config: Config,
    events: mpsc::UnboundedSender<Event>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    monitor_with(config, events, shutdown, open_log).await
}

/// [`monitor`] with a caller-supplied opener for the log.
async fn monitor_with<F, Fut>(
    config: Config,
    events: mpsc::UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
    mut open: F,
) -> Result<(), Error>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<File>>,
{
    let base_dir = config.log.base_dir()?;
    let relative = config.log.relative_path();
    let policy = config.retry.policy();
    let options = TailOptions {
        poll_interval: config.tail.poll_interval(),
        replay_existing: config.tail.replay_existing,
    };

    let mut restarts = 0;
    loop {
        let located = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => {
                debug!("Monitor cancelled while waiting for log");
                return Ok(());
            }
            located = locate(&base_dir, &relative, &policy, &mut open) => located?,
        };

        let mut tailer = LogTailer::follow(located, &options)?;
        match pump(&mut tailer, &events, &mut shutdown).await {
            Err(e @ Error::Read { .. }) if restarts < config.tail.max_restarts => {
                restarts += 1;
                warn!(error = %e, restarts, "Restarting log monitor");
            }
            other => return other,
        }
    }
}

/// Feed lines from `tailer` through the classifier until stopped.
async fn pump(
    tailer: &mut LogTailer,
    events: &mpsc::UnboundedSender<Event>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), Error> {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancelled(shutdown) => {
                info!(path = %tailer.path().display(), "Log monitor stopped");
                return Ok(());
            }
            line = tailer.next_line() => line?,
        };

        let Some(line) = line else {
            return Ok(());
        };

        let event = classify(&line);
        if event.is_lifecycle() && events.send(event).is_err() {
            debug!("Event receiver dropped, stopping monitor");
            return Ok(());
        }
    }
}

/// Resolves once stop is requested or the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use crate::config::{LogConfig, RetryConfig, TailConfig};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(base: &Path, max_attempts: u32, replay_existing: bool) -> Config {
        Config {
            log: LogConfig {
                base_dir: Some(base.to_path_buf()),
                ..LogConfig::default()
            },
            retry: RetryConfig {
                max_attempts,
                delay_ms: 10,
                backoff_factor: 1.0,
                max_delay_ms: 10,
            },
            tail: TailConfig {
                poll_interval_ms: 20,
                replay_existing,
                max_restarts: 0,
            },
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_events_in_log_order_after_late_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 500, true);
        let log_path = config.log_path().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor(config, tx, stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        fs::write(
            &log_path,
            "Listening has been started\n\
             ServerLobby: New player Alice with online id 3\n\
             some unrelated debug output\n\
             ServerLobby: New player Bob with online id 12\n\
             ServerLobby: Alice disconnected\n\
             Bob disconnected\n\
             STKHost: There are now 0 peers.\n",
        )
        .unwrap();

        assert_eq!(recv(&mut rx).await, Event::Ready);
        assert_eq!(recv(&mut rx).await, Event::PlayerJoin("Alice".into()));
        assert_eq!(recv(&mut rx).await, Event::PlayerJoin("Bob".into()));
        assert_eq!(recv(&mut rx).await, Event::PlayerLeave("Alice".into()));
        assert_eq!(recv(&mut rx).await, Event::PlayerLeave("Bob".into()));
        assert_eq!(recv(&mut rx).await, Event::Shutdown);

        stop_tx.send(true).unwrap();
        let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_log_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 2, false);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let err = monitor(config, tx, stop_rx).await.unwrap_err();
        assert!(matches!(err, Error::LogNotFound { attempts: 2, .. }));
    }

    // Reading a directory handle fails with EISDIR on Linux.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_read_error_relocates_then_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 3, true);
        config.tail.max_restarts = 2;
        let log_path = config.log_path().unwrap();
        fs::create_dir_all(&log_path).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut opens = 0u32;

        let result = tokio::time::timeout(
            WAIT,
            monitor_with(config, tx, stop_rx, |p| {
                opens += 1;
                std::future::ready(std::fs::File::open(p))
            }),
        )
        .await
        .unwrap();

        match result {
            Err(Error::Read { path, .. }) => assert_eq!(path, log_path),
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(opens, 3);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 10_000, false);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor(config, tx, stop_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();

        let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 5, true);
        let log_path = config.log_path().unwrap();
        fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        fs::write(&log_path, "Listening has been started\n").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = tokio::time::timeout(WAIT, monitor(config, tx, stop_rx))
            .await
            .unwrap();
        assert!(result.is_ok());
    }
}
