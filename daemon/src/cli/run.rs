//! Run the server under the log monitor.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::watcher::{self, Event};

/// Exit code used when the wrapper is interrupted.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Server binary plus arguments, split from the `-i` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServerCommand {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut parts = input.split_whitespace().map(String::from);
        let program = parts.next().ok_or(Error::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What the supervisor knows about the server from its log.
#[derive(Debug, Default)]
pub struct Roster {
    ready: bool,
    players: BTreeSet<String>,
}

impl Roster {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Ready => {
                self.ready = true;
                info!("Server is ready for players");
            }
            Event::PlayerJoin(name) => {
                self.players.insert(name.clone());
                info!(player = %name, players = self.players.len(), "Roster updated");
            }
            Event::PlayerLeave(name) => {
                if !self.players.remove(name) {
                    debug!(player = %name, "Leave for unknown player");
                }
                info!(player = %name, players = self.players.len(), "Roster updated");
            }
            Event::Shutdown => {
                self.players.clear();
                info!("No players remaining");
            }
            Event::None => {}
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn players(&self) -> impl Iterator<Item = &str> {
        self.players.iter().map(String::as_str)
    }
}

/// Spawn the server, monitor its log, and return the exit code to use.
pub async fn run(command: ServerCommand, config: Config) -> Result<i32, Error> {
    info!(command = %command, "Starting server");

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut monitor = tokio::spawn(watcher::monitor(config, events_tx, stop_rx));
    let mut monitor_done = false;
    let mut roster = Roster::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let code = loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                info!(%status, "Server exited");
                break exit_code(status);
            }
            Some(event) = events_rx.recv() => roster.apply(&event),
            joined = &mut monitor, if !monitor_done => {
                monitor_done = true;
                match joined {
                    Ok(Ok(())) => debug!("Log monitor finished"),
                    Ok(Err(e)) => {
                        warn!("Log monitor failed, stopping server");
                        let _ = child.kill().await;
                        return Err(e);
                    }
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(Error::Io(io::Error::other(e)));
                    }
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted, stopping server");
                child.kill().await?;
                break EXIT_INTERRUPTED;
            }
        }
    };

    let _ = stop_tx.send(true);
    if !monitor_done {
        match monitor.await {
            Ok(Err(e)) => warn!(error = %e, "Log monitor ended with error"),
            Err(e) => warn!(error = %e, "Log monitor task failed"),
            Ok(Ok(())) => {}
        }
    }
    while let Ok(event) = events_rx.try_recv() {
        roster.apply(&event);
    }

    let players: Vec<&str> = roster.players().collect();
    debug!(ready = roster.is_ready(), ?players, code, "Wrapper exiting");
    Ok(code)
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::config::{LogConfig, RetryConfig};

    #[test]
    fn test_parse_command() {
        let cmd = ServerCommand::parse("  supertuxkart --server-config=cfg.xml   --lan-server=x ").unwrap();
        assert_eq!(cmd.program, "supertuxkart");
        assert_eq!(cmd.args, vec!["--server-config=cfg.xml", "--lan-server=x"]);
        assert_eq!(
            cmd.to_string(),
            "supertuxkart --server-config=cfg.xml --lan-server=x"
        );
    }

    #[test]
    fn test_parse_empty_command() {
        assert!(matches!(ServerCommand::parse("   "), Err(Error::EmptyCommand)));
    }

    #[test]
    fn test_roster_tracks_players() {
        let mut roster = Roster::default();
        assert!(!roster.is_ready());

        roster.apply(&Event::Ready);
        roster.apply(&Event::PlayerJoin("Alice".into()));
        roster.apply(&Event::PlayerJoin("Bob".into()));
        roster.apply(&Event::PlayerLeave("Alice".into()));
        roster.apply(&Event::PlayerLeave("Mallory".into()));
        roster.apply(&Event::None);

        assert!(roster.is_ready());
        assert_eq!(roster.players().collect::<Vec<_>>(), vec!["Bob"]);

        roster.apply(&Event::Shutdown);
        assert_eq!(roster.players().count(), 0);
    }

    fn config_for(base: &Path, max_attempts: u32) -> Config {
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
            ..Config::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_follows_server() {
        let dir = tempfile::tempdir().unwrap();

        let ok = ServerCommand::parse("true").unwrap();
        assert_eq!(run(ok, config_for(dir.path(), 1000)).await.unwrap(), 0);

        let failed = ServerCommand::parse("false").unwrap();
        assert_eq!(run(failed, config_for(dir.path(), 1000)).await.unwrap(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_log_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ServerCommand::parse("sleep 30").unwrap();

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run(cmd, config_for(dir.path(), 2)),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, Error::LogNotFound { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ServerCommand::parse("/definitely/not/a/server-binary").unwrap();
        let err = run(cmd, config_for(dir.path(), 1)).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
