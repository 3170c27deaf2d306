//! Waiting for the server log to appear.
//!
//! The server creates its log a few seconds after launch, so the first open
//! usually races it. Opening is retried on a bounded schedule.

use std::fs::File;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;

/// Bounded retry schedule for the wait-for-file phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total open attempts, including the first. 0 is treated as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Growth per retry. 1.0 keeps the delay fixed.
    pub backoff_factor: f64,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.delay.as_nanos() as f64 * factor.powi(exp);
        let cap = self.max_delay.max(self.delay);
        if nanos.is_finite() && nanos < cap.as_nanos() as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            cap
        }
    }

    /// Upper bound on time spent sleeping before giving up.
    pub fn total_wait(&self) -> Duration {
        (1..self.attempts()).map(|n| self.delay_after(n)).sum()
    }
}

/// An opened log file.
#[derive(Debug)]
pub struct Located {
    pub path: PathBuf,
    pub file: File,
    /// Attempts used, counting the successful one.
    pub attempts: u32,
}

/// Open the log through `tokio::fs`, handing back a std handle for the tailer.
pub async fn open_log(path: PathBuf) -> io::Result<File> {
    Ok(tokio::fs::File::open(&path).await?.into_std().await)
}

/// Open `base_dir/relative` with `open`, retrying while the file does not exist yet.
///
/// [`open_log`] is the production opener.
pub async fn locate<F, Fut>(
    base_dir: &Path,
    relative: &Path,
    policy: &RetryPolicy,
    mut open: F,
) -> Result<Located, Error>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<File>>,
{
    let path = base_dir.join(relative);
    let max_attempts = policy.attempts();
    debug!(
        path = %path.display(),
        max_attempts,
        max_wait_ms = policy.total_wait().as_millis() as u64,
        "Waiting for server log"
    );

    for attempt in 1..=max_attempts {
        match open(path.clone()).await {
            Ok(file) => {
                info!(path = %path.display(), attempt, "Opened server log");
                return Ok(Located {
                    path,
                    file,
                    attempts: attempt,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if attempt == max_attempts {
                    break;
                }
                let delay = policy.delay_after(attempt);
                debug!(
                    path = %path.display(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Server log not there yet"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "Cannot open server log");
                return Err(Error::Io(e));
            }
        }
    }

    warn!(path = %path.display(), attempts = max_attempts, "Server log never appeared");
    Err(Error::LogNotFound {
        path,
        attempts: max_attempts,
    })
}
