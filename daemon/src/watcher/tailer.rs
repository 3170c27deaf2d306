//! `tail -f` over the server log.
//!
//! The tailer owns the open handle and read cursor. It yields complete lines
//! only and suspends at end of file until a filesystem event or the poll
//! interval wakes it. Truncation and rotation reset the cursor to the start
//! of the new content.

use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::watcher::locator::Located;

/// How the tailer attaches and how long it sleeps when idle.
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub poll_interval: Duration,
    /// Start at offset 0 instead of the current end of file.
    pub replay_existing: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            replay_existing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}

/// Live line sequence over one log file.
///
/// Ends permanently after the first read error; a new tailer has to be built
/// from a fresh [`Located`] to continue.
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    /// Bytes handed out as complete lines since the last reset.
    consumed: u64,
    /// Bytes read past `consumed` that have no newline yet.
    partial: Vec<u8>,
    identity: Option<FileId>,
    wake: Option<mpsc::UnboundedReceiver<()>>,
    _watcher: Option<RecommendedWatcher>,
    poll_interval: Duration,
    finished: bool,
}

impl LogTailer {
    /// Start following an opened log.
    pub fn follow(located: Located, options: &TailOptions) -> Result<Self, Error> {
        let Located {
            path,
            mut file,
            attempts,
        } = located;

        let identity = file_id(&file.metadata()?);
        let start = if options.replay_existing {
            file.seek(SeekFrom::Start(0))?
        } else {
            file.seek(SeekFrom::End(0))?
        };

        let (watcher, wake) = match watch_parent(&path) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "File watch unavailable, polling only");
                (None, None)
            }
        };

        info!(path = %path.display(), offset = start, attempts, "Following server log");

        Ok(Self {
            path,
            reader: BufReader::new(File::from_std(file)),
            consumed: start,
            partial: Vec::with_capacity(256),
            identity,
            wake,
            _watcher: watcher,
            poll_interval: options.poll_interval,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next appended line, without its terminator.
    ///
    /// Suspends while no complete line is available. Returns the read error
    /// once, then `Ok(None)` on every later call.
    pub async fn next_line(&mut self) -> Result<Option<String>, Error> {
        if self.finished {
            return Ok(None);
        }

        match self.read_line().await {
            Ok(line) => Ok(Some(line)),
            Err(source) => {
                self.finished = true;
                self._watcher = None;
                self.wake = None;
                warn!(path = %self.path.display(), error = %source, "Server log became unreadable");
                Err(Error::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    async fn read_line(&mut self) -> io::Result<String> {
        loop {
            self.reader.read_until(b'\n', &mut self.partial).await?;

            if self.partial.last() == Some(&b'\n') {
                self.consumed += self.partial.len() as u64;
                return Ok(take_line(&mut self.partial));
            }

            self.at_eof().await?;
        }
    }

    fn position(&self) -> u64 {
        self.consumed + self.partial.len() as u64
    }

    /// Handle truncation and rotation, otherwise wait for more data.
    ///
    /// In-place truncation is only noticed while the file is shorter than the
    /// read position. A file truncated and regrown past that position between
    /// two checks looks like a plain append (same identity, larger size), so
    /// reading resumes at the old offset and the new lines before it are lost.
    async fn at_eof(&mut self) -> io::Result<()> {
        let len = self.reader.get_ref().metadata().await?.len();
        if len < self.position() {
            info!(
                path = %self.path.display(),
                len,
                position = self.position(),
                "Server log truncated, rewinding"
            );
            self.reader.seek(SeekFrom::Start(0)).await?;
            self.consumed = 0;
            self.partial.clear();
            return Ok(());
        }

        if self.rotated().await {
            match File::open(&self.path).await {
                Ok(file) => {
                    let meta = file.metadata().await?;
                    info!(path = %self.path.display(), "Server log replaced, reopening");
                    self.identity = file_id(&meta);
                    self.reader = BufReader::new(file);
                    self.consumed = 0;
                    self.partial.clear();
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        self.wait().await;
        Ok(())
    }

    /// Whether the path now names a different file than the open handle.
    async fn rotated(&self) -> bool {
        let Some(current) = self.identity else {
            return false;
        };
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => file_id(&meta).is_some_and(|id| id != current),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Log path not statable");
                false
            }
        }
    }

    async fn wait(&mut self) {
        let closed = match self.wake.as_mut() {
            Some(rx) => {
                let woke = tokio::time::timeout(self.poll_interval, rx.recv()).await;
                while rx.try_recv().is_ok() {}
                matches!(woke, Ok(None))
            }
            None => {
                tokio::time::sleep(self.poll_interval).await;
                false
            }
        };

        if closed {
            debug!(path = %self.path.display(), "File watch closed, polling only");
            self.wake = None;
            self._watcher = None;
        }
    }
}

/// Watch the log's directory so creation, rotation and appends wake the tailer.
fn watch_parent(path: &Path) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>), Error> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.send(());
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    Ok((watcher, rx))
}

fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}
