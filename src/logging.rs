//! Structured logging setup, including `--logfile` support.
//!
//! Grounded on the teacher's bare `tracing_subscriber::fmt().with_env_filter(...)`
//! call in `main.rs`, generalized to also support writing to a named file
//! rather than only stdout. Unlike `tracing_appender`'s date-based rolling
//! appender (used elsewhere in the wider ecosystem for log rotation), the
//! daemon's `--logfile F` names one fixed path that external tooling (or
//! `logrotate`) renames out from under it; `SIGUSR1` tells the daemon to
//! reopen that path by name rather than keep writing to the renamed inode,
//! matching the "reopen stdout/stderr if file-backed" contract.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// A file-backed writer that can be reopened in place.
///
/// Cloning shares the underlying file handle (and its reopen), matching
/// `tracing_subscriber`'s expectation that a `MakeWriter` impl be cheaply
/// cloned once per log event.
#[derive(Clone)]
pub struct ReopenableFile {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl ReopenableFile {
    /// Opens `path` for appending, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self { path, file: Arc::new(Mutex::new(file)) })
    }

    /// Reopens the file at the same path, picking up a fresh inode left by
    /// an external rename (e.g. logrotate). Called from the daemon's
    /// `SIGUSR1` handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be reopened.
    pub fn reopen(&self) -> io::Result<()> {
        let file = open_append(&self.path)?;
        *lock(&self.file) = file;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn lock(file: &Arc<Mutex<std::fs::File>>) -> std::sync::MutexGuard<'_, std::fs::File> {
    file.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl io::Write for ReopenableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *lock(&self.file), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *lock(&self.file))
    }
}

impl<'a> MakeWriter<'a> for ReopenableFile {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// A running subscriber's log destination, kept around only so a `SIGUSR1`
/// handler can reopen it. `None` when logging to stdout, since stdout
/// doesn't need (or support) reopening.
pub type LogReopenHandle = Option<ReopenableFile>;

/// Initializes the global tracing subscriber.
///
/// Logs to `logfile` if given, otherwise stdout. Returns a handle the
/// caller can use to reopen the file on `SIGUSR1`.
///
/// # Errors
///
/// Returns an error if `logfile` cannot be opened, or the env-filter
/// directive fails to parse.
pub fn init(logfile: Option<&Path>) -> anyhow::Result<LogReopenHandle> {
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive("conclave=info".parse()?);

    match logfile {
        Some(path) => {
            let writer = ReopenableFile::open(path.to_path_buf())?;
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer.clone()).init();
            Ok(Some(writer))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write as _};

    #[test]
    fn reopen_picks_up_a_renamed_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.log");

        let writer = ReopenableFile::open(path.clone()).unwrap();
        {
            let mut w = writer.clone();
            w.write_all(b"before\n").unwrap();
            w.flush().unwrap();
        }

        std::fs::rename(&path, dir.path().join("daemon.log.1")).unwrap();
        writer.reopen().unwrap();
        {
            let mut w = writer.clone();
            w.write_all(b"after\n").unwrap();
            w.flush().unwrap();
        }

        let mut contents = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "after\n");
    }
}
