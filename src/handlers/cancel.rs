//! Cooperative cancellation for blocking conversion work
//!
//! Blocking closures outlive the future that spawned them, so they observe a
//! [`CancellationToken`] themselves: [`Cancellable`] fails reads and writes
//! once the token fires, and [`Staged`] only moves a finished file into
//! place while the token is still live.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use super::traits::ConversionError;

/// Fail with [`ConversionError::Cancelled`] once `token` has fired
pub fn ensure_live(token: &CancellationToken) -> Result<(), ConversionError> {
    if token.is_cancelled() {
        Err(ConversionError::Cancelled)
    } else {
        Ok(())
    }
}

fn cancelled_io() -> io::Error {
    io::Error::other("conversion cancelled")
}

/// Reader or writer that stops at the next call after cancellation
pub struct Cancellable<T> {
    inner: T,
    token: CancellationToken,
}

impl<T> Cancellable<T> {
    pub fn new(inner: T, token: &CancellationToken) -> Self {
        Self {
            inner,
            token: token.clone(),
        }
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(cancelled_io());
        }
        self.inner.read(buf)
    }
}

impl<W: Write> Write for Cancellable<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(cancelled_io());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Temporary file next to the final output, renamed over it on success and
/// removed on drop otherwise
pub struct Staged {
    file: NamedTempFile,
}

impl Staged {
    pub fn next_to(output: &Path) -> io::Result<Self> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(parent)?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn as_file(&self) -> &File {
        self.file.as_file()
    }

    /// Move the staged file to `output` unless `token` has fired
    pub fn persist(self, output: &Path, token: &CancellationToken) -> Result<(), ConversionError> {
        ensure_live(token)?;
        self.file.as_file().sync_all()?;
        self.file.persist(output).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_stop_after_cancel() {
        let token = CancellationToken::new();
        let mut reader = Cancellable::new(&b"abcdef"[..], &token);

        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);

        token.cancel();
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_writes_stop_after_cancel() {
        let token = CancellationToken::new();
        let mut writer = Cancellable::new(Vec::new(), &token);
        writer.write_all(b"ok").unwrap();

        token.cancel();
        assert!(writer.write_all(b"late").is_err());
        assert_eq!(writer.inner, b"ok");
    }

    #[test]
    fn test_staged_file_persists_only_while_live() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.json");
        let token = CancellationToken::new();

        let staged = Staged::next_to(&output).unwrap();
        std::fs::write(staged.path(), b"[]").unwrap();
        staged.persist(&output, &token).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"[]");

        let cancelled = dir.path().join("late.json");
        let staged = Staged::next_to(&cancelled).unwrap();
        std::fs::write(staged.path(), b"[]").unwrap();
        token.cancel();

        let err = staged.persist(&cancelled, &token).unwrap_err();
        assert!(matches!(err, ConversionError::Cancelled));
        assert!(!cancelled.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
