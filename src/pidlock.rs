//! Single-instance-per-data-dir enforcement (SPEC_FULL.md §6): an advisory
//! `flock` held on a `loadcore.pid` file for the life of the process,
//! following the teacher's convention of isolating a raw `libc` syscall
//! behind a small safe wrapper with a `# Safety` comment (see
//! `app/runner/rss.rs`'s `read_rss_bytes`).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// An exclusive, advisory lock on a PID file. Released (and the file left
/// in place, unlinked only at the operator's discretion) when this value
/// drops, since the `flock` it holds is scoped to the file descriptor's
/// lifetime.
pub struct PidLock {
    path: PathBuf,
    file: File,
}

impl PidLock {
    /// Acquires the lock at `path`, creating the file if necessary and
    /// writing the current process id into it once the lock is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be opened, or if another live
    /// process already holds the lock (`flock(LOCK_EX | LOCK_NB)` fails
    /// with `EWOULDBLOCK`).
    pub fn acquire(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;

        // Safety: `file`'s raw fd is valid for the duration of this call
        // and `flock` only mutates kernel-side lock state for that fd.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let errno = std::io::Error::last_os_error();
            return Err(AppError::Lock(format!(
                "{} is held by another process ({errno})",
                path.display()
            )));
        }

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { path: path.to_path_buf(), file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Safety: `self.file`'s raw fd is still open and owned by `self`.
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_writes_pid() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let path = dir.path().join("loadcore.pid");
        let lock = PidLock::acquire(&path).map_err(|e| e.to_string())?;
        let contents = std::fs::read_to_string(lock.path()).map_err(|e| e.to_string())?;
        assert_eq!(contents.trim(), std::process::id().to_string());
        Ok(())
    }

    #[test]
    fn second_acquire_on_same_path_fails_while_first_is_held() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let path = dir.path().join("loadcore.pid");
        let _first = PidLock::acquire(&path).map_err(|e| e.to_string())?;
        let second = PidLock::acquire(&path);
        assert!(second.is_err());
        Ok(())
    }

    #[test]
    fn lock_is_released_on_drop() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let path = dir.path().join("loadcore.pid");
        {
            let _first = PidLock::acquire(&path).map_err(|e| e.to_string())?;
        }
        let second = PidLock::acquire(&path);
        assert!(second.is_ok());
        Ok(())
    }
}
