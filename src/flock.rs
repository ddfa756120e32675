use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// How a store file is being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Single writer, no other handles.
    Exclusive,
    /// Any number of read-only handles, no writer.
    Shared,
}

/// Advisory lock held next to a store file for the lifetime of a handle.
pub struct FileLock {
    _file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Opens (creating if needed) the lock file and locks it without
    /// blocking. Fails with `WouldBlock` when a conflicting lock is held.
    pub fn lock<P: AsRef<Path>>(path: P, mode: LockMode) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        Self::try_lock(&file, mode)?;

        Ok(Self {
            _file: file,
            path,
            mode,
        })
    }

    /// Lock file path used for a store file: `<store>.lock`.
    pub fn path_for(store: &Path) -> PathBuf {
        let mut name = store.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    #[cfg(unix)]
    fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB, LOCK_SH};

        let operation = match mode {
            LockMode::Exclusive => LOCK_EX,
            LockMode::Shared => LOCK_SH,
        };
        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, operation | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File, _mode: LockMode) -> io::Result<()> {
        // No advisory locking outside unix; single-handle use is the caller's duty
        Ok(())
    }

    /// Releases the lock. Dropping the lock has the same effect.
    pub fn unlock(self) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}
