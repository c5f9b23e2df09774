//! Small file-persistence helpers shared by the JSON-backed stores
//!
//! Writers take a [`FileLease`] on a sidecar `.lock` file, re-read the
//! document, apply their change and replace it with [`write_atomic`]. The
//! lease is what makes read-modify-write safe across processes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::warn;

/// How long a writer waits for another process to finish
pub(crate) const LEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A lease older than this is left over from a crashed writer
const STALE_LEASE: Duration = Duration::from_secs(30);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive writer lease, released on drop
#[derive(Debug)]
pub(crate) struct FileLease {
    lock_path: PathBuf,
}

impl FileLease {
    /// Acquire the lease guarding `target`
    pub(crate) fn acquire(target: &Path, timeout: Duration) -> io::Result<Self> {
        let lock_path = sidecar(target, "lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => return Ok(Self { lock_path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_path) {
                        warn!(path = %lock_path.display(), "removing stale lease");
                        // Another waiter may have removed it first
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out waiting for {}", lock_path.display()),
                        ));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn is_stale(lock_path: &Path) -> bool {
    fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LEASE)
}

/// `credentials.json` -> `credentials.json.<suffix>`
pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Replace `path` with `contents` via a temp file and rename
///
/// The file is created owner-only on Unix.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = sidecar(path, "tmp");
    fs::write(&temp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&temp_path, path)
}
