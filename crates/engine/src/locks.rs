//! Directory-based advisory locks with stale-lock takeover.
//!
//! Translated from the `lock`/`unlock` action handlers in the original
//! Python implementation: a lock is a directory whose name is the lock
//! label; its mtime is a heartbeat. Acquiring loops on `mkdir`, treating
//! `AlreadyExists` as contention, `touch`ing (taking over) directories
//! whose heartbeat has gone stale longer than `check_stale_seconds`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use wsb_domain::error::{Error, Result};

pub struct LockRegistry {
    root: PathBuf,
}

impl LockRegistry {
    pub fn new(root: PathBuf) -> Self {
        LockRegistry { root }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let candidate = crate::resolver::normalize_under(&self.root, name)
            .ok_or_else(|| Error::BadRequest(format!("invalid lock name '{name}'")))?;
        if candidate == self.root {
            return Err(Error::BadRequest("lock name must not be empty".into()));
        }
        Ok(candidate)
    }

    /// Attempt to acquire `name`, retrying until `check_timeout_seconds`
    /// elapses. A lock whose heartbeat is older than `check_stale_seconds`
    /// is considered abandoned and is taken over in place (never removed
    /// and recreated, so a concurrent toucher can't race a removal).
    pub async fn acquire(
        &self,
        name: &str,
        check_stale_seconds: u64,
        check_timeout_seconds: u64,
    ) -> Result<()> {
        let path = self.path_for(name)?;
        let deadline = Instant::now() + Duration::from_secs(check_timeout_seconds.max(1));

        loop {
            match try_create(&path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match std::fs::metadata(&path) {
                        Ok(meta) => {
                            let age = meta
                                .modified()
                                .ok()
                                .and_then(|m| SystemTime::now().duration_since(m).ok())
                                .unwrap_or_default();
                            if age.as_secs() >= check_stale_seconds {
                                touch(&path)?;
                                return Ok(());
                            }
                        }
                        Err(_) => {
                            // directory vanished between create and stat; retry immediately.
                            continue;
                        }
                    }
                }
                Err(e) => return Err(Error::Internal(format!("creating lock dir: {e}"))),
            }

            if Instant::now() >= deadline {
                return Err(Error::LockBusy(format!(
                    "unable to acquire lock \"{name}\""
                )));
            }
            tokio::time::sleep(Duration::from_millis(
                (check_timeout_seconds * 1000).min(100),
            ))
            .await;
        }
    }

    pub fn release(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match std::fs::remove_dir(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!("removing lock dir: {e}"))),
        }
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir(path)
}

fn touch(path: &Path) -> Result<()> {
    let now = SystemTime::now();
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(now))
        .map_err(|e| Error::Internal(format!("touching lock dir: {e}")))?;
    let _ = now.duration_since(UNIX_EPOCH);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LockRegistry::new(dir.path().to_path_buf());
        reg.acquire("n", 300, 5).await.unwrap();
        reg.release("n").unwrap();
        reg.acquire("n", 300, 5).await.unwrap();
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LockRegistry::new(dir.path().to_path_buf());
        reg.acquire("n", 300, 5).await.unwrap();
        let err = reg.acquire("n", 300, 1).await.unwrap_err();
        assert!(matches!(err, Error::LockBusy(_)));
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LockRegistry::new(dir.path().to_path_buf());
        reg.acquire("n", 0, 5).await.unwrap();
        // check_stale_seconds = 0 means any elapsed time counts as stale.
        tokio::time::sleep(Duration::from_millis(10)).await;
        reg.acquire("n", 0, 5).await.unwrap();
    }

    #[tokio::test]
    async fn escaping_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = LockRegistry::new(dir.path().to_path_buf());
        let err = reg.acquire("../escape", 300, 1).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
