use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio_util::sync::CancellationToken;

use crate::environment::RetryPolicy;
use crate::errors::SessionError;

/// A single non-blocking attempt at the allocator's exclusive lock.
pub trait PortLock: Send + Sync {
    /// `Ok(None)` means another process holds the lock right now.
    fn try_acquire(&self) -> Result<Option<LockGuard>>;
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!("failed to release port lock: {}", e);
        }
    }
}

/// Advisory `flock`-style lock on a zero-byte file.
#[derive(Debug, Clone)]
pub struct FsPortLock {
    path: PathBuf,
}

impl FsPortLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PortLock for FsPortLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("Failed to open lock file {}", self.path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to lock {}", self.path.display())),
        }
    }
}

/// Retry `lock` per `policy`. After the last attempt the caller proceeds unlocked (`None`).
pub async fn acquire(
    lock: &dyn PortLock,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> crate::errors::Result<Option<LockGuard>> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if let Some(guard) = lock.try_acquire()? {
            tracing::debug!(attempt, "acquired port lock");
            return Ok(Some(guard));
        }
        if attempt < policy.max_attempts && !policy.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(policy.delay) => {}
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            }
        }
    }

    tracing::warn!(
        attempts = policy.max_attempts,
        "port lock still held by another process; continuing without it"
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".ssh-port.lock");
        let lock = FsPortLock::new(&path);
        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_second_holder_is_contended_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh-port.lock");
        let first = FsPortLock::new(&path);
        let second = FsPortLock::new(&path);

        let guard = first.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(second.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(second.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_gives_up_and_runs_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh-port.lock");
        let _held = FsPortLock::new(&path).try_acquire().unwrap();

        let result = acquire(
            &FsPortLock::new(&path),
            RetryPolicy::immediate(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_acquire_honors_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = acquire(
            &FsPortLock::new(dir.path().join("l")),
            RetryPolicy::immediate(3),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }
}
