//! Leader election over a single lock file.
//!
//! The leader holds an exclusive `flock` on `hook.lock` and records its
//! pid inside. The kernel drops the lock when the holder exits, so a
//! crashed leader frees it on its own; the recorded pid covers the case
//! where the descriptor outlived the process that wrote it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("flock: {0}")]
    Lock(Errno),
    #[error("lock file io: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one acquisition attempt.
enum Attempt {
    Acquired(Flock<File>),
    HeldBy(Option<u32>),
    /// The path no longer names the file we locked; try again.
    Replaced,
}

pub struct LeaderElection {
    path: PathBuf,
    held: Option<Flock<File>>,
}

impl LeaderElection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_leader(&self) -> bool {
        self.held.is_some()
    }

    /// Take the lock if it is free or its recorded holder is dead.
    ///
    /// Idempotent for the current leader. Any failure to create or lock
    /// the file leaves this helper a follower.
    pub fn try_become_leader(&mut self) -> bool {
        if self.held.is_some() {
            return true;
        }

        match self.acquire() {
            Ok(true) => {
                tracing::info!(lock = %self.path.display(), pid = std::process::id(), "became leader");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(lock = %self.path.display(), error = %e, "election unavailable, staying follower");
                false
            }
        }
    }

    fn acquire(&mut self) -> Result<bool, ElectionError> {
        // One retry: after reclaiming a dead holder's file, or after losing
        // a race with someone who did.
        for _ in 0..2 {
            match self.attempt()? {
                Attempt::Acquired(lock) => {
                    lock.set_len(0)?;
                    lock.write_all_at(std::process::id().to_string().as_bytes(), 0)?;
                    self.held = Some(lock);
                    return Ok(true);
                }
                Attempt::Replaced => continue,
                Attempt::HeldBy(Some(pid)) if !process_alive(pid) => {
                    tracing::warn!(holder = pid, "lock held on behalf of a dead leader, reclaiming");
                    self.unlink_if_same(pid)?;
                }
                Attempt::HeldBy(holder) => {
                    tracing::debug!(holder = ?holder, "lock held by a live leader");
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }

    fn attempt(&self) -> Result<Attempt, ElectionError> {
        let file = self.open()?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                if same_file(&self.path, &lock)? {
                    Ok(Attempt::Acquired(lock))
                } else {
                    Ok(Attempt::Replaced)
                }
            }
            Err((file, Errno::EWOULDBLOCK)) => Ok(Attempt::HeldBy(read_pid(&file))),
            Err((_, errno)) => Err(ElectionError::Lock(errno)),
        }
    }

    /// Remove the lock file, unless it changed since `dead` was read.
    fn unlink_if_same(&self, dead: u32) -> Result<(), ElectionError> {
        let file = self.open()?;
        if read_pid(&file) != Some(dead) || !same_file(&self.path, &file)? {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn open(&self) -> Result<File, ElectionError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.path)
            .map_err(|source| ElectionError::Open {
                path: self.path.clone(),
                source,
            })
    }

    /// Give up leadership. Safe to call any number of times.
    pub fn release(&mut self) {
        let Some(lock) = self.held.take() else {
            return;
        };

        if let Err(e) = lock.set_len(0) {
            tracing::debug!(error = %e, "failed to clear lock file");
        }
        match lock.unlock() {
            Ok(_) => tracing::info!(lock = %self.path.display(), "released leadership"),
            Err((_, errno)) => {
                // Closing the descriptor still drops the lock.
                tracing::warn!(error = %errno, "flock unlock failed");
            }
        }
    }

    /// Pid recorded by a live leader, for status reporting.
    pub fn current_holder(path: &Path) -> Option<u32> {
        let file = File::open(path).ok()?;
        read_pid(&file).filter(|pid| process_alive(*pid))
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(file: &File) -> Option<u32> {
    let mut buf = [0u8; 16];
    let n = file.read_at(&mut buf, 0).ok()?;
    std::str::from_utf8(&buf[..n]).ok()?.trim().parse().ok()
}

fn same_file(path: &Path, file: &File) -> Result<bool, ElectionError> {
    let on_disk = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let opened = file.metadata()?;
    Ok(on_disk.dev() == opened.dev() && on_disk.ino() == opened.ino())
}

/// Signal 0 probe. EPERM means the pid exists under another user.
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
