// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs::OpenOptions, path::PathBuf};

use anyhow::{Context, Result};
use nix::{errno::Errno, fcntl::Flock};

/// Seconds since the Unix epoch, the timestamp unit of tag updates and
/// events.
pub fn epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Holds the exclusive advisory lock that enforces single-instance
/// operation. The lock lives as long as this value; the kernel releases it
/// when the process dies, so stale locks cannot occur.
pub struct InstanceLock {
    _lock: Flock<std::fs::File>,
    pub path: PathBuf,
}

/// Tries to become the single running gateway instance.
///
/// Returns `Ok(None)` when another instance already holds the lock.
pub fn acquire_instance_lock(name: &str) -> Result<Option<InstanceLock>> {
    let path = std::env::temp_dir().join(format!("{name}.lock"));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file {}", path.display()))?;

    match Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(Some(InstanceLock { _lock: lock, path })),
        Err((_, errno)) if errno == Errno::EAGAIN => Ok(None),
        Err((_, errno)) => Err(anyhow::anyhow!(
            "failed to lock {}: {errno}",
            path.display()
        )),
    }
}
