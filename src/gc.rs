//! Garbage Collector: periodic deletion of expired job directories,
//! safety-gated against path traversal and symlinks.

use crate::job::JobStore;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One sweep of the jobs root: delete every immediate child directory whose
/// `created_at` (from `metadata.json`, falling back to the directory's
/// mtime) is older than `file_expiry`. Never follows symlinks and never
/// deletes outside the jobs root.
pub fn sweep(store: &JobStore, file_expiry: Duration) -> usize {
    let jobs_root = store.jobs_root();
    let Ok(entries) = std::fs::read_dir(jobs_root) else {
        warn!(jobs_root = %jobs_root.display(), "jobs directory does not exist, skipping gc sweep");
        return 0;
    };

    let cutoff = Utc::now() - chrono::Duration::from_std(file_expiry).unwrap_or_default();
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(job_id) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };

        let created_at = store
            .load_metadata(&job_id)
            .map(|m| m.created_at)
            .or_else(|| mtime_fallback(&path));

        let Some(created_at) = created_at else {
            warn!(job_id, "could not determine age, skipping");
            continue;
        };

        if created_at < cutoff {
            info!(job_id, "deleting expired job directory");
            if safe_delete(&path, jobs_root) {
                deleted += 1;
            }
        } else {
            debug!(job_id, "job directory not yet expired");
        }
    }

    info!(deleted, "garbage collection sweep complete");
    deleted
}

fn mtime_fallback(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Deletes `path` only if it resolves to a descendant of `jobs_root` and is
/// not itself a symlink. Errors are logged, never raised.
fn safe_delete(path: &Path, jobs_root: &Path) -> bool {
    let Ok(resolved) = path.canonicalize() else {
        error!(path = %path.display(), "failed to resolve path, skipping delete");
        return false;
    };
    let Ok(jobs_root_resolved) = jobs_root.canonicalize() else {
        error!(jobs_root = %jobs_root.display(), "failed to resolve jobs root, skipping delete");
        return false;
    };

    if !resolved.starts_with(&jobs_root_resolved) {
        error!(path = %path.display(), "refusing to delete path outside jobs root");
        return false;
    }
    if path.is_symlink() {
        warn!(path = %path.display(), "skipping symlink");
        return false;
    }

    if let Err(e) = std::fs::remove_dir_all(path) {
        error!(path = %path.display(), "failed to delete job directory: {}", e);
        return false;
    }
    true
}

/// Background loop: one sweep every `interval`. The caller is expected to
/// run one synchronous sweep at startup before spawning this loop.
pub async fn run_loop(store: std::sync::Arc<JobStore>, interval: Duration, file_expiry: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; the supervisor already ran a
    // synchronous sweep at startup, so skip it here to avoid a double sweep.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        sweep(&store, file_expiry);
    }
}
