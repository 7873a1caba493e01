//! Session Pool: session-keyed persistent children, health checks,
//! per-process request serialization, idle reaping.
//!
//! Creation (check-then-spawn-then-insert) for a given `(server_tag,
//! session_key)` is serialized by a lock scoped to that key, so two
//! concurrent misses never both spawn and race the insert. The per-child
//! `request_lock` is acquired independently of that and held only for the
//! duration of one exchange — it is never held across a creation, and the
//! creation lock is never held across an `exchange` call, so unrelated
//! sessions never block on each other's stdio round trip.

use crate::config::ServerSpec;
use crate::error::{BridgeError, Result};
use crate::subprocess;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A live, pooled child plus the bookkeeping the reaper and engine need.
///
/// `last_access` is stored as a Unix-epoch millisecond counter so it can be
/// updated with a plain atomic store — monotonically non-decreasing —
/// without taking the per-child lock.
pub struct PooledChild {
    pub server_tag: String,
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    last_access_millis: AtomicI64,
    pub request_count: AtomicU64,
    pub idle_timeout: Duration,
    /// The cwd the child was spawned with — this request's `job_dir` only
    /// for the first request of a session.
    pub cwd: std::path::PathBuf,
    /// Held for the entire write→read cycle of one exchange.
    child: Mutex<Child>,
}

impl PooledChild {
    fn new(
        child: Child,
        server_tag: String,
        session_key: String,
        idle_timeout: Duration,
        cwd: std::path::PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            server_tag,
            session_key,
            created_at: now,
            last_access_millis: AtomicI64::new(now.timestamp_millis()),
            request_count: AtomicU64::new(0),
            idle_timeout,
            cwd,
            child: Mutex::new(child),
        }
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_access_millis.load(Ordering::SeqCst))
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_access_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_access());
        elapsed.num_seconds() as u64 > self.idle_timeout.as_secs()
    }

    /// Health holds iff the OS process has no exit code yet.
    /// Checked under the per-child lock so a concurrent exchange can't race
    /// the poll.
    async fn is_healthy(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn terminate(&self) {
        let mut child = self.child.lock().await;
        subprocess::terminate(&mut child).await;
    }
}

type PoolKey = (String, String);

/// Maps `(server_tag, session_key) -> PooledChild`. `DashMap` gives us
/// sharded lookup/removal: unrelated keys don't contend, and every entry
/// access is a single short critical section distinct from the per-child
/// `request_lock`.
pub struct SessionPool {
    children: DashMap<PoolKey, Arc<PooledChild>>,
    /// One lock per key, held for the entire check-then-spawn-then-insert
    /// sequence in `get_or_create` so two concurrent misses for the same
    /// key can't both spawn a child and race the `DashMap` insert — the
    /// loser would otherwise displace (and leak, un-terminated) the
    /// winner's child. Distinct from `children`'s own sharded lock so the
    /// `await` on `subprocess::start` never holds a non-async guard.
    creation_locks: DashMap<PoolKey, Arc<Mutex<()>>>,
    /// Session counts per (server_tag, session_key) prefix, for the
    /// per-key cap, and a running total for the global cap — both are
    /// enforced here.
    max_total_sessions: usize,
}

impl SessionPool {
    pub fn new(max_total_sessions: usize) -> Self {
        Self {
            children: DashMap::new(),
            creation_locks: DashMap::new(),
            max_total_sessions,
        }
    }

    pub fn session_count(&self) -> usize {
        self.children.len()
    }

    fn sessions_for_key(&self, server_tag: &str, session_key: &str) -> usize {
        self.children
            .iter()
            .filter(|e| e.key().0 == server_tag && e.key().1 == session_key)
            .count()
    }

    /// Returns a healthy `PooledChild` for `(spec.tag, session_key)`,
    /// creating one under `job_dir` if none exists or the existing one is
    /// unhealthy.
    pub async fn get_or_create(
        &self,
        spec: &ServerSpec,
        job_dir: &std::path::Path,
        session_key: &str,
    ) -> Result<Arc<PooledChild>> {
        let key: PoolKey = (spec.tag.clone(), session_key.to_string());

        // Fast path: skip the creation lock entirely when a healthy child
        // already exists.
        if let Some(entry) = self.children.get(&key) {
            let child = entry.value().clone();
            drop(entry);
            if child.is_healthy().await {
                return Ok(child);
            }
        }

        // Slow path: serialize the whole check-then-spawn-then-insert
        // sequence for this key behind one lock, so two concurrent misses
        // can't both spawn and have the second insert silently discard
        // (and leak) the first's child.
        let creation_lock = self
            .creation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = creation_lock.lock().await;

        let result = self.get_or_create_locked(spec, job_dir, session_key, &key).await;

        drop(_guard);
        self.creation_locks.remove(&key);
        result
    }

    async fn get_or_create_locked(
        &self,
        spec: &ServerSpec,
        job_dir: &std::path::Path,
        session_key: &str,
        key: &PoolKey,
    ) -> Result<Arc<PooledChild>> {
        if let Some(entry) = self.children.get(key) {
            let child = entry.value().clone();
            drop(entry);
            if child.is_healthy().await {
                return Ok(child);
            }
            warn!(server_tag = %spec.tag, session_key, "evicting unhealthy pooled child");
            self.remove(&spec.tag, session_key).await;
        }

        // Per-key cap is distinct from a multi-session-per-key pool; this
        // bridge pins exactly one child per key, so the cap only matters
        // when a caller configures `max_sessions_per_key == 0` to disable
        // pooling for a tag entirely.
        if spec.max_sessions_per_key == 0 {
            return Err(BridgeError::CapacityExceeded(format!(
                "{} does not allow pooled sessions",
                spec.tag
            )));
        }
        if self.sessions_for_key(&spec.tag, session_key) >= spec.max_sessions_per_key {
            return Err(BridgeError::CapacityExceeded(format!(
                "session cap reached for {}/{}",
                spec.tag, session_key
            )));
        }
        if self.children.len() >= self.max_total_sessions {
            return Err(BridgeError::CapacityExceeded(
                "global session cap reached".to_string(),
            ));
        }

        info!(server_tag = %spec.tag, session_key, "creating pooled child");
        let raw_child = subprocess::start(spec, job_dir).await?;
        let pooled = Arc::new(PooledChild::new(
            raw_child,
            spec.tag.clone(),
            session_key.to_string(),
            Duration::from_secs(spec.idle_timeout),
            job_dir.to_path_buf(),
        ));
        // Safe: we hold this key's creation lock, so no concurrent racer
        // can reach this insert for the same key.
        self.children.insert(key.clone(), pooled.clone());
        Ok(pooled)
    }

    /// Runs one JSON-RPC exchange against `child`, holding its per-child
    /// lock for the entire round trip and nothing else.
    pub async fn exchange(
        &self,
        child: &Arc<PooledChild>,
        request: &serde_json::Value,
        timeout: Duration,
    ) -> Result<subprocess::Exchange> {
        let mut guard = child.child.lock().await;
        let result = subprocess::exchange(&mut guard, request, timeout).await;
        drop(guard);

        match &result {
            Ok(_) => {
                child.touch();
                child.request_count.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {
                self.remove(&child.server_tag, &child.session_key).await;
            }
        }
        result
    }

    pub async fn remove(&self, server_tag: &str, session_key: &str) {
        let key = (server_tag.to_string(), session_key.to_string());
        if let Some((_, child)) = self.children.remove(&key) {
            child.terminate().await;
            info!(server_tag, session_key, "removed pooled child");
        }
    }

    /// Idle reaper: iterates a snapshot of keys so concurrent mutation
    /// during the sweep is safe, removing any child idle past its timeout.
    pub async fn reap_idle(&self) {
        let snapshot: Vec<PoolKey> = self.children.iter().map(|e| e.key().clone()).collect();
        for (server_tag, session_key) in snapshot {
            let Some(entry) = self.children.get(&(server_tag.clone(), session_key.clone())) else {
                continue;
            };
            let idle = entry.value().is_idle();
            drop(entry);
            if idle {
                info!(server_tag, session_key, "reaping idle pooled child");
                self.remove(&server_tag, &session_key).await;
            }
        }
    }

    /// Terminates every pooled child, bounded by `budget` for the whole
    /// batch. Evictions still pending after the deadline are abandoned and
    /// logged.
    pub async fn shutdown(&self, budget: Duration) {
        let keys: Vec<PoolKey> = self.children.iter().map(|e| e.key().clone()).collect();
        let result = tokio::time::timeout(budget, async {
            for (server_tag, session_key) in keys {
                self.remove(&server_tag, &session_key).await;
            }
        })
        .await;
        if result.is_err() {
            warn!("pool shutdown budget exceeded; remaining children abandoned to the OS");
        }
    }
}

/// Background loop: reap idle children every `cleanup_interval`.
pub async fn run_idle_reaper(pool: Arc<SessionPool>, cleanup_interval: Duration) {
    let mut ticker = tokio::time::interval(cleanup_interval);
    loop {
        ticker.tick().await;
        pool.reap_idle().await;
    }
}
