//! Idle-session reaping.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time};
use tracing::{debug, info};

use super::session::SessionHandle;

/// Tracks live sessions and force-closes those idle past a threshold.
///
/// Sessions enforce no timeout of their own; the policy lives here.
#[derive(Debug)]
pub struct IdleReaper {
    idle_timeout: Duration,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, SessionHandle>>,
}

impl IdleReaper {
    /// Creates a reaper closing sessions idle for longer than `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            next_id: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts tracking `handle`. Returns the key for [`deregister`](Self::deregister).
    pub fn register(&self, handle: SessionHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, handle);
        id
    }

    /// Stops tracking the session registered under `id`. Unknown ids are ignored.
    pub fn deregister(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Number of sessions currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Force-closes every tracked session idle for longer than the threshold and
    /// stops tracking it. Sessions whose loop already exited are dropped too.
    ///
    /// A session in the middle of an exchange is never idle, however long its
    /// handler or body writer takes.
    ///
    /// # Returns
    ///
    /// How many sessions were closed.
    pub fn reap(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let mut closed = 0;
        sessions.retain(|_, handle| {
            if !handle.is_alive() {
                return false;
            }
            if !handle.in_exchange() && handle.idle_for() > self.idle_timeout {
                debug!(peer = %handle.remote_addr(), idle = ?handle.idle_for(), "reaping idle session");
                handle.force_close();
                closed += 1;
                return false;
            }
            true
        });
        if closed > 0 {
            info!(closed, remaining = sessions.len(), tracked = before, "idle sessions reaped");
        }
        closed
    }

    /// Runs [`reap`](Self::reap) every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.reap();
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SessionHandle>> {
        // A panic while holding the lock leaves the map itself intact.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
