//! Session registry.
//!
//! REGISTER_SESSION hands out `u32` handles from a monotonically increasing
//! counter; handle 0 is reserved for unauthenticated commands. Sessions die
//! three ways: an explicit UNREGISTER_SESSION, the idle sweep, or the close
//! of the TCP connection that registered them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Session {
    created_at: Instant,
    last_activity: Instant,
}

#[derive(Debug)]
struct RegistryInner {
    next_handle: u32,
    sessions: HashMap<u32, Session>,
}

/// Shared registry of live session handles.
///
/// All mutation happens under one lock; critical sections are a map probe
/// or insert, so the lock is never held across I/O.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_handle: 1,
                sessions: HashMap::new(),
            }),
        }
    }

    /// Allocates the next handle and records the session. The counter may
    /// wrap; 0 and handles still live are skipped.
    pub fn create(&self) -> u32 {
        let mut inner = self.lock();
        loop {
            let handle = inner.next_handle;
            inner.next_handle = inner.next_handle.wrapping_add(1);
            if handle == 0 || inner.sessions.contains_key(&handle) {
                continue;
            }
            let now = Instant::now();
            inner.sessions.insert(
                handle,
                Session {
                    created_at: now,
                    last_activity: now,
                },
            );
            return handle;
        }
    }

    /// Whether the handle is currently live.
    pub fn has(&self, handle: u32) -> bool {
        self.lock().sessions.contains_key(&handle)
    }

    /// Refreshes the handle's activity stamp. Returns false for unknown
    /// handles.
    pub fn touch(&self, handle: u32) -> bool {
        match self.lock().sessions.get_mut(&handle) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Destroys the session. Returns false for unknown handles.
    pub fn remove(&self, handle: u32) -> bool {
        self.lock().sessions.remove(&handle).is_some()
    }

    /// Evicts every session idle longer than `idle_timeout`. Returns the
    /// number of sessions removed.
    pub fn sweep(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|handle, session| {
            let keep = now.duration_since(session.last_activity) <= idle_timeout;
            if !keep {
                debug!(handle, "sweeping idle session");
            }
            keep
        });
        before - inner.sessions.len()
    }

    /// Number of live sessions, reported by the Connection Manager object.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the session since registration, if live.
    pub fn age(&self, handle: u32) -> Option<Duration> {
        self.lock()
            .sessions
            .get(&handle)
            .map(|s| s.created_at.elapsed())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
