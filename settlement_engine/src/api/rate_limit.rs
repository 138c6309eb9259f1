//! Fixed-window throttling of administrative actions, keyed by `(action, actor)`.
//!
//! This is an operational guard against fat-fingered scripts, not a security control: a burst at
//! a window boundary can reach twice the nominal rate, which is acceptable here. The counter
//! store is a trait so a single-instance deployment can use the in-memory map while a
//! multi-instance deployment plugs in a shared counter store. In-memory counters reset when the
//! process restarts.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use log::*;

use crate::api::errors::WorkflowError;

/// A single counter window.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub started_at: Instant,
    pub count: u32,
}

/// Counter storage for the rate limiter.
pub trait RateLimiterStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Window>;

    /// Increments the counter for `key`, starting a fresh window when none exists or the current
    /// one is older than `window`. Returns the state after the increment.
    fn increment(&self, key: &str, window: Duration) -> Window;

    fn reset(&self, key: &str);

    /// Drops windows that expired before `now - window`. Called opportunistically.
    fn sweep(&self, window: Duration);
}

#[derive(Default)]
pub struct InMemoryStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiterStore for InMemoryStore {
    fn get(&self, key: &str) -> Option<Window> {
        self.windows.lock().unwrap().get(key).copied()
    }

    fn increment(&self, key: &str, window: Duration) -> Window {
        let mut map = self.windows.lock().unwrap();
        let now = Instant::now();
        let entry = map.entry(key.to_string()).or_insert(Window { started_at: now, count: 0 });
        if now.duration_since(entry.started_at) >= window {
            *entry = Window { started_at: now, count: 0 };
        }
        entry.count += 1;
        *entry
    }

    fn reset(&self, key: &str) {
        self.windows.lock().unwrap().remove(key);
    }

    fn sweep(&self, window: Duration) {
        let now = Instant::now();
        self.windows.lock().unwrap().retain(|_, w| now.duration_since(w.started_at) < window);
    }
}

pub struct RateLimiter<S> {
    store: S,
    max_per_window: u32,
    window: Duration,
}

impl<S> RateLimiter<S>
where S: RateLimiterStore
{
    pub fn new(store: S, max_per_window: u32, window: Duration) -> Self {
        Self { store, max_per_window, window }
    }

    /// Counts a hit for `(action, actor)` and rejects once the window is full. The retry-after
    /// hint is the remaining life of the current window.
    pub fn check(&self, action: &str, actor_id: &str) -> Result<(), WorkflowError> {
        let key = format!("{action}:{actor_id}");
        let state = self.store.increment(&key, self.window);
        if state.count > self.max_per_window {
            let elapsed = state.started_at.elapsed();
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            debug!("⏱️ {actor_id} throttled on {action}: {} hits in the window", state.count);
            return Err(WorkflowError::RateLimited { retry_after_secs });
        }
        // Piggy-back expiry of stale windows on regular traffic.
        if state.count == 1 {
            self.store.sweep(self.window);
        }
        Ok(())
    }

    pub fn reset(&self, action: &str, actor_id: &str) {
        self.store.reset(&format!("{action}:{actor_id}"));
    }
}
