//! Pending result tables
//!
//! Each kind of asynchronous result (friendly names, authentications,
//! encryption changes) has its own table. The dispatcher publishes results;
//! blocked callers wait on the table's condition variable until their key
//! shows up or their deadline passes.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub(crate) struct ResultTable<K, V> {
    entries: Mutex<HashMap<K, V>>,
    changed: Condvar,
}

impl<K: Eq + Hash + Copy, V> ResultTable<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
        }
    }

    /// Store a result and wake every waiter
    pub(crate) fn publish(&self, key: K, value: V) {
        self.entries.lock().insert(key, value);
        self.changed.notify_all();
    }

    /// Drop a stale result before a new request for the same key
    pub(crate) fn discard(&self, key: K) {
        self.entries.lock().remove(&key);
    }

    /// Wait for the result of `key` and take it
    ///
    /// A zero timeout waits forever. Returns `None` when the deadline passes.
    pub(crate) fn wait(&self, key: K, timeout: Duration) -> Option<V> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut entries = self.entries.lock();
        loop {
            if let Some(value) = entries.remove(&key) {
                return Some(value);
            }
            match deadline {
                None => self.changed.wait(&mut entries),
                Some(deadline) => {
                    if self.changed.wait_until(&mut entries, deadline).timed_out() {
                        return entries.remove(&key);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
