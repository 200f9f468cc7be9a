//! Single-flight registry: concurrent callers asking for the same key share
//! one in-flight future instead of each starting their own.
//!
//! The first caller installs a `Shared` handle; later callers clone it. The
//! handle clears its own registry entry when it settles, so the next caller
//! after that starts fresh work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};

type Handle<V> = Shared<BoxFuture<'static, V>>;

pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Arc<Mutex<HashMap<K, Handle<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Whether the caller started the work or attached to someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Joiner,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless work for `key` is already in flight, in which case
    /// await that work's result instead. `make` is only invoked by the leader.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> (V, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (handle, role) = {
            let mut map = lock(&self.inflight);
            if let Some(existing) = map.get(&key) {
                (existing.clone(), Role::Joiner)
            } else {
                let registry = Arc::clone(&self.inflight);
                let owned_key = key.clone();
                let work = make();
                let handle = async move {
                    let out = work.await;
                    lock(&registry).remove(&owned_key);
                    out
                }
                .boxed()
                .shared();
                map.insert(key, handle.clone());
                (handle, Role::Leader)
            }
        };
        (handle.await, role)
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}
