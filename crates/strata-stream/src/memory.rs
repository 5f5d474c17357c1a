//! In-memory scene source for headless runs and tests.

use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use hashbrown::{HashMap, HashSet};

use crate::source::{SceneError, SceneHandle, SceneLocation, SceneSource, Ticket};

/// Manifest-backed scene source. Knows a fixed set of scene names; resolve
/// returns one location for known names and nothing otherwise. With a
/// configured latency every operation completes on a worker thread after a
/// delay, otherwise tickets complete immediately.
pub struct MemorySceneSource {
    scenes: HashSet<String>,
    latency: Option<Duration>,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, String>>,
}

impl MemorySceneSource {
    pub fn new<I, S>(scenes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scenes: scenes.into_iter().map(Into::into).collect(),
            latency: None,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Simulate loader latency on a worker thread.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of handles issued and not yet unloaded.
    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    /// Whether any live handle refers to `name`.
    pub fn is_live(&self, name: &str) -> bool {
        self.live().values().any(|n| n == name)
    }

    /// Names of all live scenes, unordered.
    pub fn live_names(&self) -> Vec<String> {
        self.live().values().cloned().collect()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fulfill<T: Send + 'static>(&self, value: T) -> Ticket<T> {
        match self.latency {
            None => Ticket::ready(value),
            Some(delay) => {
                let (tx, ticket) = Ticket::channel();
                thread::spawn(move || {
                    thread::sleep(delay);
                    let _ = tx.send(value);
                });
                ticket
            }
        }
    }
}

impl SceneSource for MemorySceneSource {
    fn resolve(&self, name: &str) -> Ticket<Vec<SceneLocation>> {
        let locations = if self.scenes.contains(name) {
            vec![SceneLocation { key: name.into() }]
        } else {
            Vec::new()
        };
        self.fulfill(locations)
    }

    fn load_additive(&self, name: &str) -> Ticket<Result<SceneHandle, SceneError>> {
        if !self.scenes.contains(name) {
            return self.fulfill(Err(SceneError::Loader {
                name: name.into(),
                reason: "unknown scene".into(),
            }));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live().insert(id, name.into());
        self.fulfill(Ok(SceneHandle::new(id, name)))
    }

    fn activate(&self, handle: &SceneHandle) -> Ticket<Result<(), SceneError>> {
        let result = if self.live().contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(SceneError::InvalidHandle(handle.name().into()))
        };
        self.fulfill(result)
    }

    fn unload(&self, handle: SceneHandle) -> Ticket<Result<(), SceneError>> {
        self.live().remove(&handle.id());
        self.fulfill(Ok(()))
    }
}
