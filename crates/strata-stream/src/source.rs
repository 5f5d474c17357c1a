//! Seam to the external scene loader.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use thiserror::Error;

/// Completion token for one asynchronous loader operation. The scheduler
/// polls it once per tick; the producing side fulfills it from wherever it
/// likes (inline for synchronous sources, a worker thread otherwise).
#[derive(Debug)]
pub struct Ticket<T>(Receiver<T>);

/// Result of polling a [`Ticket`].
#[derive(Debug)]
pub enum TicketPoll<T> {
    Ready(T),
    Pending,
    /// The fulfilling side went away without delivering a value.
    Closed,
}

impl<T: Send + 'static> Ticket<T> {
    /// A ticket plus its fulfillment side.
    pub fn channel() -> (Sender<T>, Ticket<T>) {
        let (tx, rx) = bounded(1);
        (tx, Ticket(rx))
    }

    /// An already-completed ticket.
    pub fn ready(value: T) -> Ticket<T> {
        let (tx, ticket) = Self::channel();
        let _ = tx.send(value);
        ticket
    }

    /// Non-blocking completion check.
    pub fn poll(&mut self) -> TicketPoll<T> {
        match self.0.try_recv() {
            Ok(value) => TicketPoll::Ready(value),
            Err(TryRecvError::Empty) => TicketPoll::Pending,
            Err(TryRecvError::Disconnected) => TicketPoll::Closed,
        }
    }
}

/// Opaque handle to a loaded scene instance, issued by the [`SceneSource`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SceneHandle {
    id: u64,
    name: String,
}

impl SceneHandle {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A resolved location for a scene name. An empty resolution means the
/// region simply has no content; it is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneLocation {
    pub key: String,
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("invalid handle for scene {0}")]
    InvalidHandle(String),
    #[error("scene {0} is not loaded")]
    NotLoaded(String),
    #[error("loader failure for scene {name}: {reason}")]
    Loader { name: String, reason: String },
}

/// External resource loader collaborator. All operations are asynchronous;
/// each returned ticket is polled by the scheduler once per tick.
pub trait SceneSource: Send + Sync {
    /// Resolve a scene name to its locations. Zero locations means the
    /// scene does not exist (silently skipped by callers).
    fn resolve(&self, name: &str) -> Ticket<Vec<SceneLocation>>;

    /// Begin an additive load of the named scene.
    fn load_additive(&self, name: &str) -> Ticket<Result<SceneHandle, SceneError>>;

    /// Activate previously loaded content.
    fn activate(&self, handle: &SceneHandle) -> Ticket<Result<(), SceneError>>;

    /// Unload a previously issued handle.
    fn unload(&self, handle: SceneHandle) -> Ticket<Result<(), SceneError>>;
}
