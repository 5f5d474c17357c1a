//! Cell streaming: debounced observer tracking, prioritized load/unload
//! actions, and a single in-flight scene operation with cooperative
//! cancellation.
#![forbid(unsafe_code)]

mod action;
mod memory;
pub mod naming;
mod scheduler;
mod source;

pub use action::{
    ActionKind, PRIORITY_CURRENT, PRIORITY_NEIGHBOR, PRIORITY_UNLOAD, StreamAction,
};
pub use memory::MemorySceneSource;
pub use scheduler::{ReadyFlag, SceneScheduler, StreamConfig};
pub use source::{SceneError, SceneHandle, SceneLocation, SceneSource, Ticket, TicketPoll};
