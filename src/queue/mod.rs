//! Task queue — records, status state machine, worker registry, events.

pub mod events;
pub mod record;
#[allow(clippy::module_inception)]
pub mod queue;

pub use events::{SubscriptionId, TaskUpdate};
pub use queue::TaskQueue;
pub use record::{TaskFailure, TaskId, TaskOutcome, TaskSnapshot, TaskStatus};
