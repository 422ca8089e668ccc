//! Domain model (IDs, status, task records, outcomes, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::errors::{QueueError, Result};
pub use self::events::DomainEvent;
pub use self::ids::{ParseTaskIdError, TaskId};
pub use self::outcome::{InvocationError, TaskOutcome};
pub use self::state::{ParseStatusError, TaskStatus};
pub use self::task::{Arguments, Task};
