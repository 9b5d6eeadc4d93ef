//! At-least-once work queue with visibility timeout and dead-letter redrive.
//!
//! Downstream consumers receive one message per completed feature. A message
//! that is received but not acknowledged becomes visible again once its
//! visibility window expires; after `max_receive_count` deliveries it is moved
//! to the dead-letter queue instead of being redelivered.

mod config;
mod sqlite;
mod store;
mod types;

pub use config::QueueConfig;
pub use sqlite::SqliteWorkQueue;
pub use store::{QueueError, WorkQueue};
pub use types::{DeadLetter, QueueStats, ReceivedMessage};
