//! # Consumer Pool
//!
//! Worker threads that execute job bodies, plus the bookkeeping the
//! coordinator uses to grow and shrink the pool.
//!
//! ## Key Concepts
//! - [`ConsumerManager`] is owned by the coordinator thread and is the only
//!   place workers are spawned or retired
//! - [`ConsumerStatus`] is the shared, read-mostly view of the pool: the
//!   live worker count and the "no consumers" listeners fired when the
//!   count falls to zero
//! - workers talk back to the coordinator only through its mailbox

mod manager;
mod status;
mod worker;

pub(crate) use manager::{ConsumerManager, ConsumerSettings};
pub use status::{ConsumerStatus, ListenerId, NoConsumersListener};
