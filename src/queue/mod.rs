//! Shared work queues and claim registries.
//!
//! Every worker of a run coordinates through the primitives in this module:
//!
//! - [`WorkQueue`] - unbounded multi-producer/multi-consumer FIFO with an
//!   async [`pop`](WorkQueue::pop) that parks the task until an item arrives
//! - [`ClaimSet`] - atomic insert-if-absent registry of identifiers
//!
//! Queues are cheap to share behind an `Arc`; nothing here spawns tasks.
//!
//! # Example
//!
//! ```
//! use harvester_core::queue::{ClaimSet, WorkQueue};
//!
//! let queue = WorkQueue::new();
//! let seen = ClaimSet::new();
//!
//! if seen.claim("u1") {
//!     queue.push("u1".to_string());
//! }
//! assert!(!seen.claim("u1"));
//! assert_eq!(queue.try_pop().as_deref(), Some("u1"));
//! ```

mod claims;
mod work;

pub use claims::ClaimSet;
pub use work::WorkQueue;
