//! A fixed-capacity, in-process fork/join task scheduler core.
//!
//! The crate owns exactly the bookkeeping a work-stealing executor needs
//! underneath it: pre-sized pools of task slots, the Define/Launch/Complete
//! lifecycle and its permit/wait-count graph, and the lock-free queues
//! that let Take/Steal/Complete run concurrently without a global lock.
//! It deliberately does not own a thread pool, an async runtime, or any
//! notion of task priority — those are layered on top by a caller; see
//! [`executor`] for a minimal reference worker loop built on this crate's
//! own public API, not a required part of it.
//!
//! # Shape
//!
//! - Build a [`storage::PoolStorage`] once from a list of
//!   [`storage::PoolTypeConfig`] entries (validated up front; see
//!   [`storage::ConfigError`]).
//! - Each participating thread calls [`storage::PoolStorage::acquire`] to
//!   bind one pool of the type it needs, getting back a
//!   [`storage::PoolHandle`] it owns until it releases or drops it.
//! - [`storage::PoolHandle::define`] creates tasks, optionally depending
//!   on up to [`task::MAX_PERMITS`] existing ones;
//!   [`storage::PoolHandle::launch`] and
//!   [`storage::PoolHandle::complete`] drive the lifecycle forward;
//!   [`storage::PoolHandle::take`] and [`storage::PoolHandle::steal`] /
//!   [`storage::PoolHandle::steal_any`] pull ready work, locally or from
//!   another pool.
//!
//! # Example
//!
//! ```
//! use task_core::storage::{PoolStorage, PoolTypeConfig, WORKER_POOL_ID};
//! use task_core::{CompletionKind, TaskInit};
//!
//! // One worker pool per CPU, sized to host up to 1024 live tasks each.
//! // How many pools to pre-allocate is an application concern (topology
//! // probing is not something this crate does for you); `num_cpus` is a
//! // reasonable default source for it.
//! let storage = PoolStorage::new(&[PoolTypeConfig {
//!     pool_id: WORKER_POOL_ID,
//!     pool_count: num_cpus::get() as u32,
//!     max_active_tasks: 1024,
//!     steal_threshold: 16,
//! }])
//! .unwrap();
//!
//! let pool = storage.acquire(WORKER_POOL_ID).unwrap();
//! let id = pool.define(TaskInit {
//!     kind: CompletionKind::Internal,
//!     ..Default::default()
//! });
//! assert_eq!(pool.take(), Some(id));
//! ```

mod id;
mod mpmc;
mod pool;
mod profiler;
mod rng;
mod sem;
mod spin;
mod spmc;
mod steal_bus;
mod task;
mod utils;

pub mod executor;
pub mod storage;

pub use id::{CompletionKind, TaskId, MAX_POOLS, MAX_TASKS_PER_POOL};
pub use profiler::{set_profiler, Event, Profiler};
pub use task::{EntryFn, TaskInit, MAX_ARGS, MAX_PERMITS};
