//! Reference worker-loop helper.
//!
//! Running tasks is explicitly a collaborator's job, not the core's: the
//! core only supplies `Define`/`Launch`/`Take`/`Steal`/`Complete` and a
//! bound pool handle. This is a thin own-deque -> steal-from-another-pool
//! -> block-on-the-steal-notification-bus ladder; there is no blocking-
//! thread detection or dynamic replacement here, since one thread per
//! bound pool is all this drives.

use crate::id::TaskId;
use crate::storage::PoolHandle;
use crate::utils::abort_on_panic;

/// Spin budget tried against `steal_any` before falling back to blocking
/// on the steal-notification bus.
const STEAL_SPIN: u32 = 256;

/// Run ready tasks bound to `pool` until `should_stop` returns `true`,
/// checked between tasks. A thin convenience over [`run_one`] for the
/// common "dedicate this thread to one pool" case.
pub fn run_until(pool: &PoolHandle<'_>, mut should_stop: impl FnMut() -> bool) {
  while !should_stop() {
    run_one(pool);
  }
}

/// Run exactly one ready task bound to `pool`, blocking (with a spin
/// budget first) until one becomes available either locally or by
/// stealing from another pool. Returns the id that ran.
///
/// Panics inside the task's `entry` abort the process rather than unwind
/// into the scheduler's own bookkeeping — nothing about a task panicking
/// is recoverable here.
pub fn run_one(pool: &PoolHandle<'_>) -> TaskId {
  let id = take_or_steal(pool);
  execute_and_complete(pool, id);
  id
}

fn take_or_steal(pool: &PoolHandle<'_>) -> TaskId {
  loop {
    if let Some(id) = pool.take() {
      return id;
    }

    let backoff = crossbeam_utils::Backoff::new();
    let mut found = None;
    for _ in 0..STEAL_SPIN {
      if let Some(id) = pool.steal_any() {
        found = Some(id);
        break;
      }
      backoff.snooze();
    }
    if let Some(id) = found {
      return id;
    }

    // Nothing anywhere as of the last sweep; block until some pool
    // publishes new ready work, then loop back around to Take/Steal
    // again rather than trust the woken-for index, since by the time we
    // wake the notifying pool's own worker may already have taken it.
    pool.wait_for_steal_notification();
  }
}

fn execute_and_complete(pool: &PoolHandle<'_>, id: TaskId) {
  #[cfg(feature = "tracing")]
  log::trace!("{:?} running {:?}", pool, id);

  let slot = pool.slot_for(id);
  abort_on_panic(|| {
    // Internally-completed tasks always carry an entry; externally
    // completed tasks never reach a ready deque in the first place, so
    // Take/Steal never hand us one without one.
    if let Some(entry) = slot.entry() {
      entry(id, slot.args_ptr());
    }
  });

  pool.complete(id);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::id::CompletionKind;
  use crate::storage::{PoolStorage, PoolTypeConfig};
  use crate::task::TaskInit;
  use std::sync::atomic::{AtomicU32, Ordering};

  static RAN: AtomicU32 = AtomicU32::new(0);

  fn bump(_id: TaskId, _args: *mut u8) {
    RAN.fetch_add(1, Ordering::SeqCst);
  }

  fn storage() -> PoolStorage {
    PoolStorage::new(&[PoolTypeConfig {
      pool_id: crate::storage::WORKER_POOL_ID,
      pool_count: 1,
      max_active_tasks: 8,
      steal_threshold: 4,
    }])
    .unwrap()
  }

  #[test]
  fn run_one_executes_and_completes_a_ready_task() {
    RAN.store(0, Ordering::SeqCst);
    let storage = storage();
    let pool = storage.acquire(crate::storage::WORKER_POOL_ID).unwrap();

    let id = pool.define(TaskInit {
      entry: Some(bump),
      kind: CompletionKind::Internal,
      ..Default::default()
    });
    pool.launch(id);

    run_one(&pool);
    assert_eq!(RAN.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn run_until_drains_a_batch() {
    RAN.store(0, Ordering::SeqCst);
    let storage = storage();
    let pool = storage.acquire(crate::storage::WORKER_POOL_ID).unwrap();

    for _ in 0..5 {
      let id = pool.define(TaskInit {
        entry: Some(bump),
        kind: CompletionKind::Internal,
        ..Default::default()
      });
      pool.launch(id);
    }

    let mut remaining = 5;
    run_until(&pool, || {
      if remaining == 0 {
        true
      } else {
        remaining -= 1;
        false
      }
    });
    assert_eq!(RAN.load(Ordering::SeqCst), 5);
  }
}
