//! Multi-threaded end-to-end exercise: one thread defines and launches a
//! batch of ready tasks on its own pool, then several worker threads
//! (their own pools otherwise empty) drain the batch concurrently, most of
//! them purely by stealing from the producer's pool.
//!
//! Each worker calls `run_one` an exact, pre-assigned number of times
//! rather than looping until some shared "done" flag: `run_one` always
//! blocks until it retrieves a task, so handing out exactly as many calls
//! as there are tasks guarantees every call finds one and none blocks
//! forever waiting on a notification nobody will ever send.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use task_core::executor::run_one;
use task_core::storage::{PoolStorage, PoolTypeConfig, WORKER_POOL_ID};
use task_core::{CompletionKind, TaskId, TaskInit};

static COMPLETED: AtomicU32 = AtomicU32::new(0);

fn bump(_id: TaskId, _args: *mut u8) {
  COMPLETED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn idle_pools_drain_a_busy_pool_purely_by_stealing() {
  COMPLETED.store(0, Ordering::SeqCst);

  const STEALERS: u32 = 4;
  const PER_WORKER: u32 = 600;
  const TASKS: u32 = (STEALERS + 1) * PER_WORKER;

  // One pool to hold the whole ready batch, plus one per stealer thread
  // (left empty — every task those threads run comes off the producer's
  // deque via Steal).
  let storage = PoolStorage::new(&[PoolTypeConfig {
    pool_id: WORKER_POOL_ID,
    pool_count: STEALERS + 1,
    max_active_tasks: 4096,
    steal_threshold: 1,
  }])
  .unwrap();

  // Keep this handle bound for the whole test: re-acquiring it mid-test
  // would re-run `Acquire`'s free-slot reinitialization against slots that
  // are still live.
  let producer = storage.acquire(WORKER_POOL_ID).unwrap();
  for _ in 0..TASKS {
    let id = producer.define(TaskInit {
      entry: Some(bump),
      kind: CompletionKind::Internal,
      ..Default::default()
    });
    producer.launch(id);
  }

  thread::scope(|scope| {
    // Move the handle into its dedicated thread: `PoolHandle` is `Send`
    // (one thread may own it) but not `Sync` (its release-once `Cell`
    // can't be shared across threads), so this thread keeps sole custody
    // of it for the rest of the test.
    scope.spawn(move || {
      for _ in 0..PER_WORKER {
        run_one(&producer);
      }
    });

    for _ in 0..STEALERS {
      scope.spawn(|| {
        let pool = storage.acquire(WORKER_POOL_ID).unwrap();
        for _ in 0..PER_WORKER {
          run_one(&pool);
        }
      });
    }
  });

  assert_eq!(COMPLETED.load(Ordering::SeqCst), TASKS);
}
