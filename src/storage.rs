//! Pool storage: the fixed, pre-allocated set of pools grouped by
//! type, plus the validated configuration that sizes them and the
//! cross-pool steal-notification bus they all publish to. Also hosts the
//! Define/Launch/Complete task-lifecycle protocol, since registering a
//! permit edge or bubbling a completion up to a parent may touch a slot
//! that belongs to any pool, not just the one bound to the calling thread.

use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::id::{CompletionKind, TaskId, MAX_POOLS, MAX_TASKS_PER_POOL};
use crate::pool::Pool;
use crate::profiler::{self, Event};
use crate::spin::SpinMutex;
use crate::steal_bus::StealBus;
use crate::task::{TaskInit, TaskSlot, MAX_PERMITS, PERMITS_COMPLETE};

/// `pool_id` reserved for the type of pool bound to the application's main
/// thread.
pub const MAIN_POOL_ID: u32 = 0;
/// `pool_id` reserved for worker-thread pools; at least one type entry
/// must use this id.
pub const WORKER_POOL_ID: u32 = 1;

/// One entry of the configuration passed to [`PoolStorage::new`].
#[derive(Debug, Clone, Copy)]
pub struct PoolTypeConfig {
  pub pool_id: u32,
  pub pool_count: u32,
  pub max_active_tasks: u32,
  pub steal_threshold: u32,
}

/// Configuration-validation failures. Returned before any
/// allocation happens; on error, no storage is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("pool type {pool_id}: pool_count {count} exceeds the per-type and global limit of {MAX_POOLS}")]
  TooManyPools { pool_id: u32, count: u32 },
  #[error("sum of pool_count across all types is {total}, exceeds the global limit of {MAX_POOLS}")]
  TotalPoolsExceeded { total: u32 },
  #[error("pool type {pool_id}: max_active_tasks {value} is out of range [2, {MAX_TASKS_PER_POOL}]")]
  TaskCountOutOfRange { pool_id: u32, value: u32 },
  #[error("pool type {pool_id}: max_active_tasks {value} is not a power of two")]
  NotPowerOfTwo { pool_id: u32, value: u32 },
  #[error("pool type {pool_id} is configured more than once")]
  DuplicateId { pool_id: u32 },
  #[error("no pool type entry uses the reserved worker pool_id ({WORKER_POOL_ID})")]
  NoWorkerId,
}

/// Failures from [`PoolStorage::acquire`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
  #[error("no pool type registered with pool_id {0}")]
  UnknownType(u32),
  #[error("pool type {0} has no released pool available")]
  NoFreePool(u32),
}

pub fn validate_pool_types(types: &[PoolTypeConfig]) -> Result<(), ConfigError> {
  let mut total: u64 = 0;
  let mut has_worker = false;

  for (i, t) in types.iter().enumerate() {
    if types[..i].iter().any(|o| o.pool_id == t.pool_id) {
      return Err(ConfigError::DuplicateId { pool_id: t.pool_id });
    }
    if t.pool_id == WORKER_POOL_ID {
      has_worker = true;
    }
    if t.pool_count > MAX_POOLS {
      return Err(ConfigError::TooManyPools {
        pool_id: t.pool_id,
        count: t.pool_count,
      });
    }
    if t.max_active_tasks < 2 || t.max_active_tasks > MAX_TASKS_PER_POOL {
      return Err(ConfigError::TaskCountOutOfRange {
        pool_id: t.pool_id,
        value: t.max_active_tasks,
      });
    }
    if !t.max_active_tasks.is_power_of_two() {
      return Err(ConfigError::NotPowerOfTwo {
        pool_id: t.pool_id,
        value: t.max_active_tasks,
      });
    }
    total += t.pool_count as u64;
  }

  if total > MAX_POOLS as u64 {
    return Err(ConfigError::TotalPoolsExceeded {
      total: total as u32,
    });
  }
  if !has_worker {
    return Err(ConfigError::NoWorkerId);
  }
  Ok(())
}

struct TypeGroup {
  #[allow(dead_code)]
  type_id: u32,
  pool_start: u32,
  #[allow(dead_code)]
  pool_count: u32,
  /// Head of the released-pool free list for this type, or `-1`. Guarded
  /// by its own spin-adaptive mutex.
  free_head: SpinMutex<i32>,
}

/// Owns every pool pre-allocated at construction, grouped by type, plus
/// the cross-pool steal-notification bus. Created once, lives for the
/// process (or embedding subsystem)'s lifetime; pools cycle through it via
/// [`acquire`](PoolStorage::acquire)/[`release`](PoolStorage::release).
pub struct PoolStorage {
  slots: Box<[TaskSlot]>,
  pools: Box<[Pool]>,
  types: Vec<TypeGroup>,
  steal_bus: StealBus,
}

/// Spin budget for the free-slot semaphore's fast path.
const DEFINE_SPIN: u32 = 4096;
/// Spin budget for the steal-notification bus's fast path.
const STEAL_WAIT_SPIN: u32 = 1024;

impl PoolStorage {
  /// Bytes of backing storage `new` would allocate for `types`, for
  /// callers that want to account for it up front ("compute required
  /// memory for a given set of tuples", realized here as introspection over an
  /// idiomatically-owned allocation rather than literal placement-new —
  /// see DESIGN.md).
  pub fn required_bytes(types: &[PoolTypeConfig]) -> usize {
    let slot_bytes = std::mem::size_of::<TaskSlot>();
    let pool_bytes = std::mem::size_of::<Pool>();
    let mut total = 0usize;
    for t in types {
      total += t.pool_count as usize * pool_bytes;
      total += t.pool_count as usize * t.max_active_tasks as usize * slot_bytes;
    }
    total
  }

  pub fn new(types: &[PoolTypeConfig]) -> Result<PoolStorage, ConfigError> {
    validate_pool_types(types)?;

    let total_pools: u32 = types.iter().map(|t| t.pool_count).sum();
    let total_slots: u64 = types
      .iter()
      .map(|t| t.pool_count as u64 * t.max_active_tasks as u64)
      .sum();

    let mut slots = Vec::with_capacity(total_slots as usize);
    for _ in 0..total_slots {
      slots.push(TaskSlot::new_free());
    }

    let mut pools = Vec::with_capacity(total_pools as usize);
    let mut type_groups = Vec::with_capacity(types.len());
    let mut slot_cursor: u32 = 0;
    let mut pool_cursor: u32 = 0;

    for t in types {
      let pool_start = pool_cursor;
      for _ in 0..t.pool_count {
        pools.push(Pool::new(
          pool_cursor,
          type_groups.len() as u32,
          slot_cursor,
          t.max_active_tasks,
          t.steal_threshold,
        ));
        slot_cursor += t.max_active_tasks;
        pool_cursor += 1;
      }

      for i in pool_start..pool_cursor {
        let next = if i + 1 < pool_cursor { i as i32 + 1 } else { -1 };
        pools[i as usize].next_free.store(next, Ordering::Relaxed);
      }

      type_groups.push(TypeGroup {
        type_id: t.pool_id,
        pool_start,
        pool_count: t.pool_count,
        free_head: SpinMutex::new(if t.pool_count > 0 { pool_start as i32 } else { -1 }),
      });
    }

    Ok(PoolStorage {
      slots: slots.into_boxed_slice(),
      pools: pools.into_boxed_slice(),
      types: type_groups,
      steal_bus: StealBus::new((total_pools as usize).max(2)),
    })
  }

  /// Bind a released pool of `type_id` to the calling thread.
  pub fn acquire(&self, type_id: u32) -> Result<PoolHandle<'_>, AcquireError> {
    let type_index = self
      .types
      .iter()
      .position(|g| g.type_id == type_id)
      .ok_or(AcquireError::UnknownType(type_id))?;

    let group = &self.types[type_index];
    let index = {
      let mut head = group.free_head.lock();
      if *head < 0 {
        return Err(AcquireError::NoFreePool(type_id));
      }
      let idx = *head as u32;
      *head = self.pools[idx as usize].next_free.load(Ordering::Relaxed);
      idx
    };

    let pool = &self.pools[index as usize];
    pool.reinit();
    pool.bound.store(true, Ordering::SeqCst);

    #[cfg(feature = "tracing")]
    log::trace!("{:?} acquired", pool);

    Ok(PoolHandle {
      storage: self,
      index,
      released: std::cell::Cell::new(false),
    })
  }

  fn release(&self, index: u32) {
    let pool = &self.pools[index as usize];
    pool.bound.store(false, Ordering::SeqCst);

    let group = &self.types[pool.type_index as usize];
    let mut head = group.free_head.lock();
    pool.next_free.store(*head, Ordering::Relaxed);
    *head = index as i32;

    #[cfg(feature = "tracing")]
    log::trace!("{:?} released", pool);
  }

  pub(crate) fn slot(&self, id: TaskId) -> &TaskSlot {
    let pool = &self.pools[id.pool_index() as usize];
    &self.slots[pool.global_slot(id.slot_index()) as usize]
  }

  /// Define a new task on `pool_index`. `pool_index` must
  /// name a pool currently bound to the calling thread.
  pub(crate) fn define(&self, pool_index: u32, init: TaskInit<'_>) -> TaskId {
    if init.parent.is_valid() {
      // step 1: register the child before it can be observed, so the
      // parent's work graph is consistent to any concurrent reader.
      self.slot(init.parent).work_count.fetch_add(1, Ordering::SeqCst);
    }

    let pool = &self.pools[pool_index as usize];

    // step 2: acquire a free slot. The semaphore wait is a hint that a
    // slot is available; the MPMC take is the hard grant.
    pool.free_sem.wait(DEFINE_SPIN);
    let local = loop {
      if let Some(l) = pool.free_slots.take() {
        break l;
      }
      std::hint::spin_loop();
    };

    let global = pool.global_slot(local);
    let slot = &self.slots[global as usize];

    // step 3: initialize, then publish with a full barrier.
    slot.wait_count.store(-(init.deps.len() as i32), Ordering::Relaxed);
    slot.work_count.store(2, Ordering::Relaxed);
    slot.permit_count.store(0, Ordering::Relaxed);
    unsafe { slot.init(init.entry, init.parent, init.args) };
    std::sync::atomic::fence(Ordering::SeqCst);

    // step 4.
    let id = TaskId::new(init.kind, pool_index, local);

    // step 5: convert each dependency into a permit edge.
    let mut ready = init.deps.is_empty();
    for &dep in init.deps {
      if self.register_permit_edge(dep, id) {
        ready = true;
      }
    }

    // step 6.
    if ready && id.completion_kind() == CompletionKind::Internal {
      self.publish_ready(pool, id);
    }

    profiler::report(Event::Defined(id));
    id
  }

  /// Returns `true` if this edge's registration is what made `new_id`
  /// ready (its `wait_count` transitioned from -1 to 0).
  fn register_permit_edge(&self, dep: TaskId, new_id: TaskId) -> bool {
    loop {
      let dep_slot = self.slot(dep);
      let n = dep_slot.permit_count.load(Ordering::Acquire);

      if n == PERMITS_COMPLETE || n as usize >= MAX_PERMITS {
        if n != PERMITS_COMPLETE {
          debug_assert!(
            false,
            "permit overflow: more than {} tasks waiting on {:?}",
            MAX_PERMITS, dep
          );
        }
        let new_slot = self.slot(new_id);
        let prior = new_slot.wait_count.fetch_add(1, Ordering::SeqCst);
        return prior == -1;
      }

      match dep_slot
        .permit_count
        .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          // exclusive owner of index n now; safe to publish non-atomically
          // claimed, never contended by another definer.
          dep_slot.set_permit(n as usize, new_id);
          return false;
        }
        Err(_) => continue,
      }
    }
  }

  fn publish_ready(&self, pool: &Pool, id: TaskId) {
    // Owner-only push: both callers (`define`, `complete_inner`) only ever
    // reach this with `pool` being the caller's own bound pool.
    // Capacity can't be exceeded: at most `capacity` task ids ever
    // reference this pool at once, guarded by its free-slot semaphore.
    pool.ready.push(id.as_raw());
    if pool.bump_ready_count_and_check_threshold() {
      self.steal_bus.notify(pool.index);
    }
    profiler::report(Event::Ready(id));
  }

  /// Shared walk for `Launch` and `Complete`. `via_pool_index`
  /// names the pool that absorbs newly-readied continuations; `id` is the
  /// task whose work item just finished.
  fn complete_inner(&self, via_pool_index: u32, mut id: TaskId) -> u32 {
    let mut promoted = 0u32;
    loop {
      let slot = self.slot(id);
      let prior_work = slot.work_count.fetch_sub(1, Ordering::SeqCst);
      debug_assert!(
        prior_work >= 1,
        "double completion: work_count underflowed for {:?}",
        id
      );
      if prior_work != 1 {
        return promoted;
      }

      let n = slot.permit_count.swap(PERMITS_COMPLETE, Ordering::SeqCst);
      debug_assert!(
        (0..=MAX_PERMITS as i32).contains(&n),
        "permit_count corrupt at completion for {:?}",
        id
      );

      let via_pool = &self.pools[via_pool_index as usize];
      for i in 0..n.max(0) as usize {
        let permitted = slot.permit_at(i);
        let p_slot = self.slot(permitted);
        let prior_wait = p_slot.wait_count.fetch_add(1, Ordering::SeqCst);
        if prior_wait == -1 {
          promoted += 1;
          if permitted.completion_kind() == CompletionKind::Internal {
            self.publish_ready(via_pool, permitted);
          }
        }
      }

      profiler::report(Event::Completed(id));

      let parent = slot.parent();
      let owning_pool = &self.pools[id.pool_index() as usize];
      let freed = owning_pool.free_slots.push(id.slot_index());
      debug_assert!(freed, "free-slot queue full on release: unreachable by construction");
      owning_pool.free_sem.post();

      if !parent.is_valid() {
        return promoted;
      }
      id = parent;
    }
  }

  /// `Launch`: signal that the define-phase work item is done.
  /// Equivalent to `Complete` except it never resets `ready_count`.
  pub(crate) fn launch(&self, via_pool_index: u32, id: TaskId) -> u32 {
    self.complete_inner(via_pool_index, id)
  }

  /// `Complete`: signal that a work item for `id` has finished.
  pub(crate) fn complete(&self, via_pool_index: u32, id: TaskId) -> u32 {
    let promoted = self.complete_inner(via_pool_index, id);
    self.pools[via_pool_index as usize].reset_ready_count();
    promoted
  }

  /// Steal one ready task from `victim_index`'s deque, called by any
  /// thread. Returns the task and whether more remained.
  pub(crate) fn steal_from(&self, victim_index: u32) -> Option<(TaskId, bool)> {
    profiler::report(Event::StealAttempt {
      victim_pool: victim_index,
    });
    self.pools[victim_index as usize]
      .ready
      .steal()
      .map(|(raw, more)| (TaskId::from_raw(raw), more))
  }

  pub(crate) fn pool_count(&self) -> u32 {
    self.pools.len() as u32
  }

  pub(crate) fn wait_for_steal_notification(&self) -> Option<u32> {
    self.steal_bus.wait_for_work(STEAL_WAIT_SPIN)
  }

  /// Try every other pool once, starting from a uniformly random index
  /// drawn from `from_index`'s own PRNG, looking for a ready task to
  /// steal.
  pub(crate) fn steal_any(&self, from_index: u32) -> Option<TaskId> {
    let n = self.pools.len();
    if n <= 1 {
      return None;
    }
    let start = self.pools[from_index as usize].random_index(n) as u32;
    for offset in 0..n as u32 {
      let victim = (start + offset) % n as u32;
      if victim == from_index {
        continue;
      }
      if let Some((id, _)) = self.steal_from(victim) {
        return Some(id);
      }
    }
    None
  }
}

/// An exclusive, bound handle to one [`Pool`].
/// Only the thread holding this handle may `Define`, `Launch`, or `Take`
/// on the named pool; any thread may still `Complete` or `Steal` against
/// it. Dropping the handle releases the pool automatically; call
/// [`release`](PoolHandle::release) explicitly if the release timing
/// matters to the caller.
pub struct PoolHandle<'s> {
  storage: &'s PoolStorage,
  index: u32,
  released: std::cell::Cell<bool>,
}

impl<'s> PoolHandle<'s> {
  pub fn index(&self) -> u32 {
    self.index
  }

  pub fn capacity(&self) -> u32 {
    self.storage.pools[self.index as usize].capacity
  }

  /// `Define`.
  pub fn define(&self, init: TaskInit<'_>) -> TaskId {
    self.storage.define(self.index, init)
  }

  /// `Launch`.
  pub fn launch(&self, id: TaskId) -> u32 {
    self.storage.launch(self.index, id)
  }

  /// `Complete`, attributing newly-readied continuations to this pool.
  pub fn complete(&self, id: TaskId) -> u32 {
    self.storage.complete(self.index, id)
  }

  /// Owner-only `Take` from this pool's ready deque (LIFO).
  pub fn take(&self) -> Option<TaskId> {
    self.storage.pools[self.index as usize]
      .ready
      .take()
      .map(|(raw, _)| TaskId::from_raw(raw))
  }

  /// Any-thread `Steal` from this pool's ready deque.
  pub fn steal(&self) -> Option<TaskId> {
    self.storage.steal_from(self.index).map(|(id, _)| id)
  }

  /// Owner-only: pick a random victim pool (via this pool's own PRNG) and
  /// try to steal one ready task from it.
  pub fn steal_any(&self) -> Option<TaskId> {
    self.storage.steal_any(self.index)
  }

  pub fn wait_for_steal_notification(&self) -> Option<u32> {
    self.storage.wait_for_steal_notification()
  }

  /// Borrow the slot backing `id`, for a collaborator (e.g. the
  /// in-crate reference worker loop) that needs to reach its entry point
  /// and argument bytes to run it. Not part of the public surface: an
  /// application drives tasks through Define/Launch/Complete, never by
  /// touching a slot directly.
  pub(crate) fn slot_for(&self, id: TaskId) -> &TaskSlot {
    self.storage.slot(id)
  }

  /// Release this pool back to its type's free list now, instead of
  /// waiting for the handle to drop.
  pub fn release(self) {
    // Drop runs `release_once` below.
  }

  fn release_once(&self) {
    if !self.released.replace(true) {
      self.storage.release(self.index);
    }
  }
}

impl<'s> Drop for PoolHandle<'s> {
  fn drop(&mut self) {
    self.release_once();
  }
}

impl<'s> std::fmt::Debug for PoolHandle<'s> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "PoolHandle({})", self.index)
  }
}
