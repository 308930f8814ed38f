//! Task pool: a slab of task slots plus the free-slot/ready queues
//! and victim-selection PRNG that make it able to hand out and run tasks
//! without touching any other pool's state on the hot path.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::mpmc::Mpmc;
use crate::rng::Well512;
use crate::sem::Semaphore;
use crate::spmc::Spmc;

/// Owner-only cell: valid to read/write only while the enclosing pool is
/// bound to the calling thread (enforced by `PoolStorage::acquire`'s
/// exclusive hand-out, not by the type system — the slot array backing
/// every pool is shared, so single-owner access to this cell is a
/// runtime discipline rather than something the borrow checker can see).
struct OwnerCell<T>(UnsafeCell<T>);
unsafe impl<T> Sync for OwnerCell<T> {}

impl<T> OwnerCell<T> {
  fn new(v: T) -> OwnerCell<T> {
    OwnerCell(UnsafeCell::new(v))
  }

  #[allow(clippy::mut_from_ref)]
  unsafe fn get_mut(&self) -> &mut T {
    &mut *self.0.get()
  }
}

/// Dynamic, per-`Acquire` state of one task pool.
pub struct Pool {
  pub(crate) index: u32,
  pub(crate) type_index: u32,
  pub(crate) slot_start: u32,
  pub(crate) capacity: u32,
  pub(crate) steal_threshold: u32,

  pub(crate) free_slots: Mpmc,
  pub(crate) free_sem: Semaphore,
  pub(crate) ready: Spmc,
  pub(crate) ready_count: AtomicU32,
  pub(crate) bound: AtomicBool,

  rng: OwnerCell<Well512>,

  /// Intrusive singly-linked free list of released pools of this type,
  /// guarded by the type group's `SpinMutex`. `-1` = end of list.
  pub(crate) next_free: AtomicI32,
}

impl Pool {
  pub(crate) fn new(index: u32, type_index: u32, slot_start: u32, capacity: u32, steal_threshold: u32) -> Pool {
    Pool {
      index,
      type_index,
      slot_start,
      capacity,
      steal_threshold,
      free_slots: Mpmc::new(capacity as usize),
      free_sem: Semaphore::new(0),
      ready: Spmc::new(capacity as usize),
      ready_count: AtomicU32::new(0),
      bound: AtomicBool::new(false),
      rng: OwnerCell::new(Well512::seeded()),
      next_free: AtomicI32::new(-1),
    }
  }

  /// Re-initialize dynamic state for a fresh `Acquire`. The previous lease
  /// may have left `free_slots` full (every slot returned) and `ready`
  /// non-empty only if the caller released while work was still live, so
  /// both queues are dropped back to their fresh-construction state before
  /// the free list is repopulated, rather than pushed into on top of
  /// whatever they already hold.
  pub(crate) fn reinit(&self) {
    self.free_slots.reset();
    for i in 0..self.capacity {
      let ok = self.free_slots.push(i);
      debug_assert!(ok, "free-slot queue full immediately after reset: unreachable by construction");
    }
    self.ready.reset();
    self.free_sem.reset(self.capacity as i32);
    self.ready_count.store(0, Ordering::Relaxed);
    unsafe { self.rng.get_mut().reseed() };
  }

  pub fn index(&self) -> u32 {
    self.index
  }

  pub fn capacity(&self) -> u32 {
    self.capacity
  }

  /// Owner-only: draw a uniformly random index in `[0, bound)`, used by
  /// the storage-level steal dispatch to pick a victim pool.
  pub(crate) fn random_index(&self, bound: usize) -> usize {
    unsafe { self.rng.get_mut().next_below(bound) }
  }

  /// Global slot index for a local index within this pool's region of the
  /// storage-wide slot array.
  pub(crate) fn global_slot(&self, local: u32) -> u32 {
    self.slot_start + local
  }

  pub(crate) fn bump_ready_count_and_check_threshold(&self) -> bool {
    let prior = self.ready_count.fetch_add(1, Ordering::Relaxed);
    prior + 1 >= self.steal_threshold
  }

  pub(crate) fn reset_ready_count(&self) {
    self.ready_count.store(0, Ordering::Relaxed);
  }
}

impl std::fmt::Debug for Pool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Pool(type={}:{})", self.type_index, self.index)
  }
}
