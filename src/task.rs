//! Task slot record and the lifecycle constants that bound it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::id::TaskId;

/// Maximum tasks that may wait on a single task's completion.
pub const MAX_PERMITS: usize = 14;
/// Maximum inline argument bytes carried inline in a task slot.
pub const MAX_ARGS: usize = 48;

/// Sentinel written into `permit_count` once a task has completed; no
/// further permits may be installed after this point.
pub(crate) const PERMITS_COMPLETE: i32 = -1;

/// `permit_ids` entries are seeded with this (== `TaskId::INVALID`'s raw
/// bits) and only ever transition away from it once. A registering thread
/// claims its index with a CAS on `permit_count` *before* writing the id,
/// so two definers can never contend for the same index; `Complete` reads
/// each claimed index with a short spin until it observes a non-sentinel
/// value, which covers the brief window between a definer's successful
/// claim and its write becoming visible (the counterpart of the
/// MPMC queue's cell-sequence handshake, scaled down to 14 fixed slots).
const PERMIT_EMPTY: u32 = 0x7FFF_FFFF;

/// A task's entry point: receives its own id and a pointer to its inline
/// argument bytes. `None` for externally-completed tasks.
pub type EntryFn = fn(TaskId, *mut u8);

struct SlotData {
  parent_id: TaskId,
  entry: Option<EntryFn>,
  args: [u8; MAX_ARGS],
}

/// Fixed-size, cache-line-aligned task record. With `MAX_PERMITS = 14`
/// and `MAX_ARGS = 48` the record itself spans two cache lines; alignment
/// still keeps it from straddling a third and from false-sharing with a
/// neighboring slot.
///
/// `wait_count`, `work_count`, `permit_count` and `permit_ids` are touched
/// concurrently after the defining thread publishes the slot, all via
/// atomics. `parent_id`/`entry`/`args` are written once by the
/// defining thread before publication and read-only thereafter until the
/// slot is recycled; they live in an `UnsafeCell` because the slot is
/// addressed through `&TaskSlot` everywhere (the pool's backing array is
/// shared), but are synchronized by the same acquire/release edge that
/// makes the slot's atomics visible (the free-slot semaphore `wait` on
/// acquire, the ready-deque push/steal, or the `permit_count` exchange on
/// publish).
#[repr(align(64))]
pub struct TaskSlot {
  pub(crate) wait_count: AtomicI32,
  pub(crate) work_count: AtomicI32,
  pub(crate) permit_count: AtomicI32,
  pub(crate) permit_ids: [AtomicU32; MAX_PERMITS],
  data: UnsafeCell<SlotData>,
}

unsafe impl Sync for TaskSlot {}

impl TaskSlot {
  pub(crate) fn new_free() -> TaskSlot {
    TaskSlot {
      wait_count: AtomicI32::new(0),
      work_count: AtomicI32::new(0),
      permit_count: AtomicI32::new(0),
      permit_ids: [
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
        AtomicU32::new(PERMIT_EMPTY),
      ],
      data: UnsafeCell::new(SlotData {
        parent_id: TaskId::INVALID,
        entry: None,
        args: [0u8; MAX_ARGS],
      }),
    }
  }

  /// Definer-only: overwrite the slot's static fields and rearm the
  /// permit-id sentinels for reuse. Must happen before the slot is
  /// published to any other thread.
  pub(crate) unsafe fn init(&self, entry: Option<EntryFn>, parent: TaskId, args: &[u8]) {
    let data = &mut *self.data.get();
    data.parent_id = parent;
    data.entry = entry;
    let n = args.len().min(MAX_ARGS);
    data.args[..n].copy_from_slice(&args[..n]);
    if n < MAX_ARGS {
      data.args[n..].fill(0);
    }
    for cell in &self.permit_ids {
      cell.store(PERMIT_EMPTY, Ordering::Relaxed);
    }
  }

  /// Claim index `slot` (the caller must already have exclusively reserved
  /// it via a successful `permit_count` CAS) and publish `id` into it.
  pub(crate) fn set_permit(&self, slot: usize, id: TaskId) {
    self.permit_ids[slot].store(id.as_raw(), Ordering::Release);
  }

  /// Read the id claimed at `slot`, spinning briefly if the claimant's
  /// write has not yet become visible (see [`PERMIT_EMPTY`]).
  pub(crate) fn permit_at(&self, slot: usize) -> TaskId {
    let backoff = crossbeam_utils::Backoff::new();
    loop {
      let raw = self.permit_ids[slot].load(Ordering::Acquire);
      if raw != PERMIT_EMPTY {
        return TaskId::from_raw(raw);
      }
      backoff.snooze();
    }
  }

  pub fn entry(&self) -> Option<EntryFn> {
    unsafe { (*self.data.get()).entry }
  }

  pub fn args_ptr(&self) -> *mut u8 {
    unsafe { (*self.data.get()).args.as_mut_ptr() }
  }

  pub fn parent(&self) -> TaskId {
    unsafe { (*self.data.get()).parent_id }
  }

  /// Current `wait_count`, for diagnostics/tests — the lifecycle protocol
  /// itself reasons about the values returned by the atomic RMW ops
  /// directly, not by re-reading this afterwards.
  pub fn wait_count(&self) -> i32 {
    self.wait_count.load(Ordering::SeqCst)
  }

  pub fn work_count(&self) -> i32 {
    self.work_count.load(Ordering::SeqCst)
  }

  pub fn permit_count(&self) -> i32 {
    self.permit_count.load(Ordering::SeqCst)
  }
}

/// A definition passed to `Define`.
pub struct TaskInit<'a> {
  pub entry: Option<EntryFn>,
  pub args: &'a [u8],
  pub deps: &'a [TaskId],
  pub parent: TaskId,
  pub kind: crate::id::CompletionKind,
}

impl<'a> Default for TaskInit<'a> {
  fn default() -> Self {
    TaskInit {
      entry: None,
      args: &[],
      deps: &[],
      parent: TaskId::INVALID,
      kind: crate::id::CompletionKind::Internal,
    }
  }
}
