//! Bounded SPMC deque: Chase-Lev style, owner pushes/takes at the
//! private end, thieves steal at the public end.
//!
//! Capacity is fixed and a power of two; 64-bit position counters make
//! wraparound unreachable within the bounds this crate ever builds
//! (bounded further in practice by the pool's free-slot semaphore, which
//! caps the number of live task ids referencing the pool at `capacity`).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::CachePadded;

/// Bounded single-producer/multi-consumer deque of `u32` values (typically
/// packed `TaskId`s).
pub struct Spmc {
  buffer: Box<[UnsafeCell<u32>]>,
  mask: i64,
  private_pos: CachePadded<AtomicI64>,
  public_pos: CachePadded<AtomicI64>,
}

unsafe impl Send for Spmc {}
unsafe impl Sync for Spmc {}

impl Spmc {
  /// `capacity` must be a power of two, >= 2.
  pub fn new(capacity: usize) -> Spmc {
    debug_assert!(capacity >= 2 && capacity.is_power_of_two());
    let buffer = (0..capacity)
      .map(|_| UnsafeCell::new(0))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Spmc {
      buffer,
      mask: capacity as i64 - 1,
      private_pos: CachePadded::new(AtomicI64::new(0)),
      public_pos: CachePadded::new(AtomicI64::new(0)),
    }
  }

  pub fn capacity(&self) -> usize {
    self.buffer.len()
  }

  fn slot(&self, pos: i64) -> &UnsafeCell<u32> {
    &self.buffer[(pos & self.mask) as usize]
  }

  /// Owner-only. Push `v` at the private end. The caller must guarantee no
  /// more than `capacity` items are live at once (the pool's free-slot
  /// semaphore enforces this for task ids).
  pub fn push(&self, v: u32) {
    let p = self.private_pos.load(Ordering::Relaxed);
    unsafe { *self.slot(p).get() = v };
    self.private_pos.store(p + 1, Ordering::Relaxed);
  }

  /// Owner-only. Take the most recently pushed item (LIFO). `more` is set
  /// when at least one additional item remains after this one.
  pub fn take(&self) -> Option<(u32, bool)> {
    let p = self.private_pos.load(Ordering::Relaxed);
    let new_p = p - 1;
    self.private_pos.store(new_p, Ordering::SeqCst);
    let t = self.public_pos.load(Ordering::Relaxed);

    if t > new_p {
      // empty: restore private_pos.
      self.private_pos.store(p, Ordering::Relaxed);
      return None;
    }

    let v = unsafe { *self.slot(new_p).get() };
    if t == new_p {
      // last item: race a concurrent steal for it.
      let won = self
        .public_pos
        .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();
      self.private_pos.store(p, Ordering::Relaxed);
      if !won {
        return None;
      }
      return Some((v, false));
    }

    Some((v, true))
  }

  /// Any thread. Steal the oldest item from the public end. `more` is set
  /// when at least one additional item was observed after this one.
  pub fn steal(&self) -> Option<(u32, bool)> {
    let t = self.public_pos.load(Ordering::Acquire);
    let p = self.private_pos.load(Ordering::Relaxed);

    if t >= p {
      return None;
    }

    let v = unsafe { *self.slot(t).get() };
    match self
      .public_pos
      .compare_exchange(t, t + 1, Ordering::Release, Ordering::Relaxed)
    {
      Ok(_) => Some((v, t + 1 < p)),
      Err(_) => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.public_pos.load(Ordering::Acquire) >= self.private_pos.load(Ordering::Relaxed)
  }

  /// Drop back to empty at position zero. Only safe to call while no
  /// thread can be concurrently pushing, taking or stealing (used by
  /// `TaskPool::acquire` to re-arm a released pool's ready deque).
  pub(crate) fn reset(&self) {
    self.private_pos.store(0, Ordering::Relaxed);
    self.public_pos.store(0, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn lifo_single_thread() {
    let d = Spmc::new(8);
    for i in 0..8 {
      d.push(i);
    }
    for i in (0..8).rev() {
      assert_eq!(d.take(), Some((i, i != 0)));
    }
    assert_eq!(d.take(), None);
  }

  #[test]
  fn fifo_for_single_stealer() {
    let d = Spmc::new(8);
    for i in 0..8 {
      d.push(i);
    }
    for i in 0..8 {
      assert_eq!(d.steal().map(|(v, _)| v), Some(i));
    }
    assert_eq!(d.steal(), None);
  }

  #[test]
  fn capacity_exhaustion() {
    let d = Spmc::new(4);
    for i in 0..4 {
      d.push(i);
    }
    let mut got = Vec::new();
    while let Some((v, _)) = d.take() {
      got.push(v);
    }
    assert_eq!(got, vec![3, 2, 1, 0]);
  }

  #[test]
  fn concurrent_owner_and_stealers_no_duplication() {
    let d = Arc::new(Spmc::new(1024));
    let n = 500u32;
    for i in 0..n {
      d.push(i);
    }

    let mut seen = Vec::new();
    let owner = {
      let d = d.clone();
      thread::spawn(move || {
        let mut got = Vec::new();
        while let Some((v, _)) = d.take() {
          got.push(v);
        }
        got
      })
    };

    let mut stealers = Vec::new();
    for _ in 0..4 {
      let d = d.clone();
      stealers.push(thread::spawn(move || {
        let mut got = Vec::new();
        loop {
          match d.steal() {
            Some((v, _)) => got.push(v),
            None => {
              if d.is_empty() {
                break;
              }
              thread::yield_now();
            }
          }
        }
        got
      }));
    }

    seen.extend(owner.join().unwrap());
    for s in stealers {
      seen.extend(s.join().unwrap());
    }
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), n as usize);
  }
}
