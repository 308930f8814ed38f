//! Bounded MPMC FIFO: Dmitry Vyukov's cell-sequence queue, carrying
//! 32-bit tags (slot indices, pool indices, packed `TaskId`s — whatever
//! the caller needs to move between producers and consumers).
//!
//! Linearizable, capacity fixed at construction and a power of two.
//! `enqueue_pos`/`dequeue_pos` are each cache-padded so producers and
//! consumers never false-share a line, and the shared header (the cell
//! array pointer/len) lives on its own line too.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

struct Cell {
  sequence: AtomicU32,
  payload: UnsafeCell<u32>,
}

/// Bounded multi-producer/multi-consumer FIFO queue of `u32` values.
///
/// Position counters share the cell sequence's `u32` width, not a wider
/// `usize`: both wrap at the same modulus, so the cell-sequence handshake
/// below stays valid across the wraparound instead of drifting once a
/// long-lived queue's position count exceeds 2^32.
pub struct Mpmc {
  buffer: Box<[Cell]>,
  mask: usize,
  enqueue_pos: CachePadded<AtomicU32>,
  dequeue_pos: CachePadded<AtomicU32>,
}

unsafe impl Send for Mpmc {}
unsafe impl Sync for Mpmc {}

impl Mpmc {
  /// `capacity` must be a power of two, >= 2.
  pub fn new(capacity: usize) -> Mpmc {
    debug_assert!(capacity >= 2 && capacity.is_power_of_two());
    let buffer = (0..capacity)
      .map(|i| Cell {
        sequence: AtomicU32::new(i as u32),
        payload: UnsafeCell::new(0),
      })
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Mpmc {
      buffer,
      mask: capacity - 1,
      enqueue_pos: CachePadded::new(AtomicU32::new(0)),
      dequeue_pos: CachePadded::new(AtomicU32::new(0)),
    }
  }

  pub fn capacity(&self) -> usize {
    self.buffer.len()
  }

  /// Drop back to the freshly-constructed empty state. Only safe to call
  /// while no thread can be concurrently pushing or taking (used by
  /// `TaskPool::acquire` to re-arm a released pool's free-slot queue
  /// before handing its indices back out).
  pub(crate) fn reset(&self) {
    for (i, cell) in self.buffer.iter().enumerate() {
      cell.sequence.store(i as u32, Ordering::Relaxed);
    }
    self.enqueue_pos.store(0, Ordering::Relaxed);
    self.dequeue_pos.store(0, Ordering::Relaxed);
  }

  /// Push `v`. Returns `false` if the queue is full.
  pub fn push(&self, v: u32) -> bool {
    let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
    loop {
      let cell = &self.buffer[pos as usize & self.mask];
      let seq = cell.sequence.load(Ordering::Acquire);
      let diff = seq.wrapping_sub(pos) as i32;

      if diff == 0 {
        match self.enqueue_pos.compare_exchange_weak(
          pos,
          pos.wrapping_add(1),
          Ordering::Relaxed,
          Ordering::Relaxed,
        ) {
          Ok(_) => {
            unsafe { *cell.payload.get() = v };
            cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
            return true;
          }
          Err(observed) => pos = observed,
        }
      } else if diff < 0 {
        return false;
      } else {
        pos = self.enqueue_pos.load(Ordering::Relaxed);
      }
    }
  }

  /// Take the next value in FIFO order. Returns `None` if the queue is empty.
  pub fn take(&self) -> Option<u32> {
    let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
    loop {
      let cell = &self.buffer[pos as usize & self.mask];
      let seq = cell.sequence.load(Ordering::Acquire);
      let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i32;

      if diff == 0 {
        match self.dequeue_pos.compare_exchange_weak(
          pos,
          pos.wrapping_add(1),
          Ordering::Relaxed,
          Ordering::Relaxed,
        ) {
          Ok(_) => {
            let v = unsafe { *cell.payload.get() };
            cell
              .sequence
              .store(pos.wrapping_add(self.mask as u32 + 1), Ordering::Release);
            return Some(v);
          }
          Err(observed) => pos = observed,
        }
      } else if diff < 0 {
        return None;
      } else {
        pos = self.dequeue_pos.load(Ordering::Relaxed);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn fifo_single_thread() {
    let q = Mpmc::new(8);
    for i in 0..8 {
      assert!(q.push(i));
    }
    assert!(!q.push(99));
    for i in 0..8 {
      assert_eq!(q.take(), Some(i));
    }
    assert_eq!(q.take(), None);
  }

  #[test]
  fn capacity_bounds() {
    let q = Mpmc::new(4);
    assert!(q.push(1));
    assert!(q.push(2));
    assert!(q.push(3));
    assert!(q.push(4));
    assert!(!q.push(5));
    assert_eq!(q.take(), Some(1));
    assert!(q.push(5));
    assert_eq!(q.take(), Some(2));
    assert_eq!(q.take(), Some(3));
    assert_eq!(q.take(), Some(4));
    assert_eq!(q.take(), Some(5));
    assert_eq!(q.take(), None);
  }

  #[test]
  fn mpmc_stress_no_loss_no_duplication() {
    let q = Arc::new(Mpmc::new(1024));
    let producers = 4;
    let per_producer = 20_000u32;

    let mut handles = Vec::new();
    for p in 0..producers {
      let q = q.clone();
      handles.push(thread::spawn(move || {
        for i in 0..per_producer {
          let v = p * per_producer + i;
          while !q.push(v) {
            thread::yield_now();
          }
        }
      }));
    }

    let consumers = 4;
    let total = producers * per_producer;
    let counter = Arc::new(AtomicUsize::new(0));
    let mut seen = Vec::new();
    for _ in 0..consumers {
      let q = q.clone();
      let counter = counter.clone();
      seen.push(thread::spawn(move || {
        let mut got = Vec::new();
        loop {
          if let Some(v) = q.take() {
            got.push(v);
            counter.fetch_add(1, Ordering::Relaxed);
          } else if counter.load(Ordering::Relaxed) as u32 >= total {
            break;
          } else {
            thread::yield_now();
          }
        }
        got
      }));
    }

    for h in handles {
      h.join().unwrap();
    }
    let mut all = Vec::new();
    for h in seen {
      all.extend(h.join().unwrap());
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), total as usize);
  }
}
