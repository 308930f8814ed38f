//! Spin-adaptive mutex guarding the per-type pool free lists.
//!
//! Acquire/Release happen far off the hot path (pool lifetime, not task
//! lifetime), so a simple spin-then-yield lock is preferable to pulling in
//! a dedicated lock crate: contention here is rare and brief.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

pub struct SpinMutex<T> {
  locked: AtomicBool,
  data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
  pub fn new(value: T) -> SpinMutex<T> {
    SpinMutex {
      locked: AtomicBool::new(false),
      data: UnsafeCell::new(value),
    }
  }

  pub fn lock(&self) -> SpinGuard<'_, T> {
    let backoff = Backoff::new();
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      backoff.snooze();
    }
    SpinGuard { lock: self }
  }
}

pub struct SpinGuard<'a, T> {
  lock: &'a SpinMutex<T>,
}

impl<'a, T> Deref for SpinGuard<'a, T> {
  type Target = T;
  fn deref(&self) -> &T {
    unsafe { &*self.lock.data.get() }
  }
}

impl<'a, T> DerefMut for SpinGuard<'a, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.lock.data.get() }
  }
}

impl<'a, T> Drop for SpinGuard<'a, T> {
  fn drop(&mut self) {
    self.lock.locked.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn mutual_exclusion() {
    let lock = Arc::new(SpinMutex::new(0u64));
    let mut handles = Vec::new();
    for _ in 0..8 {
      let lock = lock.clone();
      handles.push(thread::spawn(move || {
        for _ in 0..1000 {
          *lock.lock() += 1;
        }
      }));
    }
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(*lock.lock(), 8000);
  }
}
