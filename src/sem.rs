//! Userspace-fast counting semaphore.
//!
//! Mirrors the classic "semaphore built on an atomic counter plus one OS
//! semaphore" design: the fast path never touches the OS object at all, it
//! only blocks when contention actually produces waiters. Negative counter
//! values encode the number of threads currently parked.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::Backoff;

/// OS-level blocking primitive backing [`Semaphore`]'s slow path. A
/// condvar-guarded token count plays the role of the reference design's
/// native OS semaphore object.
struct OsSemaphore {
  mutex: Mutex<u32>,
  condvar: Condvar,
}

impl OsSemaphore {
  fn new() -> OsSemaphore {
    OsSemaphore {
      mutex: Mutex::new(0),
      condvar: Condvar::new(),
    }
  }

  fn release(&self, n: u32) {
    if n == 0 {
      return;
    }
    let mut tokens = self.mutex.lock().unwrap();
    *tokens += n;
    if n == 1 {
      self.condvar.notify_one();
    } else {
      self.condvar.notify_all();
    }
  }

  fn acquire_one(&self) {
    let mut tokens = self.mutex.lock().unwrap();
    while *tokens == 0 {
      tokens = self.condvar.wait(tokens).unwrap();
    }
    *tokens -= 1;
  }

  /// Discard any parked tokens without waking anyone. Only safe to call
  /// while no thread can be concurrently waiting on or posting to the
  /// owning semaphore.
  fn drain(&self) {
    *self.mutex.lock().unwrap() = 0;
  }
}

/// A counting semaphore with a userspace fast path.
///
/// `post`/`try_wait` never block. `wait` spins for up to `spin` iterations
/// before parking on the OS object.
pub struct Semaphore {
  count: AtomicI32,
  os: OsSemaphore,
}

impl Semaphore {
  pub fn new(initial: i32) -> Semaphore {
    Semaphore {
      count: AtomicI32::new(initial),
      os: OsSemaphore::new(),
    }
  }

  /// Reset to `initial` with no waiters. Only safe to call while no thread
  /// can be concurrently waiting on or posting to this semaphore (used by
  /// `TaskPool::acquire` to re-arm a released pool). Also discards any OS
  /// tokens left over from the previous lease, so a pool that was released
  /// while its semaphore held a nonzero count can't hand out an extra wait
  /// on the next acquire.
  pub fn reset(&self, initial: i32) {
    self.count.store(initial, Ordering::SeqCst);
    self.os.drain();
  }

  /// Non-blocking decrement. Returns `true` if a unit was taken.
  pub fn try_wait(&self) -> bool {
    let mut cur = self.count.load(Ordering::Acquire);
    loop {
      if cur <= 0 {
        return false;
      }
      match self.count.compare_exchange_weak(
        cur,
        cur - 1,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => return true,
        Err(observed) => cur = observed,
      }
    }
  }

  /// Decrement, blocking until a unit is available. Spins up to `spin`
  /// times on the fast path before falling back to the OS object.
  pub fn wait(&self, spin: u32) {
    let backoff = spin_backoff();
    for _ in 0..spin {
      if self.try_wait() {
        return;
      }
      backoff.snooze();
    }

    let prior = self.count.fetch_sub(1, Ordering::AcqRel);
    if prior < 1 {
      // we are now a counted waiter; park until a post wakes us.
      self.os.acquire_one();
    }
  }

  /// Increment by one, waking a single waiter if one is parked.
  pub fn post(&self) {
    self.post_n(1);
  }

  /// Increment by `k`, waking up to `k` parked waiters.
  pub fn post_n(&self, k: u32) {
    if k == 0 {
      return;
    }
    let prior = self.count.fetch_add(k as i32, Ordering::AcqRel);
    if prior < 0 {
      let wake = std::cmp::min((-prior) as u32, k);
      self.os.release(wake);
    }
  }
}

/// Convenience: spin with an adaptive backoff instead of a fixed iteration
/// budget, used by callers that want to degrade to a cooperative yield
/// before falling back to `wait`'s OS path.
pub fn spin_backoff() -> Backoff {
  Backoff::new()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn try_wait_respects_count() {
    let sem = Semaphore::new(2);
    assert!(sem.try_wait());
    assert!(sem.try_wait());
    assert!(!sem.try_wait());
    sem.post();
    assert!(sem.try_wait());
  }

  #[test]
  fn wait_blocks_until_post() {
    let sem = Arc::new(Semaphore::new(0));
    let sem2 = sem.clone();
    let handle = thread::spawn(move || {
      sem2.wait(16);
      42
    });
    thread::sleep(std::time::Duration::from_millis(20));
    sem.post();
    assert_eq!(handle.join().unwrap(), 42);
  }

  #[test]
  fn post_n_wakes_multiple() {
    let sem = Arc::new(Semaphore::new(0));
    let mut handles = Vec::new();
    for _ in 0..4 {
      let sem2 = sem.clone();
      handles.push(thread::spawn(move || sem2.wait(8)));
    }
    thread::sleep(std::time::Duration::from_millis(20));
    sem.post_n(4);
    for h in handles {
      h.join().unwrap();
    }
  }
}
