//! Steal-notification bus: pools publish "I have ready work", idle
//! workers block waiting for any publish. Built directly on [`Mpmc`] (of
//! pool indices) and [`Semaphore`].

use crate::mpmc::Mpmc;
use crate::sem::Semaphore;

pub struct StealBus {
  queue: Mpmc,
  sem: Semaphore,
}

impl StealBus {
  pub fn new(capacity: usize) -> StealBus {
    StealBus {
      queue: Mpmc::new(capacity.next_power_of_two().max(2)),
      sem: Semaphore::new(0),
    }
  }

  /// Publish that `pool_index` has ready work. On a full notification
  /// queue the notification is silently dropped: it only costs latency,
  /// never correctness, since workers also poll on wakeup.
  pub fn notify(&self, pool_index: u32) {
    if self.queue.push(pool_index) {
      self.sem.post();
    }
  }

  /// Block (spinning up to `spin` times first) until some pool publishes,
  /// then return its index. The caller must be prepared to see its own
  /// index (retry in that case) and to observe spurious wakeups.
  pub fn wait_for_work(&self, spin: u32) -> Option<u32> {
    self.sem.wait(spin);
    self.queue.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn notify_then_wait_delivers_index() {
    let bus = Arc::new(StealBus::new(8));
    let bus2 = bus.clone();
    let handle = thread::spawn(move || bus2.wait_for_work(64));
    thread::sleep(std::time::Duration::from_millis(10));
    bus.notify(3);
    assert_eq!(handle.join().unwrap(), Some(3));
  }

  #[test]
  fn overflow_is_dropped_not_fatal() {
    let bus = StealBus::new(2);
    for i in 0..2 {
      bus.notify(i);
    }
    // queue full now; this notify is silently dropped.
    bus.notify(99);
    assert_eq!(bus.queue.take(), Some(0));
    assert_eq!(bus.queue.take(), Some(1));
    assert_eq!(bus.queue.take(), None);
  }
}
