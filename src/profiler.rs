//! Profiler event sink: an external collaborator the core calls into
//! at a handful of lifecycle points. A no-op stub is the default; an
//! embedding application can install its own with [`set_profiler`]
//! (typically a Concurrency Visualizer / Tracy / perfetto bridge — none
//! of that is this crate's concern).

use once_cell::sync::OnceCell;

use crate::id::TaskId;

/// Lifecycle events the core reports to the profiler sink.
#[derive(Debug, Clone, Copy)]
pub enum Event {
  Defined(TaskId),
  Ready(TaskId),
  Completed(TaskId),
  StealAttempt { victim_pool: u32 },
}

pub trait Profiler: Send + Sync {
  fn event(&self, event: Event);
}

struct NoopProfiler;
impl Profiler for NoopProfiler {
  fn event(&self, _event: Event) {}
}

static PROFILER: OnceCell<Box<dyn Profiler>> = OnceCell::new();

/// Install the process-wide profiler sink. May only be called once; later
/// calls are no-ops (first writer wins), matching the no-op default.
pub fn set_profiler(p: Box<dyn Profiler>) {
  let _ = PROFILER.set(p);
}

pub(crate) fn report(event: Event) {
  if let Some(p) = PROFILER.get() {
    p.event(event);
  }
}
