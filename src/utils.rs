use std::panic::{self, AssertUnwindSafe};

/// Run `f`, aborting the process instead of unwinding if it panics.
///
/// Worker threads run task entry functions supplied by the application;
/// a panic crossing back into the scheduler's own bookkeeping would leave
/// permit graphs and free-lists half-updated, so it is better to die loudly.
pub fn abort_on_panic<F: FnOnce() -> R, R>(f: F) -> R {
  match panic::catch_unwind(AssertUnwindSafe(f)) {
    Ok(r) => r,
    Err(_) => std::process::abort(),
  }
}
