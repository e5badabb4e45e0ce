//! Running the decision core with or without suspension.
//!
//! Decision logic is written once as `async fn`s taking an [`ExecutionMode`]. Suspending callers
//! simply `.await` them. Immediate callers poll them once: in immediate mode the core never
//! awaits anything external (CMAB rules and async profile stores are skipped), so the first poll
//! always completes.
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// How a decision call may wait on external interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Complete without waiting. Steps requiring an asynchronous collaborator are skipped.
    Immediate,
    /// Suspend at CMAB fetches and async profile store calls.
    Suspending,
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Poll `future` once. Returns `None` if it did not complete.
pub(crate) fn poll_once<F: Future>(future: F) -> Option<F::Output> {
    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(output) => Some(output),
        Poll::Pending => None,
    }
}

/// Run an immediate-mode decision, falling back to `fallback` if it unexpectedly tried to wait.
pub(crate) fn run_immediate<F: Future>(future: F, fallback: impl FnOnce() -> F::Output) -> F::Output {
    poll_once(future).unwrap_or_else(|| {
        log::error!(target: "decision_engine", "immediate decision tried to suspend, returning fallback");
        fallback()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_futures_complete() {
        assert_eq!(poll_once(async { 1 + 1 }), Some(2));
    }

    #[test]
    fn pending_futures_fall_back() {
        assert_eq!(poll_once(std::future::pending::<u32>()), None);
        assert_eq!(run_immediate(std::future::pending::<u32>(), || 7), 7);
    }
}
