//! Thread-local run context.
//!
//! Explicit context passed to [`ToolBridge::run`](super::ToolBridge::run)
//! always wins. This scope only covers callers that reach the bridge through
//! code that cannot thread a context parameter, such as a planner invoking
//! tools on the worker thread the run was started on.

use orderflow_tools::RunContext;
use std::cell::RefCell;

thread_local! {
    static CURRENT: RefCell<Option<RunContext>> = const { RefCell::new(None) };
}

struct Restore(Option<RunContext>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

/// Run `f` with `ctx` as this thread's current run context.
///
/// The previous context is restored afterwards, even if `f` panics.
pub fn scope<R>(ctx: &RunContext, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|cell| cell.borrow_mut().replace(ctx.clone()));
    let _restore = Restore(previous);
    f()
}

/// This thread's current run context, if inside [`scope`].
#[must_use]
pub fn current() -> Option<RunContext> {
    CURRENT.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_sets_and_restores() {
        assert!(current().is_none());
        let outer = RunContext::new("r1", "c1");
        let inner = RunContext::new("r2", "c2");

        scope(&outer, || {
            assert_eq!(current(), Some(outer.clone()));
            scope(&inner, || assert_eq!(current(), Some(inner.clone())));
            assert_eq!(current(), Some(outer.clone()));
        });
        assert!(current().is_none());
    }

    #[test]
    fn test_scope_is_per_thread() {
        scope(&RunContext::new("r1", "c1"), || {
            let seen = std::thread::spawn(current).join().unwrap();
            assert!(seen.is_none());
        });
    }

    #[test]
    fn test_scope_restores_after_panic() {
        let result = std::panic::catch_unwind(|| {
            scope(&RunContext::new("r1", "c1"), || panic!("boom"));
        });
        assert!(result.is_err());
        assert!(current().is_none());
    }
}
