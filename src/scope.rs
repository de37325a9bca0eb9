//! Scoped resources and non-local exit.
//!
//! Every thread carries a registry of *disposables*: cleanup actions
//! stacked in acquisition order. [`Disposable::dispose`] unwinds the
//! registry from the top down to the disposable's own mark, running each
//! pending cleanup: LIFO release, resilient to re-entry (a cleanup may
//! itself secure or dispose other entries).
//!
//! [`recover`] layers non-local exit on top: it arms a recovery context,
//! and [`RecoverCtx::panic`] drains the registry down to that context's
//! mark before unwinding back to the `recover` call. Anything acquired and
//! secured inside the recovered region is released, in reverse order, no
//! matter how deep the exit started.
//!
//! Registry and context stack are thread-local; independent threads have
//! independent stacks.
//!
//! # Example
//!
//! ```
//! use cinder_rt::scope::{recover, Disposable};
//!
//! let outcome: Result<(), _> = recover(|ctx| {
//!     let temp_file = Disposable::new(|| { /* remove the file */ });
//!     temp_file.secure();
//!     // ... work that may bail ...
//!     ctx.panic()
//! });
//! assert!(outcome.is_err()); // temp_file's cleanup already ran
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// A cleanup action, taken out of its cell exactly once.
type DisposeFn = Cell<Option<Box<dyn FnOnce()>>>;

/// Mark value of a disposable that is not in the registry.
const UNSECURED: usize = usize::MAX;

thread_local! {
    /// The per-thread disposable registry. `None` entries are gaps left by
    /// `unsecure`.
    static REGISTRY: RefCell<Vec<Option<Rc<DisposeFn>>>> = const { RefCell::new(Vec::new()) };

    /// Armed recovery contexts, innermost last.
    static CONTEXTS: RefCell<Vec<RecoverCtx>> = const { RefCell::new(Vec::new()) };

    /// Per-thread token source for recovery contexts.
    static NEXT_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Runs a registry entry's cleanup, if it has not run yet.
fn run(func: &Rc<DisposeFn>) {
    if let Some(f) = func.take() {
        f();
    }
}

/// Pops and runs registry entries until the registry is `mark` long.
///
/// Entries are invoked outside the registry borrow: a cleanup may secure
/// new disposables (they are drained too; they sit above `mark`) or
/// dispose deeper ones (the loop re-reads the length every iteration).
fn drain_to(mark: usize) {
    loop {
        let top = REGISTRY.with(|r| {
            let mut registry = r.borrow_mut();
            if registry.len() > mark {
                Some(registry.pop().unwrap_or(None))
            } else {
                None
            }
        });
        match top {
            Some(Some(func)) => run(&func),
            Some(None) => {} // gap left by unsecure
            None => break,
        }
    }
}

/// Current length of this thread's disposable registry.
#[must_use]
pub fn depth() -> usize {
    REGISTRY.with(|r| r.borrow().len())
}

/// A scoped resource: a cleanup action plus its registry mark.
///
/// A disposable starts out *unsecured*: it owns its cleanup and nothing
/// else knows about it. [`secure`](Disposable::secure) registers it with
/// the thread's registry so that disposing any earlier entry (or a
/// [`RecoverCtx::panic`]) releases it; [`unsecure`](Disposable::unsecure)
/// takes it back out, transferring ownership of the resource back to the
/// caller.
pub struct Disposable {
    mark: Cell<usize>,
    func: Rc<DisposeFn>,
}

impl Disposable {
    /// Creates an unsecured disposable wrapping `f`.
    #[must_use]
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            mark: Cell::new(UNSECURED),
            func: Rc::new(Cell::new(Some(Box::new(f)))),
        }
    }

    /// True if this disposable currently occupies its registry slot.
    #[must_use]
    pub fn is_secured(&self) -> bool {
        let mark = self.mark.get();
        if mark == UNSECURED {
            return false;
        }
        REGISTRY.with(|r| {
            r.borrow()
                .get(mark)
                .and_then(Option::as_ref)
                .is_some_and(|entry| Rc::ptr_eq(entry, &self.func))
        })
    }

    /// Registers this disposable at the top of the registry.
    ///
    /// Idempotent: securing an already-secured disposable is a no-op.
    pub fn secure(&self) {
        if self.is_secured() {
            return;
        }
        let mark = REGISTRY.with(|r| {
            let mut registry = r.borrow_mut();
            registry.push(Some(Rc::clone(&self.func)));
            registry.len() - 1
        });
        self.mark.set(mark);
    }

    /// Removes this disposable from the registry without running it.
    ///
    /// Ownership of the underlying resource returns to the caller; the
    /// cleanup will only run through an explicit [`dispose`](Self::dispose).
    pub fn unsecure(&self) {
        if self.is_secured() {
            REGISTRY.with(|r| {
                let mut registry = r.borrow_mut();
                registry[self.mark.get()] = None;
                while registry.last().is_some_and(Option::is_none) {
                    registry.pop();
                }
            });
        }
        self.mark.set(UNSECURED);
    }

    /// Runs this disposable's cleanup.
    ///
    /// If secured, the registry is first unwound from the top down to and
    /// including this disposable's mark, running every pending entry in
    /// reverse acquisition order. If unsecured, only this cleanup runs.
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.is_secured() {
            drain_to(self.mark.get());
        }
        run(&self.func);
        self.mark.set(UNSECURED);
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("mark", &self.mark.get())
            .field("secured", &self.is_secured())
            .finish()
    }
}

/// The error returned by [`recover`] when its context panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panicked;

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recovered from panic")
    }
}

impl std::error::Error for Panicked {}

/// Unwind payload carrying the target context's token.
struct Bail {
    token: u64,
}

struct CtxInner {
    token: u64,
    guard: Disposable,
}

/// Handle to an armed recovery context.
///
/// Cheaply cloneable; clones refer to the same context. A context is only
/// meaningful while its [`recover`] call is on the stack.
#[derive(Clone)]
pub struct RecoverCtx {
    inner: Rc<CtxInner>,
}

impl RecoverCtx {
    /// True while the matching [`recover`] call is still on the stack.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        CONTEXTS.with(|c| {
            c.borrow()
                .iter()
                .any(|ctx| Rc::ptr_eq(&ctx.inner, &self.inner))
        })
    }

    /// Unwinds to this context.
    ///
    /// First drains the disposable registry down to (and including) the
    /// context's mark, releasing everything acquired since `recover`
    /// armed it, in reverse order; then transfers control back to the
    /// `recover` call, which returns `Err(Panicked)`.
    ///
    /// # Panics
    ///
    /// Panics (in the ordinary Rust sense) if the context is no longer
    /// armed: escaping to a dead context is a contract violation.
    pub fn panic(&self) -> ! {
        assert!(
            self.is_armed(),
            "panic on a recovery context that is no longer armed"
        );
        self.inner.guard.dispose();
        // resume_unwind (rather than panic_any) skips the panic hook: this
        // is control flow, not a programmer error to report.
        resume_unwind(Box::new(Bail {
            token: self.inner.token,
        }))
    }
}

impl fmt::Debug for RecoverCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverCtx")
            .field("token", &self.inner.token)
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Innermost armed recovery context of this thread, if any.
#[must_use]
pub fn current() -> Option<RecoverCtx> {
    CONTEXTS.with(|c| c.borrow().last().cloned())
}

/// Runs `f` under a recovery context.
///
/// The context is installed, secured as a disposable, and armed in one
/// step; `f` receives a handle it may pass down or stash for
/// [`RecoverCtx::panic`]. Returns `Ok` with `f`'s value on normal
/// completion, `Err(Panicked)` when the context was panicked to. Panics
/// aimed at *other* contexts (and genuine Rust panics) continue unwinding
/// past this call.
pub fn recover<T>(f: impl FnOnce(&RecoverCtx) -> T) -> Result<T, Panicked> {
    let token = NEXT_TOKEN.with(|t| {
        let token = t.get();
        t.set(token + 1);
        token
    });
    let ctx = RecoverCtx {
        inner: Rc::new(CtxInner {
            token,
            guard: Disposable::new(|| {}),
        }),
    };
    ctx.inner.guard.secure();
    CONTEXTS.with(|c| c.borrow_mut().push(ctx.clone()));

    let result = catch_unwind(AssertUnwindSafe(|| f(&ctx)));

    CONTEXTS.with(|c| {
        c.borrow_mut().pop();
    });
    match result {
        Ok(value) => {
            ctx.inner.guard.unsecure();
            Ok(value)
        }
        Err(payload) => match payload.downcast::<Bail>() {
            Ok(bail) if bail.token == token => Err(Panicked),
            Ok(bail) => {
                ctx.inner.guard.unsecure();
                resume_unwind(bail)
            }
            Err(other) => {
                ctx.inner.guard.unsecure();
                resume_unwind(other)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_runs_in_reverse_acquisition_order() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = |tag: &'static str| {
            let order = Rc::clone(&order);
            move || order.borrow_mut().push(tag)
        };

        let a = Disposable::new(log("a"));
        let b = Disposable::new(log("b"));
        let c = Disposable::new(log("c"));
        a.secure();
        b.secure();
        c.secure();

        a.dispose();
        assert_eq!(*order.borrow(), ["c", "b", "a"]);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn unsecure_leaves_a_gap_that_dispose_skips() {
        let ran = Rc::new(Cell::new(false));

        let a = Disposable::new(|| {});
        let b = Disposable::new(|| {});
        let c = Disposable::new({
            let ran = Rc::clone(&ran);
            move || ran.set(true)
        });
        a.secure();
        b.secure();
        c.secure();

        b.unsecure();
        assert!(!b.is_secured());

        a.dispose();
        assert!(ran.get());
        assert_eq!(depth(), 0);

        // b's cleanup is back in the caller's hands.
        b.dispose();
    }

    #[test]
    fn secure_is_idempotent() {
        let a = Disposable::new(|| {});
        a.secure();
        let before = depth();
        a.secure();
        assert_eq!(depth(), before);
        a.dispose();
    }

    #[test]
    fn dispose_is_idempotent() {
        let count = Rc::new(Cell::new(0));
        let a = Disposable::new({
            let count = Rc::clone(&count);
            move || count.set(count.get() + 1)
        });
        a.secure();
        a.dispose();
        a.dispose();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn reentrant_dispose_from_a_cleanup() {
        // c's cleanup disposes a mid-drain; the drain must notice the
        // registry already shrank below its mark.
        let order = Rc::new(RefCell::new(Vec::new()));

        let a = Rc::new(Disposable::new({
            let order = Rc::clone(&order);
            move || order.borrow_mut().push("a")
        }));
        let b = Disposable::new({
            let order = Rc::clone(&order);
            move || order.borrow_mut().push("b")
        });
        let c = Disposable::new({
            let order = Rc::clone(&order);
            let a = Rc::clone(&a);
            move || {
                order.borrow_mut().push("c");
                a.dispose();
            }
        });

        a.secure();
        b.secure();
        c.secure();

        c.dispose();
        assert_eq!(*order.borrow(), ["c", "b", "a"]);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn recover_ok_path_unwinds_nothing() {
        let ran = Rc::new(Cell::new(false));
        let keep = Disposable::new({
            let ran = Rc::clone(&ran);
            move || ran.set(true)
        });
        keep.secure();
        let before = depth();

        let value = recover(|_| 42).unwrap();
        assert_eq!(value, 42);
        assert_eq!(depth(), before);
        assert!(!ran.get());

        keep.dispose();
    }

    #[test]
    fn panic_drains_to_the_context_mark() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = |tag: &'static str, order: &Rc<RefCell<Vec<&'static str>>>| {
            let order = Rc::clone(order);
            move || order.borrow_mut().push(tag)
        };

        let outer = Disposable::new(log("outer", &order));
        outer.secure();
        let before = depth();

        let result: Result<(), Panicked> = recover(|ctx| {
            let inner = Disposable::new(log("inner", &order));
            inner.secure();
            ctx.panic()
        });

        assert_eq!(result, Err(Panicked));
        assert_eq!(*order.borrow(), ["inner"]);
        assert_eq!(depth(), before);

        outer.dispose();
        assert_eq!(*order.borrow(), ["inner", "outer"]);
    }

    #[test]
    fn panic_skips_inner_contexts_to_reach_an_outer_one() {
        let result: Result<(), Panicked> = recover(|outer| {
            let inner: Result<(), Panicked> = recover(|_| outer.panic());
            // Unreachable: the outer panic must not be caught here.
            let _ = inner;
            unreachable!("outer panic was caught by the inner context");
        });
        assert_eq!(result, Err(Panicked));
    }

    #[test]
    fn genuine_panics_pass_through() {
        let caught = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), Panicked> = recover(|_| panic!("boom"));
        }));
        assert!(caught.is_err());
        // The context guard must not linger in the registry.
        assert_eq!(depth(), 0);
    }

    #[test]
    fn current_tracks_the_innermost_context() {
        assert!(current().is_none());
        let _ = recover(|outer| {
            assert!(current().is_some());
            let _ = recover(|inner| {
                assert!(Rc::ptr_eq(
                    &current().unwrap().inner,
                    &inner.inner
                ));
            });
            assert!(Rc::ptr_eq(&current().unwrap().inner, &outer.inner));
        });
        assert!(current().is_none());
    }
}
