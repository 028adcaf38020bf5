use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::machine::bindings::Env;
use crate::machine::machine_errors::Exception;
use crate::machine::Machine;

/// A continuation: the remainder of the computation after a goal succeeds.
pub type Cont = Rc<dyn Fn(&mut Machine, &Env) -> Promise>;

/// A delayed computation producing a promise.
pub type PromiseFn = Rc<dyn Fn(&mut Machine) -> Promise>;

/// A recovery function consulted while an exception unwinds. Returning a
/// promise resumes there; returning `None` keeps unwinding.
pub type RecoverFn = Box<dyn FnMut(&mut Machine, &Exception) -> Option<Promise>>;

type NextFn = Box<dyn FnMut() -> Option<PromiseFn>>;

/// A delayed execution that results in `(bool, error)`: one node of the
/// resolution search tree. Promises are driven by an explicit stack, one
/// expansion per tick, so a query is a single cooperative loop.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    /// Delayed execution with multiple choices; `None` once terminal.
    delayed: Option<NextFn>,
    ok: bool,
    err: Option<Exception>,
    /// When set, reaching this promise discards stacked choices up to and
    /// including the parent.
    cut_parent: Option<Promise>,
    repeat: bool,
    recover: Option<RecoverFn>,
}

impl Inner {
    fn terminal(ok: bool, err: Option<Exception>) -> Inner {
        Inner {
            delayed: None,
            ok,
            err,
            cut_parent: None,
            repeat: false,
            recover: None,
        }
    }

    fn delayed(next: NextFn) -> Inner {
        Inner {
            delayed: Some(next),
            ok: false,
            err: None,
            cut_parent: None,
            repeat: false,
            recover: None,
        }
    }
}

fn next_fn_of(fns: Vec<PromiseFn>) -> NextFn {
    let mut queue: VecDeque<PromiseFn> = fns.into();
    Box::new(move || queue.pop_front())
}

impl Promise {
    fn from_inner(inner: Inner) -> Promise {
        Promise {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// A terminal promise that simply yields `ok`.
    pub fn bool(ok: bool) -> Promise {
        Promise::from_inner(Inner::terminal(ok, None))
    }

    /// A terminal promise carrying an exception.
    pub fn error(err: Exception) -> Promise {
        Promise::from_inner(Inner::terminal(false, Some(err)))
    }

    /// Delays the execution of the given alternatives, tried left to right.
    /// Prefer [`Promise::delay_seq`] for large or unbounded sequences.
    pub fn delay(fns: Vec<PromiseFn>) -> Promise {
        Promise::from_inner(Inner::delayed(next_fn_of(fns)))
    }

    /// Delays a lazily generated sequence of alternatives.
    pub fn delay_seq(next: NextFn) -> Promise {
        Promise::from_inner(Inner::delayed(next))
    }

    /// A promise that, once reached, discards every stacked choice up to
    /// and including `parent` and continues with `k`. Without a parent the
    /// cut prunes the entire stack.
    pub fn cut(parent: Option<Promise>, k: PromiseFn) -> Promise {
        let parent = parent.unwrap_or_else(|| Promise::bool(false));
        let mut inner = Inner::delayed(next_fn_of(vec![k]));
        inner.cut_parent = Some(parent);
        Promise::from_inner(inner)
    }

    /// A promise that re-enters `k` indefinitely.
    pub fn repeat(k: PromiseFn) -> Promise {
        let mut inner = Inner::delayed(next_fn_of(vec![k]));
        inner.repeat = true;
        Promise::from_inner(inner)
    }

    /// A promise with a recovery function: once a descendant results in an
    /// exception, the error unwinds through ancestors looking for a
    /// recovery that returns a promise to continue on.
    pub fn catch(recover: RecoverFn, k: PromiseFn) -> Promise {
        let mut inner = Inner::delayed(next_fn_of(vec![k]));
        inner.recover = Some(recover);
        Promise::from_inner(inner)
    }

    /// An empty delayed promise whose children are supplied afterwards,
    /// used where the children must capture the promise itself as their
    /// cut barrier.
    pub(crate) fn pending() -> Promise {
        Promise::from_inner(Inner::delayed(Box::new(|| None)))
    }

    pub(crate) fn set_delayed(&self, next: NextFn) {
        self.inner.borrow_mut().delayed = Some(next);
    }

    /// Enforces the delayed execution and returns the first result.
    pub fn force(self, machine: &mut Machine) -> Result<bool, Exception> {
        let mut stack = vec![self];
        drive(&mut stack, machine)
    }

    /// Produces the next child promise, or `None` when exhausted. A panic
    /// inside the child becomes a `panic_error` promise and never crosses
    /// the trampoline.
    fn child(&self, machine: &mut Machine) -> Option<Promise> {
        let next = {
            let mut inner = self.inner.borrow_mut();
            let next = (inner.delayed.as_mut().expect("caller checked delayed"))();
            match next {
                Some(f) => f,
                None => {
                    inner.delayed = None;
                    return None;
                }
            }
        };

        let promise = match catch_unwind(AssertUnwindSafe(|| next(machine))) {
            Ok(p) => p,
            Err(payload) => Promise::error(panic_exception(payload)),
        };

        let mut inner = self.inner.borrow_mut();
        if inner.repeat {
            inner.delayed = Some(next_fn_of(vec![next]));
        }

        Some(promise)
    }
}

fn panic_exception(payload: Box<dyn std::any::Any + Send>) -> Exception {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };
    Exception::panic_error(&msg)
}

/// The trampoline: pops one promise per tick and either reports its
/// terminal value or expands it. `stack` retains the remaining choice
/// points when `Ok(true)` is returned, so driving can resume for further
/// solutions. The machine's cancellation flag is polled once per tick.
pub(crate) fn drive(stack: &mut Vec<Promise>, machine: &mut Machine) -> Result<bool, Exception> {
    while let Some(p) = stack.pop() {
        if machine.is_cancelled() {
            return Err(Exception::cancelled());
        }

        let is_terminal = p.inner.borrow().delayed.is_none();
        if is_terminal {
            let (ok, err) = {
                let inner = p.inner.borrow();
                (inner.ok, inner.err.clone())
            };

            if let Some(err) = err {
                recover_on_stack(stack, machine, err)?;
                continue;
            }
            if ok {
                return Ok(true);
            }
            continue;
        }

        let parent = p.inner.borrow_mut().cut_parent.take();
        if let Some(parent) = parent {
            pop_until(stack, &parent);
        }

        match p.child(machine) {
            Some(q) => {
                stack.push(p);
                stack.push(q);
            }
            None => stack.push(p),
        }
    }

    Ok(false)
}

fn pop_until(stack: &mut Vec<Promise>, parent: &Promise) {
    while let Some(p) = stack.pop() {
        if Rc::ptr_eq(&p.inner, &parent.inner) {
            break;
        }
    }
}

/// Walks the remaining ancestors for a recovery function applicable to the
/// error; pushes the recovery continuation when one accepts it, otherwise
/// reports the error unhandled.
fn recover_on_stack(
    stack: &mut Vec<Promise>,
    machine: &mut Machine,
    err: Exception,
) -> Result<(), Exception> {
    while let Some(p) = stack.pop() {
        if p.inner.borrow().recover.is_none() {
            continue;
        }

        let mut recover = p.inner.borrow_mut().recover.take();
        let resumed = recover.as_mut().expect("checked above")(machine, &err);
        p.inner.borrow_mut().recover = recover;

        if let Some(q) = resumed {
            stack.push(q);
            return Ok(());
        }
    }

    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom_table::*;
    use crate::machine::MachineBuilder;

    fn leaf(ok: bool) -> PromiseFn {
        Rc::new(move |_: &mut Machine| Promise::bool(ok))
    }

    #[test]
    fn terminal_values() {
        let mut m = MachineBuilder::default().build();

        assert_eq!(Promise::bool(true).force(&mut m), Ok(true));
        assert_eq!(Promise::bool(false).force(&mut m), Ok(false));
    }

    #[test]
    fn delayed_children_are_tried_left_to_right() {
        let mut m = MachineBuilder::default().build();

        let p = Promise::delay(vec![leaf(false), leaf(true)]);
        assert_eq!(p.force(&mut m), Ok(true));

        let p = Promise::delay(vec![leaf(false), leaf(false)]);
        assert_eq!(p.force(&mut m), Ok(false));
    }

    #[test]
    fn cut_discards_alternatives() {
        let mut m = MachineBuilder::default().build();

        // barrier offers a success alternative; the first child cuts to the
        // barrier and then fails, so the alternative must not run.
        let barrier = Promise::pending();
        let b = barrier.clone();
        barrier.set_delayed(Box::new({
            let mut fns: VecDeque<PromiseFn> = VecDeque::new();
            fns.push_back(Rc::new(move |_: &mut Machine| {
                Promise::cut(Some(b.clone()), leaf(false))
            }) as PromiseFn);
            fns.push_back(leaf(true));
            move || fns.pop_front()
        }));

        assert_eq!(barrier.force(&mut m), Ok(false));
    }

    #[test]
    fn catch_recovers_matching_errors() {
        let mut m = MachineBuilder::default().build();

        let thrown = Exception::panic_error("boom");
        let p = Promise::catch(
            Box::new(move |_: &mut Machine, _e: &Exception| Some(Promise::bool(true))),
            {
                let thrown = thrown.clone();
                Rc::new(move |_: &mut Machine| Promise::error(thrown.clone()))
            },
        );
        assert_eq!(p.force(&mut m), Ok(true));
    }

    #[test]
    fn unmatched_errors_keep_unwinding() {
        let mut m = MachineBuilder::default().build();

        let thrown = Exception::panic_error("boom");
        let expected = thrown.clone();
        let p = Promise::catch(
            Box::new(move |_: &mut Machine, _e: &Exception| None),
            Rc::new(move |_: &mut Machine| Promise::error(thrown.clone())),
        );
        assert_eq!(p.force(&mut m), Err(expected));
    }

    #[test]
    fn panics_become_panic_error_exceptions() {
        let mut m = MachineBuilder::default().build();

        let p = Promise::delay(vec![Rc::new(|_: &mut Machine| -> Promise {
            panic!("native predicate exploded")
        }) as PromiseFn]);

        match p.force(&mut m) {
            Err(e) => {
                let t = e.term();
                assert_eq!(t.functor(), Some(atom!("error")));
                assert_eq!(
                    t.arg(0).unwrap().functor(),
                    Some(atom!("panic_error"))
                );
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn repeat_reenters_its_child() {
        let mut m = MachineBuilder::default().build();

        // the repeat child fails each time; a counter stops the test after
        // a few iterations by succeeding.
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let p = Promise::repeat(Rc::new(move |_: &mut Machine| {
            let mut n = c.borrow_mut();
            *n += 1;
            Promise::bool(*n >= 5)
        }));

        assert_eq!(p.force(&mut m), Ok(true));
        assert_eq!(*count.borrow(), 5);
    }
}
