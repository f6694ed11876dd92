//! The OO-style `Future` (§4.9): a JS-Promise-like handle with explicit
//! `done`/`fail`/`cancel` resolution and `then`/`catch`/`finally`
//! combinators. Deliberately not `std::future::Future` — nothing here is
//! polled; callbacks fire synchronously, on whichever thread calls
//! `done`/`fail`/`cancel`, which in this crate is always the reactor
//! thread (see [`pool::Pool::process_ready`]).

pub mod pool;

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::Error;

/// Terminal or pending state of a [`Future`].
enum State<T> {
    Pending,
    Done(T),
    Failed(Error),
    Cancelled,
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "Pending"),
            State::Done(_) => write!(f, "Done"),
            State::Failed(e) => write!(f, "Failed({e})"),
            State::Cancelled => write!(f, "Cancelled"),
        }
    }
}

type DoneCb<T> = Box<dyn FnOnce(&T) + Send>;
type FailCb = Box<dyn FnOnce(&Error) + Send>;
type ReadyCb = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    state: State<T>,
    on_done: Vec<DoneCb<T>>,
    on_fail: Vec<FailCb>,
    on_ready: Vec<ReadyCb>,
}

impl<T> Default for Inner<T> {
    fn default() -> Inner<T> {
        Inner {
            state: State::Pending,
            on_done: Vec::new(),
            on_fail: Vec::new(),
            on_ready: Vec::new(),
        }
    }
}

/// A handle to a value that will become available later. Cloning shares
/// the same underlying state (cheap `Arc` clone), matching the
/// single-object Promise-like semantics in §4.9.
pub struct Future<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Future<T> {
        Future {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    pub fn new() -> Future<T> {
        Future {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Builds a future already resolved with `value` (§4.9).
    pub fn new_done(value: T) -> Future<T> {
        let future = Future::new();
        future.done(value);
        future
    }

    /// Builds a future already resolved with failure `err` (§4.9).
    pub fn new_fail(err: Error) -> Future<T> {
        let future = Future::new();
        future.fail(err);
        future
    }

    /// Resolves the future successfully. A no-op if already resolved
    /// (§4.9: terminal states are sticky).
    pub fn done(&self, value: T) {
        let (done_cbs, ready_cbs) = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = State::Done(value);
            (
                std::mem::take(&mut inner.on_done),
                std::mem::take(&mut inner.on_ready),
            )
        };
        let value = self.result().unwrap();
        for cb in done_cbs {
            cb(&value);
        }
        for cb in ready_cbs {
            cb();
        }
    }

    /// Resolves the future with a failure. A no-op if already resolved.
    pub fn fail(&self, err: Error) {
        let (fail_cbs, ready_cbs) = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = State::Failed(err);
            (
                std::mem::take(&mut inner.on_fail),
                std::mem::take(&mut inner.on_ready),
            )
        };
        let err_for_cbs = self.failure_ref_or_default();
        for cb in fail_cbs {
            cb(&err_for_cbs);
        }
        for cb in ready_cbs {
            cb();
        }
    }

    /// Cancels the future. A no-op if already resolved.
    pub fn cancel(&self) {
        let ready_cbs = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = State::Cancelled;
            std::mem::take(&mut inner.on_ready)
        };
        for cb in ready_cbs {
            cb();
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self.inner.lock().unwrap().state, State::Pending)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Cancelled)
    }

    /// The resolved value, if the future completed successfully.
    pub fn result(&self) -> Option<T> {
        match &self.inner.lock().unwrap().state {
            State::Done(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn failure_ref_or_default(&self) -> Error {
        match &self.inner.lock().unwrap().state {
            State::Failed(e) => Error::with(e.kind(), e.to_string()),
            _ => Error::with(crate::error::Kind::HandlerFailure, "no failure recorded"),
        }
    }

    /// The failure, if the future completed with an error. Returns a
    /// fresh [`Error`] carrying the same kind and message (errors aren't
    /// `Clone`; see `error.rs`).
    pub fn failure(&self) -> Option<Error> {
        if self.is_failed() {
            Some(self.failure_ref_or_default())
        } else {
            None
        }
    }

    /// Registers a callback for successful completion. Runs immediately,
    /// inline, if the future is already done.
    pub fn on_done(&self, cb: impl FnOnce(&T) + Send + 'static) {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Done(v) => {
                let v = v.clone();
                drop(inner);
                cb(&v);
            }
            State::Pending => inner.on_done.push(Box::new(cb)),
            _ => {}
        }
    }

    pub fn on_fail(&self, cb: impl FnOnce(&Error) + Send + 'static) {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Failed(e) => {
                let e = Error::with(e.kind(), e.to_string());
                drop(inner);
                cb(&e);
            }
            State::Pending => inner.on_fail.push(Box::new(cb)),
            _ => {}
        }
    }

    /// Registers a callback invoked on any terminal transition
    /// (done, fail, or cancel) — the `finally` primitive.
    pub fn on_ready(&self, cb: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, State::Pending) {
            inner.on_ready.push(Box::new(cb));
        } else {
            drop(inner);
            cb();
        }
    }

    /// Maps a successful value through `f` into a new future; failures
    /// and cancellation pass through unchanged.
    pub fn then<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Future::new();
        let next_done = next.clone();
        let next_fail = next.clone();
        let next_cancel = next.clone();
        self.on_done(move |v| next_done.done(f(v.clone())));
        self.on_fail(move |e| next_fail.fail(Error::with(e.kind(), e.to_string())));
        self.on_ready(move || next_cancel.cancel_if_still_pending());
        next
    }

    /// Recovers a failure into a value through `f`; a successful value
    /// passes through unchanged.
    pub fn catch<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(&Error) -> T + Send + 'static,
    {
        let next = Future::new();
        let next_done = next.clone();
        self.on_done(move |v| next_done.done(v.clone()));
        self.on_fail(move |e| next.done(f(e)));
        next_done
    }

    /// Runs `f` on any terminal transition, passing the original outcome
    /// through to the returned future unchanged.
    pub fn finally<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let next = Future::new();
        let next_done = next.clone();
        let next_fail = next.clone();
        let next_cancel = next.clone();
        self.on_done(move |v| next_done.done(v.clone()));
        self.on_fail(move |e| next_fail.fail(Error::with(e.kind(), e.to_string())));
        self.on_ready(move || {
            f();
            next_cancel.cancel_if_still_pending();
        });
        next
    }

    fn cancel_if_still_pending(&self) {
        if self.is_ready() {
            return;
        }
        self.cancel();
    }
}

/// Resolves once every future in `futures` has completed successfully, in
/// the same order; fails (with the first observed error) as soon as any
/// member fails. An empty input resolves immediately with an empty vec.
pub fn needs_all<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    let out = Future::new();
    if futures.is_empty() {
        out.done(Vec::new());
        return out;
    }
    let total = futures.len();
    let results: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new(vec![None; total]));
    let remaining = Arc::new(Mutex::new(total));

    for (idx, f) in futures.into_iter().enumerate() {
        let results = results.clone();
        let remaining = remaining.clone();
        let out_done = out.clone();
        let out_fail = out.clone();
        f.on_done(move |v| {
            results.lock().unwrap()[idx] = Some(v.clone());
            let mut left = remaining.lock().unwrap();
            *left -= 1;
            if *left == 0 {
                let values = results
                    .lock()
                    .unwrap()
                    .iter()
                    .cloned()
                    .map(|v| v.expect("all slots filled"))
                    .collect();
                out_done.done(values);
            }
        });
        f.on_fail(move |e| out_fail.fail(Error::with(e.kind(), e.to_string())));
    }
    out
}

/// Resolves or fails with whichever future in `futures` completes first.
/// Per the documented open-question decision (§9), `needs_any(&[])` stays
/// permanently pending — there is no well-defined "first of none".
pub fn needs_any<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<T> {
    let out = Future::new();
    for f in futures {
        let out_done = out.clone();
        let out_fail = out.clone();
        f.on_done(move |v| out_done.done(v.clone()));
        f.on_fail(move |e| out_fail.fail(Error::with(e.kind(), e.to_string())));
    }
    out
}

/// Alias for [`needs_all`] (§4.9 names both `needs_all` and `wait_all` for
/// the same join-all operation).
pub fn wait_all<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    needs_all(futures)
}

/// Alias for [`needs_any`] (§4.9 names both `needs_any` and `wait_any` for
/// the same race-first operation).
pub fn wait_any<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<T> {
    needs_any(futures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn done_resolves_and_is_sticky() {
        let f: Future<i32> = Future::new();
        f.done(1);
        f.done(2);
        assert_eq!(f.result(), Some(1));
        assert!(f.is_done());
    }

    #[test]
    fn on_done_after_completion_runs_immediately() {
        let f: Future<i32> = Future::new();
        f.done(7);
        let seen = Arc::new(Mutex::new(0));
        let seen2 = seen.clone();
        f.on_done(move |v| *seen2.lock().unwrap() = *v);
        assert_eq!(*seen.lock().unwrap(), 7);
    }

    #[test]
    fn then_maps_value() {
        let f: Future<i32> = Future::new();
        let mapped = f.then(|v| v * 2);
        f.done(5);
        assert_eq!(mapped.result(), Some(10));
    }

    #[test]
    fn catch_recovers_failure() {
        let f: Future<i32> = Future::new();
        let recovered = f.catch(|_e| -1);
        f.fail(Error::parse("boom"));
        assert_eq!(recovered.result(), Some(-1));
    }

    #[test]
    fn finally_runs_on_cancel() {
        let f: Future<i32> = Future::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let _g = f.finally(move || ran2.store(true, Ordering::SeqCst));
        f.cancel();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn needs_all_collects_in_order() {
        let a: Future<i32> = Future::new();
        let b: Future<i32> = Future::new();
        let joined = needs_all(vec![a.clone(), b.clone()]);
        b.done(2);
        assert!(joined.result().is_none());
        a.done(1);
        assert_eq!(joined.result(), Some(vec![1, 2]));
    }

    #[test]
    fn new_done_and_new_fail_start_already_resolved() {
        let done: Future<i32> = Future::new_done(5);
        assert_eq!(done.result(), Some(5));

        let failed: Future<i32> = Future::new_fail(Error::parse("boom"));
        assert!(failed.is_failed());
    }

    #[test]
    fn wait_all_and_wait_any_are_aliases() {
        let a: Future<i32> = Future::new();
        let b: Future<i32> = Future::new();
        let joined = wait_all(vec![a.clone(), b.clone()]);
        a.done(1);
        b.done(2);
        assert_eq!(joined.result(), Some(vec![1, 2]));

        let c: Future<i32> = Future::new();
        let d: Future<i32> = Future::new();
        let raced = wait_any(vec![c.clone(), d.clone()]);
        d.done(9);
        assert_eq!(raced.result(), Some(9));
    }

    #[test]
    fn needs_all_of_empty_resolves_immediately() {
        let joined: Future<Vec<i32>> = needs_all(Vec::new());
        assert_eq!(joined.result(), Some(Vec::new()));
    }

    #[test]
    fn needs_any_of_empty_stays_pending() {
        let joined: Future<i32> = needs_any(Vec::new());
        assert!(!joined.is_ready());
    }

    #[test]
    fn needs_any_takes_first_winner() {
        let a: Future<i32> = Future::new();
        let b: Future<i32> = Future::new();
        let joined = needs_any(vec![a.clone(), b.clone()]);
        b.done(99);
        a.done(1);
        assert_eq!(joined.result(), Some(99));
    }
}
