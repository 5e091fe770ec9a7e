#![forbid(unsafe_code)]

//! Debounce and throttle: derived cells with a scheduler between source
//! changes and downstream notification.
//!
//! ```text
//! source    a b c - - - d - - e - -
//! debounce  - - - - c - - - d - - e      (quiet period elapses)
//!
//! source    a b c d - - - - e - f g -
//! throttle  a - c - d - - - e - f - g    (window = 2 ticks, trailing edge)
//! ```
//!
//! Both operators cancel their pending timer when the derived cell loses its
//! last subscriber, so no task fires after nobody is listening.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cellkit_core::{Scheduler, TimerId, deadline_after};
use tracing::trace;
use web_time::{Duration, Instant};

use super::cell::ReadCell;
use super::derive::UpstreamHandler;

struct ThrottleState<T> {
    last_emit: Option<Instant>,
    pending: Option<TimerId>,
    latest: Option<T>,
}

impl<T: Clone + PartialEq + 'static> ReadCell<T> {
    /// Propagate a source change only after `quiet` has passed without
    /// another one; the latest value wins.
    pub fn debounce(&self, quiet: Duration, scheduler: Rc<dyn Scheduler>) -> ReadCell<T> {
        self.map_with(T::clone, move |target| {
            let pending: Rc<Cell<Option<TimerId>>> = Rc::default();

            let detach_scheduler = Rc::clone(&scheduler);
            let detach_pending = Rc::clone(&pending);
            UpstreamHandler::new(move |next: &T, _| {
                if let Some(id) = pending.take() {
                    scheduler.cancel(id);
                }
                let value = next.clone();
                let target = target.clone();
                let slot = Rc::clone(&pending);
                let id = scheduler.schedule(
                    quiet,
                    Box::new(move || {
                        slot.set(None);
                        trace!("debounce elapsed");
                        target.set(value)
                    }),
                );
                pending.set(Some(id));
                Ok(())
            })
            .on_detach(move || {
                if let Some(id) = detach_pending.take() {
                    detach_scheduler.cancel(id);
                }
            })
        })
    }

    /// Propagate at most one change per `window`. A change inside the window
    /// is held back and the most recent held value is delivered when the
    /// window reopens.
    pub fn throttle(&self, window: Duration, scheduler: Rc<dyn Scheduler>) -> ReadCell<T> {
        self.map_with(T::clone, move |target| {
            let state = Rc::new(RefCell::new(ThrottleState::<T> {
                last_emit: None,
                pending: None,
                latest: None,
            }));

            let detach_scheduler = Rc::clone(&scheduler);
            let detach_state = Rc::clone(&state);
            UpstreamHandler::new(move |next: &T, _| {
                let now = scheduler.now();
                let mut st = state.borrow_mut();
                if st.pending.is_some() {
                    st.latest = Some(next.clone());
                    return Ok(());
                }

                let reopens_at = st.last_emit.map(|at| deadline_after(at, window));
                match reopens_at {
                    Some(at) if at > now => {
                        st.latest = Some(next.clone());
                        let target = target.clone();
                        let task_state = Rc::clone(&state);
                        let id = scheduler.schedule(
                            at - now,
                            Box::new(move || {
                                let value = {
                                    let mut st = task_state.borrow_mut();
                                    st.pending = None;
                                    st.last_emit = Some(at);
                                    st.latest.take()
                                };
                                trace!("throttle window reopened");
                                match value {
                                    Some(value) => target.set(value),
                                    None => Ok(()),
                                }
                            }),
                        );
                        st.pending = Some(id);
                        Ok(())
                    }
                    _ => {
                        st.last_emit = Some(now);
                        drop(st);
                        target.set(next.clone())
                    }
                }
            })
            .on_detach(move || {
                let mut st = detach_state.borrow_mut();
                st.latest = None;
                if let Some(id) = st.pending.take() {
                    detach_scheduler.cancel(id);
                }
            })
        })
    }
}
