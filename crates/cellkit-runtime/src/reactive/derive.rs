#![forbid(unsafe_code)]

//! Derived cells: a value computed from a source cell, wired through a
//! lazily activated upstream link.
//!
//! A derived cell subscribes to its source only while it has subscribers of
//! its own. When it re-attaches after a quiet period its value is
//! re-synchronised from the source without notifying, so `get()` never
//! reports a value computed from a source state older than the attachment.
//!
//! An attached derived cell keeps itself alive: `source.map(f).on(h)` keeps
//! delivering to `h` after the temporary handle is gone, until the last
//! handler is removed.

use std::rc::Rc;

use cellkit_core::Result;

use super::cell::{CellSink, Handler, ReadCell};
use super::subscription::Unsubscribe;

/// What a derived cell registers on its source while attached, plus an
/// optional hook run each time it detaches.
pub struct UpstreamHandler<S> {
    handler: Handler<S>,
    on_detach: Option<Rc<dyn Fn()>>,
}

impl<S> UpstreamHandler<S> {
    pub fn new(f: impl Fn(&S, &S) -> Result<()> + 'static) -> Self {
        Self {
            handler: Rc::new(f),
            on_detach: None,
        }
    }

    /// Run `f` every time the derived cell detaches from its source.
    #[must_use]
    pub fn on_detach(mut self, f: impl Fn() + 'static) -> Self {
        self.on_detach = Some(Rc::new(f));
        self
    }
}

impl<T: Clone + PartialEq + 'static> ReadCell<T> {
    /// A read-only cell holding `transform(source)`, recomputed on every
    /// source change while it has subscribers.
    pub fn map<U>(&self, transform: impl Fn(&T) -> U + 'static) -> ReadCell<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let transform = Rc::new(transform);
        let on_change = Rc::clone(&transform);
        self.map_with(
            move |value| transform(value),
            move |target| UpstreamHandler::new(move |new, _| target.set(on_change(new))),
        )
    }

    /// Like [`map`](Self::map), but the code run on each source change is
    /// built by `upstream` from a write handle to the derived cell. Timing
    /// operators use this to put a scheduler between source and target.
    pub fn map_with<U>(
        &self,
        transform: impl Fn(&T) -> U + 'static,
        upstream: impl FnOnce(CellSink<U>) -> UpstreamHandler<T>,
    ) -> ReadCell<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let target = ReadCell::with_key(self.with(&transform), None);
        let UpstreamHandler {
            handler,
            on_detach,
        } = upstream(target.sink());

        let source = self.clone();
        let resync = target.sink();
        target.attach_upstream(move || {
            let off = source.on_handler(Rc::clone(&handler));
            if let Some(cell) = resync.upgrade() {
                cell.replace_silently(source.with(&transform));
            }
            let on_detach = on_detach.clone();
            Unsubscribe::new(move || {
                off.unsubscribe();
                if let Some(hook) = on_detach {
                    hook();
                }
            })
        });
        target
    }

    /// A cell fed by an arbitrary producer.
    ///
    /// `source` is called with a write handle each time the cell gains its
    /// first subscriber and must return the handle that stops production;
    /// that handle is called when the last subscriber leaves.
    pub fn from_source(
        initial: T,
        source: impl Fn(CellSink<T>) -> Unsubscribe + 'static,
    ) -> ReadCell<T> {
        let cell = ReadCell::with_key(initial, None);
        let sink = cell.sink();
        cell.attach_upstream(move || source(sink.clone()));
        cell
    }
}
