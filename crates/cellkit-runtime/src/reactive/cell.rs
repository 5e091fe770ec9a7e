#![forbid(unsafe_code)]

//! The value cell: current value, ordered handler list, equality-gated
//! mutation.
//!
//! # Design
//!
//! [`ReadCell<T>`] is a cheap, cloneable handle to shared
//! `Rc<CellInner<T>>` storage and carries every read-side operation.
//! [`ValueCell<T>`] wraps a `ReadCell<T>` and adds the mutators; it derefs to
//! its read side. Derived cells are handed out as `ReadCell` only, so callers
//! cannot write to them.
//!
//! # Notification pass
//!
//! 1. The new value is stored, then the handler list is snapshotted.
//! 2. Handlers run in registration order with `(&new, &old)`, where `old` is
//!    the value immediately before this mutation.
//! 3. Handlers registered during the pass are not called in that pass.
//!    Handlers removed during the pass and not yet called are skipped.
//! 4. A handler that mutates the same cell starts a nested pass that runs to
//!    completion before the outer pass continues (depth-first).
//! 5. A handler returning `Err` or panicking ends the pass; later handlers
//!    are not called and the error reaches the mutator.
//!
//! # Invariants
//!
//! 1. Setting a value equal to the current one notifies nobody unless the
//!    write is forced.
//! 2. A cell with an upstream is attached to it exactly while its handler
//!    list is non-empty.
//! 3. Each unsubscribe handle removes only its own registration, even when
//!    the same [`Handler`] is registered more than once.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use cellkit_core::Result;
use tracing::trace;

use super::subscription::{Subscription, Unsubscribe};
use super::upstream::UpstreamLink;

/// A change handler: receives `(new, old)`.
pub type Handler<T> = Rc<dyn Fn(&T, &T) -> Result<()>>;

/// Wrap an infallible closure as a shareable [`Handler`].
pub fn handler<T>(f: impl Fn(&T, &T) + 'static) -> Handler<T> {
    Rc::new(move |new: &T, old: &T| {
        f(new, old);
        Ok(())
    })
}

/// Anything a cell can forward values into.
pub trait SetValue<T> {
    fn set_value(&self, value: T) -> Result<()>;
}

struct Registration<T> {
    id: u64,
    handler: Handler<T>,
    live: Cell<bool>,
    /// Registered by the cell machinery itself (persistence mirror), not a
    /// consumer.
    internal: bool,
}

pub(crate) struct CellInner<T> {
    value: RefCell<T>,
    handlers: RefCell<Vec<Rc<Registration<T>>>>,
    next_id: Cell<u64>,
    key: Option<String>,
    upstream: OnceCell<UpstreamLink>,
    getter: OnceCell<Rc<dyn Fn() -> Option<T>>>,
    setter: OnceCell<Rc<dyn Fn(T) -> Result<()>>>,
}

/// Read side of a cell.
///
/// Cloning creates a new handle to the **same** cell.
pub struct ReadCell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Clone for ReadCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCell")
            .field("key", &self.inner.key)
            .field("value", &*self.inner.value.borrow())
            .field("handlers", &self.inner.handlers.borrow().len())
            .field("upstream", &self.inner.upstream.get())
            .finish()
    }
}

impl<T: 'static> ReadCell<T> {
    pub(crate) fn with_key(value: T, key: Option<String>) -> Self {
        Self {
            inner: Rc::new(CellInner {
                value: RefCell::new(value),
                handlers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                key,
                upstream: OnceCell::new(),
                getter: OnceCell::new(),
                setter: OnceCell::new(),
            }),
        }
    }

    /// Registry key, absent for anonymous and derived cells.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    /// Borrow the current value without cloning.
    ///
    /// # Panics
    ///
    /// Panics if `f` mutates this same cell (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Number of registered handlers, internal ones included.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Number of handlers registered by consumers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .borrow()
            .iter()
            .filter(|reg| !reg.internal)
            .count()
    }

    /// Whether this cell is currently attached to its upstream. Always
    /// `false` for cells without one.
    #[must_use]
    pub fn is_upstream_active(&self) -> bool {
        self.inner.upstream.get().is_some_and(UpstreamLink::is_active)
    }

    /// How many times the upstream has been attached over this cell's life.
    #[must_use]
    pub fn upstream_activations(&self) -> u64 {
        self.inner.upstream.get().map_or(0, UpstreamLink::activations)
    }

    /// Whether two handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn sink(&self) -> CellSink<T> {
        CellSink {
            cell: Rc::downgrade(&self.inner),
        }
    }

    /// Install the upstream link. Only called on freshly built cells.
    ///
    /// While attached, the link holds a strong handle to this cell, so a
    /// subscribed cell stays alive after the caller drops its own handle.
    /// Detaching releases it.
    pub(crate) fn attach_upstream(&self, attach: impl Fn() -> Unsubscribe + 'static) {
        let this = self.sink();
        let link = UpstreamLink::new(move || {
            let keep = this.upgrade();
            let detach = attach();
            Unsubscribe::new(move || {
                detach.unsubscribe();
                drop(keep);
            })
        });
        if self.inner.upstream.set(link).is_err() {
            tracing::warn!("upstream already installed; keeping the first one");
        }
    }

    /// Overwrite the value without notifying anyone.
    pub(crate) fn replace_silently(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
    }

    fn register(&self, handler: Handler<T>, internal: bool) -> Unsubscribe {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let first = {
            let mut handlers = self.inner.handlers.borrow_mut();
            handlers.push(Rc::new(Registration {
                id,
                handler,
                live: Cell::new(true),
                internal,
            }));
            handlers.len() == 1
        };
        if first {
            if let Some(link) = self.inner.upstream.get() {
                link.activate();
            }
        }

        let cell = Rc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = cell.upgrade() {
                ReadCell { inner }.remove_first(|reg| reg.id == id);
            }
        })
    }

    fn remove_first(&self, matches: impl Fn(&Registration<T>) -> bool) {
        let (removed, emptied) = {
            let mut handlers = self.inner.handlers.borrow_mut();
            let Some(pos) = handlers.iter().position(|reg| matches(&**reg)) else {
                return;
            };
            let removed = handlers.remove(pos);
            removed.live.set(false);
            (removed, handlers.is_empty())
        };
        if emptied {
            if let Some(link) = self.inner.upstream.get() {
                link.deactivate();
            }
        }
        // Dropped outside the borrow: the handler may own handles into
        // this cell.
        drop(removed);
    }
}

impl<T: Clone + PartialEq + 'static> ReadCell<T> {
    /// Current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Register an infallible change handler.
    pub fn on(&self, f: impl Fn(&T, &T) + 'static) -> Unsubscribe {
        self.register(handler(f), false)
    }

    /// Register a fallible change handler. An `Err` aborts the pass and is
    /// returned to the mutator.
    pub fn try_on(&self, f: impl Fn(&T, &T) -> Result<()> + 'static) -> Unsubscribe {
        self.register(Rc::new(f), false)
    }

    /// Register a shared handler. Registering the same handler twice
    /// creates two independent entries.
    pub fn on_handler(&self, handler: Handler<T>) -> Unsubscribe {
        self.register(handler, false)
    }

    pub(crate) fn on_internal(&self, f: impl Fn(&T, &T) -> Result<()> + 'static) -> Unsubscribe {
        self.register(Rc::new(f), true)
    }

    /// Remove the first registration of `handler`. Unknown handlers are
    /// ignored.
    pub fn off(&self, handler: &Handler<T>) {
        self.remove_first(|reg| Rc::ptr_eq(&reg.handler, handler));
    }

    /// Register a handler that only wants the new value, guarded by an RAII
    /// [`Subscription`].
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        Subscription::new(self.on(move |new, _| f(new)))
    }

    /// Forward the current value into `target` now and every change after.
    pub fn pipe(&self, target: &(impl SetValue<T> + Clone + 'static)) -> Result<Unsubscribe> {
        target.set_value(self.get())?;
        let target = target.clone();
        Ok(self.try_on(move |new, _| target.set_value(new.clone())))
    }

    /// Memoized zero-argument reader. Yields `None` once the cell is gone.
    pub fn getter(&self) -> Rc<dyn Fn() -> Option<T>> {
        let getter = self.inner.getter.get_or_init(|| {
            let cell = Rc::downgrade(&self.inner);
            Rc::new(move || cell.upgrade().map(|inner| ReadCell { inner }.get()))
        });
        Rc::clone(getter)
    }

    /// Store `value` and run the notification pass. Returns whether the pass
    /// ran.
    pub(crate) fn write(&self, value: T, force: bool) -> Result<bool> {
        let (new, old) = {
            let mut slot = self.inner.value.borrow_mut();
            if !force && *slot == value {
                return Ok(false);
            }
            let old = std::mem::replace(&mut *slot, value);
            (slot.clone(), old)
        };

        let pass: Vec<Rc<Registration<T>>> = self.inner.handlers.borrow().clone();
        trace!(key = ?self.inner.key, handlers = pass.len(), "notify");
        for reg in pass {
            if reg.live.get() {
                (reg.handler)(&new, &old)?;
            }
        }
        Ok(true)
    }
}

/// A writable cell.
///
/// Derefs to [`ReadCell`] for every read-side operation.
pub struct ValueCell<T> {
    cell: ReadCell<T>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Deref for ValueCell<T> {
    type Target = ReadCell<T>;

    fn deref(&self) -> &ReadCell<T> {
        &self.cell
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueCell").field(&self.cell).finish()
    }
}

impl<T: Default + Clone + PartialEq + 'static> Default for ValueCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + 'static> ValueCell<T> {
    /// An anonymous cell.
    pub fn new(value: T) -> Self {
        Self {
            cell: ReadCell::with_key(value, None),
        }
    }

    /// A cell carrying a registry key. Registration itself is done by
    /// [`Registry::register`](crate::reactive::Registry::register) or a
    /// [`CellContext`](crate::context::CellContext).
    pub fn keyed(key: impl Into<String>, value: T) -> Self {
        Self {
            cell: ReadCell::with_key(value, Some(key.into())),
        }
    }

    /// Set the value; equal values are ignored.
    pub fn set(&self, value: T) -> Result<&Self> {
        self.cell.write(value, false)?;
        Ok(self)
    }

    /// Set the value and notify even when it is equal to the current one.
    pub fn set_forced(&self, value: T) -> Result<&Self> {
        self.cell.write(value, true)?;
        Ok(self)
    }

    /// Compute the next value from the current one, then [`set`](Self::set) it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<&Self> {
        let next = self.cell.with(f);
        self.set(next)
    }

    /// Re-run every handler with `new == old == current`.
    pub fn signal(&self) -> Result<&Self> {
        self.set_forced(self.cell.get())
    }

    /// A read-only handle to this cell.
    #[must_use]
    pub fn read_only(&self) -> ReadCell<T> {
        self.cell.clone()
    }

    /// Memoized one-argument writer. A no-op once the cell is gone.
    pub fn setter(&self) -> Rc<dyn Fn(T) -> Result<()>> {
        let setter = self.cell.inner.setter.get_or_init(|| {
            let sink = self.cell.sink();
            Rc::new(move |value| sink.set(value))
        });
        Rc::clone(setter)
    }
}

impl<T: Clone + PartialEq + 'static> SetValue<T> for ValueCell<T> {
    fn set_value(&self, value: T) -> Result<()> {
        self.set(value).map(|_| ())
    }
}

/// Weak write handle given to upstream handlers and custom sources.
///
/// Writes after the cell is dropped are ignored.
pub struct CellSink<T> {
    cell: Weak<CellInner<T>>,
}

impl<T> Clone for CellSink<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for CellSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSink")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T> CellSink<T> {
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }
}

impl<T: 'static> CellSink<T> {
    pub(crate) fn upgrade(&self) -> Option<ReadCell<T>> {
        self.cell.upgrade().map(|inner| ReadCell { inner })
    }
}

impl<T: Clone + PartialEq + 'static> CellSink<T> {
    pub fn set(&self, value: T) -> Result<()> {
        match self.upgrade() {
            Some(cell) => cell.write(value, false).map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn set_forced(&self, value: T) -> Result<()> {
        match self.upgrade() {
            Some(cell) => cell.write(value, true).map(|_| ()),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.upgrade().map(|cell| cell.get())
    }
}

impl<T: Clone + PartialEq + 'static> SetValue<T> for CellSink<T> {
    fn set_value(&self, value: T) -> Result<()> {
        self.set(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellkit_core::CellError;

    type Log<T> = Rc<RefCell<Vec<T>>>;

    fn log<T>() -> Log<T> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(cell: &ReadCell<i32>, into: &Log<(i32, i32)>) -> Unsubscribe {
        let into = Rc::clone(into);
        cell.on(move |new, old| into.borrow_mut().push((*new, *old)))
    }

    #[test]
    fn get_returns_initial_value() {
        let cell = ValueCell::new(7);
        assert_eq!(cell.get(), 7);
        assert_eq!(cell.key(), None);
    }

    #[test]
    fn set_notifies_with_new_and_old() {
        let cell = ValueCell::new(1);
        let seen = log();
        let _off = record(&cell, &seen);

        cell.set(2).unwrap().set(3).unwrap();
        assert_eq!(*seen.borrow(), vec![(2, 1), (3, 2)]);
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn equal_set_is_silent() {
        let cell = ValueCell::new(5);
        let seen = log();
        let _off = record(&cell, &seen);

        cell.set(5).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn forced_set_and_signal_notify_with_same_value() {
        let cell = ValueCell::new(5);
        let seen = log();
        let _off = record(&cell, &seen);

        cell.set_forced(5).unwrap();
        cell.signal().unwrap();
        assert_eq!(*seen.borrow(), vec![(5, 5), (5, 5)]);
    }

    #[test]
    fn update_derives_from_current() {
        let cell = ValueCell::new(10);
        cell.update(|v| v + 1).unwrap();
        assert_eq!(cell.get(), 11);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let cell = ValueCell::new(0);
        let order = log();
        for name in ["h1", "h2", "h3"] {
            let order = Rc::clone(&order);
            cell.on(move |_, _| order.borrow_mut().push(name));
        }
        cell.set(1).unwrap();
        assert_eq!(*order.borrow(), vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn duplicate_handler_fires_twice_and_unsubscribes_separately() {
        let cell = ValueCell::new(0);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let shared = handler(move |_: &i32, _: &i32| counter.set(counter.get() + 1));

        let first = cell.on_handler(Rc::clone(&shared));
        let _second = cell.on_handler(Rc::clone(&shared));
        cell.set(1).unwrap();
        assert_eq!(calls.get(), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(cell.handler_count(), 1);
        cell.set(2).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn off_removes_first_occurrence_only() {
        let cell = ValueCell::new(0);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let shared = handler(move |_: &i32, _: &i32| counter.set(counter.get() + 1));

        cell.on_handler(Rc::clone(&shared));
        cell.on_handler(Rc::clone(&shared));
        cell.off(&shared);
        assert_eq!(cell.handler_count(), 1);

        let stranger = handler(|_: &i32, _: &i32| {});
        cell.off(&stranger);
        assert_eq!(cell.handler_count(), 1);
    }

    #[test]
    fn handler_added_during_pass_waits_for_next_pass() {
        let cell = ValueCell::new(0);
        let late_calls = Rc::new(Cell::new(0));
        let added = Rc::new(Cell::new(false));

        let reader = cell.read_only();
        let late = Rc::clone(&late_calls);
        let flag = Rc::clone(&added);
        cell.on(move |_, _| {
            if !flag.replace(true) {
                let late = Rc::clone(&late);
                reader.on(move |_, _| late.set(late.get() + 1));
            }
        });

        cell.set(1).unwrap();
        assert_eq!(late_calls.get(), 0);
        cell.set(2).unwrap();
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn handler_removed_during_pass_is_skipped() {
        let cell = ValueCell::new(0);
        let second_calls = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Unsubscribe>>> = Rc::default();

        let to_remove = Rc::clone(&victim);
        cell.on(move |_, _| {
            if let Some(off) = to_remove.borrow_mut().take() {
                off.unsubscribe();
            }
        });
        let counter = Rc::clone(&second_calls);
        let off = cell.on(move |_, _| counter.set(counter.get() + 1));
        *victim.borrow_mut() = Some(off);

        cell.set(1).unwrap();
        assert_eq!(second_calls.get(), 0);
        assert_eq!(cell.handler_count(), 1);
    }

    #[test]
    fn nested_set_runs_depth_first() {
        let cell = ValueCell::new(0);
        let seen = log();

        let writer = cell.clone();
        cell.on(move |new, _| {
            if *new == 1 {
                writer.set(2).unwrap();
            }
        });
        let _off = record(&cell, &seen);

        cell.set(1).unwrap();
        // The nested pass (2, 1) completes before the outer pass reaches
        // the second handler with its own pair (1, 0).
        assert_eq!(*seen.borrow(), vec![(2, 1), (1, 0)]);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn failing_handler_stops_pass_and_reaches_mutator() {
        let cell = ValueCell::new(0);
        let later = Rc::new(Cell::new(0));

        cell.try_on(|new, _| {
            if *new < 0 {
                Err(CellError::handler("negative"))
            } else {
                Ok(())
            }
        });
        let counter = Rc::clone(&later);
        cell.on(move |_, _| counter.set(counter.get() + 1));

        let err = cell.set(-1).unwrap_err();
        assert!(matches!(err, CellError::Handler { .. }));
        assert_eq!(later.get(), 0);
        // The value was stored before the pass started.
        assert_eq!(cell.get(), -1);
    }

    #[test]
    fn subscribe_guard_unsubscribes_on_drop() {
        let cell = ValueCell::new(0);
        let seen = log();
        {
            let seen = Rc::clone(&seen);
            let _sub = cell.subscribe(move |v| seen.borrow_mut().push(*v));
            cell.set(1).unwrap();
        }
        cell.set(2).unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(cell.handler_count(), 0);
    }

    #[test]
    fn pipe_forwards_current_then_changes() {
        let source = ValueCell::new(1);
        let target = ValueCell::new(0);

        let off = source.pipe(&target).unwrap();
        assert_eq!(target.get(), 1);

        source.set(4).unwrap();
        assert_eq!(target.get(), 4);

        off.unsubscribe();
        source.set(9).unwrap();
        assert_eq!(target.get(), 4);
    }

    #[test]
    fn getter_and_setter_are_memoized() {
        let cell = ValueCell::new(String::from("a"));
        let g1 = cell.getter();
        let g2 = cell.getter();
        assert!(Rc::ptr_eq(&g1, &g2));
        assert!(Rc::ptr_eq(&cell.setter(), &cell.setter()));

        (cell.setter())("b".into()).unwrap();
        assert_eq!(g1().as_deref(), Some("b"));
    }

    #[test]
    fn getter_and_setter_outlive_cell_quietly() {
        let cell = ValueCell::new(1);
        let getter = cell.getter();
        let setter = cell.setter();
        drop(cell);
        assert_eq!(getter(), None);
        assert!(setter(2).is_ok());
    }

    #[test]
    fn read_only_shares_state() {
        let cell = ValueCell::keyed("count", 1);
        let view = cell.read_only();
        cell.set(2).unwrap();
        assert_eq!(view.get(), 2);
        assert!(view.ptr_eq(&cell));
        assert_eq!(view.key(), Some("count"));
    }

    #[test]
    fn sink_debug_reports_liveness() {
        let cell = ValueCell::new(1);
        let sink = cell.sink();
        assert!(format!("{sink:?}").contains("alive: true"));
        drop(cell);
        assert!(format!("{sink:?}").contains("alive: false"));
        assert!(!sink.is_alive());
    }

    #[test]
    fn debug_format() {
        let cell = ValueCell::keyed("dbg", 42);
        let dbg = format!("{cell:?}");
        assert!(dbg.contains("ValueCell"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("dbg"));
    }
}
