#![forbid(unsafe_code)]

//! Revocable handles returned by handler registration.
//!
//! [`Unsubscribe`] is the explicit form: cloneable, idempotent, and inert on
//! drop, so a registration made for its side effect (persistence mirroring,
//! `pipe`) stays alive when the handle is discarded. [`Subscription`] is the
//! RAII form: dropping it revokes the registration.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Revoke = Box<dyn FnOnce()>;

/// Handle that removes exactly one registration when called.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once, from any clone,
/// is a no-op.
#[derive(Clone)]
pub struct Unsubscribe {
    revoke: Rc<RefCell<Option<Revoke>>>,
}

impl Unsubscribe {
    pub fn new(revoke: impl FnOnce() + 'static) -> Self {
        Self {
            revoke: Rc::new(RefCell::new(Some(Box::new(revoke)))),
        }
    }

    /// A handle with nothing to revoke.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            revoke: Rc::new(RefCell::new(None)),
        }
    }

    pub fn unsubscribe(&self) {
        let revoke = self.revoke.borrow_mut().take();
        if let Some(revoke) = revoke {
            revoke();
        }
    }

    /// Whether this handle has not been used yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.revoke.borrow().is_some()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// RAII guard around an [`Unsubscribe`]; the registration is removed when
/// the guard is dropped or [`unsubscribe`](Self::unsubscribe) is called.
#[must_use = "dropping a Subscription immediately unsubscribes it"]
#[derive(Debug)]
pub struct Subscription {
    handle: Option<Unsubscribe>,
}

impl Subscription {
    pub(crate) fn new(handle: Unsubscribe) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn unsubscribe(&self) {
        if let Some(handle) = &self.handle {
            handle.unsubscribe();
        }
    }

    /// Give up the guard and keep the registration alive, returning the
    /// explicit handle instead.
    pub fn into_handle(mut self) -> Unsubscribe {
        self.handle.take().unwrap_or_else(Unsubscribe::noop)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe();
        }
    }
}
