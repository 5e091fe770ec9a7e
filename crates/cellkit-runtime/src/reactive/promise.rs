#![forbid(unsafe_code)]

//! Promise bridge: a future that resolves once with the first value that
//! passes a filter.
//!
//! If the current value already passes, the future is ready immediately and
//! nothing is registered. Otherwise a handler is registered that removes
//! itself on the first qualifying notification, so the future can never be
//! fed twice and no registration is left behind. Dropping an unresolved
//! future removes the registration too.
//!
//! Awaiting a derived cell keeps it attached until the future resolves or is
//! dropped, even if no other handle to the cell remains.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use cellkit_core::{CellError, Result};
use futures_channel::oneshot;

use super::cell::ReadCell;
use super::subscription::Unsubscribe;

enum Pending<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<T>),
}

/// Future returned by [`ReadCell::to_future`].
///
/// Resolves to [`CellError::Dropped`] if the cell goes away first.
#[must_use = "futures do nothing unless polled"]
pub struct CellFuture<T> {
    state: Pending<T>,
    registration: Option<Unsubscribe>,
}

// The value is only ever moved out, never pinned in place.
impl<T> Unpin for CellFuture<T> {}

impl<T> CellFuture<T> {
    fn ready(value: T) -> Self {
        Self {
            state: Pending::Ready(Some(value)),
            registration: None,
        }
    }

    fn waiting(rx: oneshot::Receiver<T>, registration: Unsubscribe) -> Self {
        Self {
            state: Pending::Waiting(rx),
            registration: Some(registration),
        }
    }
}

impl<T> Drop for CellFuture<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.unsubscribe();
        }
    }
}

impl<T> Future for CellFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            Pending::Ready(value) => Poll::Ready(value.take().ok_or(CellError::Dropped)),
            Pending::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.map_err(|_| CellError::Dropped)),
        }
    }
}

impl<T: Clone + PartialEq + 'static> ReadCell<T> {
    /// Resolve with the first value (current or future) accepted by
    /// `filter`.
    pub fn to_future(&self, filter: impl Fn(&T) -> bool + 'static) -> CellFuture<T> {
        if self.with(&filter) {
            return CellFuture::ready(self.get());
        }

        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let own: Rc<RefCell<Option<Unsubscribe>>> = Rc::default();

        let handler_tx = Rc::clone(&tx);
        let handler_own = Rc::clone(&own);
        let off = self.on(move |next, _| {
            if !filter(next) {
                return;
            }
            let Some(tx) = handler_tx.borrow_mut().take() else {
                return;
            };
            let off = handler_own.borrow_mut().take();
            if let Some(off) = off {
                off.unsubscribe();
            }
            // The receiver may already be gone; nobody is waiting then.
            let _ = tx.send(next.clone());
        });

        // Registering can attach an upstream that delivers synchronously, in
        // which case the handler already fired before `off` existed.
        if tx.borrow().is_none() {
            off.unsubscribe();
        } else {
            *own.borrow_mut() = Some(off.clone());
        }
        CellFuture::waiting(rx, off)
    }
}

impl<U: Clone + PartialEq + 'static> ReadCell<Option<U>> {
    /// Resolve with the first `Some` value.
    pub fn to_future_some(&self) -> impl Future<Output = Result<U>> + use<U> {
        let pending = self.to_future(Option::is_some);
        async move { pending.await?.ok_or(CellError::Dropped) }
    }
}
