#![forbid(unsafe_code)]

//! Lazy attachment of a cell to an external producer.
//!
//! An [`UpstreamLink`] owns a deferred `attach` function. The owning cell
//! calls [`activate`](UpstreamLink::activate) when its handler list goes from
//! empty to non-empty and [`deactivate`](UpstreamLink::deactivate) when it
//! goes back to empty. The link never attaches on its own.
//!
//! # Invariants
//!
//! 1. `attach` runs only on an `Inactive -> Active` transition; repeated
//!    activation requests while active are ignored.
//! 2. The detach handle returned by `attach` is called exactly once per
//!    activation.
//! 3. Requests arriving while `attach` itself is running (a source that
//!    subscribes, then immediately unsubscribes) are folded in: the final
//!    state matches the last request.
//! 4. Dropping an active link detaches it. A cell's own link never drops
//!    while active: the attached state holds a handle to the cell.

use std::cell::{Cell, RefCell};
use std::fmt;

use tracing::debug;

use super::subscription::Unsubscribe;

enum LinkState {
    Inactive,
    /// `attach` is on the stack. `keep` records the latest request.
    Activating {
        keep: bool,
    },
    Active(Unsubscribe),
}

pub(crate) struct UpstreamLink {
    attach: Box<dyn Fn() -> Unsubscribe>,
    state: RefCell<LinkState>,
    activations: Cell<u64>,
}

impl UpstreamLink {
    pub(crate) fn new(attach: impl Fn() -> Unsubscribe + 'static) -> Self {
        Self {
            attach: Box::new(attach),
            state: RefCell::new(LinkState::Inactive),
            activations: Cell::new(0),
        }
    }

    pub(crate) fn activate(&self) {
        {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                LinkState::Inactive => *state = LinkState::Activating { keep: true },
                LinkState::Activating { keep } => {
                    *keep = true;
                    return;
                }
                LinkState::Active(_) => return,
            }
        }

        self.activations.set(self.activations.get() + 1);
        debug!(activation = self.activations.get(), "upstream activated");
        let detach = (self.attach)();

        let keep = {
            let mut state = self.state.borrow_mut();
            let keep = matches!(*state, LinkState::Activating { keep: true });
            *state = if keep {
                LinkState::Active(detach.clone())
            } else {
                LinkState::Inactive
            };
            keep
        };
        if !keep {
            debug!("upstream released during activation");
            detach.unsubscribe();
        }
    }

    pub(crate) fn deactivate(&self) {
        let previous = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                LinkState::Inactive => return,
                LinkState::Activating { keep } => {
                    *keep = false;
                    return;
                }
                LinkState::Active(_) => std::mem::replace(&mut *state, LinkState::Inactive),
            }
        };
        if let LinkState::Active(detach) = previous {
            debug!("upstream deactivated");
            detach.unsubscribe();
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(*self.state.borrow(), LinkState::Active(_))
    }

    /// How many times `attach` has run.
    pub(crate) fn activations(&self) -> u64 {
        self.activations.get()
    }
}

impl fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("active", &self.is_active())
            .field("activations", &self.activations.get())
            .finish()
    }
}

impl Drop for UpstreamLink {
    fn drop(&mut self) {
        if let LinkState::Active(detach) =
            std::mem::replace(self.state.get_mut(), LinkState::Inactive)
        {
            detach.unsubscribe();
        }
    }
}
