#![forbid(unsafe_code)]

//! Observable value cells.
//!
//! This module provides the change-tracking primitives:
//!
//! - [`ValueCell`]: a shared, equality-gated value with ordered change
//!   handlers. Derefs to [`ReadCell`], the read-only side.
//! - [`Unsubscribe`] / [`Subscription`]: explicit and RAII revocation of one
//!   handler registration.
//! - [`ReadCell::map`], [`ReadCell::debounce`], [`ReadCell::throttle`]:
//!   derived cells that attach to their source only while observed.
//! - [`ValueCell::persisted`]: hydrate from and mirror into a [`Store`].
//! - [`ReadCell::to_future`]: await the first value passing a filter.
//! - [`Registry`]: key to cell lookup.
//!
//! # Architecture
//!
//! Cells use `Rc<..>` for single-threaded shared ownership. Notification is
//! synchronous; the only waiting happens in the timing operators (through a
//! [`Scheduler`](cellkit_core::Scheduler)) and in [`CellFuture`].
//!
//! # Invariants
//!
//! 1. Handlers are notified in registration order.
//! 2. Setting a value equal to the current value notifies nobody unless the
//!    write is forced.
//! 3. A derived cell is attached to its source exactly while it has at least
//!    one handler; activation and deactivation happen only on the 0 to 1 and
//!    1 to 0 transitions.
//! 4. Unsubscribing is idempotent and removes only its own registration.
//! 5. A nested `set` from inside a handler runs its full pass before the
//!    outer pass continues.
//!
//! [`Store`]: crate::store::Store

pub mod cell;
pub mod derive;
pub mod merge;
pub mod promise;
pub mod registry;
pub mod subscription;

mod persist;
mod timing;
mod upstream;

pub use cell::{CellSink, Handler, ReadCell, SetValue, ValueCell, handler};
pub use derive::UpstreamHandler;
pub use merge::Merge;
pub use promise::CellFuture;
pub use registry::Registry;
pub use subscription::{Subscription, Unsubscribe};
