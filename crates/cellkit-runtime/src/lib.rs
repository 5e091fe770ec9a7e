#![forbid(unsafe_code)]

//! Observable value cells for cellkit.
//!
//! The [`reactive`] module holds the cell types and their operators;
//! [`store`] is the durable-store contract used by persisted cells;
//! [`context`] wires registry, store, scheduler and [`CellConfig`] together.

pub mod config;
pub mod context;
pub mod reactive;
pub mod store;

pub use config::CellConfig;
pub use context::CellContext;
pub use reactive::{
    CellFuture, CellSink, Handler, Merge, ReadCell, Registry, SetValue, Subscription, Unsubscribe,
    UpstreamHandler, ValueCell, handler,
};
pub use store::{MemoryStore, NullStore, Store};
