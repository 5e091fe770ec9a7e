#![forbid(unsafe_code)]

//! cellkit public facade crate.
//!
//! This crate provides the stable surface area for users: observable value
//! cells, derivations, timing operators, persistence and the promise bridge.

pub use cellkit_core::{CellError, LabClock, Result, Scheduler, TimeSource, TimerId, TimerQueue};
pub use cellkit_runtime::{
    CellConfig, CellContext, CellFuture, MemoryStore, Merge, NullStore, ReadCell, Registry,
    Store, Subscription, Unsubscribe, ValueCell,
};

pub mod prelude {
    pub use cellkit_core as core;
    pub use cellkit_runtime as runtime;

    pub use cellkit_core::{CellError, Result, Scheduler, TimerQueue};
    pub use cellkit_runtime::{
        CellContext, Merge, ReadCell, Store, Subscription, Unsubscribe, ValueCell,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::rc::Rc;

    #[test]
    fn prelude_covers_the_consumer_surface() {
        let ctx = CellContext::in_memory(Rc::new(TimerQueue::system()));
        let count: ValueCell<i32> = ctx.cell("count", 1).unwrap();
        let doubled: ReadCell<i32> = count.map(|n| n * 2);
        let _sub = doubled.subscribe(|_| {});

        count.update(|n| n + 1).unwrap();
        assert_eq!(doubled.get(), 4);
    }
}
