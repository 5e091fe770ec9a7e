#![forbid(unsafe_code)]

//! Shared foundations for cellkit: the error type, clocks, and the
//! cooperative timer queue that drives the timing operators.

pub mod clock;
pub mod error;
pub mod timer;

pub use clock::{LabClock, TimeSource};
pub use error::{CellError, Result};
pub use timer::{Scheduler, Task, TimerId, TimerQueue, deadline_after};
