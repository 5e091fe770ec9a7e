#![forbid(unsafe_code)]

//! Deferred execution for the timing operators.
//!
//! The reactive layer never blocks. Debounce and throttle hand their
//! deferred work to a [`Scheduler`], and the host event loop decides when
//! that work runs. [`TimerQueue`] is the single-threaded implementation used
//! both in production (system clock) and in tests (lab clock).
//!
//! # Ordering
//!
//! Tasks fire in deadline order. Tasks sharing a deadline fire in the order
//! they were scheduled.
//!
//! # Failure Modes
//!
//! - **Task returns `Err`**: the drain stops at that task and the error is
//!   returned to whoever is driving the queue. Later due tasks stay queued
//!   and run on the next drain.
//! - **Task panics**: the panic unwinds through the driver. The task has
//!   already been removed from the queue.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use tracing::trace;
use web_time::{Duration, Instant};

use crate::clock::{LabClock, TimeSource};
use crate::error::Result;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// Handle to a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// `now + delay`, clamped to the latest representable instant instead of
/// panicking on overflow. A task scheduled that far out never fires in
/// practice.
#[must_use]
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    if let Some(at) = now.checked_add(delay) {
        return at;
    }
    let mut at = now;
    let mut step = delay;
    while !step.is_zero() {
        match at.checked_add(step) {
            Some(next) => at = next,
            None => step /= 2,
        }
    }
    at
}

/// The deferred-execution primitive consumed by timing operators.
pub trait Scheduler {
    /// Current time as seen by this scheduler.
    fn now(&self) -> Instant;

    /// Run `task` once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending task. Returns `false` if it already ran or was
    /// already cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    tasks: BTreeMap<(Instant, u64), Task>,
    deadlines: HashMap<u64, Instant>,
}

impl QueueState {
    fn pop_due(&mut self, now: Instant) -> Option<(u64, Task)> {
        let key = *self.tasks.keys().next()?;
        if key.0 > now {
            return None;
        }
        let task = self.tasks.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((key.1, task))
    }
}

/// Cooperative, single-threaded timer queue.
pub struct TimerQueue {
    time: TimeSource,
    state: RefCell<QueueState>,
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TimerQueue")
            .field("time", &self.time)
            .field("pending", &state.tasks.len())
            .finish()
    }
}

impl TimerQueue {
    /// A queue driven by the system clock.
    #[must_use]
    pub fn system() -> Self {
        Self::with_time_source(TimeSource::System)
    }

    /// A queue driven by a [`LabClock`].
    #[must_use]
    pub fn lab(clock: &LabClock) -> Self {
        Self::with_time_source(TimeSource::Lab(clock.clone()))
    }

    #[must_use]
    pub fn with_time_source(time: TimeSource) -> Self {
        Self {
            time,
            state: RefCell::new(QueueState::default()),
        }
    }

    /// Number of tasks still waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    /// Deadline of the earliest pending task.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.borrow().tasks.keys().next().map(|(at, _)| *at)
    }

    /// Run every task whose deadline has passed, including tasks scheduled
    /// by those tasks if they are already due. Returns how many ran.
    pub fn run_due(&self) -> Result<usize> {
        let mut ran = 0;
        loop {
            let now = self.time.now();
            // The borrow must end before the task runs: tasks schedule and
            // cancel on this same queue.
            let next = self.state.borrow_mut().pop_due(now);
            let Some((id, task)) = next else {
                break;
            };
            trace!(timer_id = id, "timer fired");
            ran += 1;
            task()?;
        }
        Ok(ran)
    }

    /// Let `delta` elapse and run everything that falls due on the way.
    ///
    /// With a lab clock the clock is stepped to each deadline in turn, so a
    /// task observes `now()` equal to its own deadline. With the system clock
    /// this sleeps for `delta` and then drains.
    pub fn advance(&self, delta: Duration) -> Result<usize> {
        match &self.time {
            TimeSource::Lab(clock) => {
                let target = deadline_after(clock.now(), delta);
                let mut ran = 0;
                while let Some(deadline) = self.next_deadline() {
                    if deadline > target {
                        break;
                    }
                    clock.advance_to(deadline);
                    ran += self.run_due()?;
                }
                clock.advance_to(target);
                Ok(ran)
            }
            TimeSource::System => {
                std::thread::sleep(delta);
                self.run_due()
            }
        }
    }

    /// Run tasks until the queue is empty.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut ran = 0;
        while let Some(deadline) = self.next_deadline() {
            match &self.time {
                TimeSource::Lab(clock) => clock.advance_to(deadline),
                TimeSource::System => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                }
            }
            ran += self.run_due()?;
        }
        Ok(ran)
    }
}

impl Scheduler for TimerQueue {
    fn now(&self) -> Instant {
        self.time.now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let deadline = deadline_after(self.time.now(), delay);
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        match state.deadlines.remove(&id.0) {
            Some(deadline) => state.tasks.remove(&(deadline, id.0)).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CellError;
    use std::rc::Rc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recorder() -> Rc<RefCell<Vec<(u64, &'static str)>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn fires_in_deadline_then_insertion_order() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        let log = recorder();

        for (delay, name) in [(30, "c"), (10, "a"), (10, "b")] {
            let log = Rc::clone(&log);
            let clock = clock.clone();
            queue.schedule(
                ms(delay),
                Box::new(move || {
                    log.borrow_mut()
                        .push((clock.elapsed().as_millis() as u64, name));
                    Ok(())
                }),
            );
        }

        assert_eq!(queue.advance(ms(100)).unwrap(), 3);
        assert_eq!(*log.borrow(), vec![(10, "a"), (10, "b"), (30, "c")]);
        assert_eq!(clock.elapsed(), ms(100));
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        queue.schedule(ms(50), Box::new(|| Ok(())));

        assert_eq!(queue.advance(ms(49)).unwrap(), 0);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.advance(ms(1)).unwrap(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn cancel_removes_task_once() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        let id = queue.schedule(ms(5), Box::new(|| Err(CellError::handler("ran"))));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert_eq!(queue.advance(ms(10)).unwrap(), 0);
    }

    #[test]
    fn nested_schedule_lands_at_exact_instant() {
        let clock = LabClock::new();
        let queue = Rc::new(TimerQueue::lab(&clock));
        let log = recorder();

        let inner_queue = Rc::clone(&queue);
        let inner_log = Rc::clone(&log);
        let inner_clock = clock.clone();
        queue.schedule(
            ms(10),
            Box::new(move || {
                let log = Rc::clone(&inner_log);
                let clock = inner_clock.clone();
                inner_queue.schedule(
                    ms(15),
                    Box::new(move || {
                        log.borrow_mut()
                            .push((clock.elapsed().as_millis() as u64, "nested"));
                        Ok(())
                    }),
                );
                Ok(())
            }),
        );

        assert_eq!(queue.advance(ms(40)).unwrap(), 2);
        assert_eq!(*log.borrow(), vec![(25, "nested")]);
    }

    #[test]
    fn failing_task_stops_drain() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        let log = recorder();

        queue.schedule(ms(1), Box::new(|| Err(CellError::handler("first"))));
        let later = Rc::clone(&log);
        queue.schedule(
            ms(1),
            Box::new(move || {
                later.borrow_mut().push((1, "second"));
                Ok(())
            }),
        );

        clock.advance(ms(1));
        assert!(matches!(queue.run_due(), Err(CellError::Handler { .. })));
        assert!(log.borrow().is_empty());
        assert_eq!(queue.run_due().unwrap(), 1);
        assert_eq!(*log.borrow(), vec![(1, "second")]);
    }

    #[test]
    fn run_until_idle_jumps_lab_clock() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        queue.schedule(ms(250), Box::new(|| Ok(())));
        queue.schedule(ms(1000), Box::new(|| Ok(())));

        assert_eq!(queue.run_until_idle().unwrap(), 2);
        assert_eq!(clock.elapsed(), ms(1000));
        assert!(queue.next_deadline().is_none());
    }

    proptest::proptest! {
        #[test]
        fn fire_order_is_stable_sort_of_delays(delays in proptest::collection::vec(0u64..50, 1..40)) {
            let clock = LabClock::new();
            let queue = TimerQueue::lab(&clock);
            let fired = Rc::new(RefCell::new(Vec::new()));

            for (index, delay) in delays.iter().enumerate() {
                let fired = Rc::clone(&fired);
                queue.schedule(ms(*delay), Box::new(move || {
                    fired.borrow_mut().push(index);
                    Ok(())
                }));
            }
            queue.run_until_idle().unwrap();

            let mut expected: Vec<usize> = (0..delays.len()).collect();
            expected.sort_by_key(|&i| delays[i]);
            proptest::prop_assert_eq!(&*fired.borrow(), &expected);
        }
    }

    #[test]
    fn huge_delay_saturates_instead_of_panicking() {
        let clock = LabClock::new();
        let queue = TimerQueue::lab(&clock);
        let now = queue.now();
        assert!(deadline_after(now, Duration::MAX) > now);
        assert_eq!(deadline_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));

        queue.schedule(Duration::MAX, Box::new(|| Ok(())));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.advance(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn system_queue_runs_zero_delay_task() {
        let queue = TimerQueue::system();
        queue.schedule(Duration::ZERO, Box::new(|| Ok(())));
        assert_eq!(queue.run_until_idle().unwrap(), 1);
    }
}
