#![forbid(unsafe_code)]

//! Explicit context for keyed cells.
//!
//! A [`CellContext`] carries everything a keyed or persisted cell needs: the
//! registry used for singleton lookup, the durable store, the scheduler for
//! timing operators and the [`CellConfig`]. Components that share state take
//! a context (or a clone of one) instead of reaching for a global table.
//!
//! ```
//! use std::rc::Rc;
//! use cellkit_core::TimerQueue;
//! use cellkit_runtime::CellContext;
//!
//! let ctx = CellContext::in_memory(Rc::new(TimerQueue::system()));
//! let route = ctx.cell("route", String::from("/")).unwrap();
//! let same = ctx.cell("route", String::from("ignored")).unwrap();
//! assert!(route.ptr_eq(&same));
//! ```

use std::fmt;
use std::rc::Rc;

use cellkit_core::{Result, Scheduler};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CellConfig;
use crate::reactive::{Registry, ValueCell};
use crate::store::{MemoryStore, Store};

/// Registry, store, scheduler and configuration for a group of cells.
#[derive(Clone)]
pub struct CellContext {
    registry: Registry,
    store: Rc<dyn Store>,
    scheduler: Rc<dyn Scheduler>,
    config: CellConfig,
}

impl fmt::Debug for CellContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CellContext {
    /// A context with a fresh registry and default configuration.
    pub fn new(store: Rc<dyn Store>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            registry: Registry::new(),
            store,
            scheduler,
            config: CellConfig::default(),
        }
    }

    /// A context backed by a fresh [`MemoryStore`].
    pub fn in_memory(scheduler: Rc<dyn Scheduler>) -> Self {
        Self::new(Rc::new(MemoryStore::new()), scheduler)
    }

    #[must_use]
    pub fn with_config(mut self, config: CellConfig) -> Self {
        self.config = config;
        self
    }

    /// Share `registry` with other contexts.
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> Rc<dyn Store> {
        Rc::clone(&self.store)
    }

    /// The scheduler to hand to [`debounce`](crate::reactive::ReadCell::debounce)
    /// and [`throttle`](crate::reactive::ReadCell::throttle).
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.scheduler)
    }

    #[must_use]
    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    /// The cell registered under `key`, if any.
    pub fn get<T: 'static>(&self, key: &str) -> Result<Option<ValueCell<T>>> {
        self.registry.get(key)
    }

    /// The cell registered under `key`, or a new one holding `init`.
    ///
    /// `init` is ignored when the cell already exists.
    pub fn cell<T>(&self, key: impl Into<String>, init: T) -> Result<ValueCell<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        let key = key.into();
        if let Some(existing) = self.registry.get(&key)? {
            return Ok(existing);
        }
        let cell = ValueCell::keyed(key, init);
        self.registry.register(&cell);
        Ok(cell)
    }

    /// The persisted cell registered under `key`, or a new one hydrated from
    /// the store with `default` as fallback.
    pub fn persisted<T>(&self, key: impl Into<String>, default: T) -> Result<ValueCell<T>>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        self.persisted_with(key, default, |_| true)
    }

    /// Like [`persisted`](Self::persisted), with a validity check on the
    /// stored value.
    pub fn persisted_with<T>(
        &self,
        key: impl Into<String>,
        default: T,
        validate: impl Fn(&T) -> bool,
    ) -> Result<ValueCell<T>>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        let key = key.into();
        if let Some(existing) = self.registry.get(&key)? {
            return Ok(existing);
        }
        let cell =
            ValueCell::persisted_with(key, default, self.store(), &self.config, validate)?;
        self.registry.register(&cell);
        Ok(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellkit_core::{CellError, LabClock, TimerQueue};
    use web_time::Duration;

    fn lab_context() -> (Rc<TimerQueue>, CellContext) {
        let queue = Rc::new(TimerQueue::lab(&LabClock::new()));
        let ctx = CellContext::in_memory(queue.clone());
        (queue, ctx)
    }

    #[test]
    fn cell_is_a_singleton_per_key() {
        let (_, ctx) = lab_context();
        let a = ctx.cell("n", 1).unwrap();
        let b = ctx.cell("n", 99).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(b.get(), 1);
        assert_eq!(a.key(), Some("n"));
    }

    #[test]
    fn contexts_do_not_share_state_by_default() {
        let (_, first) = lab_context();
        let (_, second) = lab_context();
        first.cell("n", 1).unwrap();
        assert!(second.get::<i32>("n").unwrap().is_none());
    }

    #[test]
    fn shared_registry_is_visible_across_contexts() {
        let (_, first) = lab_context();
        let (_, second) = lab_context();
        let second = second.with_registry(first.registry().clone());
        let a = first.cell("n", 1).unwrap();
        assert!(second.get::<i32>("n").unwrap().unwrap().ptr_eq(&a));
    }

    #[test]
    fn type_mismatch_surfaces() {
        let (_, ctx) = lab_context();
        ctx.cell("n", 1u32).unwrap();
        assert!(matches!(
            ctx.cell("n", String::new()),
            Err(CellError::RegistryType { .. })
        ));
    }

    #[test]
    fn persisted_cells_use_configured_prefix() {
        let (_, ctx) = lab_context();
        let ctx = ctx.with_config(CellConfig::default().with_key_prefix("app_"));
        let theme = ctx.persisted("theme", String::from("light")).unwrap();
        theme.set("dark".into()).unwrap();
        assert_eq!(ctx.store().get_item("app_theme").as_deref(), Some(r#""dark""#));

        let again = ctx.persisted("theme", String::from("light")).unwrap();
        assert!(again.ptr_eq(&theme));
    }

    #[test]
    fn scheduler_drives_timing_operators() {
        let (queue, ctx) = lab_context();
        let query = ctx.cell("query", String::new()).unwrap();
        let settled = query.debounce(Duration::from_millis(100), ctx.scheduler());
        let _sub = settled.subscribe(|_| {});

        query.set("rust".into()).unwrap();
        assert_eq!(settled.get(), "");
        queue.advance(Duration::from_millis(100)).unwrap();
        assert_eq!(settled.get(), "rust");
    }
}
