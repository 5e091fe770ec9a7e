#![forbid(unsafe_code)]

//! Key to cell lookup table.
//!
//! A registry is an ordinary value: clone it to share one table, build a new
//! one to get an isolated table (each test gets its own). It holds strong
//! handles, so a registered cell lives at least as long as its entry.
//!
//! Removal is refused while the cell still has consumer subscribers, so
//! removing an entry can never strand a derived cell's upstream link.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use cellkit_core::{CellError, Result};
use tracing::debug;

use super::cell::ValueCell;

trait RegisteredCell {
    fn as_any(&self) -> &dyn Any;
    fn subscriber_count(&self) -> usize;
}

impl<T: 'static> RegisteredCell for ValueCell<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}

/// Shared table of keyed cells.
#[derive(Clone, Default)]
pub struct Registry {
    cells: Rc<RefCell<BTreeMap<String, Rc<dyn RegisteredCell>>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cell` under its key, replacing any earlier entry. Anonymous
    /// cells are ignored.
    pub fn register<T: 'static>(&self, cell: &ValueCell<T>) {
        let Some(key) = cell.key() else {
            debug!("anonymous cell not registered");
            return;
        };
        let previous = self
            .cells
            .borrow_mut()
            .insert(key.to_owned(), Rc::new(cell.clone()));
        if previous.is_some() {
            debug!(key, "registry entry replaced");
        } else {
            debug!(key, "registry entry added");
        }
    }

    /// The cell registered under `key`, if any.
    ///
    /// Fails with [`CellError::RegistryType`] when the entry holds a
    /// different value type.
    pub fn get<T: 'static>(&self, key: &str) -> Result<Option<ValueCell<T>>> {
        let cells = self.cells.borrow();
        let Some(entry) = cells.get(key) else {
            return Ok(None);
        };
        entry
            .as_any()
            .downcast_ref::<ValueCell<T>>()
            .cloned()
            .map(Some)
            .ok_or_else(|| CellError::RegistryType {
                key: key.to_owned(),
            })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.cells.borrow().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.cells.borrow().keys().cloned().collect()
    }

    /// Drop the entry for `key`. Returns whether an entry existed.
    ///
    /// Fails with [`CellError::RegistryBusy`] while the cell has consumer
    /// subscribers; the entry is left in place.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = {
            let mut cells = self.cells.borrow_mut();
            let Some(entry) = cells.get(key) else {
                return Ok(false);
            };
            let subscribers = entry.subscriber_count();
            if subscribers > 0 {
                return Err(CellError::RegistryBusy {
                    key: key.to_owned(),
                    subscribers,
                });
            }
            cells.remove(key)
        };
        // The last strong handle may go here; keep that outside the borrow.
        drop(removed);
        debug!(key, "registry entry removed");
        Ok(true)
    }
}
