#![forbid(unsafe_code)]

//! Persistence adapter: hydrate a keyed cell from a durable store and mirror
//! every later change back into it as JSON.
//!
//! # Failure Modes
//!
//! - **Stored text does not parse, or fails the validity check**: logged at
//!   `WARN`, the caller's default is used, construction proceeds.
//! - **Value cannot be serialized on write**: [`CellError::Serialize`] is
//!   returned to the mutator. The in-memory value has already changed, so
//!   memory and store disagree until the next successful write.
//! - **Store rejects the write**: the store's error is returned to the
//!   mutator, same divergence as above.
//!
//! The mirror is registered before any consumer handler, so a failed write
//! also stops the rest of that notification pass.

use std::rc::Rc;

use cellkit_core::{CellError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::cell::ValueCell;
use crate::config::CellConfig;
use crate::store::Store;

impl<T> ValueCell<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    /// A keyed cell hydrated from `store` and written back on every change.
    pub fn persisted(
        key: impl Into<String>,
        default: T,
        store: Rc<dyn Store>,
        config: &CellConfig,
    ) -> Result<Self> {
        Self::persisted_with(key, default, store, config, |_| true)
    }

    /// Like [`persisted`](Self::persisted), but a stored value is used only
    /// if `validate` accepts it.
    pub fn persisted_with(
        key: impl Into<String>,
        default: T,
        store: Rc<dyn Store>,
        config: &CellConfig,
        validate: impl Fn(&T) -> bool,
    ) -> Result<Self> {
        let key = key.into();
        let storage_key = config.storage_key(&key);
        let initial = hydrate(store.as_ref(), &key, &storage_key, &validate).unwrap_or(default);

        let cell = ValueCell::keyed(key.clone(), initial);
        if config.persist_on_hydrate {
            cell.with(|value| write_through(store.as_ref(), &key, &storage_key, value))?;
        }
        cell.on_internal(move |next, _| write_through(store.as_ref(), &key, &storage_key, next));
        Ok(cell)
    }
}

fn hydrate<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
    storage_key: &str,
    validate: &dyn Fn(&T) -> bool,
) -> Option<T> {
    let raw = store.get_item(storage_key)?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) if validate(&value) => {
            debug!(key, "hydrated from store");
            Some(value)
        }
        Ok(_) => {
            warn!(key, stored = %raw, "stored value rejected, using default");
            None
        }
        Err(err) => {
            warn!(key, error = %err, "stored value unreadable, using default");
            None
        }
    }
}

fn write_through<T: Serialize>(
    store: &dyn Store,
    key: &str,
    storage_key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|source| CellError::Serialize {
        key: key.to_owned(),
        source,
    })?;
    store.set_item(storage_key, &json)
}
