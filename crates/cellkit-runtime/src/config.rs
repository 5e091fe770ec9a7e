#![forbid(unsafe_code)]

//! Configuration shared by every cell built through a
//! [`CellContext`](crate::context::CellContext).

/// Configuration for keyed and persisted cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellConfig {
    /// Prepended to every key written to the durable store, so cells from
    /// different applications can share one store.
    /// Default: `"cellkit_"`.
    pub key_prefix: String,

    /// Write the starting value (hydrated or default) back to the store
    /// when a persisted cell is built. When off, the store is only written
    /// on the first real change.
    /// Default: false.
    pub persist_on_hydrate: bool,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cellkit_".to_owned(),
            persist_on_hydrate: false,
        }
    }
}

impl CellConfig {
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_persist_on_hydrate(mut self, enabled: bool) -> Self {
        self.persist_on_hydrate = enabled;
        self
    }

    /// The durable-store key for a registry key.
    #[must_use]
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}
