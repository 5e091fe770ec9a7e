#![forbid(unsafe_code)]

//! Shallow merge of a patch over a cell's current value.
//!
//! Record-shaped state implements [`Merge`] with a patch type listing the
//! fields that may change; struct update syntax keeps the rest:
//!
//! ```
//! use cellkit_runtime::reactive::{Merge, ValueCell};
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct Upload { name: String, progress: u8 }
//!
//! #[derive(Default)]
//! struct UploadPatch { progress: Option<u8> }
//!
//! impl Merge for Upload {
//!     type Patch = UploadPatch;
//!     fn merged(&self, patch: UploadPatch) -> Self {
//!         Upload {
//!             progress: patch.progress.unwrap_or(self.progress),
//!             ..self.clone()
//!         }
//!     }
//! }
//!
//! let upload = ValueCell::new(Upload { name: "a.png".into(), progress: 0 });
//! upload.merge(UploadPatch { progress: Some(40) }).unwrap();
//! assert_eq!(upload.get().progress, 40);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use cellkit_core::Result;
use serde_json::{Map, Value};

use super::cell::ValueCell;

/// A value that can absorb a partial update.
pub trait Merge: Sized {
    type Patch;

    /// A new value with `patch` laid over `self`.
    fn merged(&self, patch: Self::Patch) -> Self;
}

/// A missing value merges as if it were empty.
impl<T: Merge + Default + Clone> Merge for Option<T> {
    type Patch = T::Patch;

    fn merged(&self, patch: T::Patch) -> Self {
        let base = self.clone().unwrap_or_default();
        Some(base.merged(patch))
    }
}

impl<K: Ord + Clone, V: Clone> Merge for BTreeMap<K, V> {
    type Patch = BTreeMap<K, V>;

    fn merged(&self, patch: Self::Patch) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

impl<K, V, S> Merge for HashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    type Patch = HashMap<K, V, S>;

    fn merged(&self, patch: Self::Patch) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

/// Objects merge key by key. Any other current value counts as `{}`.
impl Merge for Value {
    type Patch = Map<String, Value>;

    fn merged(&self, patch: Self::Patch) -> Self {
        let mut next = match self {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        next.extend(patch);
        Value::Object(next)
    }
}

impl<T: Merge + Clone + PartialEq + 'static> ValueCell<T> {
    /// Lay `patch` over the current value and notify.
    ///
    /// Always notifies, even when the patch changes nothing.
    pub fn merge(&self, patch: T::Patch) -> Result<&Self> {
        let next = self.with(|current| current.merged(patch));
        self.set_forced(next)
    }
}
