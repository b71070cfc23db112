//! Backing storage for preference MACs
//!
//! [`HashStoreContents`] decouples where MACs physically live from the
//! transaction logic that reads and writes them. The one implementation,
//! [`DictionaryHashStoreContents`], keeps the hash dictionary as a JSON
//! object and can either be embedded under the reserved `"protection"` key of
//! the protected tree itself ([`DictionaryHashStoreContents::detach`] /
//! [`DictionaryHashStoreContents::attach`]) or live in a wholly separate
//! location, which is how the external-validation shadow store works.
//!
//! Pure storage; no policy. All validity decisions belong to
//! [`HashStoreTransaction`](crate::transaction::HashStoreTransaction).

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Reserved key in the protected tree under which an embedded hash store
/// persists itself
pub const PROTECTION_KEY: &str = "protection";

const MACS_KEY: &str = "macs";
const SUPER_MAC_KEY: &str = "super_mac";
const VERSION_KEY: &str = "version";

/// Current hash store format version
pub const STORE_VERSION: u64 = 2;

/// Key-value backing store for MACs
///
/// Implementations store a single MAC string per atomic path, a sub-key to
/// MAC map per split path, and an optional super MAC over the whole
/// dictionary.
pub trait HashStoreContents {
    /// Identifier bound into this store's super MAC
    fn store_id(&self) -> &str;

    /// Whether any MAC has ever been stored
    fn is_initialized(&self) -> bool;

    /// The stored MAC for an atomic path
    ///
    /// A wrong-shaped entry (a sub-key map where a single MAC is expected)
    /// reads as absent: it can only arise from out-of-band modification, and
    /// the super MAC check surfaces that.
    fn get_mac(&self, path: &str) -> Option<String>;

    /// The stored per-key MAC map for a split path
    fn get_split_macs(&self, path: &str) -> Option<BTreeMap<String, String>>;

    fn set_mac(&mut self, path: &str, mac: String);

    fn set_split_mac(&mut self, path: &str, split_key: &str, mac: String);

    /// Write a caller-supplied entry verbatim (single MAC or sub-key map)
    fn import_entry(&mut self, path: &str, entry: &Value);

    /// Remove a path's entry entirely; returns whether anything was removed
    fn remove_entry(&mut self, path: &str) -> bool;

    fn get_super_mac(&self) -> Option<String>;

    fn set_super_mac(&mut self, mac: String);

    /// The hash dictionary as a JSON value, for super MAC computation
    fn contents(&self) -> Value;

    fn get_version(&self) -> Option<u64>;

    fn set_version(&mut self, version: u64);

    /// Delete the dictionary and super MAC wholesale
    ///
    /// The only way the store is ever emptied; nothing deletes it implicitly.
    fn reset(&mut self);
}

/// Hash store backed by a JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryHashStoreContents {
    store_id: String,
    macs: Map<String, Value>,
    super_mac: Option<String>,
    version: Option<u64>,
}

impl DictionaryHashStoreContents {
    /// Create an empty store
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            macs: Map::new(),
            super_mac: None,
            version: None,
        }
    }

    /// Extract the embedded hash store out of a protected tree
    ///
    /// Removes the reserved `"protection"` entry so the caller can hold
    /// mutable borrows of the remaining tree and of this store at the same
    /// time; [`attach`](Self::attach) writes it back.
    pub fn detach(tree: &mut Map<String, Value>, store_id: impl Into<String>) -> Self {
        match tree.remove(PROTECTION_KEY) {
            Some(value) => Self::from_value(store_id, &value),
            None => Self::new(store_id),
        }
    }

    /// Re-embed this store under the reserved key of a protected tree
    ///
    /// An untouched, never-initialized store leaves no trace in the tree.
    pub fn attach(self, tree: &mut Map<String, Value>) {
        if self.macs.is_empty() && self.super_mac.is_none() && self.version.is_none() {
            return;
        }
        tree.insert(PROTECTION_KEY.to_string(), self.into_value());
    }

    /// Rebuild a store from its persisted JSON form
    pub fn from_value(store_id: impl Into<String>, value: &Value) -> Self {
        let obj = value.as_object();
        let macs = obj
            .and_then(|o| o.get(MACS_KEY))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let super_mac = obj
            .and_then(|o| o.get(SUPER_MAC_KEY))
            .and_then(Value::as_str)
            .map(str::to_string);
        let version = obj.and_then(|o| o.get(VERSION_KEY)).and_then(Value::as_u64);
        Self {
            store_id: store_id.into(),
            macs,
            super_mac,
            version,
        }
    }

    /// Serialize this store to its persisted JSON form
    pub fn into_value(self) -> Value {
        let mut obj = Map::new();
        obj.insert(MACS_KEY.to_string(), Value::Object(self.macs));
        if let Some(super_mac) = self.super_mac {
            obj.insert(SUPER_MAC_KEY.to_string(), Value::String(super_mac));
        }
        if let Some(version) = self.version {
            obj.insert(VERSION_KEY.to_string(), Value::from(version));
        }
        Value::Object(obj)
    }
}

impl HashStoreContents for DictionaryHashStoreContents {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn is_initialized(&self) -> bool {
        !self.macs.is_empty()
    }

    fn get_mac(&self, path: &str) -> Option<String> {
        self.macs.get(path)?.as_str().map(str::to_string)
    }

    fn get_split_macs(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let entry = self.macs.get(path)?.as_object()?;
        Some(
            entry
                .iter()
                .filter_map(|(key, mac)| Some((key.clone(), mac.as_str()?.to_string())))
                .collect(),
        )
    }

    fn set_mac(&mut self, path: &str, mac: String) {
        self.macs.insert(path.to_string(), Value::String(mac));
    }

    fn set_split_mac(&mut self, path: &str, split_key: &str, mac: String) {
        let entry = self
            .macs
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry
            .as_object_mut()
            .unwrap()
            .insert(split_key.to_string(), Value::String(mac));
    }

    fn import_entry(&mut self, path: &str, entry: &Value) {
        debug_assert!(
            entry.is_string() || entry.is_object(),
            "imported hash entry for '{path}' must be a MAC string or a sub-key MAC map"
        );
        self.macs.insert(path.to_string(), entry.clone());
    }

    fn remove_entry(&mut self, path: &str) -> bool {
        self.macs.remove(path).is_some()
    }

    fn get_super_mac(&self) -> Option<String> {
        self.super_mac.clone()
    }

    fn set_super_mac(&mut self, mac: String) {
        self.super_mac = Some(mac);
    }

    fn contents(&self) -> Value {
        Value::Object(self.macs.clone())
    }

    fn get_version(&self) -> Option<u64> {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    fn reset(&mut self) {
        self.macs.clear();
        self.super_mac = None;
        self.version = None;
    }
}
