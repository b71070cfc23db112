//! Scoped read/check/write operations against one hash store
//!
//! A [`HashStoreTransaction`] exclusively borrows a
//! [`HashStoreContents`] for the lifetime of one batch operation. Super MAC
//! validity is computed once at open and cached; stores and clears mark the
//! super MAC dirty, and the recomputed super MAC is persisted exactly once
//! when [`HashStoreTransaction::close`] is called, not per individual store.
//!
//! Non-reentrancy falls out of the exclusive borrow: a second transaction
//! cannot be opened against the same contents while one is live.

use crate::calculator::{MacVerdict, PrefHashCalculator};
use crate::hash_store::HashStoreContents;
use crate::types::ValueState;
use serde_json::{Map, Value};

/// A short-lived batch of check/store/import/clear operations
pub struct HashStoreTransaction<'a> {
    contents: &'a mut dyn HashStoreContents,
    calculator: &'a PrefHashCalculator,
    super_mac_valid: bool,
    super_mac_dirty: bool,
    closed: bool,
}

impl<'a> HashStoreTransaction<'a> {
    /// Open a transaction, computing super MAC validity up front
    pub fn open(
        contents: &'a mut dyn HashStoreContents,
        calculator: &'a PrefHashCalculator,
    ) -> Self {
        let super_mac_valid = match contents.get_super_mac() {
            Some(stored) => {
                let dictionary = contents.contents();
                !matches!(
                    calculator.validate(contents.store_id(), Some(&dictionary), &stored),
                    MacVerdict::Invalid
                )
            }
            None => false,
        };
        Self {
            contents,
            calculator,
            super_mac_valid,
            super_mac_dirty: false,
            closed: false,
        }
    }

    /// Cached super MAC validity, as computed when the transaction opened
    pub fn is_super_mac_valid(&self) -> bool {
        self.super_mac_valid
    }

    /// Check an atomic value against its stored MAC
    pub fn check_value(&self, path: &str, value: Option<&Value>) -> ValueState {
        let Some(stored_mac) = self.contents.get_mac(path) else {
            return match value {
                // An absent hash for an absent value is always trustable.
                None => ValueState::TrustedNullValue,
                Some(_) if self.super_mac_valid => ValueState::TrustedUnknownValue,
                Some(_) => ValueState::UntrustedUnknownValue,
            };
        };

        match self.calculator.validate(path, value, &stored_mac) {
            MacVerdict::Valid => ValueState::Unchanged,
            MacVerdict::ValidLegacy => ValueState::SecureLegacy,
            MacVerdict::Invalid => {
                if value.is_some() {
                    ValueState::Changed
                } else {
                    ValueState::Cleared
                }
            }
        }
    }

    /// Check a split value key by key against its stored MAC map
    ///
    /// Returns the overall state plus the list of invalid sub-keys: keys
    /// whose value fails its MAC, keys present without a stored MAC, and
    /// stored MACs whose key has been removed from the value. An
    /// absent-or-empty value is `Cleared` when hashes exist and `Unchanged`
    /// otherwise.
    pub fn check_split_value(
        &self,
        path: &str,
        value: Option<&Map<String, Value>>,
    ) -> (ValueState, Vec<String>) {
        let stored_macs = self.contents.get_split_macs(path);

        let Some(dict) = value.filter(|d| !d.is_empty()) else {
            let state = if stored_macs.is_some() {
                ValueState::Cleared
            } else {
                ValueState::Unchanged
            };
            return (state, Vec::new());
        };

        let Some(mut stored_macs) = stored_macs else {
            let state = if self.super_mac_valid {
                ValueState::TrustedUnknownValue
            } else {
                ValueState::UntrustedUnknownValue
            };
            return (state, Vec::new());
        };

        let mut invalid_keys = Vec::new();
        let mut has_legacy = false;
        for (key, sub_value) in dict {
            match stored_macs.remove(key) {
                None => invalid_keys.push(key.clone()),
                Some(mac) => {
                    let keyed_path = format!("{path}.{key}");
                    match self.calculator.validate(&keyed_path, Some(sub_value), &mac) {
                        MacVerdict::Valid => {}
                        MacVerdict::ValidLegacy => has_legacy = true,
                        MacVerdict::Invalid => invalid_keys.push(key.clone()),
                    }
                }
            }
        }
        // Remaining stored MACs correspond to silently removed keys.
        invalid_keys.extend(stored_macs.into_keys());

        let state = if !invalid_keys.is_empty() {
            ValueState::Changed
        } else if has_legacy {
            ValueState::SecureLegacy
        } else {
            ValueState::Unchanged
        };
        (state, invalid_keys)
    }

    /// Overwrite the MAC for an atomic path with a fresh computation
    ///
    /// Storing for an absent value records no hash at all, so the next check
    /// yields [`ValueState::TrustedNullValue`].
    pub fn store_hash(&mut self, path: &str, value: Option<&Value>) {
        match value {
            Some(value) => {
                let mac = self.calculator.calculate(path, Some(value));
                self.contents.set_mac(path, mac);
            }
            None => {
                self.contents.remove_entry(path);
            }
        }
        self.super_mac_dirty = true;
    }

    /// Overwrite the per-key MACs for a split path with fresh computations
    pub fn store_split_hash(&mut self, path: &str, value: Option<&Map<String, Value>>) {
        self.contents.remove_entry(path);
        if let Some(dict) = value.filter(|d| !d.is_empty()) {
            for (key, mac) in self.calculator.calculate_split(path, dict) {
                self.contents.set_split_mac(path, &key, mac);
            }
        }
        self.super_mac_dirty = true;
    }

    /// Write a caller-supplied hash entry verbatim, without recomputation
    ///
    /// Used to carry hashes forward between stores. Only dirties the super
    /// MAC when it was valid: importing into an untrusted dictionary must not
    /// upgrade it.
    pub fn import_hash(&mut self, path: &str, entry: &Value) {
        self.contents.import_entry(path, entry);
        if self.super_mac_valid {
            self.super_mac_dirty = true;
        }
    }

    /// Remove a path's MAC entirely
    pub fn clear_hash(&mut self, path: &str) {
        if self.contents.remove_entry(path) && self.super_mac_valid {
            self.super_mac_dirty = true;
        }
    }

    /// Schedule a super MAC (re)computation even if nothing changed
    ///
    /// Upgrades a dictionary that previously had no valid super MAC. Returns
    /// whether an upgrade was scheduled; a transaction that opened with a
    /// valid super MAC returns false.
    pub fn stamp_super_mac(&mut self) -> bool {
        if self.super_mac_valid {
            return false;
        }
        self.super_mac_dirty = true;
        true
    }

    /// Commit the recomputed super MAC if any operation dirtied it
    ///
    /// Must be called exactly once, at the end of the batch.
    pub fn close(mut self) {
        if self.super_mac_dirty {
            let dictionary = self.contents.contents();
            let super_mac = self
                .calculator
                .super_mac(self.contents.store_id(), &dictionary);
            self.contents.set_super_mac(super_mac);
        }
        self.closed = true;
    }
}

impl Drop for HashStoreTransaction<'_> {
    fn drop(&mut self) {
        debug_assert!(
            self.closed || !self.super_mac_dirty,
            "hash store transaction dropped with uncommitted changes; call close()"
        );
    }
}
