//! Load/write pipeline orchestration for tracked preferences
//!
//! [`PrefHashFilter`] is wired into the preference store's lifecycle at three
//! points: [`initialize`](PrefHashFilter::initialize) when protection is
//! first added to an existing store, [`filter_update`](PrefHashFilter::filter_update)
//! on every value mutation (O(1) dirty-set bookkeeping; no hashing), and
//! [`filter_serialize_data`](PrefHashFilter::filter_serialize_data) /
//! [`finalize_on_load`](PrefHashFilter::finalize_on_load) around the store's
//! own write and load.
//!
//! The optional external-validation store is a second, independently
//! maintained hash store used purely for detection; it never causes resets.
//! Its updates follow a two-phase protocol around the physical write so that
//! it never claims a hash for a value that failed to persist.

use crate::calculator::PrefHashCalculator;
use crate::dict;
use crate::hash_store::{DictionaryHashStoreContents, HashStoreContents, STORE_VERSION};
use crate::tracked::{TrackedPreference, ValidationDelegate};
use crate::transaction::HashStoreTransaction;
use crate::types::{PrefTrackingStrategy, TrackedPreferenceMetadata, validate_tracking_config};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Reserved path holding the timestamp of the last enforcement reset
///
/// Written into the protected tree itself whenever any tracked preference is
/// reset; readable and clearable by the integrator independently of this
/// subsystem.
pub const RESET_TIME_PATH: &str = "preference_reset_time";

/// Runs before the physical write of the protected tree commits
pub type BeforeWriteCallback = Box<dyn FnOnce()>;

/// Runs after the physical write completes, with its success flag
pub type AfterWriteCallback = Box<dyn FnOnce(bool)>;

/// Shared handle to an external-validation hash store
///
/// Single-threaded interior mutability: the filter and the write callbacks
/// returned by [`PrefHashFilter::filter_serialize_data`] both touch the
/// store, never concurrently.
pub type ExternalValidationStore = Rc<RefCell<DictionaryHashStoreContents>>;

/// Orchestrates validation and re-hashing for a set of tracked preferences
pub struct PrefHashFilter {
    calculator: PrefHashCalculator,
    store_id: String,
    tracked: BTreeMap<String, TrackedPreference>,
    changed_paths: BTreeSet<String>,
    deprecated_paths: Vec<String>,
    external_store: Option<ExternalValidationStore>,
    delegate: Option<Box<dyn ValidationDelegate>>,
}

impl PrefHashFilter {
    /// Create a filter over a tracking configuration table
    ///
    /// The table is the integrator's contract; registering the same path or
    /// reporting id twice is a wiring bug and asserts.
    pub fn new(
        calculator: PrefHashCalculator,
        tracked: Vec<TrackedPreferenceMetadata>,
        store_id: impl Into<String>,
    ) -> Self {
        validate_tracking_config(&tracked)
            .expect("tracked preference registration must be unique per path and reporting id");
        let tracked = tracked
            .into_iter()
            .map(|metadata| (metadata.path.clone(), TrackedPreference::new(metadata)))
            .collect();
        Self {
            calculator,
            store_id: store_id.into(),
            tracked,
            changed_paths: BTreeSet::new(),
            deprecated_paths: Vec::new(),
            external_store: None,
            delegate: None,
        }
    }

    /// Attach an external-validation shadow store
    pub fn with_external_store(mut self, store: ExternalValidationStore) -> Self {
        self.external_store = Some(store);
        self
    }

    /// Attach a validation delegate
    pub fn with_delegate(mut self, delegate: Box<dyn ValidationDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Register paths to purge from the tree and hash store on the next load
    pub fn with_deprecated_paths(mut self, paths: Vec<String>) -> Self {
        self.deprecated_paths = paths;
        self
    }

    /// Seed hashes for every tracked path from an existing, unprotected tree
    pub fn initialize(&mut self, tree: &mut Map<String, Value>) {
        let mut contents = DictionaryHashStoreContents::detach(tree, self.store_id.clone());
        let mut transaction = HashStoreTransaction::open(&mut contents, &self.calculator);
        for (path, pref) in &self.tracked {
            let value = dict::get(tree, path);
            pref.on_new_value(value, &mut transaction);
        }
        transaction.stamp_super_mac();
        transaction.close();
        contents.set_version(STORE_VERSION);
        contents.attach(tree);
        debug!(tracked = self.tracked.len(), "seeded hashes for tracked preferences");
    }

    /// Record that a tracked path changed; the re-hash is deferred
    pub fn filter_update(&mut self, path: &str) {
        if self.tracked.contains_key(path) {
            self.changed_paths.insert(path.to_string());
        }
    }

    /// Re-hash dirty paths before the tree is serialized
    ///
    /// Opens exactly one transaction, re-hashes every path recorded by
    /// [`filter_update`](Self::filter_update), clears the dirty set, and
    /// returns the two-phase external-validation callbacks: the first must
    /// run before the physical write commits (it invalidates the stale
    /// external entries), the second after, with the write's success flag
    /// (fresh external hashes are committed only on success).
    ///
    /// Without an external store both callbacks are no-ops.
    pub fn filter_serialize_data(
        &mut self,
        tree: &mut Map<String, Value>,
    ) -> (BeforeWriteCallback, AfterWriteCallback) {
        if self.changed_paths.is_empty() {
            return (Box::new(|| {}), Box::new(|_| {}));
        }

        let changed_paths: Vec<String> = std::mem::take(&mut self.changed_paths)
            .into_iter()
            .collect();
        debug!(dirty = changed_paths.len(), "re-hashing changed tracked preferences");

        let mut contents = DictionaryHashStoreContents::detach(tree, self.store_id.clone());
        let mut transaction = HashStoreTransaction::open(&mut contents, &self.calculator);
        for path in &changed_paths {
            let pref = &self.tracked[path];
            pref.on_new_value(dict::get(tree, path), &mut transaction);
        }
        transaction.close();
        contents.attach(tree);

        let Some(external_store) = &self.external_store else {
            return (Box::new(|| {}), Box::new(|_| {}));
        };

        // Fresh external MACs are computed now, over the values being
        // serialized; the after-write callback imports them verbatim.
        let pending: Vec<(String, Option<Value>)> = changed_paths
            .iter()
            .map(|path| (path.clone(), self.pending_external_entry(tree, path)))
            .collect();

        let calculator = self.calculator.clone();
        let store_for_clear = Rc::clone(external_store);
        let store_for_commit = Rc::clone(external_store);

        let before_write: BeforeWriteCallback = Box::new(move || {
            let mut contents = store_for_clear.borrow_mut();
            let mut transaction = HashStoreTransaction::open(&mut *contents, &calculator);
            for path in &changed_paths {
                transaction.clear_hash(path);
            }
            transaction.close();
        });

        let calculator = self.calculator.clone();
        let after_write: AfterWriteCallback = Box::new(move |success| {
            if !success {
                return;
            }
            let mut contents = store_for_commit.borrow_mut();
            let mut transaction = HashStoreTransaction::open(&mut *contents, &calculator);
            for (path, entry) in &pending {
                if let Some(entry) = entry {
                    transaction.import_hash(path, entry);
                }
            }
            transaction.close();
        });

        (before_write, after_write)
    }

    /// Validate and enforce every tracked preference after the tree loads
    ///
    /// Returns whether the tree was altered (resets, deprecated-path purges,
    /// or a reset-timestamp write) and therefore needs to be written back.
    pub fn finalize_on_load(&mut self, tree: &mut Map<String, Value>) -> bool {
        let mut contents = DictionaryHashStoreContents::detach(tree, self.store_id.clone());
        let mut prefs_altered = false;

        {
            let external_store = self.external_store.clone();
            let mut external_contents = external_store.as_ref().map(|store| store.borrow_mut());
            let mut transaction = HashStoreTransaction::open(&mut contents, &self.calculator);
            let mut external_transaction = external_contents
                .as_deref_mut()
                .map(|contents| HashStoreTransaction::open(contents, &self.calculator));

            if !transaction.is_super_mac_valid() {
                warn!(store_id = %self.store_id, "hash dictionary super MAC is absent or invalid");
            }

            let mut did_reset = false;
            for pref in self.tracked.values() {
                did_reset |= pref.enforce_and_report(
                    tree,
                    &mut transaction,
                    external_transaction.as_mut(),
                    self.delegate.as_deref_mut(),
                );
            }

            if did_reset {
                dict::set(tree, RESET_TIME_PATH, Value::from(now_millis()));
                prefs_altered = true;
            }

            // One-time cleanup of paths that are no longer tracked.
            for path in &self.deprecated_paths {
                if dict::remove(tree, path).is_some() {
                    prefs_altered = true;
                }
                transaction.clear_hash(path);
            }

            if transaction.stamp_super_mac() {
                prefs_altered = true;
            }
            transaction.close();
            if let Some(external_transaction) = external_transaction {
                external_transaction.close();
            }
        }

        contents.attach(tree);
        prefs_altered
    }

    fn pending_external_entry(&self, tree: &Map<String, Value>, path: &str) -> Option<Value> {
        let value = dict::get(tree, path)?;
        match self.tracked[path].metadata().strategy {
            PrefTrackingStrategy::Atomic => Some(Value::String(
                self.calculator.calculate(path, Some(value)),
            )),
            PrefTrackingStrategy::Split => {
                let dict = value.as_object().filter(|d| !d.is_empty())?;
                let macs: Map<String, Value> = self
                    .calculator
                    .calculate_split(path, dict)
                    .into_iter()
                    .map(|(key, mac)| (key, Value::String(mac)))
                    .collect();
                Some(Value::Object(macs))
            }
        }
    }
}

/// Read the last enforcement reset timestamp, in milliseconds since the epoch
pub fn get_reset_time(tree: &Map<String, Value>) -> Option<i64> {
    dict::get(tree, RESET_TIME_PATH)?.as_i64()
}

/// Clear the last enforcement reset timestamp
pub fn clear_reset_time(tree: &mut Map<String, Value>) {
    dict::remove(tree, RESET_TIME_PATH);
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
