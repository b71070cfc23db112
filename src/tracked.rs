//! Per-preference validation and enforcement
//!
//! A [`TrackedPreference`] wraps one [`TrackedPreferenceMetadata`] entry and
//! knows how to turn a new value into stored hashes and how to validate and
//! enforce against the committed value. The atomic and split variants share
//! one struct and dispatch on the metadata's strategy field; there is no
//! object hierarchy for what is a two-case choice fixed at configuration
//! time.

use crate::dict;
use crate::transaction::HashStoreTransaction;
use crate::types::{
    EnforcementLevel, PrefTrackingStrategy, TrackedPreferenceMetadata, ValueSensitivity,
    ValueState,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// What enforcement decided for one preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetAction {
    DontReset,
    /// A reset was warranted but the preference is report-only
    WantedReset,
    DoReset,
}

/// Receives one validation event per tracked preference per load
///
/// The external state is `None` when no external-validation store is wired
/// in. External results are purely observational and never cause resets.
pub trait ValidationDelegate {
    fn on_atomic_preference_validation(
        &mut self,
        path: &str,
        value: Option<&Value>,
        state: ValueState,
        external_state: Option<ValueState>,
        is_personal: bool,
    );

    #[allow(clippy::too_many_arguments)]
    fn on_split_preference_validation(
        &mut self,
        path: &str,
        value: Option<&Map<String, Value>>,
        invalid_keys: &[String],
        external_invalid_keys: &[String],
        state: ValueState,
        external_state: Option<ValueState>,
        is_personal: bool,
    );
}

/// One tracked preference, atomic or split per its metadata
#[derive(Debug, Clone)]
pub(crate) struct TrackedPreference {
    metadata: TrackedPreferenceMetadata,
}

impl TrackedPreference {
    pub fn new(metadata: TrackedPreferenceMetadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &TrackedPreferenceMetadata {
        &self.metadata
    }

    /// Record fresh hashes for a new value
    pub fn on_new_value(&self, value: Option<&Value>, transaction: &mut HashStoreTransaction) {
        match self.metadata.strategy {
            PrefTrackingStrategy::Atomic => transaction.store_hash(&self.metadata.path, value),
            PrefTrackingStrategy::Split => transaction
                .store_split_hash(&self.metadata.path, value.and_then(Value::as_object)),
        }
    }

    /// Validate the committed value, enforce per policy, re-hash, and report
    ///
    /// Returns whether a reset occurred. The external transaction, when
    /// present, produces a second non-authoritative state used only for
    /// reporting.
    pub fn enforce_and_report(
        &self,
        store: &mut Map<String, Value>,
        transaction: &mut HashStoreTransaction,
        external_transaction: Option<&mut HashStoreTransaction>,
        delegate: Option<&mut (dyn ValidationDelegate + 'static)>,
    ) -> bool {
        match self.metadata.strategy {
            PrefTrackingStrategy::Atomic => {
                self.enforce_atomic(store, transaction, external_transaction, delegate)
            }
            PrefTrackingStrategy::Split => {
                self.enforce_split(store, transaction, external_transaction, delegate)
            }
        }
    }

    fn enforce_atomic(
        &self,
        store: &mut Map<String, Value>,
        transaction: &mut HashStoreTransaction,
        external_transaction: Option<&mut HashStoreTransaction>,
        delegate: Option<&mut (dyn ValidationDelegate + 'static)>,
    ) -> bool {
        let path = self.metadata.path.as_str();
        let value = dict::get(store, path).cloned();

        let state = transaction.check_value(path, value.as_ref());
        let external_state = external_transaction
            .as_ref()
            .map(|txn| txn.check_value(path, value.as_ref()));

        if let Some(delegate) = delegate {
            delegate.on_atomic_preference_validation(
                path,
                value.as_ref(),
                state,
                external_state,
                self.is_personal(),
            );
        }

        let action = self.reset_action(state);
        let was_reset = action == ResetAction::DoReset;
        self.log_action(state, action);

        if was_reset {
            dict::remove(store, path);
        }

        // Keep the hash dictionary in sync with what is actually persisted
        // after enforcement.
        let enforced_value = if was_reset { None } else { value.as_ref() };
        if state != ValueState::Unchanged {
            transaction.store_hash(path, enforced_value);
        }
        if let Some(txn) = external_transaction {
            if external_state != Some(ValueState::Unchanged) {
                txn.store_hash(path, enforced_value);
            }
        }

        was_reset
    }

    fn enforce_split(
        &self,
        store: &mut Map<String, Value>,
        transaction: &mut HashStoreTransaction,
        external_transaction: Option<&mut HashStoreTransaction>,
        delegate: Option<&mut (dyn ValidationDelegate + 'static)>,
    ) -> bool {
        let path = self.metadata.path.as_str();
        let value = dict::get(store, path).cloned();

        let dict_value = match &value {
            None => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                // There should be a dictionary or nothing at a split path;
                // anything else is a wiring bug in the integrator.
                debug_assert!(false, "split preference '{path}' holds a non-dictionary value");
                return false;
            }
        };

        let (state, invalid_keys) = transaction.check_split_value(path, dict_value);
        let external_results = external_transaction
            .as_ref()
            .map(|txn| txn.check_split_value(path, dict_value));
        let external_state = external_results.as_ref().map(|(state, _)| *state);
        let external_invalid_keys = external_results
            .as_ref()
            .map(|(_, keys)| keys.as_slice())
            .unwrap_or(&[]);

        if let Some(delegate) = delegate {
            delegate.on_split_preference_validation(
                path,
                dict_value,
                &invalid_keys,
                external_invalid_keys,
                state,
                external_state,
                self.is_personal(),
            );
        }

        let action = self.reset_action(state);
        let was_reset = action == ResetAction::DoReset;
        self.log_action(state, action);

        if was_reset {
            if state == ValueState::Changed {
                // Partial reset: drop exactly the invalid sub-keys and keep
                // the rest of the dictionary intact.
                if let Some(map) = dict::get_mut(store, path).and_then(Value::as_object_mut) {
                    for key in &invalid_keys {
                        map.remove(key);
                    }
                }
            } else {
                dict::remove(store, path);
            }
        }

        let enforced_value = dict::get(store, path).and_then(Value::as_object);
        if state != ValueState::Unchanged {
            transaction.store_split_hash(path, enforced_value);
        }
        if let Some(txn) = external_transaction {
            if external_state != Some(ValueState::Unchanged) {
                txn.store_split_hash(path, enforced_value);
            }
        }

        was_reset
    }

    fn reset_action(&self, state: ValueState) -> ResetAction {
        let reset_warranted = matches!(
            state,
            ValueState::Changed | ValueState::UntrustedUnknownValue
        );
        if !reset_warranted {
            // CLEARED never resets: for atomic values there is nothing left
            // to remove, and split partial clears surface as CHANGED with the
            // missing keys listed as invalid.
            return ResetAction::DontReset;
        }
        match self.metadata.enforcement_level {
            EnforcementLevel::EnforceOnLoad => ResetAction::DoReset,
            EnforcementLevel::NoEnforcement => ResetAction::WantedReset,
        }
    }

    fn is_personal(&self) -> bool {
        self.metadata.sensitivity == ValueSensitivity::Personal
    }

    fn log_action(&self, state: ValueState, action: ResetAction) {
        match action {
            ResetAction::DontReset => {}
            ResetAction::WantedReset => debug!(
                path = %self.metadata.path,
                reporting_id = self.metadata.reporting_id,
                ?state,
                "tracked preference invalid but report-only"
            ),
            ResetAction::DoReset => warn!(
                path = %self.metadata.path,
                reporting_id = self.metadata.reporting_id,
                ?state,
                "resetting tampered tracked preference"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::PrefHashCalculator;
    use crate::hash_store::{DictionaryHashStoreContents, HashStoreContents};
    use serde_json::json;

    fn calculator() -> PrefHashCalculator {
        PrefHashCalculator::new(b"test-seed".to_vec(), "device-1")
    }

    fn meta(
        path: &str,
        strategy: PrefTrackingStrategy,
        enforcement_level: EnforcementLevel,
    ) -> TrackedPreferenceMetadata {
        TrackedPreferenceMetadata {
            path: path.to_string(),
            reporting_id: 0,
            enforcement_level,
            strategy,
            sensitivity: ValueSensitivity::Impersonal,
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        atomic: Vec<(String, ValueState, Option<ValueState>)>,
        split: Vec<(String, ValueState, Vec<String>)>,
    }

    impl ValidationDelegate for RecordingDelegate {
        fn on_atomic_preference_validation(
            &mut self,
            path: &str,
            _value: Option<&Value>,
            state: ValueState,
            external_state: Option<ValueState>,
            _is_personal: bool,
        ) {
            self.atomic.push((path.to_string(), state, external_state));
        }

        fn on_split_preference_validation(
            &mut self,
            path: &str,
            _value: Option<&Map<String, Value>>,
            invalid_keys: &[String],
            _external_invalid_keys: &[String],
            state: ValueState,
            _external_state: Option<ValueState>,
            _is_personal: bool,
        ) {
            self.split
                .push((path.to_string(), state, invalid_keys.to_vec()));
        }
    }

    fn seed_atomic(
        store: &mut DictionaryHashStoreContents,
        calc: &PrefHashCalculator,
        path: &str,
        value: &Value,
    ) {
        let mut txn = HashStoreTransaction::open(store, calc);
        txn.store_hash(path, Some(value));
        txn.close();
    }

    #[test]
    fn test_atomic_enforce_resets_tampered_value() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");
        seed_atomic(&mut hash_store, &calc, "p", &json!("original"));

        let mut tree = Map::new();
        tree.insert("p".to_string(), json!("tampered"));

        let pref = TrackedPreference::new(meta(
            "p",
            PrefTrackingStrategy::Atomic,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut delegate = RecordingDelegate::default();
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, Some(&mut delegate));
        assert!(was_reset);
        assert!(!tree.contains_key("p"));
        // After a reset, an absent value carries no hash.
        assert_eq!(txn.check_value("p", None), ValueState::TrustedNullValue);
        txn.close();

        assert_eq!(delegate.atomic.len(), 1);
        assert_eq!(delegate.atomic[0].1, ValueState::Changed);
        assert_eq!(delegate.atomic[0].2, None);
    }

    #[test]
    fn test_atomic_report_only_never_resets() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");
        seed_atomic(&mut hash_store, &calc, "p", &json!("original"));

        let mut tree = Map::new();
        tree.insert("p".to_string(), json!("tampered"));

        let pref = TrackedPreference::new(meta(
            "p",
            PrefTrackingStrategy::Atomic,
            EnforcementLevel::NoEnforcement,
        ));
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, None);
        assert!(!was_reset);
        assert_eq!(tree["p"], json!("tampered"));
        // The hash is re-stamped over the kept value.
        assert_eq!(
            txn.check_value("p", Some(&json!("tampered"))),
            ValueState::Unchanged
        );
        txn.close();
    }

    #[test]
    fn test_atomic_unchanged_value_is_left_alone() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");
        seed_atomic(&mut hash_store, &calc, "p", &json!("value"));

        let mut tree = Map::new();
        tree.insert("p".to_string(), json!("value"));

        let pref = TrackedPreference::new(meta(
            "p",
            PrefTrackingStrategy::Atomic,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut delegate = RecordingDelegate::default();
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, Some(&mut delegate));
        assert!(!was_reset);
        assert_eq!(tree["p"], json!("value"));
        assert_eq!(delegate.atomic[0].1, ValueState::Unchanged);
        txn.close();
    }

    #[test]
    fn test_atomic_cleared_does_not_reset() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");
        seed_atomic(&mut hash_store, &calc, "p", &json!("value"));

        let mut tree = Map::new();

        let pref = TrackedPreference::new(meta(
            "p",
            PrefTrackingStrategy::Atomic,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut delegate = RecordingDelegate::default();
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, Some(&mut delegate));
        assert!(!was_reset);
        assert_eq!(delegate.atomic[0].1, ValueState::Cleared);
        // The stale hash is dropped so the cleared value stays trusted.
        assert_eq!(txn.check_value("p", None), ValueState::TrustedNullValue);
        txn.close();
    }

    #[test]
    fn test_split_partial_reset_preserves_valid_keys() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");

        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        txn.store_split_hash("split", json!({"a": 1, "b": 2, "c": 3}).as_object());
        txn.close();

        // "a" and "c" removed out-of-band, "d" injected, "b" untouched.
        let mut tree = Map::new();
        tree.insert("split".to_string(), json!({"b": 2, "d": 4}));

        let pref = TrackedPreference::new(meta(
            "split",
            PrefTrackingStrategy::Split,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut delegate = RecordingDelegate::default();
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, Some(&mut delegate));
        assert!(was_reset);
        assert_eq!(tree["split"], json!({"b": 2}));

        let (state, invalid) = txn.check_split_value("split", tree["split"].as_object());
        assert_eq!(state, ValueState::Unchanged);
        assert!(invalid.is_empty());
        txn.close();

        let (_, recorded_state, mut recorded_invalid) = delegate.split.remove(0);
        recorded_invalid.sort();
        assert_eq!(recorded_state, ValueState::Changed);
        assert_eq!(recorded_invalid, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_split_untrusted_unknown_resets_whole_value() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");

        let mut tree = Map::new();
        tree.insert("split".to_string(), json!({"a": 1}));

        let pref = TrackedPreference::new(meta(
            "split",
            PrefTrackingStrategy::Split,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let was_reset = pref.enforce_and_report(&mut tree, &mut txn, None, None);
        assert!(was_reset);
        assert!(!tree.contains_key("split"));
        txn.close();
    }

    #[test]
    fn test_external_transaction_is_reported_but_never_enforced() {
        let calc = calculator();
        let mut hash_store = DictionaryHashStoreContents::new("prefs");
        seed_atomic(&mut hash_store, &calc, "p", &json!("value"));

        // External store disagrees: it has a hash for a different value.
        let mut external_store = DictionaryHashStoreContents::new("external");
        seed_atomic(&mut external_store, &calc, "p", &json!("other"));

        let mut tree = Map::new();
        tree.insert("p".to_string(), json!("value"));

        let pref = TrackedPreference::new(meta(
            "p",
            PrefTrackingStrategy::Atomic,
            EnforcementLevel::EnforceOnLoad,
        ));
        let mut delegate = RecordingDelegate::default();
        let mut txn = HashStoreTransaction::open(&mut hash_store, &calc);
        let mut external_txn = HashStoreTransaction::open(&mut external_store, &calc);
        let was_reset = pref.enforce_and_report(
            &mut tree,
            &mut txn,
            Some(&mut external_txn),
            Some(&mut delegate),
        );

        // Primary says unchanged; the external discrepancy never resets.
        assert!(!was_reset);
        assert_eq!(tree["p"], json!("value"));
        assert_eq!(delegate.atomic[0].1, ValueState::Unchanged);
        assert_eq!(delegate.atomic[0].2, Some(ValueState::Changed));

        // The external store is re-stamped over the authoritative value.
        assert_eq!(
            external_txn.check_value("p", Some(&json!("value"))),
            ValueState::Unchanged
        );
        txn.close();
        external_txn.close();
    }
}
