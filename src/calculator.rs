//! Keyed hash calculator for preference values
//!
//! Computes HMAC-SHA256 MACs over `(path, value)` pairs and over whole hash
//! dictionaries ("super MACs"). The computation is a pure, deterministic
//! function of the inputs plus a process-wide secret seed and device
//! identifier supplied at construction; values are serialized canonically
//! (sorted object keys) so the MAC is order-independent.
//!
//! A deprecated legacy derivation (same scheme, the legacy device identifier
//! bound into the message instead of the current one) is still accepted by
//! [`PrefHashCalculator::validate`] and reported as
//! [`MacVerdict::ValidLegacy`], supporting gradual migration without a full
//! reset.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of validating a candidate MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacVerdict {
    /// Matches the current derivation
    Valid,
    /// Matches the legacy derivation only
    ValidLegacy,
    /// Matches neither derivation
    Invalid,
}

/// Keyed MAC computation over preference paths and values
#[derive(Debug, Clone)]
pub struct PrefHashCalculator {
    seed: Vec<u8>,
    device_id: String,
    legacy_device_id: String,
}

impl PrefHashCalculator {
    /// Create a calculator with an empty legacy device identifier
    ///
    /// The empty legacy identifier matches hashes produced before device
    /// binding was introduced.
    pub fn new(seed: Vec<u8>, device_id: impl Into<String>) -> Self {
        Self::with_legacy_device_id(seed, device_id, "")
    }

    /// Create a calculator with an explicit legacy device identifier
    pub fn with_legacy_device_id(
        seed: Vec<u8>,
        device_id: impl Into<String>,
        legacy_device_id: impl Into<String>,
    ) -> Self {
        Self {
            seed,
            device_id: device_id.into(),
            legacy_device_id: legacy_device_id.into(),
        }
    }

    /// Compute the MAC for a value at a path
    ///
    /// An absent value (`None`) hashes the empty serialization, which is
    /// distinct from every real JSON value including `null`.
    pub fn calculate(&self, path: &str, value: Option<&Value>) -> String {
        self.digest(&self.device_id, path, value)
    }

    /// Compute per-key MACs for a split (dictionary) value
    ///
    /// Each sub-key is hashed under the message path `"{path}.{key}"`.
    pub fn calculate_split(
        &self,
        path: &str,
        dict: &serde_json::Map<String, Value>,
    ) -> std::collections::BTreeMap<String, String> {
        dict.iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    self.calculate(&format!("{path}.{key}"), Some(value)),
                )
            })
            .collect()
    }

    /// Compute the super MAC over a serialized hash dictionary
    pub fn super_mac(&self, store_id: &str, hash_dictionary: &Value) -> String {
        self.calculate(store_id, Some(hash_dictionary))
    }

    /// Validate a candidate MAC against the current and legacy derivations
    pub fn validate(&self, path: &str, value: Option<&Value>, candidate: &str) -> MacVerdict {
        let Ok(candidate_bytes) = hex::decode(candidate) else {
            return MacVerdict::Invalid;
        };
        if self.digest_matches(&self.device_id, path, value, &candidate_bytes) {
            return MacVerdict::Valid;
        }
        if self.legacy_device_id != self.device_id
            && self.digest_matches(&self.legacy_device_id, path, value, &candidate_bytes)
        {
            return MacVerdict::ValidLegacy;
        }
        MacVerdict::Invalid
    }

    fn digest(&self, device_id: &str, path: &str, value: Option<&Value>) -> String {
        hex::encode(self.digest_bytes(device_id, path, value))
    }

    fn digest_matches(
        &self,
        device_id: &str,
        path: &str,
        value: Option<&Value>,
        candidate: &[u8],
    ) -> bool {
        let expected = self.digest_bytes(device_id, path, value);
        expected.len() == candidate.len() && bool::from(expected.ct_eq(candidate))
    }

    fn digest_bytes(&self, device_id: &str, path: &str, value: Option<&Value>) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.seed)
            .expect("HMAC accepts keys of any length");
        mac.update(device_id.as_bytes());
        mac.update(b"|");
        mac.update(path.as_bytes());
        mac.update(b"|");
        mac.update(canonical_serialization(value).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Canonical string form of a value for MAC computation
///
/// `serde_json` maps are sorted by key, so serialization is already
/// order-independent for objects at every depth. Absent values serialize as
/// the empty string.
fn canonical_serialization(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(v) => v.to_string(),
    }
}
