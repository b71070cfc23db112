//! # prefguard - Preference Integrity Guard
//!
//! This library sits between a local, mutable key-value preference store (a
//! JSON-like tree of named values) and its persistence layer, and detects -
//! and optionally undoes - out-of-process or out-of-band modification of
//! individual preference values.
//!
//! ## How it works
//!
//! Every tracked preference gets a keyed MAC (HMAC-SHA256) over its path and
//! canonical serialization, stored in a hash dictionary that can live inside
//! the protected tree itself or in a separate location. A "super MAC" over
//! the whole hash dictionary establishes whether the dictionary as a whole
//! can be trusted. On load, every tracked preference is validated and - for
//! preferences registered with enforcement - reset when tampering is
//! detected. On write, only the paths that actually changed are re-hashed.
//!
//! ## Features
//!
//! - Atomic tracking (whole-value) and split tracking (per-key, with partial
//!   reset that preserves untampered sub-keys)
//! - Legacy MAC derivation accepted during migration ([`ValueState::SecureLegacy`])
//! - Lazy re-hashing tied to the store's write batching
//! - An optional enforcement-free external-validation shadow store with a
//!   two-phase commit protocol around the physical write
//! - Reset audit trail: a delegate callback per validation plus a persisted
//!   reset timestamp
//!
//! ## Quick Start
//!
//! ```rust
//! use prefguard::{
//!     EnforcementLevel, PrefHashCalculator, PrefHashFilter, PrefTrackingStrategy,
//!     TrackedPreferenceMetadata, ValueSensitivity,
//! };
//! use serde_json::{json, Map, Value};
//!
//! let calculator = PrefHashCalculator::new(b"secret-seed".to_vec(), "device-1");
//! let tracked = vec![TrackedPreferenceMetadata {
//!     path: "homepage".to_string(),
//!     reporting_id: 0,
//!     enforcement_level: EnforcementLevel::EnforceOnLoad,
//!     strategy: PrefTrackingStrategy::Atomic,
//!     sensitivity: ValueSensitivity::Impersonal,
//! }];
//! let mut filter = PrefHashFilter::new(calculator, tracked, "prefs");
//!
//! // Seed hashes for an existing, unprotected tree.
//! let mut tree = Map::new();
//! tree.insert("homepage".to_string(), json!("https://example.com"));
//! filter.initialize(&mut tree);
//!
//! // A later load of the same tree validates cleanly.
//! let altered = filter.finalize_on_load(&mut tree);
//! assert!(!altered);
//! assert_eq!(tree["homepage"], json!("https://example.com"));
//! ```
//!
//! ## Enforcement
//!
//! ```rust
//! use prefguard::{
//!     get_reset_time, EnforcementLevel, PrefHashCalculator, PrefHashFilter,
//!     PrefTrackingStrategy, TrackedPreferenceMetadata, ValueSensitivity,
//! };
//! use serde_json::{json, Map};
//!
//! let tracked = vec![TrackedPreferenceMetadata {
//!     path: "homepage".to_string(),
//!     reporting_id: 0,
//!     enforcement_level: EnforcementLevel::EnforceOnLoad,
//!     strategy: PrefTrackingStrategy::Atomic,
//!     sensitivity: ValueSensitivity::Impersonal,
//! }];
//! let calculator = PrefHashCalculator::new(b"secret-seed".to_vec(), "device-1");
//! let mut filter = PrefHashFilter::new(calculator, tracked, "prefs");
//!
//! let mut tree = Map::new();
//! tree.insert("homepage".to_string(), json!("https://example.com"));
//! filter.initialize(&mut tree);
//!
//! // Out-of-band tampering...
//! tree.insert("homepage".to_string(), json!("https://evil.example"));
//!
//! // ...is detected and undone on the next load.
//! let altered = filter.finalize_on_load(&mut tree);
//! assert!(altered);
//! assert!(!tree.contains_key("homepage"));
//! assert!(get_reset_time(&tree).is_some());
//! ```
//!
//! ## What this library does not do
//!
//! Values are not encrypted, and an attacker who can rewrite the hash store
//! consistently can forge matching hashes. The guarantee is narrower: silent,
//! inconsistent tampering is detected, recoverable, and observable.

pub use calculator::{MacVerdict, PrefHashCalculator};
pub use error::{Error, Result};
pub use filter::{
    clear_reset_time, get_reset_time, AfterWriteCallback, BeforeWriteCallback,
    ExternalValidationStore, PrefHashFilter, RESET_TIME_PATH,
};
pub use hash_store::{
    DictionaryHashStoreContents, HashStoreContents, PROTECTION_KEY, STORE_VERSION,
};
pub use tracked::ValidationDelegate;
pub use transaction::HashStoreTransaction;
pub use types::{
    load_tracking_config, parse_tracking_config, validate_tracking_config, EnforcementLevel,
    PrefTrackingStrategy, TrackedPreferenceMetadata, ValueSensitivity, ValueState,
};

pub mod dict;

mod calculator;
mod error;
mod filter;
mod hash_store;
mod tracked;
mod transaction;
mod types;
