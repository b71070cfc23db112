use prefguard::{
    clear_reset_time, get_reset_time, EnforcementLevel, PrefHashCalculator, PrefHashFilter,
    TrackedPreferenceMetadata, ValidationDelegate, ValueState,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Seed hashes for an existing, unprotected preference file
pub fn init(
    file: &Path,
    seed: &[u8],
    device_id: &str,
    tracked: Vec<TrackedPreferenceMetadata>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = load_tree(file)?;
    let calculator = PrefHashCalculator::new(seed.to_vec(), device_id);
    let mut filter = PrefHashFilter::new(calculator, tracked, store_id(file));
    filter.initialize(&mut tree);
    save_tree(file, &tree)?;
    eprintln!("Sealed {} with fresh hashes", file.display());
    Ok(())
}

/// Validate a preference file and print per-preference states, without
/// enforcing
pub fn check(
    file: &Path,
    seed: &[u8],
    device_id: &str,
    tracked: Vec<TrackedPreferenceMetadata>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = load_tree(file)?;

    // Downgrade every entry to report-only so the pass cannot mutate values.
    let tracked: Vec<TrackedPreferenceMetadata> = tracked
        .into_iter()
        .map(|mut meta| {
            meta.enforcement_level = EnforcementLevel::NoEnforcement;
            meta
        })
        .collect();

    let reports = Rc::new(RefCell::new(Vec::new()));
    let calculator = PrefHashCalculator::new(seed.to_vec(), device_id);
    let mut filter = PrefHashFilter::new(calculator, tracked, store_id(file))
        .with_delegate(Box::new(ReportCollector {
            reports: Rc::clone(&reports),
        }));
    filter.finalize_on_load(&mut tree);

    let json = serde_json::to_string_pretty(&*reports.borrow())?;
    println!("{}", json);

    let tampered = reports.borrow().iter().any(|r| {
        matches!(
            r.state,
            ValueState::Changed | ValueState::Cleared | ValueState::UntrustedUnknownValue
        )
    });
    if tampered {
        return Err(anyhow::anyhow!("tampering detected in {}", file.display()).into());
    }
    Ok(())
}

/// Run the full load-time validation pass, writing the file back if any
/// value was reset or the hash store was upgraded
pub fn enforce(
    file: &Path,
    seed: &[u8],
    device_id: &str,
    tracked: Vec<TrackedPreferenceMetadata>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = load_tree(file)?;
    let calculator = PrefHashCalculator::new(seed.to_vec(), device_id);
    let mut filter = PrefHashFilter::new(calculator, tracked, store_id(file));

    let altered = filter.finalize_on_load(&mut tree);
    if altered {
        save_tree(file, &tree)?;
        eprintln!("Enforced and rewrote {}", file.display());
    } else {
        eprintln!("{} is clean", file.display());
    }
    Ok(())
}

/// Show or clear the last enforcement reset timestamp
pub fn reset_time(file: &Path, clear: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = load_tree(file)?;
    if clear {
        clear_reset_time(&mut tree);
        save_tree(file, &tree)?;
        return Ok(());
    }
    match get_reset_time(&tree) {
        Some(millis) => println!("{}", millis),
        None => println!("never"),
    }
    Ok(())
}

/// One line of `check` output
#[derive(Debug, Serialize)]
struct ValidationReport {
    path: String,
    state: ValueState,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_state: Option<ValueState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    invalid_keys: Vec<String>,
}

struct ReportCollector {
    reports: Rc<RefCell<Vec<ValidationReport>>>,
}

impl ValidationDelegate for ReportCollector {
    fn on_atomic_preference_validation(
        &mut self,
        path: &str,
        _value: Option<&Value>,
        state: ValueState,
        external_state: Option<ValueState>,
        _is_personal: bool,
    ) {
        self.reports.borrow_mut().push(ValidationReport {
            path: path.to_string(),
            state,
            external_state,
            invalid_keys: Vec::new(),
        });
    }

    fn on_split_preference_validation(
        &mut self,
        path: &str,
        _value: Option<&Map<String, Value>>,
        invalid_keys: &[String],
        _external_invalid_keys: &[String],
        state: ValueState,
        external_state: Option<ValueState>,
        _is_personal: bool,
    ) {
        self.reports.borrow_mut().push(ValidationReport {
            path: path.to_string(),
            state,
            external_state,
            invalid_keys: invalid_keys.to_vec(),
        });
    }
}

fn load_tree(file: &Path) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read {}: {e}. Make sure the file exists and is readable.",
            file.display()
        )
    })?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {} as JSON: {e}", file.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(prefguard::Error::RootNotObject.into()),
    }
}

fn save_tree(file: &Path, tree: &Map<String, Value>) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&Value::Object(tree.clone()))?;
    std::fs::write(file, json)?;
    Ok(())
}

/// The hash store id is the file stem, so a renamed file fails validation of
/// its super MAC
fn store_id(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prefs".to_string())
}
