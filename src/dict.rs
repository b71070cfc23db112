//! Dotted-path access to JSON object trees
//!
//! The preference store collaborator hands this library a tree of values
//! (`serde_json::Map<String, Value>`); tracked preferences address into it
//! with dotted paths like `"extensions.settings"`. These helpers are the
//! whole boundary - the library never performs I/O on the tree itself.

use serde_json::{Map, Value};

/// Look up a value by dotted path
pub fn get<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => root.get(path),
        Some((head, rest)) => get(root.get(head)?.as_object()?, rest),
    }
}

/// Look up a value by dotted path, mutably
pub fn get_mut<'a>(root: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    match path.split_once('.') {
        None => root.get_mut(path),
        Some((head, rest)) => get_mut(root.get_mut(head)?.as_object_mut()?, rest),
    }
}

/// Set a value at a dotted path, creating intermediate objects as needed
///
/// A non-object intermediate value is replaced by an object.
pub fn set(root: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            // Just ensured the child is an object.
            set(child.as_object_mut().unwrap(), rest, value);
        }
    }
}

/// Remove the value at a dotted path, pruning parents left empty
pub fn remove(root: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => root.remove(path),
        Some((head, rest)) => {
            let child = root.get_mut(head)?.as_object_mut()?;
            let removed = remove(child, rest);
            if child.is_empty() {
                root.remove(head);
            }
            removed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Map<String, Value> {
        let mut root = Map::new();
        root.insert("homepage".to_string(), json!("https://example.com"));
        root.insert(
            "extensions".to_string(),
            json!({ "settings": { "ext-a": { "version": "1.0" } } }),
        );
        root
    }

    #[test]
    fn test_get_top_level() {
        let root = sample();
        assert_eq!(get(&root, "homepage"), Some(&json!("https://example.com")));
    }

    #[test]
    fn test_get_nested() {
        let root = sample();
        assert_eq!(
            get(&root, "extensions.settings.ext-a.version"),
            Some(&json!("1.0"))
        );
    }

    #[test]
    fn test_get_missing_and_non_object_parent() {
        let root = sample();
        assert_eq!(get(&root, "missing"), None);
        assert_eq!(get(&root, "homepage.nested"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut root = Map::new();
        set(&mut root, "a.b.c", json!(5));
        assert_eq!(get(&root, "a.b.c"), Some(&json!(5)));
    }

    #[test]
    fn test_set_replaces_non_object_intermediate() {
        let mut root = sample();
        set(&mut root, "homepage.nested", json!(true));
        assert_eq!(get(&root, "homepage.nested"), Some(&json!(true)));
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let mut root = sample();
        let removed = remove(&mut root, "extensions.settings.ext-a.version");
        assert_eq!(removed, Some(json!("1.0")));
        // All now-empty ancestors are gone.
        assert!(!root.contains_key("extensions"));
    }

    #[test]
    fn test_remove_keeps_non_empty_parents() {
        let mut root = sample();
        set(&mut root, "extensions.enabled", json!(true));
        remove(&mut root, "extensions.settings");
        assert_eq!(get(&root, "extensions.enabled"), Some(&json!(true)));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut root = sample();
        assert_eq!(remove(&mut root, "nope.nothing"), None);
    }
}
