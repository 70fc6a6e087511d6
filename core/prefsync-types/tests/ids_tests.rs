use prefsync_types::{DataCategory, Error, OwnerId};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

// ── OwnerId ───────────────────────────────────────────────────────

#[test]
fn owner_id_display_matches_input() {
    let id = OwnerId::new("abcdefghijklmnop");
    assert_eq!(id.to_string(), "abcdefghijklmnop");
    assert_eq!(id.as_str(), "abcdefghijklmnop");
}

#[test]
fn owner_id_parse_rejects_empty() {
    assert!(matches!(OwnerId::parse(""), Err(Error::EmptyIdentifier)));
    assert!(OwnerId::from_str("").is_err());
}

#[test]
fn owner_id_keeps_dots_literally() {
    let id = OwnerId::parse("com.example.ext").unwrap();
    assert_eq!(id.as_str(), "com.example.ext");
}

#[test]
fn owner_id_hash_and_eq() {
    let mut set = HashSet::new();
    set.insert(OwnerId::new("s1"));
    set.insert(OwnerId::from("s1"));
    assert_eq!(set.len(), 1);
}

#[test]
fn owner_id_lookup_by_str() {
    let mut map = HashMap::new();
    map.insert(OwnerId::new("good"), 1);
    assert_eq!(map.get("good"), Some(&1));
    assert_eq!(map.get("bad"), None);
}

#[test]
fn owner_id_ordering_is_lexicographic() {
    let mut ids = vec![OwnerId::new("b"), OwnerId::new("a"), OwnerId::new("c")];
    ids.sort();
    assert_eq!(ids, vec![OwnerId::new("a"), OwnerId::new("b"), OwnerId::new("c")]);
}

#[test]
fn owner_id_serializes_as_plain_string() {
    let id = OwnerId::new("ext.with.dots");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"ext.with.dots\"");
    let parsed: OwnerId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

// ── DataCategory ─────────────────────────────────────────────────

#[test]
fn well_known_categories_are_distinct() {
    assert_ne!(DataCategory::EXTENSION_SETTINGS, DataCategory::APP_SETTINGS);
    assert_eq!(DataCategory::EXTENSION_SETTINGS.as_str(), "extension-settings");
    assert_eq!(DataCategory::APP_SETTINGS.as_str(), "app-settings");
}

#[test]
fn static_and_owned_categories_compare_equal() {
    let owned = DataCategory::new("app-settings");
    assert_eq!(owned, DataCategory::APP_SETTINGS);

    let mut set = HashSet::new();
    set.insert(owned);
    set.insert(DataCategory::APP_SETTINGS);
    assert_eq!(set.len(), 1);
}

#[test]
fn category_from_str() {
    let category: DataCategory = "themes".parse().unwrap();
    assert_eq!(category.to_string(), "themes");
    assert!(DataCategory::from_str("").is_err());
}

#[test]
fn category_serialization_roundtrip() {
    let json = serde_json::to_string(&DataCategory::EXTENSION_SETTINGS).unwrap();
    assert_eq!(json, "\"extension-settings\"");
    let parsed: DataCategory = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, DataCategory::EXTENSION_SETTINGS);
}
