use prefsync_types::{
    ChangeOrigin, ChangeType, DataCategory, OwnerId, SettingEntity, SyncChangeRecord,
};
use proptest::prelude::*;
use serde_json::json;

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id)
}

#[test]
fn add_record_accessors() {
    let record = SyncChangeRecord::add(
        DataCategory::EXTENSION_SETTINGS,
        owner("s1"),
        "foo",
        json!("fooValue"),
    );

    assert_eq!(record.change_type(), ChangeType::Add);
    assert_eq!(record.owner(), &owner("s1"));
    assert_eq!(record.key(), "foo");
    assert_eq!(record.value(), &json!("fooValue"));
    assert_eq!(record.category(), &DataCategory::EXTENSION_SETTINGS);
}

#[test]
fn update_record_type() {
    let record =
        SyncChangeRecord::update(DataCategory::APP_SETTINGS, owner("a"), "k", json!({"x": 1}));
    assert_eq!(record.change_type(), ChangeType::Update);
}

#[test]
fn delete_record_carries_null() {
    let record = SyncChangeRecord::delete(DataCategory::APP_SETTINGS, owner("a"), "k");
    assert_eq!(record.change_type(), ChangeType::Delete);
    assert!(record.value().is_null());
}

#[test]
fn tag_joins_owner_and_key() {
    let record = SyncChangeRecord::add(
        DataCategory::EXTENSION_SETTINGS,
        owner("ext"),
        "key.with.dot",
        json!("value"),
    );
    assert_eq!(record.tag(), "ext/key.with.dot");
}

#[test]
fn display_names_change_and_category() {
    let record = SyncChangeRecord::delete(DataCategory::EXTENSION_SETTINGS, owner("s1"), "foo");
    assert_eq!(record.to_string(), "DELETE s1/foo [extension-settings]");
}

#[test]
fn change_type_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&ChangeType::Update).unwrap(), "\"update\"");
    assert_eq!(serde_json::to_string(&ChangeOrigin::Remote).unwrap(), "\"remote\"");
}

#[test]
fn record_serialization_roundtrip() {
    let record = SyncChangeRecord::add(
        DataCategory::APP_SETTINGS,
        owner("good"),
        "bar",
        json!([1, 2, 3]),
    );
    let json = serde_json::to_string(&record).unwrap();
    let parsed: SyncChangeRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, record);
}

#[test]
fn setting_entity_new() {
    let entity = SettingEntity::new("s1", "foo", json!(true));
    assert_eq!(entity.owner, owner("s1"));
    assert_eq!(entity.key, "foo");
    assert_eq!(entity.value, json!(true));
}

proptest! {
    #[test]
    fn tag_always_starts_with_owner(o in "[a-z.]{1,12}", k in "[a-z./]{0,12}") {
        let record = SyncChangeRecord::delete(DataCategory::APP_SETTINGS, OwnerId::new(o.clone()), k.clone());
        let tag = record.tag();
        let prefix = format!("{}/", o);
        prop_assert!(tag.starts_with(&prefix));
        prop_assert!(tag.ends_with(&k));
    }
}
