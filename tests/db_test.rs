use refkeeper::db::{content_hash, Database};
use refkeeper::errors::RefKeeperError;
use refkeeper::types::*;
use serde_json::json;
use tempfile::TempDir;

/// Helper: create a temp database and return (Database, TempDir).
/// The TempDir is returned so that it stays alive for the duration of the test.
fn setup_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("test.db");
    let db = Database::initialize(&db_path).expect("failed to initialize database");
    (db, dir)
}

fn body(value: serde_json::Value) -> Record {
    value.as_object().cloned().expect("body must be an object")
}

#[test]
fn test_initialize_creates_database() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("subdir").join("refkeeper.db");
    let _db = Database::initialize(&db_path).expect("failed to initialize database");
    assert!(db_path.exists(), "database file should exist after initialize");
}

#[test]
fn test_open_missing_database_fails() {
    let dir = TempDir::new().unwrap();
    assert!(Database::open(&dir.path().join("absent.db")).is_err());
}

#[test]
fn test_insert_and_get_record() {
    let (db, _dir) = setup_db();
    let stored = db
        .insert_record(Collection::Projects, &body(json!({"name": "Skyline"})))
        .expect("failed to insert record");

    let fetched = db
        .get_record(Collection::Projects, &stored.id)
        .expect("failed to get record")
        .expect("record should exist");
    assert_eq!(fetched, stored);
    assert_eq!(fetched.body["name"], json!("Skyline"));
    assert!(db.record_exists(Collection::Projects, &stored.id).unwrap());
    // Collections are separate namespaces.
    assert!(db.get_record(Collection::Deals, &stored.id).unwrap().is_none());
}

#[test]
fn test_list_records_keyset_pages() {
    let (db, _dir) = setup_db();
    let mut ids: Vec<ObjectId> = (0..5)
        .map(|i| {
            db.insert_record(Collection::Leads, &body(json!({"firstName": format!("L{i}")})))
                .unwrap()
                .id
        })
        .collect();
    ids.sort();

    let first = db.list_records(Collection::Leads, None, 2).unwrap();
    let second = db
        .list_records(Collection::Leads, Some(&first[1].id), 2)
        .unwrap();
    let third = db
        .list_records(Collection::Leads, Some(&second[1].id), 2)
        .unwrap();

    let seen: Vec<ObjectId> = first
        .iter()
        .chain(&second)
        .chain(&third)
        .map(|r| r.id)
        .collect();
    assert_eq!(seen, ids);
    assert_eq!(third.len(), 1);
}

#[test]
fn test_update_and_delete_record() {
    let (db, _dir) = setup_db();
    let stored = db
        .insert_record(Collection::Companies, &body(json!({"name": "Acme"})))
        .unwrap();

    let updated = db
        .update_record(Collection::Companies, &stored.id, &body(json!({"name": "Acme Ltd"})))
        .unwrap();
    assert_eq!(updated.body["name"], json!("Acme Ltd"));
    assert_ne!(updated.content_hash, stored.content_hash);

    assert!(db.delete_record(Collection::Companies, &stored.id).unwrap());
    assert!(!db.delete_record(Collection::Companies, &stored.id).unwrap());
    let missing = db.update_record(Collection::Companies, &stored.id, &Record::new());
    assert!(matches!(missing, Err(RefKeeperError::NotFound { .. })));
}

#[test]
fn test_compare_and_swap_refuses_stale_hash() {
    let (db, _dir) = setup_db();
    let stored = db
        .insert_record(Collection::Deals, &body(json!({"stage": "Open"})))
        .unwrap();

    // Another writer changes the record after it was read.
    db.update_record(Collection::Deals, &stored.id, &body(json!({"stage": "Quote"})))
        .unwrap();

    let swapped = db
        .replace_record_if_unchanged(
            Collection::Deals,
            &stored.id,
            &stored.content_hash,
            &body(json!({"stage": "Booked"})),
        )
        .unwrap();
    assert!(!swapped);
    let current = db.get_record(Collection::Deals, &stored.id).unwrap().unwrap();
    assert_eq!(current.body["stage"], json!("Quote"));

    let swapped = db
        .replace_record_if_unchanged(
            Collection::Deals,
            &stored.id,
            &current.content_hash,
            &body(json!({"stage": "Booked"})),
        )
        .unwrap();
    assert!(swapped);
}

#[test]
fn test_content_hash_is_stable() {
    let a = body(json!({"name": "x", "n": 1}));
    let b = body(json!({"name": "x", "n": 1}));
    let c = body(json!({"name": "y", "n": 1}));
    assert_eq!(content_hash(&a), content_hash(&b));
    assert_ne!(content_hash(&a), content_hash(&c));
    assert_eq!(content_hash(&a).len(), 64);
}

#[test]
fn test_find_record_ids_by_field_is_case_insensitive() {
    let (db, _dir) = setup_db();
    let user = db
        .insert_record(Collection::Users, &body(json!({"name": "Ravi", "email": "Ravi@Example.com"})))
        .unwrap();

    let ids = db
        .find_record_ids_by_field(Collection::Users, "email", " ravi@example.COM ", 2)
        .unwrap();
    assert_eq!(ids, vec![user.id]);
    assert!(db
        .find_record_ids_by_field(Collection::Users, "email", "other@example.com", 2)
        .unwrap()
        .is_empty());
}

#[test]
fn test_find_record_ids_by_field_steps_into_arrays() {
    let (db, _dir) = setup_db();
    let asha = db
        .insert_record(
            Collection::Contacts,
            &body(json!({
                "name": "Asha",
                "phones": [{"number": "111"}, {"number": "98100"}],
                "tags": ["VIP", "Investor"]
            })),
        )
        .unwrap();
    db.insert_record(
        Collection::Contacts,
        &body(json!({"name": "Ravi", "phones": [{"number": 222}], "note": "98100"})),
    )
    .unwrap();

    let by_phone = db
        .find_record_ids_by_field(Collection::Contacts, "phones.number", "98100", 2)
        .unwrap();
    assert_eq!(by_phone, vec![asha.id]);
    let by_tag = db
        .find_record_ids_by_field(Collection::Contacts, "tags", "investor", 2)
        .unwrap();
    assert_eq!(by_tag, vec![asha.id]);
    let numeric = db
        .find_record_ids_by_field(Collection::Contacts, "phones.number", "222", 2)
        .unwrap();
    assert_eq!(numeric.len(), 1);
    assert!(db
        .find_record_ids_by_field(Collection::Contacts, "phones", "98100", 2)
        .unwrap()
        .is_empty());
}

#[test]
fn test_find_or_create_is_case_and_whitespace_insensitive() {
    let (db, _dir) = setup_db();

    let (first, created) = db.find_or_create_lookup("City", "New  Delhi").unwrap().unwrap();
    assert!(created);
    assert_eq!(first.label, "New Delhi");

    for variant in ["new delhi", "  NEW DELHI ", "New\tDelhi"] {
        let (row, created) = db.find_or_create_lookup("City", variant).unwrap().unwrap();
        assert!(!created, "variant {variant:?} should reuse the row");
        assert_eq!(row.id, first.id);
    }
    assert_eq!(db.list_lookups(Some("City"), false).unwrap().len(), 1);

    // Same label in another category is a different row.
    let (other, _) = db.find_or_create_lookup("Location", "New Delhi").unwrap().unwrap();
    assert_ne!(other.id, first.id);
    assert!(db.find_or_create_lookup("City", "   ").unwrap().is_none());
}

#[test]
fn test_find_or_create_across_connections_converges() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("shared.db");
    let a = Database::initialize(&db_path).unwrap();
    let b = Database::open(&db_path).unwrap();

    let (row_a, created_a) = a.find_or_create_lookup("Source", "Walk-in").unwrap().unwrap();
    let (row_b, created_b) = b.find_or_create_lookup("Source", "walk-in").unwrap().unwrap();
    assert!(created_a);
    assert!(!created_b);
    assert_eq!(row_a.id, row_b.id);
}

#[test]
fn test_insert_lookup_conflict_and_validation() {
    let (db, _dir) = setup_db();
    db.insert_lookup(&NewLookup::new("Facing", "East")).unwrap();

    let clash = db.insert_lookup(&NewLookup::new("Facing", " east "));
    assert!(matches!(clash, Err(RefKeeperError::Conflict { .. })));

    let blank = db.insert_lookup(&NewLookup::new("Facing", "  "));
    assert!(matches!(blank, Err(RefKeeperError::Validation { .. })));
    let no_category = db.insert_lookup(&NewLookup::new("", "North"));
    assert!(matches!(no_category, Err(RefKeeperError::Validation { .. })));
}

#[test]
fn test_list_lookups_ordering_and_active_filter() {
    let (db, _dir) = setup_db();
    let insert = |label: &str, order: i64| {
        db.insert_lookup(&NewLookup {
            order,
            ..NewLookup::new("Budget", label)
        })
        .unwrap()
    };
    let high = insert("Above 1 Cr", 2);
    insert("50 L - 1 Cr", 1);
    insert("Below 50 L", 1);

    let labels: Vec<String> = db
        .list_lookups(Some("Budget"), false)
        .unwrap()
        .into_iter()
        .map(|r| r.label)
        .collect();
    assert_eq!(labels, vec!["50 L - 1 Cr", "Below 50 L", "Above 1 Cr"]);

    db.update_lookup(
        &high.id,
        &LookupPatch {
            active: Some(false),
            ..LookupPatch::default()
        },
    )
    .unwrap();
    assert_eq!(db.list_lookups(Some("Budget"), true).unwrap().len(), 2);
    assert_eq!(db.list_lookups(None, false).unwrap().len(), 3);
}

#[test]
fn test_update_lookup_rename_conflict() {
    let (db, _dir) = setup_db();
    db.insert_lookup(&NewLookup::new("Intent", "Sale")).unwrap();
    let rent = db.insert_lookup(&NewLookup::new("Intent", "Rent")).unwrap();

    let renamed = db.update_lookup(
        &rent.id,
        &LookupPatch {
            label: Some("SALE".to_string()),
            ..LookupPatch::default()
        },
    );
    assert!(matches!(renamed, Err(RefKeeperError::Conflict { .. })));

    let updated = db
        .update_lookup(
            &rent.id,
            &LookupPatch {
                label: Some("Lease".to_string()),
                metadata: Some(json!({"color": "blue"})),
                ..LookupPatch::default()
            },
        )
        .unwrap();
    assert_eq!(updated.label, "Lease");
    let fetched = db.get_lookup(&rent.id).unwrap().unwrap();
    assert_eq!(fetched.metadata, Some(json!({"color": "blue"})));
    assert!(db.find_lookup_by_label("Intent", "lease").unwrap().is_some());
}

#[test]
fn test_delete_lookup_returns_row() {
    let (db, _dir) = setup_db();
    let row = db.insert_lookup(&NewLookup::new("Title", "Dr.")).unwrap();
    assert_eq!(db.delete_lookup(&row.id).unwrap().map(|r| r.id), Some(row.id));
    assert!(db.delete_lookup(&row.id).unwrap().is_none());
}

#[test]
fn test_settings_upsert_get_list_delete() {
    let (db, _dir) = setup_db();
    let setting = SystemSetting {
        key: "branding".to_string(),
        category: "".to_string(),
        value: json!({"logo": "a.png"}),
        description: Some("Brand assets".to_string()),
        is_public: true,
        updated_at: 0,
    };
    let saved = db.upsert_setting(&setting).unwrap();
    assert_eq!(saved.category, "general");
    assert!(saved.updated_at > 0);

    db.upsert_setting(&SystemSetting {
        value: json!({"logo": "b.png"}),
        is_public: false,
        ..setting.clone()
    })
    .unwrap();
    let fetched = db.get_setting("branding").unwrap().unwrap();
    assert_eq!(fetched.value, json!({"logo": "b.png"}));

    assert_eq!(db.list_settings(Some("general"), false).unwrap().len(), 1);
    assert!(db.list_settings(None, true).unwrap().is_empty());

    assert!(db.delete_setting("branding").unwrap());
    assert!(!db.delete_setting("branding").unwrap());
    assert!(db.get_setting("branding").unwrap().is_none());
}

#[test]
fn test_checkpoints_save_and_clear() {
    let (db, _dir) = setup_db();
    let checkpoint = SweepCheckpoint {
        job: "nightly".to_string(),
        collection: Collection::Leads,
        last_id: ObjectId::new(),
        scanned: 400,
        changed: 12,
        updated_at: current_timestamp(),
    };
    db.save_checkpoint(&checkpoint).unwrap();
    assert_eq!(
        db.get_checkpoint("nightly", Collection::Leads).unwrap(),
        Some(checkpoint.clone())
    );
    assert!(db.get_checkpoint("nightly", Collection::Deals).unwrap().is_none());

    db.clear_checkpoint("nightly", Collection::Leads).unwrap();
    assert!(db.get_checkpoint("nightly", Collection::Leads).unwrap().is_none());
}

#[test]
fn test_get_stats() {
    let (db, _dir) = setup_db();
    db.insert_record(Collection::Contacts, &body(json!({"name": "A"}))).unwrap();
    db.insert_record(Collection::Contacts, &body(json!({"name": "B"}))).unwrap();
    db.insert_lookup(&NewLookup::new("City", "Pune")).unwrap();

    let stats = db.get_stats().unwrap();
    assert_eq!(stats.records_by_collection.get("contacts"), Some(&2));
    assert_eq!(stats.lookup_count, 1);
    assert_eq!(stats.lookups_by_category.get("City"), Some(&1));
    assert_eq!(stats.setting_count, 0);
    assert!(stats.db_size_bytes > 0);
}

#[test]
fn test_in_memory_database_has_schema() {
    let db = Database::in_memory().unwrap();
    let stored = db
        .insert_record(Collection::Inventory, &body(json!({"unitNumber": "A-101"})))
        .unwrap();
    assert_eq!(db.count_records(Collection::Inventory).unwrap(), 1);
    assert!(db.record_exists(Collection::Inventory, &stored.id).unwrap());
}
