use refkeeper::cache::LookupCache;
use refkeeper::db::Database;
use refkeeper::resolution::*;
use refkeeper::types::*;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;

/// Helper: create a temp database and return (Database, TempDir).
/// The TempDir is returned so that it stays alive for the duration of the test.
fn setup_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("test.db");
    let db = Database::initialize(&db_path).expect("failed to initialize database");
    (db, dir)
}

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("test record must be an object")
}

fn project_descriptors() -> Vec<FieldDescriptor> {
    default_descriptors(Collection::Projects)
}

fn lookup_count(db: &Database, category: &str) -> usize {
    db.list_lookups(Some(category), false)
        .expect("failed to list lookups")
        .len()
}

#[test]
fn test_record_without_references_is_unchanged() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);
    let input = record(json!({"name": "Skyline", "floors": 12, "amenities": ["gym"]}));

    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    assert_eq!(resolution.record, input);
    assert!(!resolution.changed);
    assert!(resolution.failures.is_empty());
    assert_eq!(db.get_stats().unwrap().lookup_count, 0);
}

#[test]
fn test_valid_identifiers_are_kept_as_is() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);
    let a = ObjectId::new().to_string();
    let b = ObjectId::new().to_string();
    let input = record(json!({"status": a, "category": [a, b], "parkingType": null}));

    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    assert_eq!(resolution.record, input);
    assert!(!resolution.changed);
    assert_eq!(resolution.replaced, 0);
}

#[test]
fn test_existing_label_matches_case_insensitively() {
    let (db, _dir) = setup_db();
    let row = db.insert_lookup(&NewLookup::new("ProjectStatus", "Under Construction")).unwrap();
    let resolver = ReferenceResolver::new(&db);

    let input = record(json!({"status": "  under   CONSTRUCTION "}));
    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    assert_eq!(resolution.record["status"], row.id.to_value());
    assert_eq!(resolution.replaced, 1);
    assert_eq!(lookup_count(&db, "ProjectStatus"), 1);
}

#[test]
fn test_unknown_label_creates_exactly_one_row() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);

    let first = resolver
        .resolve(&record(json!({"status": "Ready to Move"})), &project_descriptors())
        .unwrap();
    let second = resolver
        .resolve(&record(json!({"status": "ready to move"})), &project_descriptors())
        .unwrap();

    assert_eq!(lookup_count(&db, "ProjectStatus"), 1);
    assert_eq!(first.record["status"], second.record["status"]);
    let id = ObjectId::from_value(&first.record["status"]).expect("status should be an id");
    let row = db.get_lookup(&id).unwrap().expect("row should exist");
    assert_eq!(row.label, "Ready to Move");
}

#[test]
fn test_mixed_array_keeps_ids_and_resolved_labels() {
    let (db, _dir) = setup_db();
    let known = db.insert_lookup(&NewLookup::new("Category", "Commercial")).unwrap();
    let valid = ObjectId::new();
    let descriptors = vec![
        FieldDescriptor::lookup("category", "Category").array().closed(),
    ];
    let resolver = ReferenceResolver::new(&db);

    let input = record(json!({"category": [valid.to_string(), "commercial", "Junk", 7, ""]}));
    let resolution = resolver.resolve(&input, &descriptors).unwrap();

    assert_eq!(
        resolution.record["category"],
        json!([valid.to_string(), known.id.to_string()])
    );
    assert_eq!(resolution.dropped, 3);
    // The blank element is dropped silently.
    assert_eq!(resolution.failures.len(), 2);
    assert_eq!(resolution.failures[0].field, "category[2]");
    assert_eq!(resolution.failures[0].reason, FailureReason::UnknownLabel);
    assert_eq!(resolution.failures[1].reason, FailureReason::UnsupportedValue);
    assert_eq!(lookup_count(&db, "Category"), 1);
}

#[test]
fn test_end_to_end_project_example() {
    let (db, _dir) = setup_db();
    let valid = ObjectId::new().to_string();
    let resolver = ReferenceResolver::new(&db);

    let input = record(json!({"status": "Upcoming", "category": ["Residential", valid]}));
    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    let status = db.find_lookup_by_label("ProjectStatus", "Upcoming").unwrap().expect("status row");
    let category = db.find_lookup_by_label("Category", "Residential").unwrap().expect("category row");
    assert_eq!(db.get_stats().unwrap().lookup_count, 2);
    assert_eq!(
        Value::Object(resolution.record),
        json!({"status": status.id.to_string(), "category": [category.id.to_string(), valid]})
    );
    assert!(resolution.failures.is_empty());
}

#[test]
fn test_end_to_end_junk_owner_is_nulled() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);

    let input = record(json!({"owner": "Self"}));
    let resolution = resolver
        .resolve(&input, &default_descriptors(Collection::Deals))
        .unwrap();

    assert_eq!(Value::Object(resolution.record), json!({"owner": null}));
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].field, "owner");
    assert_eq!(resolution.failures[0].value, json!("Self"));
    assert_eq!(resolution.failures[0].reason, FailureReason::NotAnIdentifier);
    assert_eq!(db.get_stats().unwrap().lookup_count, 0);
}

#[test]
fn test_resolution_is_idempotent() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);
    let input = record(json!({
        "status": "Upcoming",
        "category": ["Residential", "Plots"],
        "developerId": "Self"
    }));

    let first = resolver.resolve(&input, &project_descriptors()).unwrap();
    let second = resolver.resolve(&first.record, &project_descriptors()).unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.record, first.record);
    assert!(second.failures.is_empty());
}

#[test]
fn test_entity_label_matches_one_record() {
    let (db, _dir) = setup_db();
    let acme = db
        .insert_record(Collection::Companies, &record(json!({"name": "Acme Builders"})))
        .unwrap();
    let resolver = ReferenceResolver::new(&db);

    let resolution = resolver
        .resolve(&record(json!({"developerId": "acme builders"})), &project_descriptors())
        .unwrap();
    assert_eq!(resolution.record["developerId"], acme.id.to_value());

    let missing = resolver
        .resolve(&record(json!({"developerId": "Nobody"})), &project_descriptors())
        .unwrap();
    assert_eq!(missing.record["developerId"], Value::Null);
    assert_eq!(missing.failures[0].reason, FailureReason::NoMatchingEntity);
    assert_eq!(db.count_records(Collection::Companies).unwrap(), 1);
}

#[test]
fn test_ambiguous_entity_label_is_not_matched() {
    let (db, _dir) = setup_db();
    for _ in 0..2 {
        db.insert_record(Collection::Companies, &record(json!({"name": "Twin"})))
            .unwrap();
    }
    let resolver = ReferenceResolver::new(&db);

    let resolution = resolver
        .resolve(&record(json!({"developerId": "Twin"})), &project_descriptors())
        .unwrap();
    assert_eq!(resolution.record["developerId"], Value::Null);
    assert_eq!(resolution.failures[0].reason, FailureReason::NoMatchingEntity);
}

#[test]
fn test_verify_policy_drops_dangling_identifiers() {
    let (db, _dir) = setup_db();
    let live = db.insert_lookup(&NewLookup::new("ProjectStatus", "Launched")).unwrap();
    let dangling = ObjectId::new();
    let resolver = ReferenceResolver::with_policy(&db, IdentifierPolicy::Verify);

    let input = record(json!({
        "status": live.id.to_string(),
        "parkingType": dangling.to_string(),
        "category": [dangling.to_string()]
    }));
    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    assert_eq!(resolution.record["status"], live.id.to_value());
    assert_eq!(resolution.record["parkingType"], Value::Null);
    assert_eq!(resolution.record["category"], json!([]));
    assert_eq!(resolution.nulled, 1);
    assert_eq!(resolution.dropped, 1);
    assert!(resolution
        .failures
        .iter()
        .all(|f| f.reason == FailureReason::DanglingIdentifier));
}

#[test]
fn test_trust_policy_keeps_dangling_identifiers() {
    let (db, _dir) = setup_db();
    let dangling = ObjectId::new().to_string();
    let resolver = ReferenceResolver::with_policy(&db, IdentifierPolicy::Trust);

    let input = record(json!({"parkingType": dangling}));
    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();
    assert!(!resolution.changed);
}

#[test]
fn test_nested_array_paths_fan_out() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);
    let input = record(json!({
        "name": "Asha",
        "educations": [
            {"education": "Graduate", "degree": "B.Com"},
            {"education": "graduate", "degree": null},
        ]
    }));

    let resolution = resolver
        .resolve(&input, &default_descriptors(Collection::Contacts))
        .unwrap();

    let educations = resolution.record["educations"].as_array().unwrap();
    assert_eq!(educations[0]["education"], educations[1]["education"]);
    assert!(ObjectId::from_value(&educations[0]["degree"]).is_some());
    assert_eq!(educations[1]["degree"], Value::Null);
    assert_eq!(lookup_count(&db, "Education"), 1);
    assert_eq!(lookup_count(&db, "Degree"), 1);
}

#[test]
fn test_scalar_edge_cases() {
    let (db, _dir) = setup_db();
    let resolver = ReferenceResolver::new(&db);
    let id = ObjectId::new();

    let input = record(json!({
        "status": "",
        "parkingType": ["Covered"],
        "category": "",
        "subCategory": "Villa",
        "developerId": {"_id": id.to_string()}
    }));
    let resolution = resolver.resolve(&input, &project_descriptors()).unwrap();

    assert_eq!(resolution.record["status"], Value::Null);
    assert_eq!(resolution.record["parkingType"], Value::Null);
    assert_eq!(resolution.record["category"], json!([]));
    assert_eq!(resolution.record["subCategory"].as_array().map(Vec::len), Some(1));
    assert_eq!(resolution.record["developerId"], id.to_value());
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].reason, FailureReason::ExpectedScalar);
}

#[test]
fn test_cached_table_reuses_answers_until_invalidated() {
    let (db, _dir) = setup_db();
    let cache = LookupCache::new(Duration::from_secs(60));
    let table = CachedReferenceTable::new(&db, &cache);

    let first = table.find_or_create("City", "Pune", true).unwrap().unwrap();
    assert!(!cache.is_empty());
    assert_eq!(table.find_or_create("City", " pune ", true).unwrap(), Some(first));

    db.delete_lookup(&first).unwrap();
    invalidate_category(&cache, "City");

    let second = table.find_or_create("City", "Pune", true).unwrap().unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_closed_category_never_creates() {
    let (db, _dir) = setup_db();
    let table: &dyn ReferenceTable = &db;
    assert_eq!(table.find_or_create("Role", "Admin", false).unwrap(), None);
    assert_eq!(lookup_count(&db, "Role"), 0);
    assert_eq!(table.find_or_create("Role", "   ", true).unwrap(), None);
}
