use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A semi-structured document: field name to JSON value.
pub type Record = Map<String, Value>;

/// Fields owned by the store and never accepted from callers.
pub const SYSTEM_FIELDS: &[&str] = &["_id", "createdAt", "updatedAt"];

/// Returns the current UNIX timestamp in seconds.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Canonical identifier
// ---------------------------------------------------------------------------

/// Fixed-width primary key: 4-byte timestamp, 5 process-random bytes and a
/// 3-byte counter, rendered as 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(rand::random::<[u8; 5]>)
}

fn counter() -> &'static AtomicU32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER.get_or_init(|| AtomicU32::new(rand::random::<u32>()))
}

impl ObjectId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        let secs = current_timestamp() as u32;
        let count = counter().fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds since the epoch encoded in the first four bytes.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Parses exactly 24 hex digits (either case). Anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let decoded = hex::decode(s).ok()?;
        let bytes: [u8; 12] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Returns `true` if `s` is a well-formed identifier.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_some()
    }

    /// Extracts an identifier from a JSON value.
    ///
    /// Accepts a hex string, or an embedded document carrying the id under
    /// `_id`, `id` or `$oid` (a populated reference written back verbatim).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s.trim()),
            Value::Object(map) => ["_id", "id", "$oid"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(Self::from_value),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ObjectId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("not a valid identifier: '{}'", s))
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The record collections managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Contacts,
    Companies,
    Projects,
    Inventory,
    Leads,
    Deals,
    Users,
}

#[allow(clippy::should_implement_trait)]
impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Contacts => "contacts",
            Collection::Companies => "companies",
            Collection::Projects => "projects",
            Collection::Inventory => "inventory",
            Collection::Leads => "leads",
            Collection::Deals => "deals",
            Collection::Users => "users",
        }
    }

    /// Parses a collection name, accepting the singular forms too.
    pub fn from_str(s: &str) -> Option<Collection> {
        match s.trim().to_lowercase().as_str() {
            "contacts" | "contact" => Some(Collection::Contacts),
            "companies" | "company" => Some(Collection::Companies),
            "projects" | "project" => Some(Collection::Projects),
            "inventory" | "inventories" => Some(Collection::Inventory),
            "leads" | "lead" => Some(Collection::Leads),
            "deals" | "deal" => Some(Collection::Deals),
            "users" | "user" => Some(Collection::Users),
            _ => None,
        }
    }

    pub fn all() -> &'static [Collection] {
        &[
            Collection::Contacts,
            Collection::Companies,
            Collection::Projects,
            Collection::Inventory,
            Collection::Leads,
            Collection::Deals,
            Collection::Users,
        ]
    }

    /// Human-readable singular noun used in error messages.
    pub fn entity_name(&self) -> &'static str {
        match self {
            Collection::Contacts => "contact",
            Collection::Companies => "company",
            Collection::Projects => "project",
            Collection::Inventory => "inventory item",
            Collection::Leads => "lead",
            Collection::Deals => "deal",
            Collection::Users => "user",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A record as persisted, with its store-owned metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: ObjectId,
    pub collection: Collection,
    pub body: Record,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredRecord {
    /// Renders the record the way callers see it: body plus `_id` and
    /// timestamps.
    pub fn to_document(&self) -> Value {
        let mut doc = self.body.clone();
        doc.insert("_id".to_string(), self.id.to_value());
        doc.insert("createdAt".to_string(), Value::from(self.created_at));
        doc.insert("updatedAt".to_string(), Value::from(self.updated_at));
        Value::Object(doc)
    }
}

// ---------------------------------------------------------------------------
// Reference table
// ---------------------------------------------------------------------------

/// Trims a label and collapses internal whitespace. Blank labels yield `None`.
pub fn normalize_label(label: &str) -> Option<String> {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Case-insensitive uniqueness key for a label within its category.
pub fn label_key(label: &str) -> Option<String> {
    normalize_label(label).map(|l| l.to_lowercase())
}

/// A row of the shared reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRow {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub category: String,
    pub label: String,
    pub parent_value: Option<String>,
    pub order: i64,
    pub active: bool,
    pub metadata: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a lookup row through the admin or seed path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLookup {
    pub category: String,
    pub label: String,
    #[serde(default)]
    pub parent_value: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewLookup {
    pub fn new(category: &str, label: &str) -> Self {
        Self {
            category: category.to_string(),
            label: label.to_string(),
            ..Default::default()
        }
    }
}

/// Partial update of a lookup row; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupPatch {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub parent_value: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

// ---------------------------------------------------------------------------
// System settings
// ---------------------------------------------------------------------------

/// A configuration blob stored under a unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSetting {
    pub key: String,
    #[serde(default = "default_setting_category")]
    pub category: String,
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_setting_category() -> String {
    "general".to_string()
}

// ---------------------------------------------------------------------------
// Bulk operations and statistics
// ---------------------------------------------------------------------------

/// One failed row of a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub index: usize,
    pub status: u16,
    pub message: String,
}

/// Outcome of a bulk import or seed: partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ids: Vec<ObjectId>,
    pub errors: Vec<RowError>,
}

/// A stored record sharing a duplicate-checked value with a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub id: ObjectId,
    pub field: String,
    pub value: String,
}

/// Aggregate statistics about the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub records_by_collection: BTreeMap<String, u64>,
    pub lookup_count: u64,
    pub lookups_by_category: BTreeMap<String, u64>,
    pub setting_count: u64,
    pub db_size_bytes: u64,
}

/// Progress marker of a resumable sweep over one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepCheckpoint {
    pub job: String,
    pub collection: Collection,
    pub last_id: ObjectId,
    pub scanned: u64,
    pub changed: u64,
    pub updated_at: i64,
}
