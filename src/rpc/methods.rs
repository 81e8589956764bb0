//! RPC method definitions and handlers.
//!
//! Each handler parses its params, calls into [`RefKeeper`], and returns the
//! payload that goes under `data` in the success envelope.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::RefKeeperError;
use crate::refkeeper::{parse_id, RefKeeper};
use crate::resolution::IdentifierPolicy;
use crate::types::{Collection, LookupPatch, NewLookup, Record, SystemSetting};

/// Default page size of `records.list`.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page `records.list` will return.
const MAX_LIST_LIMIT: usize = 1000;

/// Why a method call did not produce data.
#[derive(Debug)]
pub enum CallError {
    /// No method of that name.
    UnknownMethod(String),
    /// Params are missing or malformed; a protocol error.
    InvalidParams(String),
    /// The store refused the operation; reported in the envelope.
    Domain(RefKeeperError),
}

impl From<RefKeeperError> for CallError {
    fn from(err: RefKeeperError) -> Self {
        CallError::Domain(err)
    }
}

type CallResult = std::result::Result<Value, CallError>;

/// Describes one method for `rpc.methods`.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Value,
}

fn method(name: &'static str, description: &'static str, params: Value) -> MethodDefinition {
    MethodDefinition {
        name,
        description,
        params,
    }
}

/// Returns the definitions of every method the service answers.
pub fn get_method_definitions() -> Vec<MethodDefinition> {
    vec![
        method("ping", "Liveness check.", json!({})),
        method(
            "status",
            "Store statistics, cache size and server counters.",
            json!({}),
        ),
        method(
            "records.create",
            "Resolve references, validate and store a new record.",
            json!({ "collection": "string", "record": "object" }),
        ),
        method(
            "records.get",
            "Fetch one record by id.",
            json!({ "collection": "string", "id": "string" }),
        ),
        method(
            "records.list",
            "Keyset page of records ordered by id.",
            json!({ "collection": "string", "after": "string?", "limit": "number?" }),
        ),
        method(
            "records.update",
            "Resolve a patch and merge it over a stored record.",
            json!({ "collection": "string", "id": "string", "patch": "object" }),
        ),
        method(
            "records.delete",
            "Delete one record by id.",
            json!({ "collection": "string", "id": "string" }),
        ),
        method(
            "records.import",
            "Create many records; failures are reported per row.",
            json!({ "collection": "string", "rows": "array" }),
        ),
        method(
            "records.duplicates",
            "Stored records sharing a duplicate-checked value with a candidate.",
            json!({ "collection": "string", "record": "object", "excludeId": "string?" }),
        ),
        method(
            "records.resolve",
            "Run reference resolution without storing the record.",
            json!({ "collection": "string", "record": "object", "policy": "trust|verify?" }),
        ),
        method(
            "lookups.list",
            "List reference table rows, optionally by category or grouped.",
            json!({ "category": "string?", "activeOnly": "boolean?", "grouped": "boolean?" }),
        ),
        method(
            "lookups.create",
            "Add a reference table row.",
            json!({ "category": "string", "label": "string", "parentValue": "string?", "order": "number?", "metadata": "any?" }),
        ),
        method(
            "lookups.update",
            "Change a reference table row.",
            json!({ "id": "string", "patch": "object" }),
        ),
        method(
            "lookups.delete",
            "Remove a reference table row.",
            json!({ "id": "string" }),
        ),
        method(
            "lookups.seed",
            "Insert many reference table rows; existing ones are reported.",
            json!({ "rows": "array" }),
        ),
        method(
            "settings.list",
            "List system settings.",
            json!({ "category": "string?", "publicOnly": "boolean?" }),
        ),
        method("settings.get", "Fetch one setting.", json!({ "key": "string" })),
        method(
            "settings.upsert",
            "Create or replace a setting.",
            json!({ "key": "string", "value": "any", "category": "string?", "description": "string?", "isPublic": "boolean?" }),
        ),
        method("settings.delete", "Remove a setting.", json!({ "key": "string" })),
        method("rpc.methods", "This list.", json!({})),
    ]
}

/// Dispatches `name` to its handler.
///
/// `status` is answered by the server itself because it needs the server's
/// counters.
pub fn handle_method(rk: &RefKeeper, name: &str, params: &Value) -> CallResult {
    match name {
        "ping" => Ok(json!({})),
        "rpc.methods" => Ok(json!(get_method_definitions())),
        "records.create" => handle_records_create(rk, params),
        "records.get" => handle_records_get(rk, params),
        "records.list" => handle_records_list(rk, params),
        "records.update" => handle_records_update(rk, params),
        "records.delete" => handle_records_delete(rk, params),
        "records.import" => handle_records_import(rk, params),
        "records.duplicates" => handle_records_duplicates(rk, params),
        "records.resolve" => handle_records_resolve(rk, params),
        "lookups.list" => handle_lookups_list(rk, params),
        "lookups.create" => handle_lookups_create(rk, params),
        "lookups.update" => handle_lookups_update(rk, params),
        "lookups.delete" => handle_lookups_delete(rk, params),
        "lookups.seed" => handle_lookups_seed(rk, params),
        "settings.list" => handle_settings_list(rk, params),
        "settings.get" => handle_settings_get(rk, params),
        "settings.upsert" => handle_settings_upsert(rk, params),
        "settings.delete" => handle_settings_delete(rk, params),
        _ => Err(CallError::UnknownMethod(name.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Param helpers
// ---------------------------------------------------------------------------

fn str_param<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a str, CallError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CallError::InvalidParams(format!("missing required param '{}'", name)))
}

fn opt_str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str())
}

fn bool_param(params: &Value, name: &str) -> bool {
    params.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn object_param<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a Record, CallError> {
    params
        .get(name)
        .and_then(|v| v.as_object())
        .ok_or_else(|| CallError::InvalidParams(format!("param '{}' must be an object", name)))
}

fn array_param<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a [Value], CallError> {
    params
        .get(name)
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .ok_or_else(|| CallError::InvalidParams(format!("param '{}' must be an array", name)))
}

fn collection_param(params: &Value) -> std::result::Result<Collection, CallError> {
    let name = str_param(params, "collection")?;
    Collection::from_str(name)
        .ok_or_else(|| CallError::InvalidParams(format!("unknown collection '{}'", name)))
}

fn decode_param<T: DeserializeOwned>(value: Value, what: &str) -> std::result::Result<T, CallError> {
    serde_json::from_value(value)
        .map_err(|e| CallError::InvalidParams(format!("invalid {}: {}", what, e)))
}

fn to_data<T: Serialize>(value: &T) -> CallResult {
    serde_json::to_value(value).map_err(|e| CallError::Domain(e.into()))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

fn handle_records_create(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let record = object_param(params, "record")?;
    Ok(rk.create(collection, record)?.to_json())
}

fn handle_records_get(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let id = str_param(params, "id")?;
    Ok(rk.get(collection, id)?.to_document())
}

fn handle_records_list(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let after = opt_str_param(params, "after");
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).clamp(1, MAX_LIST_LIMIT))
        .unwrap_or(DEFAULT_LIST_LIMIT);

    let page = rk.list(collection, after, limit)?;
    let next = if page.len() == limit {
        page.last().map(|r| r.id.to_value())
    } else {
        None
    };
    let records: Vec<Value> = page.iter().map(|r| r.to_document()).collect();
    Ok(json!({ "records": records, "next": next }))
}

fn handle_records_update(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let id = str_param(params, "id")?;
    let patch = object_param(params, "patch")?;
    Ok(rk.update(collection, id, patch)?.to_json())
}

fn handle_records_delete(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let id = str_param(params, "id")?;
    rk.delete(collection, id)?;
    Ok(json!({ "deleted": id }))
}

fn handle_records_import(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let rows = array_param(params, "rows")?;
    to_data(&rk.bulk_import(collection, rows))
}

fn handle_records_duplicates(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let record = object_param(params, "record")?;
    let exclude = opt_str_param(params, "excludeId")
        .map(|id| parse_id(collection.entity_name(), id))
        .transpose()?;
    to_data(&rk.find_duplicates(collection, record, exclude.as_ref())?)
}

fn handle_records_resolve(rk: &RefKeeper, params: &Value) -> CallResult {
    let collection = collection_param(params)?;
    let record = object_param(params, "record")?;
    let policy: Option<IdentifierPolicy> = params
        .get("policy")
        .cloned()
        .map(|p| decode_param(p, "policy"))
        .transpose()?;
    to_data(&rk.resolve(collection, record, policy)?)
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

fn handle_lookups_list(rk: &RefKeeper, params: &Value) -> CallResult {
    let active_only = bool_param(params, "activeOnly");
    if bool_param(params, "grouped") {
        return to_data(&rk.lookups_by_category(active_only)?);
    }
    to_data(&rk.list_lookups(opt_str_param(params, "category"), active_only)?)
}

fn handle_lookups_create(rk: &RefKeeper, params: &Value) -> CallResult {
    let new: NewLookup = decode_param(params.clone(), "lookup")?;
    to_data(&rk.create_lookup(&new)?)
}

fn handle_lookups_update(rk: &RefKeeper, params: &Value) -> CallResult {
    let id = str_param(params, "id")?;
    let patch: LookupPatch = decode_param(Value::Object(object_param(params, "patch")?.clone()), "patch")?;
    to_data(&rk.update_lookup(id, &patch)?)
}

fn handle_lookups_delete(rk: &RefKeeper, params: &Value) -> CallResult {
    let id = str_param(params, "id")?;
    to_data(&rk.delete_lookup(id)?)
}

fn handle_lookups_seed(rk: &RefKeeper, params: &Value) -> CallResult {
    let rows: Vec<NewLookup> = decode_param(Value::Array(array_param(params, "rows")?.to_vec()), "rows")?;
    to_data(&rk.seed_lookups(&rows))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn handle_settings_list(rk: &RefKeeper, params: &Value) -> CallResult {
    to_data(&rk.list_settings(
        opt_str_param(params, "category"),
        bool_param(params, "publicOnly"),
    )?)
}

fn handle_settings_get(rk: &RefKeeper, params: &Value) -> CallResult {
    to_data(&rk.get_setting(str_param(params, "key")?)?)
}

fn handle_settings_upsert(rk: &RefKeeper, params: &Value) -> CallResult {
    let setting: SystemSetting = decode_param(params.clone(), "setting")?;
    to_data(&rk.upsert_setting(&setting)?)
}

fn handle_settings_delete(rk: &RefKeeper, params: &Value) -> CallResult {
    let key = str_param(params, "key")?;
    rk.delete_setting(key)?;
    Ok(json!({ "deleted": key }))
}
