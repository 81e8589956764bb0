use refkeeper::rpc::*;
use refkeeper::types::ObjectId;
use refkeeper::RefKeeper;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::BufReader;

fn setup() -> (RpcServer, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let rk = RefKeeper::init(dir.path()).expect("failed to init store");
    (RpcServer::new(rk), dir)
}

/// Sends one request and returns the parsed response.
fn call(server: &RpcServer, method: &str, params: Value) -> Value {
    let line = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string();
    let output = server.handle_line(&line).expect("request should get a response");
    serde_json::from_str(&output).expect("response should be JSON")
}

/// Sends one request and returns the envelope under `result`.
fn envelope(server: &RpcServer, method: &str, params: Value) -> Value {
    let response = call(server, method, params);
    assert!(response.get("error").is_none(), "unexpected protocol error: {response}");
    response["result"].clone()
}

#[test]
fn test_parse_jsonrpc_request() {
    let msg = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "records.get",
        "params": {}
    });

    let request: JsonRpcRequest = serde_json::from_value(msg).unwrap();
    assert_eq!(request.method, "records.get");
    assert_eq!(request.id, Value::Number(1.into()));
}

#[test]
fn test_success_response_omits_error() {
    let response = JsonRpcResponse::success(Value::Number(42.into()), json!({"ok": true}));
    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"result\""));
    assert!(!json.contains("\"error\""));
}

#[test]
fn test_error_codes() {
    assert_eq!(ErrorCode::ParseError.as_i32(), -32700);
    assert_eq!(ErrorCode::InvalidRequest.as_i32(), -32600);
    assert_eq!(ErrorCode::MethodNotFound.as_i32(), -32601);
    assert_eq!(ErrorCode::InvalidParams.as_i32(), -32602);
    assert_eq!(ErrorCode::InternalError.as_i32(), -32603);
}

#[test]
fn test_ping_and_method_list() {
    let (server, _dir) = setup();
    assert_eq!(envelope(&server, "ping", json!({})), json!({"success": true, "data": {}}));

    let methods = envelope(&server, "rpc.methods", json!({}));
    let names: Vec<&str> = methods["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert!(names.contains(&"records.create"));
    assert!(names.contains(&"lookups.seed"));
}

#[test]
fn test_create_and_get_record() {
    let (server, _dir) = setup();
    let created = envelope(
        &server,
        "records.create",
        json!({"collection": "deals", "record": {"owner": "Self", "source": "Walk-in"}}),
    );
    assert_eq!(created["success"], json!(true));
    let data = &created["data"];
    assert_eq!(data["record"]["owner"], Value::Null);
    assert_eq!(data["failures"][0]["reason"], json!("not_an_identifier"));
    assert!(ObjectId::from_value(&data["record"]["source"]).is_some());

    let id = data["record"]["_id"].as_str().unwrap();
    let fetched = envelope(&server, "records.get", json!({"collection": "deal", "id": id}));
    assert_eq!(fetched["data"]["_id"], json!(id));
}

#[test]
fn test_domain_errors_use_envelope_status() {
    let (server, _dir) = setup();

    let invalid = envelope(
        &server,
        "records.create",
        json!({"collection": "leads", "record": {"firstName": "Asha"}}),
    );
    assert_eq!(invalid["success"], json!(false));
    assert_eq!(invalid["status"], json!(400));
    assert_eq!(invalid["fields"][0]["field"], json!("mobile"));

    let missing = envelope(
        &server,
        "records.get",
        json!({"collection": "leads", "id": ObjectId::new().to_string()}),
    );
    assert_eq!(missing["status"], json!(404));

    envelope(&server, "lookups.create", json!({"category": "City", "label": "Pune"}));
    let clash = envelope(&server, "lookups.create", json!({"category": "City", "label": "PUNE"}));
    assert_eq!(clash["status"], json!(409));
}

#[test]
fn test_protocol_errors() {
    let (server, _dir) = setup();

    let unknown = call(&server, "records.explode", json!({}));
    assert_eq!(unknown["error"]["code"], json!(-32601));

    let bad_params = call(&server, "records.get", json!({"collection": "leads"}));
    assert_eq!(bad_params["error"]["code"], json!(-32602));

    let bad_collection = call(&server, "records.list", json!({"collection": "planets"}));
    assert_eq!(bad_collection["error"]["code"], json!(-32602));

    let output = server.handle_line("{ not json").unwrap();
    let parsed: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["error"]["code"], json!(-32700));
    assert_eq!(parsed["id"], Value::Null);
}

#[test]
fn test_notifications_and_blank_lines_get_no_response() {
    let (server, _dir) = setup();
    assert!(server.handle_line("   ").is_none());
    assert!(server
        .handle_line(r#"{"jsonrpc": "2.0", "method": "ping"}"#)
        .is_none());
}

#[test]
fn test_list_pages_with_cursor() {
    let (server, _dir) = setup();
    for i in 0..3 {
        envelope(
            &server,
            "records.create",
            json!({"collection": "contacts", "record": {"name": format!("C{i}")}}),
        );
    }

    let first = envelope(&server, "records.list", json!({"collection": "contacts", "limit": 2}));
    assert_eq!(first["data"]["records"].as_array().unwrap().len(), 2);
    let next = first["data"]["next"].as_str().unwrap().to_string();

    let second = envelope(
        &server,
        "records.list",
        json!({"collection": "contacts", "limit": 2, "after": next}),
    );
    assert_eq!(second["data"]["records"].as_array().unwrap().len(), 1);
    assert_eq!(second["data"]["next"], Value::Null);
}

#[test]
fn test_import_resolve_and_duplicates() {
    let (server, _dir) = setup();
    let report = envelope(
        &server,
        "records.import",
        json!({"collection": "leads", "rows": [
            {"firstName": "Asha", "mobile": "111"},
            {"firstName": "Broken"}
        ]}),
    );
    assert_eq!(report["data"]["succeeded"], json!(1));
    assert_eq!(report["data"]["errors"][0]["index"], json!(1));

    let duplicates = envelope(
        &server,
        "records.duplicates",
        json!({"collection": "leads", "record": {"mobile": "111"}}),
    );
    assert_eq!(duplicates["data"][0]["field"], json!("mobile"));

    let resolved = envelope(
        &server,
        "records.resolve",
        json!({"collection": "projects", "record": {"status": "Upcoming"}, "policy": "verify"}),
    );
    assert_eq!(resolved["data"]["replaced"], json!(1));
    assert_eq!(resolved["data"]["changed"], json!(true));
}

#[test]
fn test_lookup_and_setting_methods() {
    let (server, _dir) = setup();
    let seeded = envelope(
        &server,
        "lookups.seed",
        json!({"rows": [{"category": "City", "label": "Pune"}, {"category": "State", "label": "MH"}]}),
    );
    assert_eq!(seeded["data"]["succeeded"], json!(2));

    let grouped = envelope(&server, "lookups.list", json!({"grouped": true}));
    assert_eq!(grouped["data"]["City"][0]["label"], json!("Pune"));

    let id = grouped["data"]["City"][0]["_id"].as_str().unwrap().to_string();
    let updated = envelope(
        &server,
        "lookups.update",
        json!({"id": id, "patch": {"active": false}}),
    );
    assert_eq!(updated["data"]["active"], json!(false));
    let active = envelope(&server, "lookups.list", json!({"category": "City", "activeOnly": true}));
    assert_eq!(active["data"], json!([]));
    let deleted = envelope(&server, "lookups.delete", json!({"id": id}));
    assert_eq!(deleted["success"], json!(true));

    envelope(
        &server,
        "settings.upsert",
        json!({"key": "theme", "value": {"dark": true}, "isPublic": true}),
    );
    let setting = envelope(&server, "settings.get", json!({"key": "theme"}));
    assert_eq!(setting["data"]["value"], json!({"dark": true}));
    assert_eq!(setting["data"]["category"], json!("general"));
    let public = envelope(&server, "settings.list", json!({"publicOnly": true}));
    assert_eq!(public["data"].as_array().unwrap().len(), 1);
    envelope(&server, "settings.delete", json!({"key": "theme"}));
    let gone = envelope(&server, "settings.get", json!({"key": "theme"}));
    assert_eq!(gone["status"], json!(404));
}

#[test]
fn test_status_reports_counters() {
    let (server, _dir) = setup();
    envelope(&server, "ping", json!({}));
    call(&server, "nope", json!({}));

    let status = envelope(&server, "status", json!({}));
    let data = &status["data"];
    assert_eq!(data["server"]["total_requests"], json!(3));
    assert_eq!(data["server"]["protocol_errors"], json!(1));
    assert!(data["store"]["records_by_collection"].is_object());
}

#[tokio::test]
async fn test_serve_processes_stream() {
    let (server, _dir) = setup();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","method":"ping"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":"two","method":"lookups.list"}"#,
        "\n"
    );
    let mut output = Vec::new();
    server
        .serve(BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], json!(1));
    assert_eq!(lines[1]["id"], json!("two"));
    assert_eq!(lines[1]["result"]["success"], json!(true));
}
