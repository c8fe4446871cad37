// CLI integration tests for fixture-backed reads.
use std::path::Path;
use std::process::Command;

use serde_json::Value;

const FIXTURE: &str = r#"{
    "tables": [{
        "db": "t",
        "table": "u",
        "columns": [
            {"name": "id", "type": "int", "primaryKey": true},
            {"name": "name", "type": "varchar", "length": 32},
            {"name": "joined", "type": "date"}
        ],
        "rows": [
            {"id": 5, "name": "bob", "joined": "2021-06-01"},
            {"id": 6, "name": "eve", "joined": null}
        ]
    }],
    "apiNodes": [{"nodeId": 65, "status": "started"}]
}"#;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_rdrs-dal");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    parse_json(line)
}

fn write_fixture(dir: &Path) -> String {
    let path = dir.join("fixture.json");
    std::fs::write(&path, FIXTURE).expect("write fixture");
    path.to_str().expect("utf8 path").to_string()
}

#[test]
fn read_prints_code_and_body() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(temp.path());

    let found = cmd()
        .args(["--fixture", &fixture, "read", "--db", "t", "--table", "u", "--pk", "id=5"])
        .output()
        .expect("read");
    assert!(found.status.success());
    let json = parse_json_line(&found.stdout);
    assert_eq!(json["code"], 200);
    assert_eq!(json["body"]["Data"]["name"], "bob");
    assert_eq!(json["body"]["Data"]["joined"], "2021-06-01");

    let projected = cmd()
        .args([
            "--fixture", &fixture, "read", "--db", "t", "--table", "u", "--pk", "id=6", "--column",
            "joined", "--op-id", "r1",
        ])
        .output()
        .expect("read");
    assert!(projected.status.success());
    let json = parse_json_line(&projected.stdout);
    assert_eq!(json["body"]["operationId"], "r1");
    assert!(json["body"]["Data"]["joined"].is_null());
    assert!(json["body"]["Data"].get("name").is_none());
}

#[test]
fn missing_rows_and_bad_keys_map_to_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(temp.path());

    let missing = cmd()
        .args(["--fixture", &fixture, "read", "--db", "t", "--table", "u", "--pk", "id=999999"])
        .output()
        .expect("read");
    assert_eq!(missing.status.code(), Some(3));
    let json = parse_json_line(&missing.stdout);
    assert_eq!(json["code"], 404);
    assert!(json["body"].is_null());

    let bad = cmd()
        .args(["--fixture", &fixture, "read", "--db", "t", "--table", "u", "--pk", "name=bob"])
        .output()
        .expect("read");
    assert_eq!(bad.status.code(), Some(2));
    let err = parse_json_line(&bad.stderr);
    assert_eq!(err["error"]["kind"], "Client");
    assert_eq!(err["error"]["column"], "name");
}

#[test]
fn batch_reports_each_pair_and_pool_stats() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(temp.path());
    let requests = temp.path().join("requests.json");
    std::fs::write(
        &requests,
        r#"[
            {"db": "t", "table": "u", "filters": [{"column": "id", "value": 5}]},
            {"db": "t", "table": "u", "filters": [{"column": "id", "value": "7"}], "operationId": "b2"},
            {"db": "t", "table": "nope", "filters": [{"column": "id", "value": 5}]}
        ]"#,
    )
    .expect("write requests");

    let batch = cmd()
        .args([
            "--fixture",
            &fixture,
            "batch",
            "--requests",
            requests.to_str().expect("utf8 path"),
        ])
        .output()
        .expect("batch");
    assert!(batch.status.success());
    let json = parse_json_line(&batch.stdout);
    let results = json["results"].as_array().expect("results");
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["code"], 200);
    assert_eq!(results[1]["code"], 404);
    assert_eq!(results[2]["code"], 400);
    assert_eq!(results[2]["error"]["kind"], "Client");
    assert_eq!(json["stats"]["created"], 1);
    assert_eq!(json["stats"]["available"], 1);
}

#[test]
fn find_node_id_without_free_slot_fails_init() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(temp.path());

    let output = cmd()
        .args([
            "--fixture", &fixture, "--find-node-id", "read", "--db", "t", "--table", "u", "--pk",
            "id=5",
        ])
        .output()
        .expect("read");
    assert_eq!(output.status.code(), Some(1));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Server");
}

#[test]
fn missing_fixture_file_is_reported_as_json() {
    let output = cmd()
        .args([
            "--fixture",
            "/nonexistent/fixture.json",
            "read",
            "--db",
            "t",
            "--table",
            "u",
            "--pk",
            "id=1",
        ])
        .output()
        .expect("read");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert!(err["error"]["message"].as_str().expect("message").contains("fixture"));
    assert!(err["error"]["causes"].is_array());
}
