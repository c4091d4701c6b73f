use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::tempdir;

#[allow(deprecated)]
fn rag_store(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rag-store").expect("binary");
    cmd.env("RAG_EMBEDDING_MODE", "stub")
        .env("RAG_EMBEDDING_DIM", "64")
        .env("RAG_TOP_K", "3")
        .env("RAG_DATA_DIR", data_dir)
        .env_remove("RUST_LOG");
    cmd
}

fn run_json_raw(data_dir: &Path, args: &[&str]) -> (bool, Value) {
    let output = rag_store(data_dir)
        .arg("--json")
        .args(args)
        .output()
        .expect("command run");
    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    (output.status.success(), body)
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let (ok, body) = run_json_raw(data_dir, args);
    assert!(ok, "args: {args:?}\nstdout: {body}");
    assert_eq!(body["status"], "ok");
    body
}

#[test]
fn add_list_search_get_delete_round() {
    let temp = tempdir().unwrap();
    let dir = temp.path();

    let added = run_json(
        dir,
        &[
            "add",
            "doc1",
            "--source",
            "pets.txt",
            "--meta",
            "page=2",
            "Cats are small.",
            "Dogs are loud.",
        ],
    );
    assert_eq!(added["data"], json!({"groupId": "doc1", "added": 2}));
    assert!(dir.join("documents.json").exists());

    let listed = run_json(dir, &["list"]);
    assert_eq!(
        listed["data"]["groups"],
        json!([{"id": "doc1", "name": "pets.txt", "chunkCount": 2}])
    );

    let found = run_json(dir, &["search", "Cats are small.", "-k", "1"]);
    let hits = found["data"]["hits"].as_array().expect("hits");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["content"], "Cats are small.");
    assert_eq!(hits[0]["groupId"], "doc1");
    assert_eq!(hits[0]["metadata"]["page"], json!(2));
    assert_eq!(hits[0]["metadata"]["chunkIndex"], json!(0));

    let doc = run_json(dir, &["get", "doc1"]);
    assert_eq!(doc["data"]["fullContent"], "Cats are small.\n\nDogs are loud.");
    assert_eq!(doc["data"]["chunkCount"], 2);

    let deleted = run_json(dir, &["delete", "doc1"]);
    assert_eq!(deleted["data"]["deleted"], json!(true));
    let again = run_json(dir, &["delete", "doc1"]);
    assert_eq!(again["data"]["deleted"], json!(false));

    let empty = run_json(dir, &["search", "Cats are small."]);
    assert_eq!(empty["data"]["hits"], json!([]));
    assert_eq!(empty["data"]["limit"], json!(3));
}

#[test]
fn missing_document_is_ok_with_null_data() {
    let temp = tempdir().unwrap();
    let body = run_json(temp.path(), &["get", "ghost"]);
    assert_eq!(body["data"], Value::Null);
    assert_eq!(body["message"], "Document 'ghost' not found");
}

#[test]
fn status_reports_degraded_stub_backend() {
    let temp = tempdir().unwrap();
    run_json(temp.path(), &["add", "a", "--source", "a.txt", "one", "two"]);

    let body = run_json(temp.path(), &["status"]);
    assert_eq!(body["data"]["records"], 2);
    assert_eq!(body["data"]["groups"], 1);
    assert_eq!(body["data"]["dimension"], 64);
    assert_eq!(body["data"]["modelId"], "stub");
    assert_eq!(body["data"]["degraded"], json!(true));
}

#[test]
fn chunks_can_come_from_stdin() {
    let temp = tempdir().unwrap();
    let output = rag_store(temp.path())
        .args(["--json", "add", "notes", "--source", "notes.md", "--chunks-file", "-"])
        .write_stdin(r#"["first part", "second part"]"#)
        .output()
        .expect("command run");
    assert!(output.status.success());
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["data"]["added"], 2);
}

#[test]
fn errors_print_envelope_and_exit_nonzero() {
    let temp = tempdir().unwrap();

    let (ok, body) = run_json_raw(temp.path(), &["add", "doc", "--source", "x.txt"]);
    assert!(!ok);
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("No chunks given"));

    let (ok, body) = run_json_raw(temp.path(), &["add", " ", "--source", "x.txt", "text"]);
    assert!(!ok);
    assert!(body["message"].as_str().unwrap().starts_with("Failed to add"));
}

#[test]
fn invalid_configuration_is_reported() {
    let temp = tempdir().unwrap();
    let output = rag_store(temp.path())
        .env("RAG_TOP_K", "0")
        .args(["--json", "list"])
        .output()
        .expect("command run");
    assert!(!output.status.success());
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid RAG_* configuration"));
}

#[test]
fn model_mode_without_assets_fails_to_open() {
    let temp = tempdir().unwrap();
    let models = temp.path().join("no-models");
    let output = rag_store(temp.path())
        .args(["--json", "--embed-mode", "model", "--model-dir"])
        .arg(&models)
        .arg("status")
        .output()
        .expect("command run");
    assert!(!output.status.success());
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to open chunk store"));
}

#[test]
fn text_output_lists_documents() {
    let temp = tempdir().unwrap();
    run_json(temp.path(), &["add", "doc1", "--source", "pets.txt", "Cats."]);

    rag_store(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("doc1\tpets.txt\t1 chunks"));

    rag_store(temp.path())
        .args(["get", "doc1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cats."));

    rag_store(temp.path())
        .args(["get", "missing"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Document 'missing' not found"));
}

#[test]
fn flush_migrates_legacy_snapshot() {
    let temp = tempdir().unwrap();
    let legacy = json!([{
        "id": "old_chunk_0",
        "doc_id": "old",
        "content": "legacy text",
        "embedding": vec![0.1f32; 64],
        "metadata": {"source": "old.txt", "chunk_index": 0},
        "created_at": "2025-01-01T00:00:00"
    }]);
    let snapshot = temp.path().join("documents.json");
    std::fs::write(&snapshot, serde_json::to_vec(&legacy).unwrap()).unwrap();

    let body = run_json(temp.path(), &["flush"]);
    assert_eq!(body["data"]["records"], 1);

    let raw: Value = serde_json::from_slice(&std::fs::read(&snapshot).unwrap()).unwrap();
    assert_eq!(raw[0]["groupId"], "old");
    assert!(raw[0].get("doc_id").is_none());
    assert_eq!(raw[0]["metadata"]["chunkIndex"], json!(0));
    assert!(raw[0]["metadata"].get("chunk_index").is_none());
}
