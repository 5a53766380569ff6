use predicates::prelude::*;
use assert_cmd::Command;
use tempfile::TempDir;

fn schemaless() -> Command {
    let mut cmd = Command::cargo_bin("schemaless").expect("binary");
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("FILE_LOCATION")
        .env_remove("SCHEMALESS_AUTH_TOKEN")
        .env_remove("SCHEMALESS_MEMCACHED")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn fingerprint_ignores_values_and_key_order() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("doc.json");
    std::fs::write(&input, r#"{"b": 1, "a": "x"}"#).unwrap();

    let output = schemaless()
        .args(["fingerprint", "--input"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["token"], "ab");
    assert_eq!(value["skeleton"], serde_json::json!({"a": "", "b": 0}));
}

#[test]
fn fingerprint_reads_yaml_from_stdin() {
    schemaless()
        .arg("fingerprint")
        .write_stdin("title: Hello\nmeta:\n  owner: ops\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""token":"meta.ownertitle""#));
}

#[test]
fn reverse_prints_target_to_source_paths() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source.json");
    let target = temp.path().join("target.json");
    std::fs::write(
        &source,
        r#"{"key": "T-1", "fields": {"summary": "Printer on fire"}}"#,
    )
    .unwrap();
    std::fs::write(
        &target,
        r#"{"id": "T-1", "title": "Printer on fire", "owner": "nobody"}"#,
    )
    .unwrap();

    let output = schemaless()
        .arg("reverse")
        .arg("--source")
        .arg(&source)
        .arg("--target")
        .arg(&target)
        .output()
        .unwrap();
    assert!(output.status.success());
    let mapping: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        mapping,
        serde_json::json!({"id": "key", "owner": "", "title": "fields.summary"})
    );
}

#[test]
fn translate_reports_unknown_standards() {
    let temp = TempDir::new().unwrap();
    schemaless()
        .arg("--store-dir")
        .arg(temp.path())
        .args(["translate", "nope"])
        .write_stdin(r#"{"title": "Hi"}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Standard 'nope' not found"));
}

#[test]
fn learned_mappings_survive_across_runs() {
    let temp = TempDir::new().unwrap();
    let store = temp.path().join("store");
    let cache = temp.path().join("cache");
    std::fs::create_dir_all(store.join("standards")).unwrap();
    std::fs::write(
        store.join("standards/ticket.json"),
        r#"{"id": "The ticket id", "title": "The ticket title"}"#,
    )
    .unwrap();
    let source = temp.path().join("source.json");
    let target = temp.path().join("target.json");
    std::fs::write(&source, r#"{"key": "T-1", "summary": "Broken"}"#).unwrap();
    std::fs::write(&target, r#"{"id": "T-1", "title": "Broken"}"#).unwrap();

    schemaless()
        .arg("--store-dir")
        .arg(&store)
        .args(["--cache-backend", "file", "--cache-dir"])
        .arg(&cache)
        .args(["learn", "ticket", "--source"])
        .arg(&source)
        .arg("--target")
        .arg(&target)
        .assert()
        .success();

    let output = schemaless()
        .arg("--store-dir")
        .arg(&store)
        .args(["--cache-backend", "file", "--cache-dir"])
        .arg(&cache)
        .args(["translate", "ticket.json", "--with-meta"])
        .write_stdin(r#"{"key": "T-2", "summary": "Still broken"}"#)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        value["document"],
        serde_json::json!({"id": "T-2", "title": "Still broken"})
    );
    assert_eq!(value["source"], "cache");
}

#[test]
fn memcached_backend_needs_a_server_address() {
    let temp = TempDir::new().unwrap();
    schemaless()
        .arg("--store-dir")
        .arg(temp.path())
        .args(["--cache-backend", "memcached", "translate", "ticket"])
        .write_stdin(r#"{"title": "Hi"}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--memcached-addr"));
}

#[test]
fn serve_refuses_non_loopback_without_public() {
    schemaless()
        .args(["serve", "--bind", "0.0.0.0:0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Refusing to bind"));
}

#[test]
fn serve_public_requires_auth_token() {
    schemaless()
        .args(["serve", "--public", "--bind", "0.0.0.0:0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--public requires an auth token"));
}
