use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;

use otab_contracts::{OTABC_REPORT_SCHEMA_VERSION, OTAB_SCHEMA_VERSION};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(prefix: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    base.join(format!("{prefix}_{pid}_{n}"))
}

fn write_schema(dir: &PathBuf, name: &str, doc: &serde_json::Value) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create temp dir");
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(doc).expect("encode schema"))
        .expect("write schema file");
    path
}

#[test]
fn gen_report_json_is_stable_and_writes_the_script() {
    let dir = temp_dir("otabc_cli_gen");
    let schema_path = write_schema(
        &dir,
        "point.otab.json",
        &json!({
            "schema_version": OTAB_SCHEMA_VERSION,
            "types": [
                { "name": "Point", "fields": [ { "name": "x", "type": "float64" } ] },
            ],
        }),
    );
    let out_path = dir.join("point.m");

    let bin = env!("CARGO_BIN_EXE_otabc");
    let out = Command::new(bin)
        .arg("gen")
        .arg("--schema")
        .arg(&schema_path)
        .arg("--out")
        .arg(&out_path)
        .arg("--report-json")
        .output()
        .expect("run otabc gen --report-json");

    assert!(
        out.status.success(),
        "status={}\nstderr={}",
        out.status,
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse report json");
    assert_eq!(
        v.get("schema_version").and_then(|s| s.as_str()),
        Some(OTABC_REPORT_SCHEMA_VERSION)
    );
    assert_eq!(v.get("command").and_then(|s| s.as_str()), Some("gen"));
    assert_eq!(v.get("ok").and_then(|b| b.as_bool()), Some(true));
    assert_eq!(v.get("exit_code").and_then(|c| c.as_u64()), Some(0));
    assert!(v
        .get("schema_blake3")
        .and_then(|s| s.as_str())
        .is_some_and(|s| s.len() == 64));

    let script = std::fs::read_to_string(&out_path).expect("generated script exists");
    assert!(script.starts_with("% automatically generated by otabc, do not modify\n"));
    assert!(script.contains("function T = Point_Unpack(b, idxBuf)"));
    assert!(script.contains("function B = Point_Pack(T)"));
}

#[test]
fn check_reports_errors_with_exit_code_one() {
    let dir = temp_dir("otabc_cli_check");
    let schema_path = write_schema(
        &dir,
        "broken.otab.json",
        &json!({
            "schema_version": "otab.schema@9.9.9",
            "types": [],
        }),
    );

    let bin = env!("CARGO_BIN_EXE_otabc");
    let out = Command::new(bin)
        .arg("check")
        .arg("--schema")
        .arg(&schema_path)
        .arg("--report-json")
        .output()
        .expect("run otabc check --report-json");

    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse report json");
    assert_eq!(v.get("ok").and_then(|b| b.as_bool()), Some(false));
    assert_eq!(v.get("exit_code").and_then(|c| c.as_u64()), Some(1));
    let diags = v
        .get("diagnostics")
        .and_then(|d| d.as_array())
        .expect("diagnostics array");
    assert_eq!(diags.len(), 1);
    assert_eq!(
        diags[0].get("code").and_then(|c| c.as_str()),
        Some("OTAB-SCHEMA-PARSE-0001")
    );
}

#[test]
fn check_passes_a_clean_schema_and_surfaces_warnings() {
    let dir = temp_dir("otabc_cli_warn");
    let schema_path = write_schema(
        &dir,
        "warn.otab.json",
        &json!({
            "schema_version": OTAB_SCHEMA_VERSION,
            "types": [
                { "name": "T", "fields": [
                    { "name": "grid", "type": ["vector", ["vector", "int32"]] },
                ]},
            ],
        }),
    );

    let bin = env!("CARGO_BIN_EXE_otabc");
    let out = Command::new(bin)
        .arg("check")
        .arg("--schema")
        .arg(&schema_path)
        .arg("--report-json")
        .output()
        .expect("run otabc check --report-json");

    assert_eq!(out.status.code(), Some(0));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse report json");
    assert_eq!(v.get("ok").and_then(|b| b.as_bool()), Some(true));
    let diags = v
        .get("diagnostics")
        .and_then(|d| d.as_array())
        .expect("diagnostics array");
    assert_eq!(diags.len(), 1);
    assert_eq!(
        diags[0].get("code").and_then(|c| c.as_str()),
        Some("OTAB-LAYOUT-UNSUPPORTED-0001")
    );
    assert_eq!(
        diags[0].get("severity").and_then(|s| s.as_str()),
        Some("warning")
    );
}

#[test]
fn gen_fails_operationally_on_a_missing_schema_file() {
    let dir = temp_dir("otabc_cli_missing");
    let missing = dir.join("nope.otab.json");

    let bin = env!("CARGO_BIN_EXE_otabc");
    let out = Command::new(bin)
        .arg("gen")
        .arg("--schema")
        .arg(&missing)
        .arg("--report-json")
        .output()
        .expect("run otabc gen on missing schema");

    assert_eq!(out.status.code(), Some(2));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse report json");
    assert_eq!(v.get("ok").and_then(|b| b.as_bool()), Some(false));
    let diags = v
        .get("diagnostics")
        .and_then(|d| d.as_array())
        .expect("diagnostics array");
    assert_eq!(
        diags[0].get("code").and_then(|c| c.as_str()),
        Some("OTAB-IO-READ-0001")
    );
}
