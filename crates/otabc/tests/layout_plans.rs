use serde_json::json;

use otab_contracts::OTAB_SCHEMA_VERSION;
use otabc::diagnostics::Severity;
use otabc::layout::{plan_table, FieldOp};
use otabc::schema::{parse_schema_json, ScalarKind, Schema};

fn schema(types: serde_json::Value) -> Schema {
    let bytes = serde_json::to_vec(&json!({
        "schema_version": OTAB_SCHEMA_VERSION,
        "types": types,
    }))
    .expect("encode schema JSON");
    parse_schema_json(&bytes).expect("schema must parse")
}

#[test]
fn deprecated_fields_keep_their_position() {
    let s = schema(json!([
        { "name": "T", "fields": [
            { "name": "a", "type": "uint8" },
            { "name": "b", "type": "uint16", "deprecated": true },
            { "name": "c", "type": "uint32" },
        ]},
    ]));
    let mut diags = Vec::new();
    let plans = plan_table(&s, s.record("T").expect("T"), &mut diags);
    assert!(diags.is_empty());

    assert_eq!(plans.decode.header.slot_count, 3);
    assert_eq!(plans.decode.header.slot_names, vec!["a", "b", "c"]);
    let positions: Vec<u16> = plans.decode.fields.iter().map(|f| f.position).collect();
    assert_eq!(positions, vec![1, 3]);
    assert_eq!(plans.decode.fields[1].name, "c");
}

#[test]
fn marking_deprecated_does_not_move_siblings() {
    let live = schema(json!([
        { "name": "T", "fields": [
            { "name": "a", "type": "uint8" },
            { "name": "b", "type": "uint16" },
            { "name": "c", "type": "uint32" },
        ]},
    ]));
    let deprecated = schema(json!([
        { "name": "T", "fields": [
            { "name": "a", "type": "uint8" },
            { "name": "b", "type": "uint16", "deprecated": true },
            { "name": "c", "type": "uint32" },
        ]},
    ]));
    let mut diags = Vec::new();
    let live_plans = plan_table(&live, live.record("T").expect("T"), &mut diags);
    let dep_plans = plan_table(&deprecated, deprecated.record("T").expect("T"), &mut diags);

    let pos_of = |plans: &otabc::layout::TablePlans, name: &str| {
        plans
            .encode
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.position)
    };
    assert_eq!(pos_of(&live_plans, "c"), Some(3));
    assert_eq!(pos_of(&dep_plans, "c"), Some(3));
    assert_eq!(pos_of(&dep_plans, "b"), None);
    assert_eq!(live_plans.encode.header.slot_count, dep_plans.encode.header.slot_count);
}

#[test]
fn record_references_dispatch_to_table_ops() {
    let s = schema(json!([
        { "name": "Vec3", "fields": [ { "name": "x", "type": "float32" } ] },
        { "name": "T", "fields": [
            { "name": "pos", "type": ["record", "Vec3"] },
            { "name": "path", "type": ["vector", ["record", "Vec3"]] },
            { "name": "tags", "type": ["vector", "string"] },
            { "name": "raw", "type": ["vector", "uint8"] },
        ]},
    ]));
    let mut diags = Vec::new();
    let plans = plan_table(&s, s.record("T").expect("T"), &mut diags);
    assert!(diags.is_empty());

    let ops: Vec<&FieldOp> = plans.encode.fields.iter().map(|f| &f.op).collect();
    assert_eq!(ops[0], &FieldOp::Table("Vec3".to_string()));
    assert_eq!(ops[1], &FieldOp::VecTable("Vec3".to_string()));
    assert_eq!(ops[2], &FieldOp::VecStr);
    assert_eq!(ops[3], &FieldOp::VecScalar(ScalarKind::Uint8));
}

#[test]
fn unsupported_constructs_warn_and_degrade() {
    let s = schema(json!([
        { "name": "Fixed", "fixed": true, "fields": [ { "name": "x", "type": "int32" } ] },
        { "name": "T", "fields": [
            { "name": "grid", "type": ["vector", ["vector", "int32"]] },
            { "name": "cell", "type": ["record", "Fixed"] },
            { "name": "cells", "type": ["vector", ["record", "Fixed"]] },
        ]},
    ]));
    let mut diags = Vec::new();
    let plans = plan_table(&s, s.record("T").expect("T"), &mut diags);

    for field in &plans.decode.fields {
        assert!(
            matches!(field.op, FieldOp::Unsupported(_)),
            "{:?} should be unsupported",
            field.name
        );
    }
    assert_eq!(diags.len(), 3);
    for diag in &diags {
        assert_eq!(diag.severity, Severity::Warning);
        assert_eq!(diag.code, "OTAB-LAYOUT-UNSUPPORTED-0001");
    }
    assert_eq!(plans.outline_field_count(), 0);
}

#[test]
fn outline_field_count_tracks_reserved_slots() {
    let s = schema(json!([
        { "name": "T", "fields": [
            { "name": "hp", "type": "int16" },
            { "name": "name", "type": "string" },
            { "name": "raw", "type": ["vector", "uint8"] },
        ]},
    ]));
    let mut diags = Vec::new();
    let plans = plan_table(&s, s.record("T").expect("T"), &mut diags);
    assert_eq!(plans.outline_field_count(), 2);
}
