use serde_json::json;

use otab_contracts::OTAB_SCHEMA_VERSION;
use otabc::compile::CompileErrorKind;
use otabc::diagnostics::Severity;
use otabc::schema::{parse_schema_json, validate_schema, FieldType, ScalarKind};

fn doc(types: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schema_version": OTAB_SCHEMA_VERSION,
        "types": types,
    }))
    .expect("encode schema JSON")
}

#[test]
fn parses_the_field_type_vocabulary() {
    let bytes = doc(json!([
        { "name": "Vec3", "fields": [
            { "name": "x", "type": "float32" },
            { "name": "y", "type": "float32" },
            { "name": "z", "type": "float32" },
        ]},
        { "name": "Monster", "fields": [
            { "name": "hp", "type": "int16" },
            { "name": "name", "type": "string" },
            { "name": "mana", "type": "int16", "deprecated": true },
            { "name": "inventory", "type": ["vector", "uint8"] },
            { "name": "tags", "type": ["vector", "string"] },
            { "name": "pos", "type": ["record", "Vec3"] },
        ]},
    ]));

    let schema = parse_schema_json(&bytes).expect("schema must parse");
    assert_eq!(schema.schema_version, OTAB_SCHEMA_VERSION);
    assert_eq!(schema.types.len(), 2);

    let monster = schema.record("Monster").expect("Monster is declared");
    assert!(!monster.fixed);
    assert_eq!(monster.fields.len(), 6);
    assert_eq!(monster.fields[0].ty, FieldType::Scalar(ScalarKind::Int16));
    assert_eq!(monster.fields[1].ty, FieldType::Str);
    assert!(monster.fields[2].deprecated);
    assert!(!monster.fields[0].deprecated);
    assert_eq!(
        monster.fields[3].ty,
        FieldType::Vector(Box::new(FieldType::Scalar(ScalarKind::Uint8)))
    );
    assert_eq!(
        monster.fields[4].ty,
        FieldType::Vector(Box::new(FieldType::Str))
    );
    assert_eq!(monster.fields[5].ty, FieldType::Record("Vec3".to_string()));

    assert!(validate_schema(&schema).is_empty());
}

#[test]
fn fixed_flag_defaults_to_false_and_parses() {
    let bytes = doc(json!([
        { "name": "P", "fixed": true, "fields": [ { "name": "x", "type": "int32" } ] },
        { "name": "Q", "fields": [] },
    ]));
    let schema = parse_schema_json(&bytes).expect("schema must parse");
    assert!(schema.record("P").expect("P").fixed);
    assert!(!schema.record("Q").expect("Q").fixed);
}

#[test]
fn rejects_unknown_schema_version() {
    let bytes = serde_json::to_vec(&json!({
        "schema_version": "otab.schema@9.9.9",
        "types": [],
    }))
    .expect("encode schema JSON");
    let err = parse_schema_json(&bytes).expect_err("version must be rejected");
    assert_eq!(err.kind, CompileErrorKind::Parse);
    assert!(err.message.contains("unsupported schema_version"), "{}", err.message);
}

#[test]
fn rejects_malformed_type_expressions() {
    for (ty, needle) in [
        (json!(42), "type expression"),
        (json!("float128"), "unknown scalar kind"),
        (json!(["vector"]), "exactly one element type"),
        (json!(["record", 7]), "must name a type"),
        (json!(["maybe", "int32"]), "unknown type constructor"),
    ] {
        let bytes = doc(json!([
            { "name": "T", "fields": [ { "name": "f", "type": ty } ] },
        ]));
        let err = parse_schema_json(&bytes).expect_err("type expression must be rejected");
        assert_eq!(err.kind, CompileErrorKind::Parse);
        assert!(err.message.contains(needle), "{}", err.message);
    }
}

#[test]
fn rejects_duplicate_and_invalid_names() {
    let dup_types = doc(json!([
        { "name": "T", "fields": [] },
        { "name": "T", "fields": [] },
    ]));
    let err = parse_schema_json(&dup_types).expect_err("duplicate type name");
    assert!(err.message.contains("duplicate type name"), "{}", err.message);

    let dup_fields = doc(json!([
        { "name": "T", "fields": [
            { "name": "f", "type": "int32" },
            { "name": "f", "type": "string" },
        ]},
    ]));
    let err = parse_schema_json(&dup_fields).expect_err("duplicate field name");
    assert!(err.message.contains("more than once"), "{}", err.message);

    let bad_ident = doc(json!([
        { "name": "T", "fields": [ { "name": "2fast", "type": "int32" } ] },
    ]));
    let err = parse_schema_json(&bad_ident).expect_err("invalid identifier");
    assert!(err.message.contains("not a valid identifier"), "{}", err.message);
}

#[test]
fn undeclared_reference_is_a_validation_error() {
    let bytes = doc(json!([
        { "name": "T", "fields": [
            { "name": "child", "type": ["record", "Missing"] },
            { "name": "kids", "type": ["vector", ["record", "AlsoMissing"]] },
        ]},
    ]));
    let schema = parse_schema_json(&bytes).expect("schema must parse");
    let diags = validate_schema(&schema);
    assert_eq!(diags.len(), 2);
    for diag in &diags {
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code, "OTAB-SCHEMA-REF-0001");
    }
    assert!(diags[0].message.contains("T.child"), "{}", diags[0].message);
}
