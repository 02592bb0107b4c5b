//! The in-memory type model consumed by the layout compiler.
//!
//! The schema arrives as a versioned JSON document. Parsing walks the JSON
//! value by hand so every rejection names the offending path; validation of
//! whole-schema properties (reference resolution, vtable capacity) is a
//! separate pass that produces diagnostics instead of hard errors.

use std::fmt;

use serde_json::Value;

use otab_contracts::OTAB_SCHEMA_VERSIONS_SUPPORTED;

use crate::compile::{CompileErrorKind, CompilerError};
use crate::diagnostics::{Diagnostic, Stage};

/// Largest declarable field count: the vtable byte length `4 + 2 * N` must
/// fit in its own `uint16` header word.
pub const MAX_FIELDS_PER_TYPE: usize = 32765;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const ALL: &'static [ScalarKind] = &[
        ScalarKind::Bool,
        ScalarKind::Int8,
        ScalarKind::Uint8,
        ScalarKind::Int16,
        ScalarKind::Uint16,
        ScalarKind::Int32,
        ScalarKind::Uint32,
        ScalarKind::Int64,
        ScalarKind::Uint64,
        ScalarKind::Float32,
        ScalarKind::Float64,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScalarKind::Bool),
            "int8" => Some(ScalarKind::Int8),
            "uint8" => Some(ScalarKind::Uint8),
            "int16" => Some(ScalarKind::Int16),
            "uint16" => Some(ScalarKind::Uint16),
            "int32" => Some(ScalarKind::Int32),
            "uint32" => Some(ScalarKind::Uint32),
            "int64" => Some(ScalarKind::Int64),
            "uint64" => Some(ScalarKind::Uint64),
            "float32" => Some(ScalarKind::Float32),
            "float64" => Some(ScalarKind::Float64),
            _ => None,
        }
    }

    pub fn schema_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "int8",
            ScalarKind::Uint8 => "uint8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Uint16 => "uint16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        }
    }

    /// Wire width in bytes. `bool` is a single byte.
    pub fn size_of(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Int8 | ScalarKind::Uint8 => 1,
            ScalarKind::Int16 | ScalarKind::Uint16 => 2,
            ScalarKind::Int32 | ScalarKind::Uint32 | ScalarKind::Float32 => 4,
            ScalarKind::Int64 | ScalarKind::Uint64 | ScalarKind::Float64 => 8,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema_name())
    }
}

/// A field type expression.
///
/// The JSON form is lossless over the schema document:
///   * `"int16"` / `"string"`      => scalar kind or string
///   * `["vector", <type>]`        => vector of element type
///   * `["record", "Name"]`        => reference to a declared record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarKind),
    Str,
    Vector(Box<FieldType>),
    Record(String),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(kind) => f.write_str(kind.schema_name()),
            FieldType::Str => f.write_str("string"),
            FieldType::Vector(elem) => write!(f, "vector of {elem}"),
            FieldType::Record(name) => write!(f, "record {name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub deprecated: bool,
}

#[derive(Debug, Clone)]
pub struct RecordType {
    pub name: String,
    /// Fixed-layout struct types are carried in the model but code generation
    /// only handles tables end to end.
    pub fixed: bool,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub schema_version: String,
    pub types: Vec<RecordType>,
}

impl Schema {
    pub fn record(&self, name: &str) -> Option<&RecordType> {
        self.types.iter().find(|t| t.name == name)
    }
}

fn parse_err(message: impl Into<String>) -> CompilerError {
    CompilerError::new(CompileErrorKind::Parse, message.into())
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn parse_schema_json(bytes: &[u8]) -> Result<Schema, CompilerError> {
    let root: Value =
        serde_json::from_slice(bytes).map_err(|err| parse_err(format!("schema is not valid JSON: {err}")))?;
    let obj = root
        .as_object()
        .ok_or_else(|| parse_err("schema root must be a JSON object"))?;

    let schema_version = obj
        .get("schema_version")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err("schema_version must be a string"))?;
    if !OTAB_SCHEMA_VERSIONS_SUPPORTED.contains(&schema_version) {
        return Err(parse_err(format!(
            "unsupported schema_version {schema_version:?} (supported: {})",
            OTAB_SCHEMA_VERSIONS_SUPPORTED.join(", ")
        )));
    }

    let types_val = obj
        .get("types")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_err("types must be an array"))?;

    let mut types = Vec::with_capacity(types_val.len());
    for (ti, tv) in types_val.iter().enumerate() {
        types.push(parse_record_type(ti, tv)?);
    }

    for (i, ty) in types.iter().enumerate() {
        if types[..i].iter().any(|prev| prev.name == ty.name) {
            return Err(parse_err(format!("duplicate type name {:?}", ty.name)));
        }
    }

    Ok(Schema {
        schema_version: schema_version.to_string(),
        types,
    })
}

fn parse_record_type(index: usize, v: &Value) -> Result<RecordType, CompilerError> {
    let obj = v
        .as_object()
        .ok_or_else(|| parse_err(format!("types[{index}] must be an object")))?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err(format!("types[{index}].name must be a string")))?;
    if !is_ident(name) {
        return Err(parse_err(format!(
            "types[{index}].name {name:?} is not a valid identifier"
        )));
    }

    let fixed = match obj.get("fixed") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(parse_err(format!("types[{index}].fixed must be a boolean")));
        }
    };

    let fields_val = obj
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_err(format!("types[{index}].fields must be an array")))?;

    let mut fields = Vec::with_capacity(fields_val.len());
    for (fi, fv) in fields_val.iter().enumerate() {
        fields.push(parse_field(name, fi, fv)?);
    }

    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|prev| prev.name == field.name) {
            return Err(parse_err(format!(
                "type {name:?} declares field {:?} more than once",
                field.name
            )));
        }
    }

    Ok(RecordType {
        name: name.to_string(),
        fixed,
        fields,
    })
}

fn parse_field(type_name: &str, index: usize, v: &Value) -> Result<Field, CompilerError> {
    let obj = v
        .as_object()
        .ok_or_else(|| parse_err(format!("{type_name}.fields[{index}] must be an object")))?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err(format!("{type_name}.fields[{index}].name must be a string")))?;
    if !is_ident(name) {
        return Err(parse_err(format!(
            "{type_name}.fields[{index}].name {name:?} is not a valid identifier"
        )));
    }

    let deprecated = match obj.get("deprecated") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(parse_err(format!(
                "{type_name}.{name}.deprecated must be a boolean"
            )));
        }
    };

    let ty_val = obj
        .get("type")
        .ok_or_else(|| parse_err(format!("{type_name}.{name} is missing a type expression")))?;
    let ty = parse_type_expr(ty_val)
        .map_err(|detail| parse_err(format!("{type_name}.{name}: {detail}")))?;

    Ok(Field {
        name: name.to_string(),
        ty,
        deprecated,
    })
}

fn parse_type_expr(v: &Value) -> Result<FieldType, String> {
    match v {
        Value::String(s) if s == "string" => Ok(FieldType::Str),
        Value::String(s) => ScalarKind::parse(s)
            .map(FieldType::Scalar)
            .ok_or_else(|| format!("unknown scalar kind {s:?}")),
        Value::Array(items) => {
            let head = items
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| "type list must start with \"vector\" or \"record\"".to_string())?;
            match head {
                "vector" => {
                    if items.len() != 2 {
                        return Err("[\"vector\", <type>] takes exactly one element type".to_string());
                    }
                    let elem = parse_type_expr(&items[1])?;
                    Ok(FieldType::Vector(Box::new(elem)))
                }
                "record" => {
                    if items.len() != 2 {
                        return Err("[\"record\", <name>] takes exactly one type name".to_string());
                    }
                    let name = items[1]
                        .as_str()
                        .ok_or_else(|| "record reference must name a type".to_string())?;
                    if !is_ident(name) {
                        return Err(format!("record reference {name:?} is not a valid identifier"));
                    }
                    Ok(FieldType::Record(name.to_string()))
                }
                other => Err(format!(
                    "unknown type constructor {other:?} (expected \"vector\" or \"record\")"
                )),
            }
        }
        other => Err(format!("type expression must be a string or a list, got {other}")),
    }
}

/// Whole-schema checks that need every declaration in scope. Reference
/// problems are errors (the type model contract guarantees resolved
/// references); everything structural beyond that is left to the layout pass.
pub fn validate_schema(schema: &Schema) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for ty in &schema.types {
        if ty.fields.len() > MAX_FIELDS_PER_TYPE {
            diagnostics.push(Diagnostic::error(
                "OTAB-SCHEMA-LIMIT-0001",
                Stage::Parse,
                format!(
                    "type {:?} declares {} fields; the vtable format holds at most {}",
                    ty.name,
                    ty.fields.len(),
                    MAX_FIELDS_PER_TYPE
                ),
            ));
        }
        for field in &ty.fields {
            check_references(schema, &ty.name, &field.name, &field.ty, &mut diagnostics);
        }
    }
    diagnostics
}

fn check_references(
    schema: &Schema,
    type_name: &str,
    field_name: &str,
    ty: &FieldType,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match ty {
        FieldType::Scalar(_) | FieldType::Str => {}
        FieldType::Vector(elem) => {
            check_references(schema, type_name, field_name, elem, diagnostics);
        }
        FieldType::Record(name) => {
            if schema.record(name).is_none() {
                diagnostics.push(Diagnostic::error(
                    "OTAB-SCHEMA-REF-0001",
                    Stage::Parse,
                    format!("{type_name}.{field_name} references undeclared type {name:?}"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_rules() {
        assert!(is_ident("hp"));
        assert!(is_ident("_private2"));
        assert!(!is_ident(""));
        assert!(!is_ident("2fast"));
        assert!(!is_ident("dotted.name"));
    }

    #[test]
    fn scalar_sizes_cover_wire_widths() {
        for kind in ScalarKind::ALL {
            assert!(matches!(kind.size_of(), 1 | 2 | 4 | 8));
            assert_eq!(ScalarKind::parse(kind.schema_name()), Some(*kind));
        }
    }
}
