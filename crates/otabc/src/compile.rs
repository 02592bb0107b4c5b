use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::diagnostics::{self, Diagnostic, Severity, Stage};
use crate::emit::Emitter;
use crate::fingerprint;
use crate::layout;
use crate::schema::{self, ScalarKind};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Octave reserved words; colliding identifiers get a trailing underscore.
    pub keywords: BTreeSet<String>,
    /// Scalar kind -> Octave class name used in typecast/cast expressions.
    /// A kind missing from the map is a codegen warning and renders as an
    /// empty class name.
    pub scalar_type_map: BTreeMap<ScalarKind, String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            keywords: default_octave_keywords(),
            scalar_type_map: default_scalar_type_map(),
        }
    }
}

pub fn default_octave_keywords() -> BTreeSet<String> {
    ["case", "do", "for", "function", "if", "switch", "while"]
        .iter()
        .map(|kw| kw.to_string())
        .collect()
}

pub fn default_scalar_type_map() -> BTreeMap<ScalarKind, String> {
    let mut map = BTreeMap::new();
    map.insert(ScalarKind::Bool, "logical".to_string());
    map.insert(ScalarKind::Int8, "int8".to_string());
    map.insert(ScalarKind::Uint8, "uint8".to_string());
    map.insert(ScalarKind::Int16, "int16".to_string());
    map.insert(ScalarKind::Uint16, "uint16".to_string());
    map.insert(ScalarKind::Int32, "int32".to_string());
    map.insert(ScalarKind::Uint32, "uint32".to_string());
    map.insert(ScalarKind::Int64, "int64".to_string());
    map.insert(ScalarKind::Uint64, "uint64".to_string());
    map.insert(ScalarKind::Float32, "single".to_string());
    map.insert(ScalarKind::Float64, "double".to_string());
    map
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Parse,
    Validate,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompilerError {
    pub fn new(kind: CompileErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompilerError {}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileStats {
    pub tables: usize,
    pub fields: usize,
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub octave_src: String,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: CompileStats,
    /// blake3 hex digest of the raw schema bytes, as echoed in the banner.
    pub schema_digest: String,
}

/// Full pipeline: parse, validate, plan, render. Warnings ride on the output;
/// parse/validate problems and renderer consistency faults are errors.
pub fn compile_schema_to_octave(
    schema_bytes: &[u8],
    options: &CompileOptions,
) -> Result<CompileOutput, CompilerError> {
    let schema = schema::parse_schema_json(schema_bytes)?;

    let mut diagnostics = schema::validate_schema(&schema);
    if diagnostics::has_errors(&diagnostics) {
        let joined = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CompilerError::new(CompileErrorKind::Validate, joined));
    }

    let schema_digest = fingerprint::schema_digest_hex(schema_bytes);
    let mut emitter = Emitter::new(&schema, options);
    emitter.emit_script(&schema_digest)?;
    let (octave_src, mut emit_diagnostics, stats) = emitter.finish();
    diagnostics.append(&mut emit_diagnostics);

    Ok(CompileOutput {
        octave_src,
        diagnostics,
        stats,
        schema_digest,
    })
}

/// Diagnostics-only front door used by `otabc check`: parse, validate, and
/// dry-run the layout pass so unsupported constructs surface as warnings.
pub fn check_schema(schema_bytes: &[u8]) -> Vec<Diagnostic> {
    let schema = match schema::parse_schema_json(schema_bytes) {
        Ok(schema) => schema,
        Err(err) => {
            return vec![Diagnostic::error(
                "OTAB-SCHEMA-PARSE-0001",
                Stage::Parse,
                err.message,
            )];
        }
    };

    let mut diagnostics = schema::validate_schema(&schema);
    if !diagnostics::has_errors(&diagnostics) {
        for ty in &schema.types {
            if ty.fixed {
                continue;
            }
            layout::plan_table(&schema, ty, &mut diagnostics);
        }
    }
    diagnostics
}
