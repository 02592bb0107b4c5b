use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use otab_contracts::OTAB_DIAG_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Layout,
    Codegen,
}

/// One machine-readable finding. Codes are stable identifiers of the
/// `OTAB-<AREA>-NNNN` form and are part of the report contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Diagnostic {
    pub fn error(code: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, stage, message)
    }

    pub fn warning(code: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, stage, message)
    }

    fn new(code: &str, severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            stage,
            message: message.into(),
            notes: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Report {
    pub fn from_diagnostics(mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            a.code
                .cmp(&b.code)
                .then_with(|| a.message.cmp(&b.message))
        });
        let ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        Self {
            schema_version: OTAB_DIAG_SCHEMA_VERSION.to_string(),
            ok,
            diagnostics,
            meta: BTreeMap::new(),
        }
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}
