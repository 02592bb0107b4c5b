//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for the schema/version
//! strings that appear in machine-readable I/O.

pub const OTAB_SCHEMA_VERSION: &str = "otab.schema@0.1.0";
pub const OTAB_SCHEMA_VERSIONS_SUPPORTED: &[&str] = &["otab.schema@0.1.0"];

pub const OTAB_DIAG_SCHEMA_VERSION: &str = "otab.diag@0.1.0";
pub const OTABC_REPORT_SCHEMA_VERSION: &str = "otabc.report@0.1.0";
