use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use otab_contracts::OTABC_REPORT_SCHEMA_VERSION;
use otabc::compile::{self, CompileErrorKind, CompileOptions, CompilerError};
use otabc::diagnostics;

#[derive(Parser)]
#[command(name = "otabc")]
#[command(about = "Offset-table codec generator (schema -> Octave).", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Generate the Octave pack/unpack script for a schema.
    Gen {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        report_json: bool,
    },
    /// Parse, validate and plan a schema without emitting code.
    Check {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        report_json: bool,
    },
}

#[derive(Debug, Serialize)]
struct OtabcToolReport {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    r#in: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_blake3: Option<String>,
    diagnostics_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<diagnostics::Diagnostic>,
    exit_code: u8,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    let Some(cmd) = cli.cmd else {
        anyhow::bail!("missing subcommand (try --help)");
    };

    match cmd {
        Cmd::Gen {
            schema,
            out,
            report_json,
        } => {
            let bytes = match std::fs::read(&schema) {
                Ok(bytes) => bytes,
                Err(err) => {
                    if report_json {
                        let report = OtabcToolReport {
                            schema_version: OTABC_REPORT_SCHEMA_VERSION,
                            command: "gen",
                            ok: false,
                            r#in: schema.display().to_string(),
                            out: None,
                            schema_blake3: None,
                            diagnostics_count: 1,
                            diagnostics: vec![diagnostic_error(
                                "OTAB-IO-READ-0001",
                                diagnostics::Stage::Parse,
                                &format!("read schema {}: {err}", schema.display()),
                            )],
                            exit_code: 2,
                        };
                        print_json(&report)?;
                        return Ok(std::process::ExitCode::from(2));
                    }
                    return Err(err).with_context(|| format!("read schema: {}", schema.display()));
                }
            };

            let options = CompileOptions::default();
            let output = match compile::compile_schema_to_octave(&bytes, &options) {
                Ok(output) => output,
                Err(err) => {
                    if report_json {
                        let report = OtabcToolReport {
                            schema_version: OTABC_REPORT_SCHEMA_VERSION,
                            command: "gen",
                            ok: false,
                            r#in: schema.display().to_string(),
                            out: None,
                            schema_blake3: None,
                            diagnostics_count: 1,
                            diagnostics: vec![compiler_error_diagnostic(&err)],
                            exit_code: 2,
                        };
                        print_json(&report)?;
                        return Ok(std::process::ExitCode::from(2));
                    }
                    return Err(anyhow::anyhow!("{err}"));
                }
            };

            if let Some(path) = &out {
                if let Err(err) = std::fs::write(path, output.octave_src.as_bytes()) {
                    if report_json {
                        let report = OtabcToolReport {
                            schema_version: OTABC_REPORT_SCHEMA_VERSION,
                            command: "gen",
                            ok: false,
                            r#in: schema.display().to_string(),
                            out: Some(path.display().to_string()),
                            schema_blake3: Some(output.schema_digest.clone()),
                            diagnostics_count: 1,
                            diagnostics: vec![diagnostic_error(
                                "OTAB-IO-WRITE-0001",
                                diagnostics::Stage::Codegen,
                                &format!("write {}: {err}", path.display()),
                            )],
                            exit_code: 2,
                        };
                        print_json(&report)?;
                        return Ok(std::process::ExitCode::from(2));
                    }
                    return Err(err).with_context(|| format!("write: {}", path.display()));
                }
            } else if !report_json {
                print!("{}", output.octave_src);
            }

            if report_json {
                let report = OtabcToolReport {
                    schema_version: OTABC_REPORT_SCHEMA_VERSION,
                    command: "gen",
                    ok: true,
                    r#in: schema.display().to_string(),
                    out: out.as_ref().map(|p| p.display().to_string()),
                    schema_blake3: Some(output.schema_digest.clone()),
                    diagnostics_count: output.diagnostics.len(),
                    diagnostics: output.diagnostics.clone(),
                    exit_code: 0,
                };
                print_json(&report)?;
            } else {
                for diag in &output.diagnostics {
                    eprintln!("{}: {}", diag.code, diag.message);
                }
            }

            Ok(std::process::ExitCode::SUCCESS)
        }
        Cmd::Check {
            schema,
            report_json,
        } => {
            let bytes = match std::fs::read(&schema) {
                Ok(bytes) => bytes,
                Err(err) => {
                    if report_json {
                        let report = OtabcToolReport {
                            schema_version: OTABC_REPORT_SCHEMA_VERSION,
                            command: "check",
                            ok: false,
                            r#in: schema.display().to_string(),
                            out: None,
                            schema_blake3: None,
                            diagnostics_count: 1,
                            diagnostics: vec![diagnostic_error(
                                "OTAB-IO-READ-0001",
                                diagnostics::Stage::Parse,
                                &format!("read schema {}: {err}", schema.display()),
                            )],
                            exit_code: 2,
                        };
                        print_json(&report)?;
                        return Ok(std::process::ExitCode::from(2));
                    }
                    return Err(err).with_context(|| format!("read schema: {}", schema.display()));
                }
            };

            let checked = diagnostics::Report::from_diagnostics(compile::check_schema(&bytes));
            let ok = checked.ok;
            let exit_code: u8 = if ok { 0 } else { 1 };

            if report_json {
                let report = OtabcToolReport {
                    schema_version: OTABC_REPORT_SCHEMA_VERSION,
                    command: "check",
                    ok,
                    r#in: schema.display().to_string(),
                    out: None,
                    schema_blake3: Some(blake3::hash(&bytes).to_hex().to_string()),
                    diagnostics_count: checked.diagnostics.len(),
                    diagnostics: checked.diagnostics,
                    exit_code,
                };
                print_json(&report)?;
            } else {
                for diag in &checked.diagnostics {
                    eprintln!("{}: {}", diag.code, diag.message);
                }
            }

            Ok(std::process::ExitCode::from(exit_code))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn diagnostic_error(
    code: &str,
    stage: diagnostics::Stage,
    message: &str,
) -> diagnostics::Diagnostic {
    diagnostics::Diagnostic::error(code, stage, message)
}

fn compiler_error_diagnostic(err: &CompilerError) -> diagnostics::Diagnostic {
    let (code, stage) = match err.kind {
        CompileErrorKind::Parse => ("OTAB-SCHEMA-PARSE-0001", diagnostics::Stage::Parse),
        CompileErrorKind::Validate => ("OTAB-SCHEMA-VALIDATE-0001", diagnostics::Stage::Parse),
        CompileErrorKind::Internal => ("OTAB-GEN-INTERNAL-0001", diagnostics::Stage::Codegen),
    };
    diagnostics::Diagnostic::error(code, stage, err.message.as_str())
}
