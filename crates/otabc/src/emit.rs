//! Emission renderer: maps layout plans to Octave source text.
//!
//! One `<Type>_Unpack(b, idxBuf)` and one `<Type>_Pack(T)` function per
//! non-fixed record type. All buffer access in the generated code goes
//! through the runtime byte helpers (`ReadUint32`, `WriteString`, ...) or
//! `typecast`/`cast` over byte ranges, with 1-based Octave indexing
//! throughout. Rendering is a pure function of the plans and the options.

use std::collections::BTreeSet;

use crate::compile::{CompileErrorKind, CompileOptions, CompileStats, CompilerError};
use crate::diagnostics::{Diagnostic, Stage};
use crate::layout::{self, DecodePlan, EncodePlan, FieldOp, TableHeader, TablePlans};
use crate::schema::{ScalarKind, Schema};

pub struct Emitter<'a> {
    schema: &'a Schema,
    options: &'a CompileOptions,
    out: String,
    indent: usize,
    diagnostics: Vec<Diagnostic>,
    stats: CompileStats,
    warned_kinds: BTreeSet<ScalarKind>,
    reserved_slots: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(schema: &'a Schema, options: &'a CompileOptions) -> Self {
        Self {
            schema,
            options,
            out: String::new(),
            indent: 0,
            diagnostics: Vec::new(),
            stats: CompileStats::default(),
            warned_kinds: BTreeSet::new(),
            reserved_slots: 0,
        }
    }

    /// Render the whole script: banner, the `1;` script marker, then an
    /// unpack/pack pair per table type. Fixed types are skipped (no vtable).
    pub fn emit_script(&mut self, schema_digest: &str) -> Result<(), CompilerError> {
        self.push_line("% automatically generated by otabc, do not modify");
        self.push_line(&format!("% schema blake3:{schema_digest}"));
        self.push_line("1;");
        self.push_line("");

        for ty in &self.schema.types {
            if ty.fixed {
                continue;
            }
            let plans = layout::plan_table(self.schema, ty, &mut self.diagnostics);
            self.emit_unpack(&plans.decode);
            self.push_line("");
            self.emit_pack(&plans)?;
            self.push_line("");
            self.stats.tables += 1;
            self.stats.fields += plans.encode.fields.len();
        }
        Ok(())
    }

    pub fn finish(self) -> (String, Vec<Diagnostic>, CompileStats) {
        (self.out, self.diagnostics, self.stats)
    }

    fn push_line(&mut self, line: &str) {
        if !line.is_empty() {
            for _ in 0..self.indent {
                self.out.push_str("  ");
            }
            self.out.push_str(line);
        }
        self.out.push('\n');
    }

    fn escape_keyword(&self, name: &str) -> String {
        if self.options.keywords.contains(name) {
            format!("{name}_")
        } else {
            name.to_string()
        }
    }

    fn unpack_fn_name(&self, type_name: &str) -> String {
        format!("{}_Unpack", self.escape_keyword(type_name))
    }

    fn pack_fn_name(&self, type_name: &str) -> String {
        format!("{}_Pack", self.escape_keyword(type_name))
    }

    /// Octave class name for a scalar kind. A kind absent from the map is a
    /// warning and renders as an empty class name, which keeps the output
    /// visibly broken instead of silently wrong.
    fn octave_type(&mut self, kind: ScalarKind) -> String {
        match self.options.scalar_type_map.get(&kind) {
            Some(name) => name.clone(),
            None => {
                if self.warned_kinds.insert(kind) {
                    self.diagnostics.push(Diagnostic::warning(
                        "OTAB-EMIT-TYPE-MAP-0001",
                        Stage::Codegen,
                        format!("no Octave class name mapped for scalar kind {kind}"),
                    ));
                }
                String::new()
            }
        }
    }

    /// The field directory constant shared by unpack and pack. Deprecated
    /// fields keep their cell slot so cell index equals vtable position.
    fn emit_vt_directory(&mut self, header: &TableHeader) {
        if header.slot_count == 0 {
            return;
        }
        let names = header
            .slot_names
            .iter()
            .map(|n| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join("; ");
        self.push_line(&format!("VT = struct(\"Fields\", {{{{{names}}}}});"));
    }

    fn emit_unpack(&mut self, plan: &DecodePlan) {
        let fn_name = self.unpack_fn_name(&plan.header.name);
        self.push_line(&format!("function T = {fn_name}(b, idxBuf)"));
        self.indent += 1;
        self.push_line("T = struct();");
        self.push_line(&format!("offRT = {};", read_u32("idxBuf")));
        self.push_line("idxRT = offRT + idxBuf;");
        self.push_line(&format!("offVT = {};", read_i32("idxRT")));
        self.push_line("idxVT = int32(idxRT) - offVT;");
        self.push_line(&format!("sizeVT = {};", read_u16("idxVT")));
        self.push_line("N = int32(sizeVT / 2 - 2);");
        self.push_line("FieldOffsets = typecast(b(idxVT + 4:idxVT + 4 + 2*N - 1), \"uint16\");");
        self.emit_vt_directory(&plan.header);

        for field in &plan.fields {
            let k = field.position;
            let sf = format!("T.(VT.Fields{{{k}}})");
            let ident = self.escape_keyword(&field.name);
            let idx_off = format!("idx_{ident}_off");

            self.push_line(&format!("if (N >= {k} && FieldOffsets({k}) ~= 0)"));
            self.indent += 1;
            self.push_line(&format!("{idx_off} = idxRT + uint32(FieldOffsets({k}));"));
            self.emit_unpack_field(&fn_name, field, &sf, &ident, &idx_off);
            self.indent -= 1;
            self.push_line("else");
            self.indent += 1;
            match field.op {
                FieldOp::Scalar(_) => self.push_line(&format!("{sf} = 0;")),
                _ => self.push_line(&format!("{sf} = {{}};")),
            }
            self.indent -= 1;
            self.push_line("endif");
        }

        self.indent -= 1;
        self.push_line("endfunction");
    }

    fn emit_unpack_field(
        &mut self,
        fn_name: &str,
        field: &layout::PlanField,
        sf: &str,
        ident: &str,
        idx_off: &str,
    ) {
        match &field.op {
            FieldOp::Scalar(kind) => {
                let ty = self.octave_type(*kind);
                let width = kind.size_of();
                self.push_line(&format!(
                    "{sf} = typecast({}, \"{ty}\");",
                    read_bytes_at(idx_off, width)
                ));
            }
            FieldOp::Str => {
                let idx = format!("idx_{ident}");
                let len = format!("len_{ident}");
                self.push_line(&format!("offOuter = {};", read_u32(idx_off)));
                self.push_line(&format!("{idx} = {idx_off} + offOuter;"));
                self.push_line(&format!("{len} = {};", read_u32(&idx)));
                self.push_line(&format!(
                    "{sf} = cast(b({idx} + 4:{idx} + 4 + {len} - 1), \"char\")';"
                ));
            }
            FieldOp::Table(type_name) => {
                let callee = self.unpack_fn_name(type_name);
                self.push_line(&format!("{sf} = {callee}(b, {idx_off});"));
            }
            FieldOp::VecScalar(kind) => {
                let ty = self.octave_type(*kind);
                let width = kind.size_of();
                let idx = format!("idx_{ident}");
                let len = format!("len_{ident}");
                self.push_line(&format!("offOuter = {};", read_u32(idx_off)));
                self.push_line(&format!("{idx} = offOuter + {idx_off};"));
                self.push_line(&format!("{len} = {};", read_u32(&idx)));
                self.push_line(&format!(
                    "{sf} = typecast(b({idx} + 4:{idx} + 4 + {len} * {width} - 1), \"{ty}\");"
                ));
            }
            FieldOp::VecStr => {
                let idx = format!("idx_{ident}");
                let len = format!("len_{ident}");
                self.push_line(&format!("offOuter = {};", read_u32(idx_off)));
                self.push_line(&format!("{idx} = offOuter + {idx_off};"));
                self.push_line(&format!("{len} = {};", read_u32(&idx)));
                self.push_line(&format!("{sf} = {{}};"));
                self.push_line(&format!("for uK = 1:{len}"));
                self.indent += 1;
                self.push_line(&format!("idxElemOffPos = {idx} + 4 * uK;"));
                self.push_line(&format!(
                    "idxElemK = idxElemOffPos + {};",
                    read_u32("idxElemOffPos")
                ));
                self.push_line(&format!("lenString = {};", read_u32("idxElemK")));
                self.push_line(&format!(
                    "{sf}{{uK}} = cast(b(idxElemK + 4:idxElemK + 4 + lenString - 1), \"char\")';"
                ));
                self.indent -= 1;
                self.push_line("end");
            }
            FieldOp::VecTable(type_name) => {
                let callee = self.unpack_fn_name(type_name);
                let idx = format!("idx_{ident}");
                let len = format!("len_{ident}");
                self.push_line(&format!("offOuter = {};", read_u32(idx_off)));
                self.push_line(&format!("{idx} = offOuter + {idx_off};"));
                self.push_line(&format!("{len} = {};", read_u32(&idx)));
                self.push_line(&format!("for uK = 1:{len}"));
                self.indent += 1;
                self.push_line(&format!("idxElemOffPos = {idx} + 4 * uK;"));
                self.push_line(&format!("{sf}(uK) = {callee}(b, idxElemOffPos);"));
                self.indent -= 1;
                self.push_line("end");
            }
            FieldOp::Unsupported(reason) => {
                self.push_line(&format!(
                    "warning(\"{fn_name}: no decode rule for field {} ({reason})\");",
                    field.name
                ));
                self.push_line(&format!("{sf} = {{}};"));
            }
        }
    }

    fn emit_pack(&mut self, plans: &TablePlans) -> Result<(), CompilerError> {
        let plan: &EncodePlan = &plans.encode;
        let fn_name = self.pack_fn_name(&plan.header.name);
        self.reserved_slots = 0;

        self.push_line(&format!("function B = {fn_name}(T)"));
        self.indent += 1;
        self.emit_vt_directory(&plan.header);
        if plan.header.slot_count == 0 {
            self.push_line("N = 0;");
        } else {
            self.push_line("N = numel(VT.Fields);");
        }
        self.push_line("lenVT = 4 + N * 2;");
        self.push_line("BufInline = WriteInt32(0);");
        self.push_line("offsVT = zeros(1, N);");
        self.push_line("idxOffsOutline = [];");
        self.push_line("offsOutline = [];");
        self.push_line("BufOutline = [];");

        for field in &plan.fields {
            let k = field.position;
            let sf = format!("T.(VT.Fields{{{k}}})");
            let ident = self.escape_keyword(&field.name);

            self.push_line(&format!(
                "if (isfield(T, VT.Fields{{{k}}}) && !isempty({sf}))"
            ));
            self.indent += 1;
            if !matches!(field.op, FieldOp::Unsupported(_)) {
                self.push_line(&format!("offsVT({k}) = length(BufInline);"));
            }
            self.emit_pack_field(&fn_name, field, &sf, &ident);
            self.indent -= 1;
            self.push_line("endif");
        }

        let expected = plans.outline_field_count();
        if self.reserved_slots != expected {
            return Err(CompilerError::new(
                CompileErrorKind::Internal,
                format!(
                    "{}: reserved {} outline placeholder(s) but planned {}",
                    plan.header.name, self.reserved_slots, expected
                ),
            ));
        }

        self.push_line("if (length(idxOffsOutline) ~= length(offsOutline))");
        self.indent += 1;
        self.push_line(&format!(
            "error(\"{fn_name}: mismatched outline offset counts\");"
        ));
        self.indent -= 1;
        self.push_line("endif");
        self.push_line("for k = 1:length(idxOffsOutline)");
        self.indent += 1;
        self.push_line("idx = idxOffsOutline(k);");
        self.push_line("BufInline(idx:idx + 3) = WriteUint32(offsOutline(k) + length(BufInline));");
        self.indent -= 1;
        self.push_line("end");
        self.push_line("BufVT = [WriteUint16(lenVT), WriteUint16(length(BufInline))];");
        self.push_line("for k = 1:N");
        self.indent += 1;
        self.push_line("BufVT = [BufVT, WriteUint16(offsVT(k))];");
        self.indent -= 1;
        self.push_line("end");
        self.push_line("BufInline(1:4) = WriteInt32(length(BufVT));");
        self.push_line("lenInner = length(BufInline) + length(BufVT);");
        self.push_line("r = rem(lenInner, 4);");
        self.push_line("lenPad = 0;");
        self.push_line("if (r ~= 0)");
        self.indent += 1;
        self.push_line("lenPad = 4 - r;");
        self.indent -= 1;
        self.push_line("endif");
        self.push_line("offRT = 4 + lenPad + length(BufVT);");
        self.push_line("B = [WriteUint32(offRT), zeros(1, lenPad, \"uint8\"), BufVT, BufInline, BufOutline];");
        self.indent -= 1;
        self.push_line("endfunction");
        Ok(())
    }

    /// Reserve a 4-byte inline slot pointing at outline data about to be
    /// written. The recorded offset is outline-relative minus the slot's own
    /// inline position; the epilogue adds the final inline length.
    fn emit_pack_outline(&mut self) {
        self.push_line("offsOutline(end + 1) = length(BufOutline) - length(BufInline);");
        self.push_line("idxOffsOutline(end + 1) = length(BufInline) + 1;");
        self.push_line("BufInline = [BufInline, uint8([0, 0, 0, 0])];");
        self.reserved_slots += 1;
    }

    fn emit_pack_field(
        &mut self,
        fn_name: &str,
        field: &layout::PlanField,
        sf: &str,
        ident: &str,
    ) {
        match &field.op {
            FieldOp::Scalar(kind) => {
                let ty = self.octave_type(*kind);
                self.push_line(&format!(
                    "BufInline = [BufInline, typecast({ty}({sf}), \"uint8\")];"
                ));
            }
            FieldOp::Str => {
                self.emit_pack_outline();
                self.push_line(&format!("BufOutline = [BufOutline, WriteString({sf})];"));
            }
            FieldOp::Table(type_name) => {
                let callee = self.pack_fn_name(type_name);
                self.emit_pack_outline();
                self.push_line(&format!("Bytes_{ident} = {callee}({sf});"));
                self.push_line(&format!("RTO_{ident} = ReadUint32(Bytes_{ident}(1:4));"));
                self.push_line(&format!("offsOutline(end) += RTO_{ident} - 4;"));
                self.push_line(&format!("BufOutline = [BufOutline, Bytes_{ident}(5:end)];"));
            }
            FieldOp::VecScalar(kind) => {
                let ty = self.octave_type(*kind);
                self.emit_pack_outline();
                self.push_line(&format!("Bytes_{ident} = WriteUint32(length({sf}));"));
                self.push_line(&format!(
                    "Bytes_{ident} = [Bytes_{ident}, typecast({ty}({sf}), \"uint8\")(:)'];"
                ));
                self.push_line(&format!("BufOutline = [BufOutline, Bytes_{ident}];"));
            }
            FieldOp::VecStr => {
                self.emit_pack_outline();
                self.push_line(&format!("N_{ident} = length({sf});"));
                self.push_line(&format!("BufOutline = [BufOutline, WriteUint32(N_{ident})];"));
                self.push_line(&format!("VecOffsets_{ident} = [];"));
                self.push_line(&format!("VecOutline_{ident} = [];"));
                self.push_line(&format!("for k = 1:N_{ident}"));
                self.indent += 1;
                self.push_line(&format!("str_{ident}_k = {sf}{{k}};"));
                self.push_line(&format!(
                    "offTo_{ident}_k = N_{ident} * 4 + 4 - 4 * k + length(VecOutline_{ident});"
                ));
                self.push_line(&format!(
                    "VecOffsets_{ident} = [VecOffsets_{ident}, WriteUint32(offTo_{ident}_k)];"
                ));
                self.push_line(&format!(
                    "VecOutline_{ident} = [VecOutline_{ident}, WriteString(str_{ident}_k)];"
                ));
                self.indent -= 1;
                self.push_line("end");
                self.push_line(&format!(
                    "BufOutline = [BufOutline, VecOffsets_{ident}, VecOutline_{ident}];"
                ));
            }
            FieldOp::VecTable(type_name) => {
                let callee = self.pack_fn_name(type_name);
                self.emit_pack_outline();
                self.push_line(&format!("N_{ident} = length({sf});"));
                self.push_line(&format!("BufOutline = [BufOutline, WriteUint32(N_{ident})];"));
                self.push_line(&format!("VecOffsets_{ident} = [];"));
                self.push_line(&format!("VecOutline_{ident} = [];"));
                self.push_line(&format!("for k = 1:N_{ident}"));
                self.indent += 1;
                self.push_line(&format!(
                    "offTo_{ident}_k = N_{ident} * 4 + 4 - 4 * k + length(VecOutline_{ident});"
                ));
                self.push_line(&format!("Bytes_{ident}_k = {callee}({sf}(k));"));
                self.push_line(&format!(
                    "RTO_{ident}_k = ReadUint32(Bytes_{ident}_k(1:4));"
                ));
                self.push_line(&format!(
                    "VecOffsets_{ident} = [VecOffsets_{ident}, WriteUint32(offTo_{ident}_k + RTO_{ident}_k - 4)];"
                ));
                self.push_line(&format!(
                    "VecOutline_{ident} = [VecOutline_{ident}, Bytes_{ident}_k(5:end)];"
                ));
                self.indent -= 1;
                self.push_line("end");
                self.push_line(&format!(
                    "BufOutline = [BufOutline, VecOffsets_{ident}, VecOutline_{ident}];"
                ));
            }
            FieldOp::Unsupported(reason) => {
                self.push_line(&format!(
                    "warning(\"{fn_name}: no encode rule for field {} ({reason})\");",
                    field.name
                ));
            }
        }
    }
}

fn read_bytes_at(idx: &str, num_bytes: usize) -> String {
    if num_bytes == 0 {
        return "[]".to_string();
    }
    format!("b({idx}:{idx} + {})", num_bytes - 1)
}

fn read_u32(idx: &str) -> String {
    format!("ReadUint32({})", read_bytes_at(idx, 4))
}

fn read_i32(idx: &str) -> String {
    format!("ReadInt32({})", read_bytes_at(idx, 4))
}

fn read_u16(idx: &str) -> String {
    format!("ReadUint16({})", read_bytes_at(idx, 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_primitives() {
        assert_eq!(read_bytes_at("idx", 4), "b(idx:idx + 3)");
        assert_eq!(read_bytes_at("idx", 1), "b(idx:idx + 0)");
        assert_eq!(read_bytes_at("idx", 0), "[]");
        assert_eq!(read_u16("idxVT"), "ReadUint16(b(idxVT:idxVT + 1))");
    }
}
