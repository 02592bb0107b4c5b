//! Layout compiler: turns one record type into the plans behind its
//! generated unpack and pack routines.
//!
//! A plan is a flat, ordered list of per-field operations plus the positional
//! field directory. Positions are 1-based and count every declared field;
//! deprecated fields keep their position forever (the slot stays zero in any
//! vtable this type ever writes), so marking a field deprecated never moves a
//! sibling.

use crate::diagnostics::{Diagnostic, Stage};
use crate::schema::{FieldType, RecordType, ScalarKind, Schema};

/// Closed dispatch over everything the generator knows how to lay out.
/// `Unsupported` is the explicit default arm: it renders as a runtime warning
/// placeholder instead of aborting generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    Scalar(ScalarKind),
    Str,
    VecScalar(ScalarKind),
    VecStr,
    VecTable(String),
    Table(String),
    Unsupported(String),
}

impl FieldOp {
    /// Whether the field's payload lives in the outline buffer behind a
    /// reserved 4-byte inline slot.
    pub fn is_outline(&self) -> bool {
        matches!(
            self,
            FieldOp::Str
                | FieldOp::VecScalar(_)
                | FieldOp::VecStr
                | FieldOp::VecTable(_)
                | FieldOp::Table(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct PlanField {
    /// 1-based vtable position.
    pub position: u16,
    pub name: String,
    pub op: FieldOp,
}

#[derive(Debug, Clone)]
pub struct TableHeader {
    pub name: String,
    /// Total declared positions, deprecated included.
    pub slot_count: u16,
    /// Field names per position, declaration order, deprecated included.
    pub slot_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DecodePlan {
    pub header: TableHeader,
    pub fields: Vec<PlanField>,
}

#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub header: TableHeader,
    pub fields: Vec<PlanField>,
}

#[derive(Debug, Clone)]
pub struct TablePlans {
    pub decode: DecodePlan,
    pub encode: EncodePlan,
}

impl TablePlans {
    /// Number of fields whose pack routine reserves an inline placeholder.
    pub fn outline_field_count(&self) -> usize {
        self.encode.fields.iter().filter(|f| f.op.is_outline()).count()
    }
}

/// Derive both plans for one table. Pure over the schema; the only output
/// besides the plans is an `Unsupported` warning per affected field.
pub fn plan_table(
    schema: &Schema,
    record: &RecordType,
    diagnostics: &mut Vec<Diagnostic>,
) -> TablePlans {
    let mut slot_names = Vec::with_capacity(record.fields.len());
    let mut fields = Vec::new();
    let mut position: u16 = 0;

    for field in &record.fields {
        position += 1;
        slot_names.push(field.name.clone());
        if field.deprecated {
            continue;
        }
        let op = field_op(schema, &field.ty);
        if let FieldOp::Unsupported(reason) = &op {
            diagnostics.push(Diagnostic::warning(
                "OTAB-LAYOUT-UNSUPPORTED-0001",
                Stage::Layout,
                format!(
                    "{}.{} has no layout rule ({reason}); emitting a warning placeholder",
                    record.name, field.name
                ),
            ));
        }
        fields.push(PlanField {
            position,
            name: field.name.clone(),
            op,
        });
    }

    let header = TableHeader {
        name: record.name.clone(),
        slot_count: position,
        slot_names,
    };
    TablePlans {
        decode: DecodePlan {
            header: header.clone(),
            fields: fields.clone(),
        },
        encode: EncodePlan { header, fields },
    }
}

fn field_op(schema: &Schema, ty: &FieldType) -> FieldOp {
    match ty {
        FieldType::Scalar(kind) => FieldOp::Scalar(*kind),
        FieldType::Str => FieldOp::Str,
        FieldType::Record(name) => match schema.record(name) {
            Some(def) if def.fixed => {
                FieldOp::Unsupported(format!("fixed record {name} is not supported as a table field"))
            }
            _ => FieldOp::Table(name.clone()),
        },
        FieldType::Vector(elem) => match elem.as_ref() {
            FieldType::Scalar(kind) => FieldOp::VecScalar(*kind),
            FieldType::Str => FieldOp::VecStr,
            FieldType::Record(name) => match schema.record(name) {
                Some(def) if def.fixed => FieldOp::Unsupported(format!(
                    "fixed record {name} is not supported as a vector element"
                )),
                _ => FieldOp::VecTable(name.clone()),
            },
            FieldType::Vector(_) => {
                FieldOp::Unsupported("vector of vector is not supported".to_string())
            }
        },
    }
}
