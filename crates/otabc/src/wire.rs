//! Reference executor for table plans.
//!
//! Runs the layout compiler's plans directly against byte buffers, mirroring
//! the semantics of the generated Octave routines: absent map key = absent
//! field, empty strings/vectors encode as absent, and decoding materializes a
//! default for every non-deprecated field so sibling instances always expose
//! the same field set. Encoding builds growable inline/outline arenas and
//! back-patches reserved offset slots once the inline length is final.
//!
//! Offsets here are 0-based; the generated Octave is 1-based. Both sides
//! realize the same wire contract.

use std::collections::BTreeMap;
use std::fmt;

use crate::layout::{self, DecodePlan, EncodePlan, FieldOp};
use crate::schema::{ScalarKind, Schema};

/// Dynamic value model. Decoding produces the canonical variant per scalar
/// kind: `Int` for signed kinds, `UInt` for unsigned kinds, `Float` for the
/// floating kinds, `Bool` for bool.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Table(TableValue),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableValue {
    pub fields: BTreeMap<String, Value>,
}

impl TableValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireError {
    UnknownType(String),
    Type {
        record: String,
        field: String,
        message: String,
    },
    Truncated {
        record: String,
        at: usize,
    },
    Malformed {
        record: String,
        message: String,
    },
    Internal {
        record: String,
        message: String,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnknownType(name) => write!(f, "unknown record type {name:?}"),
            WireError::Type {
                record,
                field,
                message,
            } => write!(f, "{record}.{field}: {message}"),
            WireError::Truncated { record, at } => {
                write!(f, "{record}: buffer truncated at byte {at}")
            }
            WireError::Malformed { record, message } => write!(f, "{record}: {message}"),
            WireError::Internal { record, message } => {
                write!(f, "{record}: internal consistency fault: {message}")
            }
        }
    }
}

impl std::error::Error for WireError {}

pub fn encode_table(
    schema: &Schema,
    record: &str,
    value: &TableValue,
) -> Result<Vec<u8>, WireError> {
    let def = schema
        .record(record)
        .ok_or_else(|| WireError::UnknownType(record.to_string()))?;
    let mut scratch = Vec::new();
    let plans = layout::plan_table(schema, def, &mut scratch);
    encode_with_plan(schema, &plans.encode, value)
}

/// Decode the table whose 32-bit forward offset word sits at `at`. For a root
/// buffer that is byte 0 (the RTO); for a nested field it is the resolved
/// placeholder position, whose value has identical semantics.
pub fn decode_table(
    schema: &Schema,
    record: &str,
    b: &[u8],
    at: usize,
) -> Result<TableValue, WireError> {
    let def = schema
        .record(record)
        .ok_or_else(|| WireError::UnknownType(record.to_string()))?;
    let mut scratch = Vec::new();
    let plans = layout::plan_table(schema, def, &mut scratch);
    decode_with_plan(schema, &plans.decode, b, at)
}

fn encode_with_plan(
    schema: &Schema,
    plan: &EncodePlan,
    value: &TableValue,
) -> Result<Vec<u8>, WireError> {
    let record = plan.header.name.as_str();
    let n = plan.header.slot_count as usize;

    // Inline arena seeded with the 4-byte vtable-offset word, patched last.
    let mut inline: Vec<u8> = vec![0; 4];
    let mut vt_entries = vec![0u16; n];
    let mut outline: Vec<u8> = Vec::new();
    let mut reserved: Vec<usize> = Vec::new();
    let mut resolved: Vec<i64> = Vec::new();

    for field in &plan.fields {
        let Some(v) = value.fields.get(&field.name) else {
            continue;
        };
        if value_is_empty(v) {
            continue;
        }
        if matches!(field.op, FieldOp::Unsupported(_)) {
            continue;
        }

        let slot = inline.len();
        if slot > u16::MAX as usize {
            return Err(internal(record, "inline data exceeds the 16-bit offset range"));
        }
        vt_entries[field.position as usize - 1] = slot as u16;

        match &field.op {
            FieldOp::Scalar(kind) => {
                let bytes = scalar_bytes(*kind, v, record, &field.name)?;
                inline.extend_from_slice(&bytes);
            }
            FieldOp::Str => {
                let s = expect_str(v, record, &field.name)?;
                reserve_slot(&mut inline, &mut reserved, &mut resolved, outline.len(), 0);
                outline.extend_from_slice(&string_bytes(s));
            }
            FieldOp::Table(type_name) => {
                let nested = expect_table(v, record, &field.name)?;
                let bytes = encode_table(schema, type_name, nested)?;
                let rto = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64;
                // The nested buffer's own RTO word is dropped; the reserved
                // slot must land on the nested root table start instead.
                reserve_slot(
                    &mut inline,
                    &mut reserved,
                    &mut resolved,
                    outline.len(),
                    rto - 4,
                );
                outline.extend_from_slice(&bytes[4..]);
            }
            FieldOp::VecScalar(kind) => {
                let items = expect_array(v, record, &field.name)?;
                reserve_slot(&mut inline, &mut reserved, &mut resolved, outline.len(), 0);
                outline.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    let bytes = scalar_bytes(*kind, item, record, &field.name)?;
                    outline.extend_from_slice(&bytes);
                }
            }
            FieldOp::VecStr => {
                let items = expect_array(v, record, &field.name)?;
                reserve_slot(&mut inline, &mut reserved, &mut resolved, outline.len(), 0);
                let count = items.len();
                outline.extend_from_slice(&(count as u32).to_le_bytes());
                let mut sub: Vec<u8> = Vec::with_capacity(4 * count);
                let mut blob: Vec<u8> = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let s = expect_str(item, record, &field.name)?;
                    // Each sub-offset is relative to its own position in the
                    // sub-offset table.
                    let off = ((count - i) * 4 + blob.len()) as u32;
                    sub.extend_from_slice(&off.to_le_bytes());
                    blob.extend_from_slice(&string_bytes(s));
                }
                outline.extend_from_slice(&sub);
                outline.extend_from_slice(&blob);
            }
            FieldOp::VecTable(type_name) => {
                let items = expect_array(v, record, &field.name)?;
                reserve_slot(&mut inline, &mut reserved, &mut resolved, outline.len(), 0);
                let count = items.len();
                outline.extend_from_slice(&(count as u32).to_le_bytes());
                let mut sub: Vec<u8> = Vec::with_capacity(4 * count);
                let mut blob: Vec<u8> = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let nested = expect_table(item, record, &field.name)?;
                    let bytes = encode_table(schema, type_name, nested)?;
                    let rto = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64;
                    let off = ((count - i) * 4 + blob.len()) as i64 + rto - 4;
                    if off < 0 || off > u32::MAX as i64 {
                        return Err(internal(record, "vector element offset out of range"));
                    }
                    sub.extend_from_slice(&(off as u32).to_le_bytes());
                    blob.extend_from_slice(&bytes[4..]);
                }
                outline.extend_from_slice(&sub);
                outline.extend_from_slice(&blob);
            }
            FieldOp::Unsupported(_) => unreachable!("skipped above"),
        }
    }

    if reserved.len() != resolved.len() {
        return Err(internal(
            record,
            &format!(
                "mismatched outline offset counts ({} reserved, {} resolved)",
                reserved.len(),
                resolved.len()
            ),
        ));
    }

    let inline_len = inline.len();
    if inline_len > u16::MAX as usize {
        return Err(internal(record, "inline data exceeds the 16-bit offset range"));
    }
    for (slot, rel) in reserved.iter().zip(resolved.iter()) {
        let val = rel + inline_len as i64;
        if val < 0 || val > u32::MAX as i64 {
            return Err(internal(record, "outline offset out of range"));
        }
        inline[*slot..*slot + 4].copy_from_slice(&(val as u32).to_le_bytes());
    }

    let len_vt = 4 + 2 * n;
    let mut vt: Vec<u8> = Vec::with_capacity(len_vt);
    vt.extend_from_slice(&(len_vt as u16).to_le_bytes());
    vt.extend_from_slice(&(inline_len as u16).to_le_bytes());
    for entry in &vt_entries {
        vt.extend_from_slice(&entry.to_le_bytes());
    }
    inline[0..4].copy_from_slice(&(len_vt as i32).to_le_bytes());

    let len_inner = inline_len + len_vt;
    let len_pad = (4 - len_inner % 4) % 4;
    let rto = (4 + len_pad + len_vt) as u32;

    let mut buf = Vec::with_capacity(4 + len_pad + len_inner + outline.len());
    buf.extend_from_slice(&rto.to_le_bytes());
    buf.resize(buf.len() + len_pad, 0);
    buf.extend_from_slice(&vt);
    buf.extend_from_slice(&inline);
    buf.extend_from_slice(&outline);
    Ok(buf)
}

fn decode_with_plan(
    schema: &Schema,
    plan: &DecodePlan,
    b: &[u8],
    at: usize,
) -> Result<TableValue, WireError> {
    let record = plan.header.name.as_str();

    let rto = read_u32(b, at, record)? as usize;
    let table = at + rto;
    let soff = read_i32(b, table, record)? as i64;
    let vt = table as i64 - soff;
    if vt < 0 || vt as usize >= b.len() {
        return Err(WireError::Malformed {
            record: record.to_string(),
            message: format!("vtable offset {soff} points outside the buffer"),
        });
    }
    let vt = vt as usize;
    let size_vt = read_u16(b, vt, record)?;
    let n_avail = (size_vt / 2).saturating_sub(2);

    let mut out = TableValue::default();
    for field in &plan.fields {
        let k = field.position;
        let entry = if k > n_avail {
            // Schema evolution: newer code reading older data.
            0
        } else {
            read_u16(b, vt + 4 + 2 * (k as usize - 1), record)?
        };
        if entry == 0 {
            out.fields
                .insert(field.name.clone(), default_value(&field.op));
            continue;
        }
        let anchor = table + entry as usize;
        let value = match &field.op {
            FieldOp::Scalar(kind) => scalar_value(*kind, b, anchor, record)?,
            FieldOp::Str => {
                let pos = anchor + read_u32(b, anchor, record)? as usize;
                decode_string(b, pos, record)?
            }
            FieldOp::Table(type_name) => {
                Value::Table(decode_table(schema, type_name, b, anchor)?)
            }
            FieldOp::VecScalar(kind) => {
                let pos = anchor + read_u32(b, anchor, record)? as usize;
                let count = read_u32(b, pos, record)? as usize;
                let width = kind.size_of();
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    items.push(scalar_value(*kind, b, pos + 4 + i * width, record)?);
                }
                Value::Array(items)
            }
            FieldOp::VecStr => {
                let pos = anchor + read_u32(b, anchor, record)? as usize;
                let count = read_u32(b, pos, record)? as usize;
                let mut items = Vec::with_capacity(count);
                for k1 in 1..=count {
                    let entry_pos = pos + 4 * k1;
                    let elem = entry_pos + read_u32(b, entry_pos, record)? as usize;
                    items.push(decode_string(b, elem, record)?);
                }
                Value::Array(items)
            }
            FieldOp::VecTable(type_name) => {
                let pos = anchor + read_u32(b, anchor, record)? as usize;
                let count = read_u32(b, pos, record)? as usize;
                let mut items = Vec::with_capacity(count);
                for k1 in 1..=count {
                    let entry_pos = pos + 4 * k1;
                    items.push(Value::Table(decode_table(schema, type_name, b, entry_pos)?));
                }
                Value::Array(items)
            }
            FieldOp::Unsupported(_) => default_value(&field.op),
        };
        out.fields.insert(field.name.clone(), value);
    }
    Ok(out)
}

fn reserve_slot(
    inline: &mut Vec<u8>,
    reserved: &mut Vec<usize>,
    resolved: &mut Vec<i64>,
    outline_len: usize,
    adjust: i64,
) {
    let slot = inline.len();
    resolved.push(outline_len as i64 - slot as i64 + adjust);
    reserved.push(slot);
    inline.extend_from_slice(&[0, 0, 0, 0]);
}

fn internal(record: &str, message: &str) -> WireError {
    WireError::Internal {
        record: record.to_string(),
        message: message.to_string(),
    }
}

fn value_is_empty(v: &Value) -> bool {
    match v {
        Value::Str(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

pub fn default_value(op: &FieldOp) -> Value {
    match op {
        FieldOp::Scalar(kind) => scalar_zero(*kind),
        FieldOp::Str => Value::Str(String::new()),
        FieldOp::Table(_) => Value::Table(TableValue::default()),
        FieldOp::VecScalar(_) | FieldOp::VecStr | FieldOp::VecTable(_) | FieldOp::Unsupported(_) => {
            Value::Array(Vec::new())
        }
    }
}

fn scalar_zero(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Int32 | ScalarKind::Int64 => {
            Value::Int(0)
        }
        ScalarKind::Uint8 | ScalarKind::Uint16 | ScalarKind::Uint32 | ScalarKind::Uint64 => {
            Value::UInt(0)
        }
        ScalarKind::Float32 | ScalarKind::Float64 => Value::Float(0.0),
    }
}

fn string_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + s.len());
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out
}

fn decode_string(b: &[u8], pos: usize, record: &str) -> Result<Value, WireError> {
    let len = read_u32(b, pos, record)? as usize;
    let bytes = b
        .get(pos + 4..pos + 4 + len)
        .ok_or_else(|| WireError::Truncated {
            record: record.to_string(),
            at: pos + 4,
        })?;
    Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
}

fn type_err(record: &str, field: &str, message: String) -> WireError {
    WireError::Type {
        record: record.to_string(),
        field: field.to_string(),
        message,
    }
}

fn expect_str<'v>(v: &'v Value, record: &str, field: &str) -> Result<&'v str, WireError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(type_err(record, field, format!("expected a string, got {other:?}"))),
    }
}

fn expect_array<'v>(v: &'v Value, record: &str, field: &str) -> Result<&'v [Value], WireError> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(type_err(record, field, format!("expected an array, got {other:?}"))),
    }
}

fn expect_table<'v>(v: &'v Value, record: &str, field: &str) -> Result<&'v TableValue, WireError> {
    match v {
        Value::Table(t) => Ok(t),
        other => Err(type_err(record, field, format!("expected a table, got {other:?}"))),
    }
}

fn as_signed(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::UInt(u) if *u <= i64::MAX as u64 => Some(*u as i64),
        _ => None,
    }
}

fn as_unsigned(v: &Value) -> Option<u64> {
    match v {
        Value::UInt(u) => Some(*u),
        Value::Int(i) if *i >= 0 => Some(*i as u64),
        _ => None,
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Float(x) => Some(*x),
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        _ => None,
    }
}

fn scalar_bytes(
    kind: ScalarKind,
    v: &Value,
    record: &str,
    field: &str,
) -> Result<Vec<u8>, WireError> {
    fn signed(
        kind: ScalarKind,
        v: &Value,
        record: &str,
        field: &str,
        min: i64,
        max: i64,
    ) -> Result<i64, WireError> {
        let i = as_signed(v)
            .ok_or_else(|| type_err(record, field, format!("expected a {kind} value, got {v:?}")))?;
        if i < min || i > max {
            return Err(type_err(record, field, format!("{i} does not fit in {kind}")));
        }
        Ok(i)
    }
    fn unsigned(
        kind: ScalarKind,
        v: &Value,
        record: &str,
        field: &str,
        max: u64,
    ) -> Result<u64, WireError> {
        let u = as_unsigned(v)
            .ok_or_else(|| type_err(record, field, format!("expected a {kind} value, got {v:?}")))?;
        if u > max {
            return Err(type_err(record, field, format!("{u} does not fit in {kind}")));
        }
        Ok(u)
    }

    Ok(match kind {
        ScalarKind::Bool => match v {
            Value::Bool(b) => vec![*b as u8],
            other => {
                return Err(type_err(record, field, format!("expected a bool, got {other:?}")));
            }
        },
        ScalarKind::Int8 => {
            let i = signed(kind, v, record, field, i8::MIN as i64, i8::MAX as i64)?;
            (i as i8).to_le_bytes().to_vec()
        }
        ScalarKind::Int16 => {
            let i = signed(kind, v, record, field, i16::MIN as i64, i16::MAX as i64)?;
            (i as i16).to_le_bytes().to_vec()
        }
        ScalarKind::Int32 => {
            let i = signed(kind, v, record, field, i32::MIN as i64, i32::MAX as i64)?;
            (i as i32).to_le_bytes().to_vec()
        }
        ScalarKind::Int64 => {
            let i = signed(kind, v, record, field, i64::MIN, i64::MAX)?;
            i.to_le_bytes().to_vec()
        }
        ScalarKind::Uint8 => {
            let u = unsigned(kind, v, record, field, u8::MAX as u64)?;
            (u as u8).to_le_bytes().to_vec()
        }
        ScalarKind::Uint16 => {
            let u = unsigned(kind, v, record, field, u16::MAX as u64)?;
            (u as u16).to_le_bytes().to_vec()
        }
        ScalarKind::Uint32 => {
            let u = unsigned(kind, v, record, field, u32::MAX as u64)?;
            (u as u32).to_le_bytes().to_vec()
        }
        ScalarKind::Uint64 => {
            let u = unsigned(kind, v, record, field, u64::MAX)?;
            u.to_le_bytes().to_vec()
        }
        ScalarKind::Float32 => {
            let x = as_float(v).ok_or_else(|| {
                type_err(record, field, format!("expected a float32 value, got {v:?}"))
            })?;
            (x as f32).to_le_bytes().to_vec()
        }
        ScalarKind::Float64 => {
            let x = as_float(v).ok_or_else(|| {
                type_err(record, field, format!("expected a float64 value, got {v:?}"))
            })?;
            x.to_le_bytes().to_vec()
        }
    })
}

fn scalar_value(kind: ScalarKind, b: &[u8], at: usize, record: &str) -> Result<Value, WireError> {
    let width = kind.size_of();
    let bytes = b.get(at..at + width).ok_or_else(|| WireError::Truncated {
        record: record.to_string(),
        at,
    })?;
    Ok(match kind {
        ScalarKind::Bool => Value::Bool(bytes[0] != 0),
        ScalarKind::Int8 => Value::Int(bytes[0] as i8 as i64),
        ScalarKind::Uint8 => Value::UInt(bytes[0] as u64),
        ScalarKind::Int16 => Value::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        ScalarKind::Uint16 => Value::UInt(u16::from_le_bytes([bytes[0], bytes[1]]) as u64),
        ScalarKind::Int32 => {
            Value::Int(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        ScalarKind::Uint32 => {
            Value::UInt(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
        }
        ScalarKind::Int64 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Value::Int(i64::from_le_bytes(arr))
        }
        ScalarKind::Uint64 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Value::UInt(u64::from_le_bytes(arr))
        }
        ScalarKind::Float32 => {
            Value::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)
        }
        ScalarKind::Float64 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Value::Float(f64::from_le_bytes(arr))
        }
    })
}

fn read_u16(b: &[u8], at: usize, record: &str) -> Result<u16, WireError> {
    let bytes = b.get(at..at + 2).ok_or_else(|| WireError::Truncated {
        record: record.to_string(),
        at,
    })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(b: &[u8], at: usize, record: &str) -> Result<u32, WireError> {
    let bytes = b.get(at..at + 4).ok_or_else(|| WireError::Truncated {
        record: record.to_string(),
        at,
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32(b: &[u8], at: usize, record: &str) -> Result<i32, WireError> {
    read_u32(b, at, record).map(|u| u as i32)
}
