//! Reference marshaler: encode/decode [`Value`] trees for any structure of a registry.
//!
//! Walks the same [`wire::layout`](crate::wire::layout) plan the backends emit code from, so
//! it exercises `MarshalType` semantics without a target-language runtime. TPM wire format is
//! big-endian throughout.

use crate::ast::*;
use crate::error::GenError;
use crate::registry::Registry;
use crate::value::Value;
use crate::wire::{layout, selected_len, ArrayLen, Elem, Scalar, Step, WireOp};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Length/count mismatch: {0}")]
    LengthMismatch(String),
    #[error("Registry: {0}")]
    Registry(#[from] GenError),
}

#[derive(Debug, Clone, Copy)]
pub struct Codec<'r> {
    registry: &'r Registry,
}

impl<'r> Codec<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Codec { registry }
    }

    /// Encode a structure value.
    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.encode_struct(&mut out, type_name, value)?;
        Ok(out)
    }

    /// Decode a structure value; trailing bytes are an error.
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        let (consumed, value) = self.decode_with_extent(type_name, bytes);
        let value = value?;
        if consumed != bytes.len() {
            return Err(CodecError::LengthMismatch(format!(
                "{}: {} trailing bytes",
                type_name,
                bytes.len() - consumed
            )));
        }
        Ok(value)
    }

    /// Decode a structure and return (bytes_consumed, result).
    pub fn decode_with_extent(&self, type_name: &str, bytes: &[u8]) -> (usize, Result<Value, CodecError>) {
        let mut cursor = Cursor::new(bytes);
        let value = self.decode_struct(&mut cursor, type_name);
        (cursor.position() as usize, value)
    }

    fn struct_type(&self, type_name: &str) -> Result<&'r StructType, CodecError> {
        self.registry
            .struct_of(type_name)
            .map(|(_, s)| s)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))
    }

    /// Selector field and null value after which a null-algorithm structure ends.
    fn null_skip(&self, type_name: &str) -> Result<Option<(&'r str, i64)>, CodecError> {
        match &self.struct_type(type_name)?.special_marshal {
            Some(SpecialMarshal::NullAlgorithmSkip { selector, null_value }) => {
                Ok(Some((selector.as_str(), self.registry.constant_value(null_value)?)))
            }
            None => Ok(None),
        }
    }

    fn union_type(&self, union: &str) -> Result<&'r UnionType, CodecError> {
        self.registry
            .lookup(union)
            .and_then(|t| t.as_union())
            .ok_or_else(|| CodecError::UnknownType(union.to_string()))
    }

    fn encode_struct(&self, w: &mut Vec<u8>, type_name: &str, value: &Value) -> Result<(), CodecError> {
        let map = value
            .as_struct()
            .ok_or_else(|| CodecError::Validation(format!("{} expects a structure value", type_name)))?;
        let steps = layout(self.registry, type_name)?;
        let skip = self.null_skip(type_name)?;
        let mut written: HashMap<&str, i64> = HashMap::new();
        let get = |name: &str| {
            map.get(name)
                .ok_or_else(|| CodecError::MissingField(format!("{}.{}", type_name, name)))
        };

        for step in &steps {
            let name = step.field.name.as_str();
            match &step.op {
                WireOp::Scalar(s) => {
                    let v = int_of(type_name, name, get(name)?)?;
                    write_scalar(w, *s, v)?;
                    written.insert(name, v);
                }
                WireOp::Object(t) => self.encode_struct(w, t, get(name)?)?,
                WireOp::Constant { scalar, value } => {
                    write_scalar(w, *scalar, self.registry.evaluate(value)?)?;
                }
                WireOp::Count { scalar, array } => {
                    let len = map.get(array.as_str()).and_then(Value::array_len).unwrap_or(0);
                    write_scalar(w, *scalar, len as i64)?;
                    written.insert(name, len as i64);
                }
                WireOp::Array { elem, len } => {
                    let v = get(name)?;
                    let count = v
                        .array_len()
                        .ok_or_else(|| CodecError::Validation(format!("{}.{} expects an array", type_name, name)))?;
                    let expected = match len {
                        ArrayLen::Fixed(n) => Some(*n),
                        ArrayLen::Selected { union, selector } => {
                            let sel = written.get(selector.as_str()).copied().ok_or_else(|| {
                                CodecError::MissingField(format!("{}.{}", type_name, selector))
                            })?;
                            Some(self.selected(union, sel)?)
                        }
                        ArrayLen::Tag(_) | ArrayLen::Rest => None,
                    };
                    if let Some(expected) = expected.filter(|e| *e != count) {
                        return Err(CodecError::LengthMismatch(format!(
                            "{}.{}: {} elements, expected {}",
                            type_name, name, count, expected
                        )));
                    }
                    self.check_max(type_name, step, count)?;
                    self.encode_array(w, elem, v)?;
                }
                WireOp::Sized { size, type_name: inner } => {
                    let mut body = Vec::new();
                    self.encode_struct(&mut body, inner, get(name)?)?;
                    write_scalar(w, *size, body.len() as i64)?;
                    w.write_all(&body)?;
                }
                WireOp::Selector { scalar, object, derived } => {
                    let v = match map.get(name) {
                        Some(v) => int_of(type_name, name, v)?,
                        None if *derived => self.derive_selector(&steps, object, get(object)?)?,
                        None => return Err(CodecError::MissingField(format!("{}.{}", type_name, name))),
                    };
                    write_scalar(w, *scalar, v)?;
                    written.insert(name, v);
                }
                WireOp::Union { .. } => match get(name)? {
                    Value::Null => {}
                    Value::Union { type_name: concrete, value } => self.encode_member(w, concrete, value)?,
                    _ => {
                        return Err(CodecError::Validation(format!("{}.{} expects a union value", type_name, name)))
                    }
                },
            }
            if let Some((selector, null)) = skip {
                if selector == name && written.get(name) == Some(&null) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn encode_member(&self, w: &mut Vec<u8>, type_name: &str, value: &Value) -> Result<(), CodecError> {
        if self.registry.is_struct(type_name) {
            return self.encode_struct(w, type_name, value);
        }
        let s = Scalar::of(self.registry, type_name).ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
        write_scalar(w, s, int_of(type_name, "value", value)?)
    }

    fn encode_array(&self, w: &mut Vec<u8>, elem: &Elem, v: &Value) -> Result<(), CodecError> {
        match (elem, v) {
            (Elem::Byte, Value::Bytes(b)) => w.write_all(b)?,
            (Elem::Byte, Value::List(items)) => {
                for item in items {
                    write_scalar(w, Scalar { size: 1, signed: false, is_bool: false }, int_of("array", "element", item)?)?;
                }
            }
            (Elem::Scalar(s), Value::List(items)) => {
                for item in items {
                    write_scalar(w, *s, int_of("array", "element", item)?)?;
                }
            }
            (Elem::Object(t), Value::List(items)) => {
                for item in items {
                    self.encode_struct(w, t, item)?;
                }
            }
            _ => return Err(CodecError::Validation(format!("array of {:?} cannot hold {:?}", elem, v))),
        }
        Ok(())
    }

    /// Selector value implied by the concrete type held in a union field.
    fn derive_selector(&self, steps: &[Step<'_>], object: &str, value: &Value) -> Result<i64, CodecError> {
        let union = steps
            .iter()
            .find(|s| s.field.name == object)
            .map(|s| s.field.type_name.as_str())
            .ok_or_else(|| CodecError::MissingField(object.to_string()))?;
        let u = self.union_type(union)?;
        let member = match value {
            Value::Union { type_name, .. } => u.members.iter().find(|m| &m.type_name == type_name),
            Value::Null => u.null_member.map(|i| &u.members[i]),
            _ => None,
        }
        .ok_or_else(|| CodecError::Validation(format!("{} has no member for {:?}", union, value)))?;
        Ok(self.registry.constant_value(&member.selector)?)
    }

    fn selected(&self, union: &str, selector: i64) -> Result<usize, CodecError> {
        selected_len(self.registry, union, selector)?
            .ok_or_else(|| CodecError::Validation(format!("{}: no member for selector {:#x}", union, selector)))
    }

    fn check_max(&self, type_name: &str, step: &Step<'_>, count: usize) -> Result<(), CodecError> {
        if let Some(max) = step.field.domain.max_bound() {
            let max = self.registry.evaluate(max)?;
            if count as i64 > max {
                return Err(CodecError::Validation(format!(
                    "{}.{}: {} elements exceed maximum {}",
                    type_name, step.field.name, count, max
                )));
            }
        }
        Ok(())
    }

    fn decode_struct(&self, r: &mut Cursor<&[u8]>, type_name: &str) -> Result<Value, CodecError> {
        let steps = layout(self.registry, type_name)?;
        let skip = self.null_skip(type_name)?;
        let mut out = HashMap::new();
        let mut locals: HashMap<&str, i64> = HashMap::new();

        for step in &steps {
            let name = step.field.name.as_str();
            match &step.op {
                WireOp::Scalar(s) => {
                    let v = read_scalar(r, *s)?;
                    locals.insert(name, int_of(type_name, name, &v)?);
                    out.insert(name.to_string(), v);
                }
                WireOp::Object(t) => {
                    out.insert(name.to_string(), self.decode_struct(r, t)?);
                }
                WireOp::Constant { scalar, value } => {
                    let v = read_scalar(r, *scalar)?;
                    let expected = self.registry.evaluate(value)?;
                    if int_of(type_name, name, &v)? != expected {
                        return Err(CodecError::Validation(format!(
                            "{}.{}: {:?} is not the constant {}",
                            type_name, name, v, value
                        )));
                    }
                }
                WireOp::Count { scalar, .. } => {
                    let v = read_scalar(r, *scalar)?;
                    locals.insert(name, int_of(type_name, name, &v)?);
                }
                WireOp::Array { elem, len } => {
                    let count = match len {
                        ArrayLen::Fixed(n) => Some(*n),
                        ArrayLen::Tag(tag) => {
                            let n = locals.get(tag.as_str()).copied().unwrap_or(0);
                            let n = usize::try_from(n)
                                .map_err(|_| CodecError::Validation(format!("{}.{}: negative count", type_name, tag)))?;
                            self.check_max(type_name, step, n)?;
                            Some(n)
                        }
                        ArrayLen::Selected { union, selector } => {
                            let sel = locals.get(selector.as_str()).copied().ok_or_else(|| {
                                CodecError::MissingField(format!("{}.{}", type_name, selector))
                            })?;
                            Some(self.selected(union, sel)?)
                        }
                        ArrayLen::Rest => None,
                    };
                    out.insert(name.to_string(), self.decode_array(r, elem, count)?);
                }
                WireOp::Sized { size, type_name: inner } => {
                    let n = int_of(type_name, name, &read_scalar(r, *size)?)? as usize;
                    let data: &[u8] = r.get_ref();
                    let start = r.position() as usize;
                    let body = data.get(start..start + n).ok_or_else(|| {
                        CodecError::LengthMismatch(format!("{}.{}: {} bytes announced", type_name, name, n))
                    })?;
                    let (consumed, value) = self.decode_with_extent(inner, body);
                    let value = value?;
                    if consumed != n {
                        return Err(CodecError::LengthMismatch(format!(
                            "{}.{}: {} of {} bytes used",
                            type_name, name, consumed, n
                        )));
                    }
                    r.set_position((start + n) as u64);
                    out.insert(name.to_string(), value);
                }
                WireOp::Selector { scalar, .. } => {
                    let v = read_scalar(r, *scalar)?;
                    locals.insert(name, int_of(type_name, name, &v)?);
                    if step.data {
                        out.insert(name.to_string(), v);
                    }
                }
                WireOp::Union { union, selector } => {
                    let sel = locals
                        .get(selector.as_str())
                        .copied()
                        .ok_or_else(|| CodecError::MissingField(format!("{}.{}", type_name, selector)))?;
                    out.insert(name.to_string(), self.decode_union(r, union, sel)?);
                }
            }
            if let Some((selector, null)) = skip {
                if selector == name && locals.get(name) == Some(&null) {
                    break;
                }
            }
        }
        Ok(Value::Struct(out))
    }

    fn decode_union(&self, r: &mut Cursor<&[u8]>, union: &str, selector: i64) -> Result<Value, CodecError> {
        let u = self.union_type(union)?;
        for (i, m) in u.members.iter().enumerate() {
            if self.registry.constant_value(&m.selector)? != selector {
                continue;
            }
            if Some(i) == u.null_member {
                return Ok(Value::Null);
            }
            let value = if self.registry.is_struct(&m.type_name) {
                self.decode_struct(r, &m.type_name)?
            } else {
                let s = Scalar::of(self.registry, &m.type_name)
                    .ok_or_else(|| CodecError::UnknownType(m.type_name.clone()))?;
                read_scalar(r, s)?
            };
            return Ok(Value::Union { type_name: m.type_name.clone(), value: Box::new(value) });
        }
        Err(CodecError::Validation(format!("{}: no member for selector {:#x}", union, selector)))
    }

    fn decode_array(&self, r: &mut Cursor<&[u8]>, elem: &Elem, count: Option<usize>) -> Result<Value, CodecError> {
        let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
        if let Elem::Byte = elem {
            let n = count.unwrap_or(remaining);
            if n > remaining {
                return Err(CodecError::LengthMismatch(format!("{} bytes wanted, {} left", n, remaining)));
            }
            let mut buf = vec![0u8; n];
            r.read_exact(&mut buf)?;
            return Ok(Value::Bytes(buf));
        }
        let mut items = Vec::new();
        loop {
            let done = match count {
                Some(n) => items.len() == n,
                None => r.position() as usize >= r.get_ref().len(),
            };
            if done {
                break;
            }
            let start = r.position();
            items.push(match elem {
                Elem::Scalar(s) => read_scalar(r, *s)?,
                Elem::Object(t) => self.decode_struct(r, t)?,
                Elem::Byte => unreachable!("byte arrays are read in one piece"),
            });
            if count.is_none() && r.position() == start {
                return Err(CodecError::LengthMismatch(format!(
                    "element {} of an implicit-length array consumed no bytes",
                    items.len() - 1
                )));
            }
        }
        Ok(Value::List(items))
    }
}

fn int_of(type_name: &str, field: &str, v: &Value) -> Result<i64, CodecError> {
    v.as_i64()
        .ok_or_else(|| CodecError::Validation(format!("{}.{} expects an integer, got {:?}", type_name, field, v)))
}

fn read_scalar(r: &mut Cursor<&[u8]>, s: Scalar) -> Result<Value, CodecError> {
    Ok(match (s.size, s.signed, s.is_bool) {
        (_, _, true) => Value::Bool(r.read_u8()? != 0),
        (1, false, _) => Value::U8(r.read_u8()?),
        (1, true, _) => Value::I8(r.read_i8()?),
        (2, false, _) => Value::U16(r.read_u16::<BigEndian>()?),
        (2, true, _) => Value::I16(r.read_i16::<BigEndian>()?),
        (4, false, _) => Value::U32(r.read_u32::<BigEndian>()?),
        (4, true, _) => Value::I32(r.read_i32::<BigEndian>()?),
        (8, false, _) => Value::U64(r.read_u64::<BigEndian>()?),
        (8, true, _) => Value::I64(r.read_i64::<BigEndian>()?),
        (n, _, _) => return Err(CodecError::Validation(format!("unsupported scalar size {}", n))),
    })
}

fn write_scalar(w: &mut Vec<u8>, s: Scalar, v: i64) -> Result<(), CodecError> {
    let bits = (s.size * 8) as u32;
    let fits = if s.signed {
        bits >= 64 || (v >= -(1i64 << (bits - 1)) && v < (1i64 << (bits - 1)))
    } else {
        v >= 0 && (bits >= 64 || v < (1i64 << bits))
    };
    if !fits {
        return Err(CodecError::Validation(format!("{} does not fit in {} bytes", v, s.size)));
    }
    match s.size {
        1 => w.write_u8(v as u8)?,
        2 => w.write_u16::<BigEndian>(v as u16)?,
        4 => w.write_u32::<BigEndian>(v as u32)?,
        8 => w.write_u64::<BigEndian>(v as u64)?,
        n => return Err(CodecError::Validation(format!("unsupported scalar size {}", n))),
    }
    Ok(())
}
