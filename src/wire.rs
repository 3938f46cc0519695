//! Wire layout of a structure: the language-neutral marshaling plan derived from
//! `MarshalType`.
//!
//! Backends and the reference [`Codec`](crate::codec::Codec) walk the same plan, so what the
//! generated code does and what the codec proves are one and the same.

use crate::ast::*;
use crate::error::{GenError, Result};
use crate::registry::Registry;

/// Encoding of an elementary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalar {
    pub size: usize,
    pub signed: bool,
    pub is_bool: bool,
}

impl Scalar {
    pub fn of(registry: &Registry, type_name: &str) -> Option<Scalar> {
        registry.value_type_of(type_name).map(|(_, v)| Scalar {
            size: v.size,
            signed: v.signed,
            is_bool: v.is_bool,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elem {
    Byte,
    Scalar(Scalar),
    /// Structure, by spec name.
    Object(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLen {
    /// Element count held by the named tag field.
    Tag(String),
    Fixed(usize),
    /// Everything left in the enclosing region.
    Rest,
    /// Byte length implied by the union member the named selector chooses.
    Selected { union: String, selector: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Scalar(Scalar),
    Object(String),
    Constant { scalar: Scalar, value: String },
    /// Element count of `array`.
    Count { scalar: Scalar, array: String },
    Array { elem: Elem, len: ArrayLen },
    /// Structure preceded by its byte length (the `LengthOfStruct` tag folds into this step).
    Sized { size: Scalar, type_name: String },
    /// Selector of `object`; `derived` when it is computed from the object's concrete type.
    Selector { scalar: Scalar, object: String, derived: bool },
    Union { union: String, selector: String },
}

#[derive(Debug, Clone)]
pub struct Step<'a> {
    pub field: &'a StructField,
    pub op: WireOp,
    /// The field is a member of the generated type (tags and constants are not).
    pub data: bool,
}

fn scalar(registry: &Registry, owner: &str, f: &StructField) -> Result<Scalar> {
    Scalar::of(registry, &f.type_name)
        .ok_or_else(|| GenError::inconsistent(owner, format!("{} ({}) is not a scalar", f.name, f.type_name)))
}

/// Spec name of the structure a field's type denotes, looking through typedefs.
fn object_name(registry: &Registry, type_name: &str) -> Option<String> {
    registry.struct_of(type_name).map(|(t, _)| t.spec_name.clone())
}

fn related<'f>(owner: &str, f: &'f StructField) -> Result<&'f str> {
    f.related
        .as_deref()
        .ok_or_else(|| GenError::inconsistent(owner, format!("{} has no counterpart", f.name)))
}

/// The marshaling plan of a structure, base fields first.
pub fn layout<'r>(registry: &'r Registry, struct_name: &str) -> Result<Vec<Step<'r>>> {
    let fields = registry.all_fields(struct_name)?;
    let selects_object = |sel: &StructField| {
        fields
            .iter()
            .any(|o| o.marshal == MarshalType::UnionObject && o.related.as_deref() == Some(sel.name.as_str()))
    };

    let mut steps = Vec::with_capacity(fields.len());
    for &f in &fields {
        let object = object_name(registry, &f.type_name);
        let (op, data) = match (f.marshal, object) {
            (MarshalType::SizedStruct, Some(object)) => {
                let tag = related(struct_name, f)?;
                let tag = fields
                    .iter()
                    .find(|t| t.name == tag)
                    .ok_or_else(|| GenError::inconsistent(struct_name, format!("missing size of {}", f.name)))?;
                (WireOp::Sized { size: scalar(registry, struct_name, tag)?, type_name: object }, true)
            }
            (MarshalType::Normal, Some(object)) => (WireOp::Object(object), true),
            (MarshalType::Normal | MarshalType::SizedStruct, None) => {
                (WireOp::Scalar(scalar(registry, struct_name, f)?), true)
            }
            (MarshalType::LengthOfStruct, _) => continue,
            (MarshalType::ConstantValue, _) => {
                let value = f
                    .domain
                    .only_value()
                    .ok_or_else(|| GenError::inconsistent(struct_name, format!("{} has no constant value", f.name)))?;
                (
                    WireOp::Constant { scalar: scalar(registry, struct_name, f)?, value: value.to_string() },
                    false,
                )
            }
            (MarshalType::ArrayCount, _) => (
                WireOp::Count {
                    scalar: scalar(registry, struct_name, f)?,
                    array: related(struct_name, f)?.to_string(),
                },
                false,
            ),
            (MarshalType::UnionSelector, _) => {
                let derived = selects_object(f);
                (
                    WireOp::Selector {
                        scalar: scalar(registry, struct_name, f)?,
                        object: related(struct_name, f)?.to_string(),
                        derived,
                    },
                    !derived,
                )
            }
            (MarshalType::UnionObject, _) => (
                WireOp::Union {
                    union: f.type_name.clone(),
                    selector: related(struct_name, f)?.to_string(),
                },
                true,
            ),
            (MarshalType::SpecialVariableLengthArray, _) => (
                WireOp::Array {
                    elem: Elem::Byte,
                    len: ArrayLen::Selected {
                        union: f.type_name.clone(),
                        selector: related(struct_name, f)?.to_string(),
                    },
                },
                true,
            ),
            (
                MarshalType::FixedLengthArray | MarshalType::VariableLengthArray | MarshalType::ImplicitLengthArray,
                object,
            ) => {
                let elem = if let Some(object) = object {
                    Elem::Object(object)
                } else {
                    let s = scalar(registry, struct_name, f)?;
                    if s.size == 1 && !s.signed && !s.is_bool {
                        Elem::Byte
                    } else {
                        Elem::Scalar(s)
                    }
                };
                let len = match f.marshal {
                    MarshalType::FixedLengthArray => {
                        let expr = f
                            .array_size
                            .as_deref()
                            .ok_or_else(|| GenError::inconsistent(struct_name, format!("{} has no size", f.name)))?;
                        ArrayLen::Fixed(usize::try_from(registry.evaluate(expr)?).map_err(|_| {
                            GenError::inconsistent(struct_name, format!("{} has a negative size", f.name))
                        })?)
                    }
                    MarshalType::VariableLengthArray => ArrayLen::Tag(related(struct_name, f)?.to_string()),
                    _ => ArrayLen::Rest,
                };
                (WireOp::Array { elem, len }, true)
            }
        };
        steps.push(Step { field: f, op, data });
    }
    Ok(steps)
}

/// Byte length of the array member `selector_value` chooses in `union`.
pub fn selected_len(registry: &Registry, union: &str, selector_value: i64) -> Result<Option<usize>> {
    let u = registry
        .require(union, "selected length")?
        .as_union()
        .ok_or_else(|| GenError::inconsistent(union, "not a union"))?;
    for m in &u.members {
        if registry.constant_value(&m.selector)? != selector_value {
            continue;
        }
        let count = match &m.array_size {
            Some(expr) => registry.evaluate(expr)?,
            None => 1,
        };
        let size = (registry.wire_size(&m.type_name)? as i64)
            .checked_mul(count)
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| GenError::inconsistent(union, format!("member {} has an invalid size", m.name)))?;
        return Ok(Some(size));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_fold_and_selectors_derive() {
        let mut r = Registry::new();
        r.add(TpmType::new("TPMS_A", TypeKind::Struct(StructType::default())), None).unwrap();
        let u = UnionType {
            members: vec![UnionMember {
                name: "a".into(),
                type_name: "TPMS_A".into(),
                selector: "SEL_A".into(),
                array_size: None,
                comment: String::new(),
                target_type: String::new(),
            }],
            ..Default::default()
        };
        r.add(TpmType::new("TPMU_X", TypeKind::Union(u)), None).unwrap();
        let mut sel = StructField::new("type", "UINT16");
        sel.marshal = MarshalType::UnionSelector;
        sel.related = Some("body".into());
        let mut body = StructField::new("body", "TPMU_X");
        body.marshal = MarshalType::UnionObject;
        body.related = Some("type".into());
        let mut magic = StructField::new("magic", "UINT32");
        magic.marshal = MarshalType::ConstantValue;
        magic.domain.add_single("0xFF544347");
        let s = StructType { fields: vec![magic, sel, body], ..Default::default() };
        r.add(TpmType::new("TPMT_X", TypeKind::Struct(s)), None).unwrap();

        let steps = layout(&r, "TPMT_X").unwrap();
        assert_eq!(steps.len(), 3);
        assert!(!steps[0].data);
        assert!(matches!(steps[1].op, WireOp::Selector { derived: true, .. }));
        assert!(!steps[1].data);
        assert_eq!(steps[2].op, WireOp::Union { union: "TPMU_X".into(), selector: "type".into() });
    }
}
