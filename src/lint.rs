//! Invariant checks over a normalized registry.
//!
//! ## Rules
//!
//! - **Tag counterpart**: every `ArrayCount` / `LengthOfStruct` tag has exactly one counterpart
//!   of the matching kind (`VariableLengthArray` / `SizedStruct`), which points back at it.
//! - **Union object selector**: every union object names a `UnionSelector` sibling.
//! - **Consistent selector**: a structure that is a member of several unions is selected by
//!   the same selector in all of them.
//! - **Distinct union members**: no union has two members of one structure type under different
//!   selectors, typedefs resolved and the null member included.
//! - **Empty enum** (warning): an enum table contributed no constants.
//!
//! [`normalize`](crate::normalize::normalize) runs these after its last step; any error-level
//! finding aborts the run.

use crate::ast::*;
use crate::registry::Registry;
use std::collections::HashMap;
use std::fmt;

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    TagCounterpart,
    UnionObjectSelector,
    ConsistentSelector,
    DistinctUnionMembers,
    EmptyEnum,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::TagCounterpart => "tag-counterpart",
            LintRule::UnionObjectSelector => "union-object-selector",
            LintRule::ConsistentSelector => "consistent-selector",
            LintRule::DistinctUnionMembers => "distinct-union-members",
            LintRule::EmptyEnum => "empty-enum",
        }
    }
}

/// A single lint message, located by type and optionally field.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub type_name: String,
    pub field: Option<String>,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for LintMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.field {
            Some(field) => write!(f, "{}.{}: {}: {} [{}]", self.type_name, field, severity, self.message, self.rule.id()),
            None => write!(f, "{}: {}: {} [{}]", self.type_name, severity, self.message, self.rule.id()),
        }
    }
}

fn error(type_name: &str, field: Option<&str>, rule: LintRule, message: String) -> LintMessage {
    LintMessage {
        type_name: type_name.to_string(),
        field: field.map(str::to_string),
        rule,
        severity: Severity::Error,
        message,
    }
}

/// Run all rules. Returns messages in registry order.
pub fn check(registry: &Registry) -> Vec<LintMessage> {
    let mut out = Vec::new();
    let mut selectors: HashMap<&str, (&str, &str)> = HashMap::new();

    for ty in registry.iter().filter(|t| t.implement) {
        let name = ty.spec_name.as_str();
        match &ty.kind {
            TypeKind::Struct(s) => check_struct(name, s, &mut out),
            TypeKind::Union(u) => {
                let mut seen: HashMap<&str, &str> = HashMap::new();
                for m in &u.members {
                    let concrete = registry
                        .struct_of(&m.type_name)
                        .map_or(m.type_name.as_str(), |(t, _)| t.spec_name.as_str());
                    if let Some(other) = seen.insert(concrete, m.selector.as_str()) {
                        if other != m.selector {
                            out.push(error(
                                name,
                                Some(&m.name),
                                LintRule::DistinctUnionMembers,
                                format!("type {} already used under selector {}", concrete, other),
                            ));
                        }
                    }
                    if !registry.is_struct(&m.type_name) {
                        continue;
                    }
                    match selectors.get(m.type_name.as_str()) {
                        Some((union, selector)) if *selector != m.selector => out.push(error(
                            &m.type_name,
                            None,
                            LintRule::ConsistentSelector,
                            format!(
                                "selected by {} in {} but by {} in {}",
                                selector, union, m.selector, name
                            ),
                        )),
                        Some(_) => {}
                        None => {
                            selectors.insert(m.type_name.as_str(), (name, m.selector.as_str()));
                        }
                    }
                }
            }
            TypeKind::Enum(e) if e.members.is_empty() => out.push(LintMessage {
                type_name: name.to_string(),
                field: None,
                rule: LintRule::EmptyEnum,
                severity: Severity::Warning,
                message: "no constants".to_string(),
            }),
            _ => {}
        }
    }
    out
}

fn check_struct(name: &str, s: &StructType, out: &mut Vec<LintMessage>) {
    for f in &s.fields {
        let counterpart = match f.marshal {
            MarshalType::ArrayCount => Some(MarshalType::VariableLengthArray),
            MarshalType::LengthOfStruct => Some(MarshalType::SizedStruct),
            _ => None,
        };
        if let Some(expected) = counterpart {
            let partners: Vec<&StructField> = s
                .fields
                .iter()
                .filter(|o| o.related.as_deref() == Some(f.name.as_str()))
                .collect();
            match partners.as_slice() {
                [p] if p.marshal == expected && f.related.as_deref() == Some(p.name.as_str()) => {}
                [p] => out.push(error(
                    name,
                    Some(&f.name),
                    LintRule::TagCounterpart,
                    format!("counterpart {} is {:?}, expected {:?}", p.name, p.marshal, expected),
                )),
                _ => out.push(error(
                    name,
                    Some(&f.name),
                    LintRule::TagCounterpart,
                    format!("{} counterparts, expected one {:?}", partners.len(), expected),
                )),
            }
        }

        let tag_of = match f.marshal {
            MarshalType::VariableLengthArray => Some(MarshalType::ArrayCount),
            MarshalType::SizedStruct => Some(MarshalType::LengthOfStruct),
            _ => None,
        };
        if let Some(expected) = tag_of {
            let tag = f.related.as_deref().and_then(|r| s.field(r));
            if tag.map(|t| t.marshal) != Some(expected) {
                out.push(error(
                    name,
                    Some(&f.name),
                    LintRule::TagCounterpart,
                    format!("missing {:?} tag", expected),
                ));
            }
        }

        if matches!(f.marshal, MarshalType::UnionObject | MarshalType::SpecialVariableLengthArray) {
            let selector = f.related.as_deref().and_then(|r| s.field(r));
            if selector.map(|t| t.marshal) != Some(MarshalType::UnionSelector) {
                out.push(error(
                    name,
                    Some(&f.name),
                    LintRule::UnionObjectSelector,
                    format!("selector {:?} is not a union selector", f.related),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(marshal_tag: MarshalType, marshal_data: MarshalType) -> Registry {
        let mut r = Registry::new();
        let mut tag = StructField::new("size", "UINT16");
        tag.marshal = marshal_tag;
        tag.related = Some("buffer".into());
        let mut data = StructField::new("buffer", "BYTE");
        data.marshal = marshal_data;
        data.related = Some("size".into());
        let s = StructType { fields: vec![tag, data], ..Default::default() };
        r.add(TpmType::new("TPM2B_X", TypeKind::Struct(s)), None).unwrap();
        r
    }

    #[test]
    fn consistent_tag_pair_is_clean() {
        let r = tagged(MarshalType::ArrayCount, MarshalType::VariableLengthArray);
        assert!(check(&r).is_empty());
    }

    #[test]
    fn mismatched_counterpart_is_an_error() {
        let r = tagged(MarshalType::ArrayCount, MarshalType::SizedStruct);
        let messages = check(&r);
        assert!(messages.iter().any(|m| m.rule == LintRule::TagCounterpart && m.severity == Severity::Error));
        assert!(messages[0].to_string().contains("[tag-counterpart]"));
    }

    #[test]
    fn shared_member_type_is_an_error() {
        let mut r = Registry::new();
        r.add(TpmType::new("TPMS_SCHEME_HASH", TypeKind::Struct(StructType::default())), None).unwrap();
        let member = |name: &str, selector: &str| UnionMember {
            name: name.into(),
            type_name: "TPMS_SCHEME_HASH".into(),
            selector: selector.into(),
            array_size: None,
            comment: String::new(),
            target_type: String::new(),
        };
        let u = UnionType { members: vec![member("a", "A"), member("b", "B")], ..Default::default() };
        r.add(TpmType::new("TPMU_X", TypeKind::Union(u)), None).unwrap();
        assert!(check(&r).iter().any(|m| m.rule == LintRule::DistinctUnionMembers));
    }

    #[test]
    fn typedef_and_null_members_are_compared_by_structure() {
        let mut r = Registry::new();
        r.add(TpmType::new("TPMS_SCHEME_HASH", TypeKind::Struct(StructType::default())), None).unwrap();
        let t = TypedefType { base: "TPMS_SCHEME_HASH".into(), ..Default::default() };
        r.add(TpmType::new("TPMS_SIG_SCHEME_RSASSA", TypeKind::Typedef(t)), None).unwrap();
        let member = |name: &str, type_name: &str, selector: &str| UnionMember {
            name: name.into(),
            type_name: type_name.into(),
            selector: selector.into(),
            array_size: None,
            comment: String::new(),
            target_type: String::new(),
        };
        let via_typedef = UnionType {
            members: vec![
                member("rsassa", "TPMS_SIG_SCHEME_RSASSA", "RSASSA"),
                member("hmac", "TPMS_SCHEME_HASH", "HMAC"),
            ],
            ..Default::default()
        };
        r.add(TpmType::new("TPMU_A", TypeKind::Union(via_typedef)), None).unwrap();
        let via_null = UnionType {
            members: vec![member("hmac", "TPMS_SCHEME_HASH", "HMAC"), member("null", "TPMS_SCHEME_HASH", "NULL")],
            null_member: Some(1),
            ..Default::default()
        };
        r.add(TpmType::new("TPMU_B", TypeKind::Union(via_null)), None).unwrap();

        let msgs = check(&r);
        let flagged: Vec<&str> = msgs
            .iter()
            .filter(|m| m.rule == LintRule::DistinctUnionMembers)
            .map(|m| m.type_name.as_str())
            .collect();
        assert_eq!(flagged, vec!["TPMU_A", "TPMU_B"]);
    }
}
