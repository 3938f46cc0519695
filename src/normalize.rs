//! Structural normalization of an extracted registry.
//!
//! The tables describe wire layouts the way the document's authors found convenient;
//! generated code wants them flat. The steps run in a fixed order because each one looks for
//! shapes the previous ones produce.

use crate::ast::*;
use crate::config::GeneratorConfig;
use crate::error::{GenError, Result};
use crate::lint::{self, Severity};
use crate::registry::Registry;
use heck::ToUpperCamelCase;
use log::{debug, info};
use std::collections::HashMap;

/// Run every step, then check the registry invariants.
pub fn normalize(registry: &mut Registry, config: &GeneratorConfig) -> Result<()> {
    let sized = flatten_sized(registry);
    let tagged = flatten_tagged(registry, config)?;
    let implicit = fix_implicit_lengths(registry, config)?;
    let session = mark_session_enc(registry)?;
    let null_alg = mark_null_algorithm_structs(registry, config)?;
    let derived = resolve_union_collisions(registry, config)?;
    registry.link_unions();
    info!(
        "normalized: {} sized, {} flattened, {} implicit, {} session-enc, {} null-alg, {} derived",
        sized, tagged, implicit, session, null_alg, derived
    );

    let findings = lint::check(registry);
    let errors: Vec<String> = findings
        .iter()
        .filter(|m| m.severity == Severity::Error)
        .map(|m| m.to_string())
        .collect();
    for m in findings.iter().filter(|m| m.severity == Severity::Warning) {
        debug!("{}", m);
    }
    if !errors.is_empty() {
        return Err(GenError::Invariant(errors.join("\n")));
    }
    Ok(())
}

fn struct_names(registry: &Registry) -> Vec<String> {
    registry
        .iter()
        .filter(|t| t.as_struct().is_some())
        .map(|t| t.spec_name.clone())
        .collect()
}

/// Step 1: `size=` integer followed by a structure becomes a length/sized-structure pair.
pub fn flatten_sized(registry: &mut Registry) -> usize {
    let mut count = 0;
    for name in struct_names(registry) {
        let Some(s) = registry.lookup(&name).and_then(|t| t.as_struct()) else { continue };
        let [tag, body] = s.fields.as_slice() else { continue };
        let eligible = tag.size_marker
            && tag.marshal == MarshalType::Normal
            && body.marshal == MarshalType::Normal
            && registry.is_integer(&tag.type_name)
            && registry.is_struct(&body.type_name);
        if !eligible {
            continue;
        }
        if let Some(s) = registry.lookup_mut(&name).and_then(|t| t.as_struct_mut()) {
            let body_name = s.fields[1].name.clone();
            let tag_name = s.fields[0].name.clone();
            s.fields[0].marshal = MarshalType::LengthOfStruct;
            s.fields[0].related = Some(body_name);
            s.fields[1].marshal = MarshalType::SizedStruct;
            s.fields[1].related = Some(tag_name);
            count += 1;
        }
    }
    count
}

/// The tag and data fields of a two-field count+array or selector+union wrapper.
fn wrapper_parts(s: &StructType) -> Option<(&StructField, &StructField)> {
    let [tag, data] = s.fields.as_slice() else { return None };
    let linked = tag.related.as_deref() == Some(data.name.as_str())
        && data.related.as_deref() == Some(tag.name.as_str());
    let shape = matches!(
        (tag.marshal, data.marshal),
        (MarshalType::ArrayCount, MarshalType::VariableLengthArray)
            | (MarshalType::UnionSelector, MarshalType::UnionObject)
            | (MarshalType::UnionSelector, MarshalType::SpecialVariableLengthArray)
    );
    (linked && shape && s.base.is_none()).then_some((tag, data))
}

/// Step 2: inline count+array and selector+union wrappers into the structures using them.
///
/// Runs to a fixpoint; a second run changes nothing.
pub fn flatten_tagged(registry: &mut Registry, config: &GeneratorConfig) -> Result<usize> {
    let mut total = 0;
    loop {
        let mut changed = 0;
        for name in struct_names(registry) {
            let Some(s) = registry.lookup(&name).and_then(|t| t.as_struct()) else { continue };
            let mut fields = Vec::with_capacity(s.fields.len() + 1);
            let mut local = 0;
            for f in &s.fields {
                let wrapper = (f.marshal == MarshalType::Normal
                    && !config.flatten_exemptions.contains(&f.type_name))
                .then(|| registry.struct_of(&f.type_name))
                .flatten()
                .filter(|(t, _)| t.spec_name != name && !config.flatten_exemptions.contains(&t.spec_name))
                .and_then(|(_, s)| wrapper_parts(s));
                let Some((inner_tag, inner_data)) = wrapper else {
                    fields.push(f.clone());
                    continue;
                };
                let tag_name = format!("{}{}", f.name, inner_tag.name.to_upper_camel_case());
                if s.field(&tag_name).is_some() {
                    return Err(GenError::inconsistent(
                        &name,
                        format!("flattening {} would duplicate field {}", f.name, tag_name),
                    ));
                }
                let mut tag = inner_tag.clone();
                tag.name = tag_name.clone();
                tag.related = Some(f.name.clone());
                tag.is_handle = f.is_handle;
                let mut data = inner_data.clone();
                data.name = f.name.clone();
                data.related = Some(tag_name);
                data.domain.merge_from(&f.domain);
                data.nullable = f.nullable || inner_data.nullable;
                data.requires_auth = f.requires_auth;
                data.is_handle = f.is_handle;
                data.comment = f.comment.clone();
                debug!("{}.{}: inlined {}", name, f.name, f.type_name);
                fields.push(tag);
                fields.push(data);
                local += 1;
            }
            if local > 0 {
                if let Some(s) = registry.lookup_mut(&name).and_then(|t| t.as_struct_mut()) {
                    s.fields = fields;
                }
                changed += local;
            }
        }
        if changed == 0 {
            return Ok(total);
        }
        total += changed;
    }
}

/// Step 3: configured fields become implicit-length arrays and lose their count tag.
pub fn fix_implicit_lengths(registry: &mut Registry, config: &GeneratorConfig) -> Result<usize> {
    let mut count = 0;
    for target in &config.implicit_length_fields {
        let Some(s) = registry.lookup(&target.structure).and_then(|t| t.as_struct()) else {
            debug!("implicit-length structure {} not present", target.structure);
            continue;
        };
        let Some(field) = s.field(&target.field) else {
            return Err(GenError::inconsistent(
                &target.structure,
                format!("implicit-length field {} not present", target.field),
            ));
        };
        if field.marshal == MarshalType::ImplicitLengthArray {
            continue;
        }
        let (element, domain) = match field.marshal {
            MarshalType::VariableLengthArray => (field.type_name.clone(), field.domain.clone()),
            _ => match registry.struct_of(&field.type_name).and_then(|(_, s)| wrapper_parts(s)) {
                Some((_, data)) if data.marshal.is_array() => (data.type_name.clone(), data.domain.clone()),
                _ => {
                    return Err(GenError::inconsistent(
                        &target.structure,
                        format!("{} is not an array", target.field),
                    ))
                }
            },
        };
        let tag = field.related.clone().filter(|_| field.marshal == MarshalType::VariableLengthArray);
        if let Some(s) = registry.lookup_mut(&target.structure).and_then(|t| t.as_struct_mut()) {
            if let Some(tag) = tag {
                s.fields.retain(|f| f.name != tag);
            }
            if let Some(f) = s.fields.iter_mut().find(|f| f.name == target.field) {
                f.marshal = MarshalType::ImplicitLengthArray;
                f.type_name = element;
                f.domain = domain;
                f.related = None;
            }
            count += 1;
        }
    }
    Ok(count)
}

/// Step 4: record the length-prefix layout of each request's first parameter.
pub fn mark_session_enc(registry: &mut Registry) -> Result<usize> {
    let mut found = Vec::new();
    for (t, s) in registry.all_of::<StructType>() {
        if !s.is_request() {
            continue;
        }
        let Some(first) = s.params().next() else { continue };
        let info = match first.marshal {
            MarshalType::ArrayCount | MarshalType::LengthOfStruct => {
                let related = first.related.as_deref().and_then(|r| s.field(r));
                match related {
                    Some(data) => Some(SessionEncInfo {
                        size_len: registry.wire_size(&first.type_name)?,
                        val_len: element_len(registry, data)?,
                    }),
                    None => None,
                }
            }
            MarshalType::Normal => match registry
                .struct_of(&first.type_name)
                .and_then(|(_, w)| w.fields.first().map(|tag| (w, tag)))
            {
                Some((w, tag)) if tag.marshal.is_tag() => {
                    match tag.related.as_deref().and_then(|r| w.field(r)) {
                        Some(data) => Some(SessionEncInfo {
                            size_len: registry.wire_size(&tag.type_name)?,
                            val_len: element_len(registry, data)?,
                        }),
                        None => None,
                    }
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(info) = info {
            found.push((t.spec_name.clone(), info));
        }
    }
    let count = found.len();
    for (name, info) in found {
        if let Some(s) = registry.lookup_mut(&name).and_then(|t| t.as_struct_mut()) {
            s.session_enc = Some(info);
        }
    }
    Ok(count)
}

fn element_len(registry: &Registry, data: &StructField) -> Result<usize> {
    if data.marshal == MarshalType::SizedStruct {
        return Ok(1);
    }
    registry.wire_size(&data.type_name)
}

/// Step 5: selector-dependent tails of null-algorithm structures become plain values.
pub fn mark_null_algorithm_structs(registry: &mut Registry, config: &GeneratorConfig) -> Result<usize> {
    let mut count = 0;
    let mut touched_unions = Vec::new();
    for name in &config.null_algorithm_structs {
        let Some(s) = registry.lookup(name).and_then(|t| t.as_struct()) else {
            debug!("null-algorithm structure {} not present", name);
            continue;
        };
        if s.special_marshal.is_some() {
            continue;
        }
        let mut rewrites = Vec::new();
        let mut selector = None;
        for f in &s.fields {
            if f.marshal != MarshalType::UnionObject {
                continue;
            }
            let union = registry.require(&f.type_name, name)?;
            let u = union
                .as_union()
                .ok_or_else(|| GenError::inconsistent(name, format!("{} is not a union", f.type_name)))?;
            let value_type = common_value_type(registry, &f.type_name, u)?;
            rewrites.push((f.name.clone(), value_type));
            touched_unions.push(f.type_name.clone());
            selector = f.related.clone();
        }
        let Some(selector) = selector else {
            return Err(GenError::inconsistent(name, "no union-typed field behind a selector"));
        };
        if let Some(s) = registry.lookup_mut(name).and_then(|t| t.as_struct_mut()) {
            for (field, value_type) in rewrites {
                if let Some(f) = s.fields.iter_mut().find(|f| f.name == field) {
                    f.marshal = MarshalType::Normal;
                    f.type_name = value_type;
                    f.related = None;
                }
            }
            if let Some(sel) = s.fields.iter_mut().find(|f| f.name == selector) {
                sel.marshal = MarshalType::Normal;
                sel.related = None;
            }
            s.special_marshal = Some(SpecialMarshal::NullAlgorithmSkip {
                selector,
                null_value: config.null_selector.clone(),
            });
            count += 1;
        }
    }

    for union in touched_unions {
        let referenced = registry.iter().filter_map(|t| t.as_struct()).any(|s| {
            s.fields.iter().any(|f| f.type_name == union)
        });
        if !referenced {
            if let Some(t) = registry.lookup_mut(&union) {
                debug!("{} no longer referenced", union);
                t.implement = false;
            }
        }
    }
    Ok(count)
}

/// The single elementary value type every non-null member of a union is encoded as.
fn common_value_type(registry: &Registry, union: &str, u: &UnionType) -> Result<String> {
    let mut common: Option<String> = None;
    for (i, m) in u.members.iter().enumerate() {
        if Some(i) == u.null_member {
            continue;
        }
        let (value, _) = registry.value_type_of(&m.type_name).ok_or_else(|| GenError::UnionCollision {
            union: union.to_string(),
            reason: format!("member {} is not a scalar", m.name),
        })?;
        match &common {
            Some(c) if *c != value.spec_name => {
                return Err(GenError::UnionCollision {
                    union: union.to_string(),
                    reason: format!("members disagree on value type ({} vs {})", c, value.spec_name),
                })
            }
            Some(_) => {}
            None => common = Some(value.spec_name.clone()),
        }
    }
    common.ok_or_else(|| GenError::UnionCollision {
        union: union.to_string(),
        reason: "no non-null member".to_string(),
    })
}

/// Turn a typedef of a structure into an empty structure deriving from it, keeping its name,
/// and place it after its base.
fn derive_from_typedef(registry: &mut Registry, name: &str) -> Result<()> {
    let base = registry.resolve_typedef(name)?.spec_name.clone();
    let error_code = registry
        .lookup(name)
        .and_then(|t| t.as_typedef())
        .and_then(|t| t.error_code.clone());
    if let Some(t) = registry.lookup_mut(name) {
        t.kind = TypeKind::Struct(StructType { base: Some(base.clone()), error_code, ..Default::default() });
    }
    registry.ensure_after(name, &base)?;
    debug!("{}: structure typedef now derives from {}", name, base);
    Ok(())
}

/// Step 6: every (union, selector) pair gets a concrete type of its own.
///
/// Members typed by a structure typedef get a structure deriving from the typedef's base.
/// Members sharing a type under different selectors, the null member included, each get a
/// derived structure named after their selector.
pub fn resolve_union_collisions(registry: &mut Registry, config: &GeneratorConfig) -> Result<usize> {
    let mut created = 0;
    let unions: Vec<String> = registry
        .all_of::<UnionType>()
        .map(|(t, _)| t.spec_name.clone())
        .collect();
    for union in unions {
        let Some(u) = registry.lookup(&union).and_then(|t| t.as_union()) else { continue };
        let mut typedefs: Vec<String> = Vec::new();
        for m in &u.members {
            if registry.is_struct_typedef(&m.type_name) && !typedefs.contains(&m.type_name) {
                typedefs.push(m.type_name.clone());
            }
        }
        for name in typedefs {
            derive_from_typedef(registry, &name)?;
            created += 1;
        }

        let Some(u) = registry.lookup(&union).and_then(|t| t.as_union()) else { continue };
        let mut by_type: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, m) in u.members.iter().enumerate() {
            by_type.entry(m.type_name.as_str()).or_default().push(i);
        }
        let mut renames: Vec<(usize, String, String)> = Vec::new();
        let mut groups: Vec<(&str, Vec<usize>)> = by_type.into_iter().filter(|(_, v)| v.len() > 1).collect();
        groups.sort_by_key(|(_, v)| v[0]);
        for (shared, members) in groups {
            if !registry.is_struct(shared) {
                return Err(GenError::UnionCollision {
                    union: union.clone(),
                    reason: format!("members {:?} share non-structure type {}", members, shared),
                });
            }
            for i in members {
                let selector = &u.members[i].selector;
                let mnemonic = selector
                    .strip_prefix(config.alg_prefix.as_str())
                    .unwrap_or(selector);
                renames.push((i, shared.to_string(), format!("{}_{}", shared, mnemonic)));
            }
        }

        let mut anchors: HashMap<String, String> = HashMap::new();
        for (i, shared, derived) in renames {
            if !registry.contains(&derived) {
                let anchor = anchors.get(&shared).cloned().unwrap_or_else(|| shared.clone());
                let s = StructType { base: Some(shared.clone()), ..Default::default() };
                let comment = format!("{} for {}", shared, derived);
                registry.add(TpmType::new(&derived, TypeKind::Struct(s)).with_comment(&comment), Some(&anchor))?;
                anchors.insert(shared.clone(), derived.clone());
                created += 1;
                debug!("{}: derived {} from {}", union, derived, shared);
            }
            if let Some(u) = registry.lookup_mut(&union).and_then(|t| t.as_union_mut()) {
                u.members[i].type_name = derived;
            }
        }
    }
    Ok(created)
}
