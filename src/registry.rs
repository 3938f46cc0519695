//! The type registry: an order-preserving arena of every type and constant of one run.
//!
//! Types live in a `Vec` and are referred to by [`TypeId`]; emission order is a separate
//! `Vec<TypeId>` so normalization can insert a type right after another one. Constants live
//! in a parallel arena indexed by spec name. Both are addressed by spec name from the outside.

use crate::adapt::Lang;
use crate::algmacro::AlgorithmClassifier;
use crate::ast::*;
use crate::error::{GenError, Result};
use crate::expr::{evaluate_at, EvalContext, MAX_DEPTH};
use std::collections::HashMap;

pub type TypeId = usize;

const SEED_VALUE_TYPES: &[(&str, usize, bool, bool)] = &[
    ("BYTE", 1, false, false),
    ("UINT8", 1, false, false),
    ("INT8", 1, true, false),
    ("BOOL", 1, false, true),
    ("UINT16", 2, false, false),
    ("INT16", 2, true, false),
    ("UINT32", 4, false, false),
    ("INT32", 4, true, false),
    ("UINT64", 8, false, false),
    ("INT64", 8, true, false),
];

#[derive(Debug, Clone)]
pub struct Registry {
    types: Vec<TpmType>,
    order: Vec<TypeId>,
    by_name: HashMap<String, TypeId>,
    constants: Vec<NamedConstant>,
    constants_by_name: HashMap<String, ConstId>,
    algorithms: AlgorithmClassifier,
    alg_prefix: String,
    adapted_for: Option<Lang>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry holding only the elementary value types.
    pub fn new() -> Self {
        let mut registry = Registry {
            types: Vec::new(),
            order: Vec::new(),
            by_name: HashMap::new(),
            constants: Vec::new(),
            constants_by_name: HashMap::new(),
            algorithms: AlgorithmClassifier::default(),
            alg_prefix: "TPM_ALG_".to_string(),
            adapted_for: None,
        };
        for &(name, size, signed, is_bool) in SEED_VALUE_TYPES {
            let id = registry.types.len();
            registry.types.push(TpmType::new(
                name,
                TypeKind::Value(ValueType { size, signed, is_bool }),
            ));
            registry.order.push(id);
            registry.by_name.insert(name.to_string(), id);
        }
        registry
    }

    pub fn set_alg_prefix(&mut self, prefix: &str) {
        self.alg_prefix = prefix.to_string();
    }

    pub fn alg_prefix(&self) -> &str {
        &self.alg_prefix
    }

    /// Register `ty`, appended or placed right after `insert_after`.
    pub fn add(&mut self, ty: TpmType, insert_after: Option<&str>) -> Result<TypeId> {
        if self.by_name.contains_key(&ty.spec_name) {
            return Err(GenError::DuplicateType(ty.spec_name));
        }
        let position = match insert_after {
            Some(anchor) => {
                let anchor_id = self.id_of(anchor).ok_or_else(|| GenError::UnknownType {
                    name: anchor.to_string(),
                    referrer: format!("insertion of {}", ty.spec_name),
                })?;
                self.order
                    .iter()
                    .position(|&id| id == anchor_id)
                    .map_or(self.order.len(), |p| p + 1)
            }
            None => self.order.len(),
        };
        let id = self.types.len();
        self.by_name.insert(ty.spec_name.clone(), id);
        self.types.push(ty);
        self.order.insert(position, id);
        Ok(id)
    }

    /// Move `name` right after `anchor` unless it already comes later.
    pub fn ensure_after(&mut self, name: &str, anchor: &str) -> Result<()> {
        let (Some(at), Some(anchor_at)) = (self.position(name), self.position(anchor)) else {
            return Err(GenError::UnknownType {
                name: format!("{} or {}", name, anchor),
                referrer: "reordering".to_string(),
            });
        };
        if at < anchor_at {
            let id = self.order.remove(at);
            self.order.insert(anchor_at, id);
        }
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &TpmType {
        &self.types[id]
    }

    pub fn lookup(&self, name: &str) -> Option<&TpmType> {
        self.id_of(name).map(|id| &self.types[id])
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut TpmType> {
        self.id_of(name).map(move |id| &mut self.types[id])
    }

    /// Like [`lookup`](Self::lookup) but an absent type is an error blamed on `referrer`.
    pub fn require(&self, name: &str, referrer: &str) -> Result<&TpmType> {
        self.lookup(name).ok_or_else(|| GenError::UnknownType {
            name: name.to_string(),
            referrer: referrer.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Every type in emission order, implemented or not.
    pub fn iter(&self) -> impl Iterator<Item = &TpmType> {
        self.order.iter().map(move |&id| &self.types[id])
    }

    /// Implemented nodes of kind `K` in emission order.
    pub fn all_of<'a, K: NodeKind + 'a>(&'a self) -> impl Iterator<Item = (&'a TpmType, &'a K)> {
        self.iter()
            .filter(|t| t.implement)
            .filter_map(|t| K::from_kind(&t.kind).map(|k| (t, k)))
    }

    /// Spec names in emission order; handy when a pass mutates while walking.
    pub fn names_in_order(&self) -> Vec<String> {
        self.iter().map(|t| t.spec_name.clone()).collect()
    }

    /// Emission position of a type.
    pub fn position(&self, name: &str) -> Option<usize> {
        let id = self.id_of(name)?;
        self.order.iter().position(|&i| i == id)
    }

    pub fn algorithms(&self) -> &AlgorithmClassifier {
        &self.algorithms
    }

    pub fn algorithms_mut(&mut self) -> &mut AlgorithmClassifier {
        &mut self.algorithms
    }

    pub fn adapted_for(&self) -> Option<Lang> {
        self.adapted_for
    }

    pub(crate) fn set_adapted(&mut self, lang: Lang) {
        self.adapted_for = Some(lang);
    }

    // ---- constants ----

    pub fn add_constant(&mut self, constant: NamedConstant) -> Result<ConstId> {
        if self.constants_by_name.contains_key(&constant.spec_name) {
            return Err(GenError::DuplicateConstant(constant.spec_name));
        }
        let id = self.constants.len();
        self.constants_by_name.insert(constant.spec_name.clone(), id);
        self.constants.push(constant);
        Ok(id)
    }

    pub fn has_constant(&self, spec_name: &str) -> bool {
        self.constants_by_name.contains_key(spec_name)
    }

    /// Id of a constant; a bare algorithm mnemonic (`SHA256`) falls back to its prefixed form.
    pub fn resolve_constant(&self, name: &str) -> Option<ConstId> {
        self.constants_by_name.get(name).copied().or_else(|| {
            self.constants_by_name
                .get(&format!("{}{}", self.alg_prefix, name))
                .copied()
        })
    }

    pub fn lookup_constant(&self, name: &str) -> Option<&NamedConstant> {
        self.resolve_constant(name).map(|id| &self.constants[id])
    }

    pub fn constant(&self, id: ConstId) -> &NamedConstant {
        &self.constants[id]
    }

    pub fn constant_mut(&mut self, id: ConstId) -> &mut NamedConstant {
        &mut self.constants[id]
    }

    pub fn constants(&self) -> impl Iterator<Item = &NamedConstant> {
        self.constants.iter()
    }

    /// Value of a named constant, memoized.
    pub fn constant_value(&self, name: &str) -> Result<i64> {
        EvalContext::constant_value(self, name, 0)
    }

    pub fn evaluate(&self, expr: &str) -> Result<i64> {
        evaluate_at(expr, self, 0)
    }

    // ---- type resolution ----

    /// Follow typedef chains down to the first non-typedef type.
    pub fn resolve_typedef(&self, name: &str) -> Result<&TpmType> {
        let mut current = self.require(name, "typedef resolution")?;
        for _ in 0..MAX_DEPTH {
            match &current.kind {
                TypeKind::Typedef(t) => current = self.require(&t.base, &current.spec_name)?,
                _ => return Ok(current),
            }
        }
        Err(GenError::inconsistent(name, "typedef chain does not terminate"))
    }

    /// The elementary value type a scalar type is ultimately encoded as.
    pub fn value_type_of(&self, name: &str) -> Option<(&TpmType, &ValueType)> {
        let mut current = self.lookup(name)?;
        for _ in 0..MAX_DEPTH {
            let next = match &current.kind {
                TypeKind::Value(v) => return Some((current, v)),
                TypeKind::Typedef(t) => &t.base,
                TypeKind::Enum(e) => &e.underlying,
                TypeKind::Bitfield(b) => &b.underlying,
                TypeKind::Struct(_) | TypeKind::Union(_) => return None,
            };
            current = self.lookup(next)?;
        }
        None
    }

    pub fn is_integer(&self, name: &str) -> bool {
        self.value_type_of(name).is_some_and(|(_, v)| !v.is_bool)
    }

    /// The structure node `name` denotes, looking through typedefs.
    pub fn struct_of(&self, name: &str) -> Option<(&TpmType, &StructType)> {
        let ty = self.resolve_typedef(name).ok()?;
        ty.as_struct().map(|s| (ty, s))
    }

    pub fn is_struct(&self, name: &str) -> bool {
        self.struct_of(name).is_some()
    }

    /// A typedef whose resolved base is a structure.
    pub fn is_struct_typedef(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|t| t.as_typedef().is_some()) && self.is_struct(name)
    }

    /// Fields of a structure with the fields of its base chain first.
    pub fn all_fields(&self, struct_name: &str) -> Result<Vec<&StructField>> {
        let mut chain = Vec::new();
        let mut current = Some(struct_name.to_string());
        while let Some(name) = current {
            if chain.len() > MAX_DEPTH {
                return Err(GenError::inconsistent(struct_name, "base chain does not terminate"));
            }
            self.require(&name, struct_name)?;
            let ty = self.resolve_typedef(&name)?;
            let s = ty
                .as_struct()
                .ok_or_else(|| GenError::inconsistent(struct_name, format!("base {} is not a structure", name)))?;
            current = s.base.clone();
            chain.push(s);
        }
        Ok(chain.iter().rev().flat_map(|s| s.fields.iter()).collect())
    }

    /// Maximum wire size in bytes of a type.
    pub fn wire_size(&self, name: &str) -> Result<usize> {
        let size = self.size_of_type(name, 0)?;
        usize::try_from(size).map_err(|_| GenError::inconsistent(name, "negative size"))
    }

    /// Maximum wire size of one field.
    pub fn field_max_size(&self, owner: &str, field: &StructField) -> Result<i64> {
        self.field_size_at(owner, field, 0)
    }

    fn field_size_at(&self, owner: &str, field: &StructField, depth: usize) -> Result<i64> {
        let element = self.size_of_type(&field.type_name, depth + 1)?;
        let count = match field.marshal {
            MarshalType::FixedLengthArray => {
                let size = field
                    .array_size
                    .as_deref()
                    .ok_or_else(|| GenError::inconsistent(owner, format!("{} has no array size", field.name)))?;
                self.evaluate(size)?
            }
            MarshalType::VariableLengthArray | MarshalType::ImplicitLengthArray => {
                let max = field.domain.max_bound().ok_or_else(|| {
                    GenError::inconsistent(owner, format!("{} has no maximum element count", field.name))
                })?;
                self.evaluate(max)?
            }
            _ => 1,
        };
        element
            .checked_mul(count)
            .ok_or_else(|| GenError::inconsistent(owner, format!("size of {} overflows", field.name)))
    }

    fn size_of_type(&self, name: &str, depth: usize) -> Result<i64> {
        if depth > MAX_DEPTH {
            return Err(GenError::inconsistent(name, "recursive type size"));
        }
        let ty = self.require(name, "sizeof")?;
        match &ty.kind {
            TypeKind::Value(v) => Ok(v.size as i64),
            TypeKind::Typedef(t) => self.size_of_type(&t.base, depth + 1),
            TypeKind::Enum(e) => self.size_of_type(&e.underlying, depth + 1),
            TypeKind::Bitfield(b) => self.size_of_type(&b.underlying, depth + 1),
            TypeKind::Struct(_) => {
                let mut total = 0i64;
                for field in self.all_fields(name)? {
                    total = total
                        .checked_add(self.field_size_at(name, field, depth)?)
                        .ok_or_else(|| GenError::inconsistent(name, "structure size overflows"))?;
                }
                Ok(total)
            }
            TypeKind::Union(u) => {
                let mut largest = 0i64;
                for (i, member) in u.members.iter().enumerate() {
                    if Some(i) == u.null_member {
                        continue;
                    }
                    let count = match &member.array_size {
                        Some(expr) => self.evaluate(expr)?,
                        None => 1,
                    };
                    let size = self
                        .size_of_type(&member.type_name, depth + 1)?
                        .checked_mul(count)
                        .ok_or_else(|| GenError::inconsistent(name, format!("size of {} overflows", member.name)))?;
                    largest = largest.max(size);
                }
                Ok(largest)
            }
        }
    }

    // ---- cross references ----

    /// Rebuild every structure's list of `(union, selector)` memberships.
    pub fn link_unions(&mut self) {
        let mut links: Vec<(String, String, String)> = Vec::new();
        for (union, u) in self.all_of::<UnionType>() {
            for member in &u.members {
                if self.is_struct(&member.type_name) {
                    links.push((member.type_name.clone(), union.spec_name.clone(), member.selector.clone()));
                }
            }
        }
        for ty in self.types.iter_mut() {
            if let Some(s) = ty.as_struct_mut() {
                s.containing_unions.clear();
            }
        }
        for (member, union, selector) in links {
            if let Some(s) = self.lookup_mut(&member).and_then(|t| t.as_struct_mut()) {
                if !s.containing_unions.contains(&(union.clone(), selector.clone())) {
                    s.containing_unions.push((union, selector));
                }
            }
        }
    }

    /// Every referenced type must be registered and every constant must evaluate.
    pub fn check_references(&self) -> Result<()> {
        for ty in self.iter() {
            let who = ty.spec_name.as_str();
            match &ty.kind {
                TypeKind::Value(_) => {}
                TypeKind::Typedef(t) => {
                    self.require(&t.base, who)?;
                }
                TypeKind::Enum(e) => {
                    self.require(&e.underlying, who)?;
                }
                TypeKind::Bitfield(b) => {
                    self.require(&b.underlying, who)?;
                    for m in &b.members {
                        if let Some(e) = &m.enum_type {
                            self.require(e, who)?;
                        }
                    }
                }
                TypeKind::Struct(s) => {
                    if let Some(base) = &s.base {
                        self.require(base, who)?;
                    }
                    for f in &s.fields {
                        self.require(&f.type_name, &format!("{}.{}", who, f.name))?;
                        if let Some(size) = &f.array_size {
                            self.evaluate(size)?;
                        }
                        if let Some(related) = &f.related {
                            if s.field(related).is_none() {
                                return Err(GenError::inconsistent(
                                    who,
                                    format!("{} refers to missing field {}", f.name, related),
                                ));
                            }
                        }
                    }
                }
                TypeKind::Union(u) => {
                    for m in &u.members {
                        self.require(&m.type_name, &format!("{}.{}", who, m.name))?;
                        self.resolve_constant(&m.selector)
                            .ok_or_else(|| GenError::UnresolvedConstant(m.selector.clone()))?;
                        if let Some(size) = &m.array_size {
                            self.evaluate(size)?;
                        }
                    }
                }
            }
        }
        for c in &self.constants {
            self.constant_value(&c.spec_name)?;
        }
        Ok(())
    }
}

impl EvalContext for Registry {
    fn constant_value(&self, name: &str, depth: usize) -> Result<i64> {
        let id = self
            .resolve_constant(name)
            .ok_or_else(|| GenError::UnresolvedConstant(name.to_string()))?;
        let constant = &self.constants[id];
        if let Some(v) = constant.value.cached() {
            return Ok(v);
        }
        let v = evaluate_at(&constant.value.expr, self, depth)?;
        let _ = constant.value.value.set(v);
        Ok(v)
    }

    fn size_of(&self, type_name: &str) -> Result<i64> {
        self.size_of_type(type_name, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.add(
            TpmType::new(
                "TPM_ALG_ID",
                TypeKind::Enum(EnumType { underlying: "UINT16".into(), ..Default::default() }),
            ),
            None,
        )
        .unwrap();
        r.add_constant(NamedConstant::new("TPM_ALG_SHA256", "0x000B", "TPM_ALG_ID", "")).unwrap();
        r.add_constant(NamedConstant::new("SHA256_DIGEST_SIZE", "32", "", "")).unwrap();
        r
    }

    #[test]
    fn seeded_value_types() {
        let r = Registry::new();
        assert_eq!(r.size_of("UINT32").unwrap(), 4);
        assert!(r.value_type_of("BOOL").unwrap().1.is_bool);
        assert!(r.value_type_of("INT16").unwrap().1.signed);
    }

    #[test]
    fn bare_mnemonic_falls_back_to_algorithm_constant() {
        let r = registry();
        assert_eq!(r.constant_value("SHA256").unwrap(), 11);
        assert_eq!(r.lookup_constant("SHA256").unwrap().spec_name, "TPM_ALG_SHA256");
        assert!(r.lookup_constant("SHA384").is_none());
    }

    #[test]
    fn insert_after_places_type_in_order() {
        let mut r = registry();
        r.add(TpmType::new("A", TypeKind::Struct(StructType::default())), None).unwrap();
        r.add(TpmType::new("B", TypeKind::Struct(StructType::default())), None).unwrap();
        r.add(TpmType::new("A_X", TypeKind::Struct(StructType::default())), Some("A")).unwrap();
        let names = r.names_in_order();
        let tail: Vec<&str> = names[names.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["A", "A_X", "B"]);
        assert!(matches!(
            r.add(TpmType::new("A", TypeKind::Struct(StructType::default())), None),
            Err(GenError::DuplicateType(_))
        ));
    }

    #[test]
    fn struct_size_uses_domain_maximum() {
        let mut r = registry();
        let mut size = StructField::new("size", "UINT16");
        size.marshal = MarshalType::ArrayCount;
        size.related = Some("buffer".into());
        let mut buffer = StructField::new("buffer", "BYTE");
        buffer.marshal = MarshalType::VariableLengthArray;
        buffer.related = Some("size".into());
        let mut domain = Domain::new();
        domain.add_constraints("{:SHA256_DIGEST_SIZE}").unwrap();
        buffer.domain = domain;
        let s = StructType { fields: vec![size, buffer], ..Default::default() };
        r.add(TpmType::new("TPM2B_DIGEST", TypeKind::Struct(s)), None).unwrap();
        assert_eq!(r.evaluate("sizeof(TPM2B_DIGEST)").unwrap(), 34);
        r.check_references().unwrap();
    }

    #[test]
    fn struct_typedef_resolves_to_structure() {
        let mut r = registry();
        let s = StructType { fields: vec![StructField::new("hashAlg", "UINT16")], ..Default::default() };
        r.add(TpmType::new("TPMS_SCHEME_HASH", TypeKind::Struct(s)), None).unwrap();
        let t = TypedefType { base: "TPMS_SCHEME_HASH".into(), ..Default::default() };
        r.add(TpmType::new("TPMS_SIG_SCHEME_RSASSA", TypeKind::Typedef(t)), None).unwrap();

        assert!(r.is_struct("TPMS_SIG_SCHEME_RSASSA"));
        assert!(r.is_struct_typedef("TPMS_SIG_SCHEME_RSASSA"));
        assert!(!r.is_struct_typedef("TPMS_SCHEME_HASH"));
        assert_eq!(r.struct_of("TPMS_SIG_SCHEME_RSASSA").unwrap().0.spec_name, "TPMS_SCHEME_HASH");
        assert_eq!(r.all_fields("TPMS_SIG_SCHEME_RSASSA").unwrap().len(), 1);
        assert_eq!(r.wire_size("TPMS_SIG_SCHEME_RSASSA").unwrap(), 2);
    }

    #[test]
    fn ensure_after_moves_only_earlier_types() {
        let mut r = registry();
        for name in ["A", "B", "C"] {
            r.add(TpmType::new(name, TypeKind::Struct(StructType::default())), None).unwrap();
        }
        r.ensure_after("A", "C").unwrap();
        r.ensure_after("C", "B").unwrap();
        let names = r.names_in_order();
        let tail: Vec<&str> = names[names.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["B", "C", "A"]);
        assert!(r.ensure_after("A", "MISSING").is_err());
    }

    #[test]
    fn struct_size_overflow_is_an_error() {
        let mut r = registry();
        let huge = |name: &str| {
            let mut f = StructField::new(name, "BYTE");
            f.marshal = MarshalType::FixedLengthArray;
            f.array_size = Some("0x7FFFFFFFFFFFFFFF".into());
            f
        };
        let s = StructType { fields: vec![huge("a"), huge("b")], ..Default::default() };
        r.add(TpmType::new("TPMS_HUGE", TypeKind::Struct(s)), None).unwrap();
        assert!(matches!(r.wire_size("TPMS_HUGE"), Err(GenError::Inconsistent { .. })));
    }

    #[test]
    fn all_of_skips_unimplemented() {
        let mut r = registry();
        let mut hidden = TpmType::new("HIDDEN", TypeKind::Struct(StructType::default()));
        hidden.implement = false;
        r.add(hidden, None).unwrap();
        r.add(TpmType::new("SHOWN", TypeKind::Struct(StructType::default())), None).unwrap();
        let names: Vec<_> = r.all_of::<StructType>().map(|(t, _)| t.spec_name.as_str()).collect();
        assert_eq!(names, vec!["SHOWN"]);
    }
}
