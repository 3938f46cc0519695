//! Target-language adaptation.
//!
//! Rewrites the `name` of every type and constant, the target rendering of every constant
//! value, and the target type text of every field and union member. Spec names are never
//! touched, so lookups keep working on an adapted registry. Each language works on its own
//! clone of the normalized registry.

use crate::ast::*;
use crate::error::{GenError, Result};
use crate::parser::{tokenize_expr, BinOp, Token};
use crate::registry::Registry;
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Cpp,
    CSharp,
    Java,
    Node,
    Py,
}

impl Lang {
    pub const ALL: [Lang; 5] = [Lang::Cpp, Lang::CSharp, Lang::Java, Lang::Node, Lang::Py];

    pub fn as_str(self) -> &'static str {
        match self {
            Lang::Cpp => "cpp",
            Lang::CSharp => "csharp",
            Lang::Java => "java",
            Lang::Node => "node",
            Lang::Py => "py",
        }
    }

    /// Separator between an enum and its member in qualified constant references.
    pub fn scope_separator(self) -> &'static str {
        match self {
            Lang::Cpp => "::",
            _ => ".",
        }
    }

    fn value_type_name(self, spec_name: &str) -> Option<&'static str> {
        let row = VALUE_TYPE_NAMES.iter().find(|(n, _)| *n == spec_name)?;
        Some(row.1[self as usize])
    }

    fn byte_buffer(self) -> &'static str {
        match self {
            Lang::Cpp => "ByteVec",
            Lang::CSharp | Lang::Java => "byte[]",
            Lang::Node => "Buffer",
            Lang::Py => "bytes",
        }
    }

    fn array_of(self, element: &str) -> String {
        match self {
            Lang::Cpp => format!("vector<{}>", element),
            Lang::CSharp | Lang::Java | Lang::Node => format!("{}[]", element),
            Lang::Py => format!("List[{}]", element),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpp" | "c++" => Ok(Lang::Cpp),
            "csharp" | "cs" | "c#" => Ok(Lang::CSharp),
            "java" => Ok(Lang::Java),
            "node" | "ts" | "typescript" => Ok(Lang::Node),
            "py" | "python" => Ok(Lang::Py),
            other => Err(format!("unknown language '{}' (expected cpp, csharp, java, node or py)", other)),
        }
    }
}

/// Value type names indexed by `Lang as usize`.
const VALUE_TYPE_NAMES: &[(&str, [&str; 5])] = &[
    ("BYTE", ["BYTE", "byte", "byte", "number", "int"]),
    ("UINT8", ["UINT8", "byte", "byte", "number", "int"]),
    ("INT8", ["INT8", "sbyte", "byte", "number", "int"]),
    ("BOOL", ["BOOL", "bool", "boolean", "boolean", "bool"]),
    ("UINT16", ["UINT16", "ushort", "short", "number", "int"]),
    ("INT16", ["INT16", "short", "short", "number", "int"]),
    ("UINT32", ["UINT32", "uint", "int", "number", "int"]),
    ("INT32", ["INT32", "int", "int", "number", "int"]),
    ("UINT64", ["UINT64", "ulong", "long", "number", "int"]),
    ("INT64", ["INT64", "long", "long", "number", "int"]),
];

/// Adapt a clone of `registry`; the input is left untouched.
pub fn adapt(registry: &Registry, lang: Lang) -> Result<Registry> {
    let mut adapted = registry.clone();
    adapt_in_place(&mut adapted, lang)?;
    Ok(adapted)
}

/// Adapt `registry` itself. A registry is adapted at most once.
pub fn adapt_in_place(registry: &mut Registry, lang: Lang) -> Result<()> {
    if let Some(previous) = registry.adapted_for() {
        return Err(GenError::AlreadyAdapted(previous));
    }
    rename_types(registry, lang)?;
    rename_constants(registry);
    translate_values(registry, lang)?;
    translate_field_types(registry, lang)?;
    registry.set_adapted(lang);
    debug!("registry adapted for {}", lang);
    Ok(())
}

fn rename_types(registry: &mut Registry, lang: Lang) -> Result<()> {
    let names = registry.names_in_order();
    for name in &names {
        let ty = registry.require(name, "adapter")?;
        let new_name = match &ty.kind {
            TypeKind::Value(_) => lang.value_type_name(name).map(str::to_string),
            TypeKind::Struct(s) if s.is_request() || s.is_response() => {
                name.strip_prefix("TPM2_").map(str::to_string)
            }
            _ => None,
        };
        if let (Some(new_name), Some(t)) = (new_name, registry.lookup_mut(name)) {
            t.name = new_name;
        }
    }
    for name in &names {
        if registry.lookup(name).and_then(|t| t.as_typedef()).is_none() {
            continue;
        }
        let resolved = registry.resolve_typedef(name)?.name.clone();
        if let Some(t) = registry.lookup_mut(name) {
            t.name = resolved;
        }
    }
    Ok(())
}

/// Strip the prefix a constant shares with its owner, cut at an underscore.
pub fn strip_owner_prefix(constant: &str, owner: &str) -> String {
    let owner = format!("{}_", owner);
    let common = constant
        .bytes()
        .zip(owner.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let cut = constant[..common].rfind('_').map_or(0, |i| i + 1);
    let stripped = &constant[cut..];
    let name = if stripped.is_empty() { constant } else { stripped };
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", name)
    } else {
        name.to_string()
    }
}

fn rename_constants(registry: &mut Registry) {
    let renames: Vec<(ConstId, String, Option<String>)> = (0..registry.constants().count())
        .map(|id| {
            let c = registry.constant(id);
            let name = if c.owner.is_empty() {
                c.spec_name.clone()
            } else {
                strip_owner_prefix(&c.spec_name, &c.owner)
            };
            let old = c.spec_name.strip_prefix("TPM_").map(str::to_string).filter(|o| *o != name);
            (id, name, old)
        })
        .collect();
    for (id, name, old) in renames {
        let c = registry.constant_mut(id);
        c.name = name;
        c.old_name = old;
    }
}

/// Constant ids in owner emission order, then owner-less constants.
fn constants_in_owner_order(registry: &Registry) -> Vec<ConstId> {
    let mut ids = Vec::new();
    for ty in registry.iter() {
        match &ty.kind {
            TypeKind::Enum(e) => ids.extend(e.members.iter().copied()),
            TypeKind::Bitfield(b) => ids.extend(b.constants.iter().copied()),
            _ => {}
        }
    }
    let listed: HashSet<ConstId> = ids.iter().copied().collect();
    ids.extend((0..registry.constants().count()).filter(|id| !listed.contains(id)));
    ids
}

fn translate_values(registry: &mut Registry, lang: Lang) -> Result<()> {
    let mut processed: HashSet<ConstId> = HashSet::new();
    for id in constants_in_owner_order(registry) {
        let expr = registry.constant(id).value.expr.clone();
        let (text, inlined) = translate_expr(registry, lang, &expr, &processed)?;
        let c = registry.constant_mut(id);
        c.value.target_expr = Some(text);
        c.value.inlined = inlined;
        processed.insert(id);
    }
    Ok(())
}

/// Render an expression for `lang`; returns the text and the symbols inlined as literals.
pub fn translate_expr(
    registry: &Registry,
    lang: Lang,
    expr: &str,
    processed: &HashSet<ConstId>,
) -> Result<(String, Vec<String>)> {
    let mut out = String::new();
    let mut inlined = Vec::new();
    for token in tokenize_expr(expr)? {
        let piece = match token {
            Token::Number { text, .. } => text,
            Token::Ident(name) => {
                let id = registry
                    .resolve_constant(&name)
                    .ok_or_else(|| GenError::UnresolvedConstant(name.clone()))?;
                let c = registry.constant(id);
                let owner = registry.lookup(&c.owner);
                match owner {
                    Some(owner) if processed.contains(&id) => {
                        format!("{}{}{}", owner.name, lang.scope_separator(), c.name)
                    }
                    _ => {
                        let value = registry.constant_value(&name)?;
                        if lang == Lang::Py {
                            inlined.push(name);
                            literal(value)
                        } else {
                            let text = format!("{} /*{}*/", literal(value), name);
                            inlined.push(name);
                            text
                        }
                    }
                }
            }
            Token::SizeOf(ty) => registry.wire_size(&ty)?.to_string(),
            Token::Op(op) => match (op, lang) {
                (BinOp::Div, Lang::Py) => " // ".to_string(),
                _ => format!(" {} ", op.symbol()),
            },
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
        };
        out.push_str(&piece);
    }
    Ok((out, inlined))
}

pub(crate) fn literal(value: i64) -> String {
    if value > 0xFF {
        format!("0x{:X}", value)
    } else {
        value.to_string()
    }
}

/// Target type text of an element type, arrays of it, or a byte buffer.
fn element_target(registry: &Registry, lang: Lang, type_name: &str, array: bool) -> Result<String> {
    let ty = registry.require(type_name, "adapter")?;
    if !array {
        return Ok(ty.name.clone());
    }
    let is_byte = registry
        .value_type_of(type_name)
        .is_some_and(|(_, v)| v.size == 1 && !v.signed && !v.is_bool);
    Ok(if is_byte {
        lang.byte_buffer().to_string()
    } else {
        lang.array_of(&ty.name)
    })
}

fn translate_field_types(registry: &mut Registry, lang: Lang) -> Result<()> {
    for name in registry.names_in_order() {
        let targets: Vec<String> = match &registry.require(&name, "adapter")?.kind {
            TypeKind::Struct(s) => s
                .fields
                .iter()
                .map(|f| match f.marshal {
                    MarshalType::SpecialVariableLengthArray => Ok(lang.byte_buffer().to_string()),
                    m => element_target(registry, lang, &f.type_name, m.is_array()),
                })
                .collect::<Result<_>>()?,
            TypeKind::Union(u) => u
                .members
                .iter()
                .map(|m| element_target(registry, lang, &m.type_name, m.array_size.is_some()))
                .collect::<Result<_>>()?,
            _ => continue,
        };
        match registry.lookup_mut(&name).map(|t| &mut t.kind) {
            Some(TypeKind::Struct(s)) => {
                for (f, t) in s.fields.iter_mut().zip(targets) {
                    f.target_type = t;
                }
            }
            Some(TypeKind::Union(u)) => {
                for (m, t) in u.members.iter_mut().zip(targets) {
                    m.target_type = t;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut r = Registry::new();
        let e = EnumType { underlying: "UINT16".into(), ..Default::default() };
        r.add(TpmType::new("TPM_ALG_ID", TypeKind::Enum(e)), None).unwrap();
        let a = r.add_constant(NamedConstant::new("TPM_ALG_SHA256", "0x000B", "TPM_ALG_ID", "")).unwrap();
        let b = r.add_constant(NamedConstant::new("TPM_ALG_FIRST", "TPM_ALG_SHA256", "TPM_ALG_ID", "")).unwrap();
        let c = r.add_constant(NamedConstant::new("TPM_ALG_LAST", "TPM_ALG_MAX + 1", "TPM_ALG_ID", "")).unwrap();
        let d = r.add_constant(NamedConstant::new("TPM_ALG_MAX", "0x0044", "TPM_ALG_ID", "")).unwrap();
        if let Some(TypeKind::Enum(e)) = r.lookup_mut("TPM_ALG_ID").map(|t| &mut t.kind) {
            e.members = vec![a, b, c, d];
        }
        let t = TypedefType { base: "TPM_ALG_ID".into(), ..Default::default() };
        r.add(TpmType::new("TPMI_ALG_HASH", TypeKind::Typedef(t)), None).unwrap();
        let t = TypedefType { base: "UINT32".into(), ..Default::default() };
        r.add(TpmType::new("TPM_HANDLE", TypeKind::Typedef(t)), None).unwrap();
        r
    }

    #[test]
    fn language_names_parse() {
        assert_eq!("node".parse::<Lang>().unwrap(), Lang::Node);
        assert_eq!("PY".parse::<Lang>().unwrap(), Lang::Py);
        assert!("rust".parse::<Lang>().is_err());
    }

    #[test]
    fn owner_prefix_is_stripped_at_underscore() {
        assert_eq!(strip_owner_prefix("TPM_ALG_SHA256", "TPM_ALG_ID"), "SHA256");
        assert_eq!(strip_owner_prefix("TPMA_SESSION_continueSession", "TPMA_SESSION"), "continueSession");
        assert_eq!(strip_owner_prefix("TPM_PT_NV_BUFFER_MAX", "TPM_PT"), "NV_BUFFER_MAX");
        assert_eq!(strip_owner_prefix("TPM_SPEC_1", "TPM_SPEC"), "_1");
    }

    #[test]
    fn names_and_values_for_csharp() {
        let r = adapt(&registry(), Lang::CSharp).unwrap();
        assert_eq!(r.lookup("UINT32").unwrap().name, "uint");
        assert_eq!(r.lookup("TPM_HANDLE").unwrap().name, "uint");
        assert_eq!(r.lookup("TPMI_ALG_HASH").unwrap().name, "TPM_ALG_ID");
        let first = r.lookup_constant("TPM_ALG_FIRST").unwrap();
        assert_eq!(first.name, "FIRST");
        assert_eq!(first.old_name.as_deref(), Some("ALG_FIRST"));
        assert_eq!(first.value.target_expr.as_deref(), Some("TPM_ALG_ID.SHA256"));
        let last = r.lookup_constant("TPM_ALG_LAST").unwrap();
        assert_eq!(last.value.target_expr.as_deref(), Some("68 /*TPM_ALG_MAX*/ + 1"));
        assert_eq!(last.value.inlined, vec!["TPM_ALG_MAX".to_string()]);
    }

    #[test]
    fn cpp_uses_scope_operator_and_python_records_inlined() {
        let cpp = adapt(&registry(), Lang::Cpp).unwrap();
        assert_eq!(
            cpp.lookup_constant("TPM_ALG_FIRST").unwrap().value.target_expr.as_deref(),
            Some("TPM_ALG_ID::SHA256")
        );
        let py = adapt(&registry(), Lang::Py).unwrap();
        let last = py.lookup_constant("TPM_ALG_LAST").unwrap();
        assert_eq!(last.value.target_expr.as_deref(), Some("68 + 1"));
        assert_eq!(last.value.inlined, vec!["TPM_ALG_MAX".to_string()]);
    }

    #[test]
    fn adapting_twice_is_refused() {
        let r = adapt(&registry(), Lang::Java).unwrap();
        assert!(matches!(adapt(&r, Lang::Java), Err(GenError::AlreadyAdapted(Lang::Java))));
        assert_eq!(registry().lookup("UINT32").unwrap().name, "UINT32");
    }
}
