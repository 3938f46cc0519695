//! Human-readable listings: the registry (`--dump`) and decoded [`Value`] trees.

use crate::ast::*;
use crate::domain::{Constraint, Domain};
use crate::registry::Registry;
use crate::value::Value;
use std::fmt::Write;

fn domain_text(d: &Domain) -> String {
    let items: Vec<String> = d
        .constraints()
        .iter()
        .map(|c| match c {
            Constraint::SingleValue(v) => v.clone(),
            Constraint::BoundedRange { min, max } => {
                format!("{}:{}", min.as_deref().unwrap_or(""), max.as_deref().unwrap_or(""))
            }
        })
        .collect();
    format!("{{{}}}", items.join(", "))
}

fn constant_line(registry: &Registry, id: ConstId) -> String {
    let c = registry.constant(id);
    let mut line = format!("    {} = {}", c.spec_name, c.value.expr);
    if let Some(v) = c.value.cached() {
        let _ = write!(line, " ({:#x})", v);
    }
    if c.name != c.spec_name {
        let _ = write!(line, " -> {}", c.name);
    }
    if let Some(target) = &c.value.target_expr {
        let _ = write!(line, " := {}", target);
    }
    line
}

fn field_line(f: &StructField) -> String {
    let mut line = format!("    {}: {} {:?}", f.name, f.type_name, f.marshal);
    if let Some(r) = &f.related {
        let _ = write!(line, " <-> {}", r);
    }
    if let Some(size) = &f.array_size {
        let _ = write!(line, " [{}]", size);
    }
    if !f.domain.is_empty() {
        let _ = write!(line, " {}", domain_text(&f.domain));
    }
    for (flag, set) in [("handle", f.is_handle), ("auth", f.requires_auth), ("nullable", f.nullable)] {
        if set {
            let _ = write!(line, " {}", flag);
        }
    }
    if !f.target_type.is_empty() {
        let _ = write!(line, " : {}", f.target_type);
    }
    line
}

fn error_code_of(kind: &TypeKind) -> Option<&str> {
    match kind {
        TypeKind::Value(_) => None,
        TypeKind::Typedef(t) => t.error_code.as_deref(),
        TypeKind::Enum(e) => e.error_code.as_deref(),
        TypeKind::Bitfield(b) => b.error_code.as_deref(),
        TypeKind::Struct(s) => s.error_code.as_deref(),
        TypeKind::Union(u) => u.error_code.as_deref(),
    }
}

/// One block per registered type, in registry order, then owner-less constants.
pub fn dump_registry(registry: &Registry) -> String {
    let mut out = String::new();
    if let Some(lang) = registry.adapted_for() {
        let _ = writeln!(out, "# adapted for {}", lang);
    }
    for ty in registry.iter() {
        let _ = write!(out, "{} {}", ty.kind.label(), ty.spec_name);
        if ty.name != ty.spec_name {
            let _ = write!(out, " ({})", ty.name);
        }
        if !ty.implement {
            out.push_str(" [not implemented]");
        }
        if let Some(code) = error_code_of(&ty.kind) {
            let _ = write!(out, " #{}", code);
        }
        match &ty.kind {
            TypeKind::Value(v) => {
                let _ = writeln!(out, ": {} bytes{}", v.size, if v.signed { ", signed" } else { "" });
            }
            TypeKind::Typedef(t) => {
                let _ = write!(out, " = {}", t.base);
                if !t.domain.is_empty() {
                    let _ = write!(out, " {}", domain_text(&t.domain));
                }
                if let Some(null) = &t.null_value {
                    let _ = write!(out, " +{}", null);
                }
                out.push('\n');
            }
            TypeKind::Enum(e) => {
                let _ = writeln!(out, ": {}", e.underlying);
                for id in &e.members {
                    let _ = writeln!(out, "{}", constant_line(registry, *id));
                }
            }
            TypeKind::Bitfield(b) => {
                let _ = writeln!(out, ": {}", b.underlying);
                for m in &b.members {
                    let _ = writeln!(out, "    {}:{} {}", m.end_bit, m.start_bit, m.name);
                }
                for id in &b.constants {
                    let _ = writeln!(out, "{}", constant_line(registry, *id));
                }
            }
            TypeKind::Struct(s) => {
                if let Some(base) = &s.base {
                    let _ = write!(out, " : {}", base);
                }
                match &s.role {
                    StructRole::CommandRequest { code, .. } => {
                        let _ = write!(out, " request {} handles={}/{}", code, s.num_handles, s.num_auth_handles);
                    }
                    StructRole::CommandResponse { .. } => out.push_str(" response"),
                    StructRole::Plain => {}
                }
                if let Some(info) = s.session_enc {
                    let _ = write!(out, " sess_enc({}, {})", info.size_len, info.val_len);
                }
                if let Some(SpecialMarshal::NullAlgorithmSkip { selector, null_value }) = &s.special_marshal {
                    let _ = write!(out, " skip-after {}=={}", selector, null_value);
                }
                out.push('\n');
                for f in &s.fields {
                    let _ = writeln!(out, "{}", field_line(f));
                }
                for (union, selector) in &s.containing_unions {
                    let _ = writeln!(out, "    in {} by {}", union, selector);
                }
            }
            TypeKind::Union(u) => {
                out.push('\n');
                for (i, m) in u.members.iter().enumerate() {
                    let _ = write!(out, "    {}: {} by {}", m.name, m.type_name, m.selector);
                    if let Some(size) = &m.array_size {
                        let _ = write!(out, " [{}]", size);
                    }
                    if Some(i) == u.null_member {
                        out.push_str(" (null)");
                    }
                    out.push('\n');
                }
            }
        }
    }

    let free: Vec<ConstId> = (0..registry.constants().count())
        .filter(|id| registry.lookup(&registry.constant(*id).owner).is_none())
        .collect();
    if !free.is_empty() {
        out.push_str("constants\n");
        for id in free {
            let _ = writeln!(out, "{}", constant_line(registry, id));
        }
    }
    out
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Multi-line rendering of a decoded value.
pub fn value_to_dump(v: &Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match v {
        Value::U8(_) | Value::U16(_) | Value::U32(_) | Value::U64(_) => {
            format!("{}{:#x}", pad, v.as_u64().unwrap_or_default())
        }
        Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_) => {
            format!("{}{}", pad, v.as_i64().unwrap_or_default())
        }
        Value::Bool(b) => format!("{}{}", pad, b),
        Value::Bytes(b) => format!("{}hex({})", pad, hex_string(b)),
        Value::Null => format!("{}null", pad),
        Value::Union { type_name, value } => {
            format!("{}{} {}", pad, type_name, value_to_dump(value, indent).trim_start())
        }
        Value::Struct(m) => {
            let mut lines = vec![format!("{}{{", pad)];
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            for k in keys {
                let sub = value_to_dump(&m[k], indent + 1);
                lines.push(format!("{}  {}: {}", pad, k, sub.trim_start()));
            }
            lines.push(format!("{}}}", pad));
            lines.join("\n")
        }
        Value::List(items) if items.is_empty() => format!("{}[]", pad),
        Value::List(items) => {
            let mut lines = vec![format!("{}[", pad)];
            for (i, item) in items.iter().enumerate() {
                let sub = value_to_dump(item, indent + 1);
                lines.push(format!("{}  [{}] {}", pad, i, sub.trim_start()));
            }
            lines.push(format!("{}]", pad));
            lines.join("\n")
        }
    }
}

/// First line of [`value_to_dump`].
pub fn value_summary_line(v: &Value) -> String {
    value_to_dump(v, 0).lines().next().map(|s| s.trim().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dump_lists_fields_and_constants() {
        let mut r = Registry::new();
        let mut f = StructField::new("size", "UINT16");
        f.domain.add_range(None, Some("64".into()));
        let s = StructType { fields: vec![f], ..Default::default() };
        r.add(TpmType::new("TPMS_X", TypeKind::Struct(s)), None).unwrap();
        r.add_constant(NamedConstant::new("MAX_X", "64", "", "")).unwrap();
        let text = dump_registry(&r);
        assert!(text.contains("struct TPMS_X\n    size: UINT16 Normal {:64}"));
        assert!(text.contains("constants\n    MAX_X = 64"));
    }

    #[test]
    fn values_render_as_tree() {
        let v = Value::record([("a", Value::U16(0x0B)), ("b", Value::Bytes(vec![1, 2]))]);
        assert_eq!(value_to_dump(&v, 0), "{\n  a: 0xb\n  b: hex(01 02)\n}");
        assert_eq!(value_summary_line(&v), "{");
    }
}
