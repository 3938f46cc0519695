//! Python (`py`) backend.
//!
//! Same file split as the TypeScript backend (`TpmTypes.py`, `Tpm.py`). Union classes are
//! declared before any structure, since Python needs a base class defined before it is
//! inherited from. Constants inlined by the adapter are named in a trailing `#` comment.

use super::*;
use crate::adapt::literal;
use crate::wire::{layout, ArrayLen, Elem, Scalar, WireOp};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonBackend;

const TYPES_FILE: &str = "TpmTypes.py";
const COMMANDS_FILE: &str = "Tpm.py";
const HEADER: &str = "\"\"\"\nGenerated by tpmgen. Do not edit.\n\"\"\"\n";

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def",
    "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Field or member name, with keywords escaped.
fn ident(name: &str) -> String {
    if KEYWORDS.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

fn docstring(comment: &str, indent: &str) -> String {
    if comment.is_empty() {
        String::new()
    } else {
        format!("{}\"\"\" {} \"\"\"\n", indent, comment)
    }
}

fn type_name(registry: &Registry, spec_name: &str) -> Result<String> {
    Ok(registry.require(spec_name, "python backend")?.name.clone())
}

fn default_value(target_type: &str) -> &'static str {
    match target_type {
        "int" => "0",
        "bool" => "False",
        _ => "None",
    }
}

fn write_scalar(s: Scalar, expr: &str) -> String {
    if s.is_bool {
        format!("buf.writeBool({})", expr)
    } else if s.signed {
        format!("buf.writeInt({}, {})", expr, s.size)
    } else {
        format!("buf.writeNum({}, {})", expr, s.size)
    }
}

fn read_scalar(s: Scalar) -> String {
    if s.is_bool {
        "buf.readBool()".to_string()
    } else if s.signed {
        format!("buf.readInt({})", s.size)
    } else {
        format!("buf.readNum({})", s.size)
    }
}

fn null_skip(registry: &Registry, s: &StructType, field: &str, expr: &str) -> Result<Option<String>> {
    match &s.special_marshal {
        Some(SpecialMarshal::NullAlgorithmSkip { selector, null_value }) if selector == field => Ok(Some(
            format!("if {} == {}: return", expr, constant_ref(registry, null_value)?),
        )),
        _ => Ok(None),
    }
}

fn to_tpm_lines(registry: &Registry, ty: &TpmType, s: &StructType, obj: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for step in layout(registry, &ty.spec_name)? {
        let this = format!("{}.{}", obj, ident(&step.field.name));
        lines.push(match &step.op {
            WireOp::Scalar(sc) => write_scalar(*sc, &this),
            WireOp::Object(_) => format!("{}.toTpm(buf)", this),
            WireOp::Union { .. } => format!("if {0}: {0}.toTpm(buf)", this),
            WireOp::Constant { scalar, value } => write_scalar(*scalar, &literal(registry.evaluate(value)?)),
            WireOp::Count { scalar, array } => {
                let array = format!("{}.{}", obj, ident(array));
                write_scalar(*scalar, &format!("len({0}) if {0} is not None else 0", array))
            }
            WireOp::Array { elem: Elem::Byte, .. } => format!("buf.writeByteBuf({})", this),
            WireOp::Array { elem: Elem::Scalar(sc), .. } => format!("buf.writeValArr({}, {})", this, sc.size),
            WireOp::Array { elem: Elem::Object(_), .. } => format!("buf.writeObjArr({})", this),
            WireOp::Sized { size, .. } => format!("buf.writeSizedObj({}, {})", this, size.size),
            WireOp::Selector { scalar, object, derived: true } => {
                write_scalar(*scalar, &format!("{}.{}.GetUnionSelector()", obj, ident(object)))
            }
            WireOp::Selector { scalar, .. } => write_scalar(*scalar, &this),
        });
        if let Some(skip) = null_skip(registry, s, &step.field.name, &this)? {
            lines.push(skip);
        }
    }
    Ok(lines)
}

fn from_tpm_lines(registry: &Registry, ty: &TpmType, s: &StructType, obj: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut exprs: HashMap<String, String> = HashMap::new();
    for step in layout(registry, &ty.spec_name)? {
        let name = &step.field.name;
        let this = format!("{}.{}", obj, ident(name));
        let local = format!("_{}", name);
        let sel_expr = |selector: &str, exprs: &HashMap<String, String>| {
            exprs
                .get(selector)
                .cloned()
                .unwrap_or_else(|| format!("{}.{}", obj, ident(selector)))
        };
        match &step.op {
            WireOp::Scalar(sc) => {
                lines.push(format!("{} = {}", this, read_scalar(*sc)));
                exprs.insert(name.clone(), this.clone());
            }
            WireOp::Object(t) => lines.push(format!("{} = buf.createObj({})", this, type_name(registry, t)?)),
            WireOp::Constant { scalar, value } => lines.push(format!(
                "buf.expectNum({}, {})",
                literal(registry.evaluate(value)?),
                scalar.size
            )),
            WireOp::Count { scalar, .. } | WireOp::Selector { scalar, derived: true, .. } => {
                lines.push(format!("{} = {}", local, read_scalar(*scalar)));
                exprs.insert(name.clone(), local.clone());
            }
            WireOp::Selector { scalar, .. } => {
                lines.push(format!("{} = {}", this, read_scalar(*scalar)));
                exprs.insert(name.clone(), this.clone());
            }
            WireOp::Array { elem, len } => {
                let count = match len {
                    ArrayLen::Tag(tag) => sel_expr(tag, &exprs),
                    ArrayLen::Fixed(n) => n.to_string(),
                    ArrayLen::Rest => "buf.sizedRemaining()".to_string(),
                    ArrayLen::Selected { union, selector } => format!(
                        "{}({})",
                        size_fn_name(&type_name(registry, union)?),
                        sel_expr(selector, &exprs)
                    ),
                };
                lines.push(match elem {
                    Elem::Byte => format!("{} = buf.readByteBuf({})", this, count),
                    Elem::Scalar(sc) => format!("{} = buf.readValArr({}, {})", this, sc.size, count),
                    Elem::Object(t) => format!("{} = buf.readObjArr({}, {})", this, type_name(registry, t)?, count),
                });
            }
            WireOp::Sized { size, type_name: inner } => lines.push(format!(
                "{} = buf.createSizedObj({}, {})",
                this,
                type_name(registry, inner)?,
                size.size
            )),
            WireOp::Union { union, selector } => {
                lines.push(format!(
                    "{} = {}({})",
                    this,
                    factory_name(&type_name(registry, union)?),
                    sel_expr(selector, &exprs)
                ));
                lines.push(format!("if {0}: {0}.initFromTpm(buf)", this));
            }
        }
        if let Some(skip) = null_skip(registry, s, name, &this)? {
            lines.push(skip);
        }
    }
    Ok(lines)
}

fn body(lines: &[String], indent: &str) -> String {
    if lines.is_empty() {
        return format!("{}pass\n", indent);
    }
    lines.iter().map(|l| format!("{}{}\n", indent, l)).collect()
}

fn method(signature: &str, doc: &str, lines: &[String]) -> String {
    format!(
        "    def {}:\n{}{}",
        signature,
        docstring(doc, "        "),
        body(lines, "        ")
    )
}

fn constant_class(registry: &Registry, ty: &TpmType, note: &str, ids: &[ConstId]) -> String {
    let own_prefix = format!("{}.", ty.name);
    let mut out = format!("class {}(TpmEnum): # {}\n", ty.name, note);
    out.push_str(&docstring(&ty.comment, "    "));
    let mut names: BTreeSet<String> = ids.iter().map(|id| ident(&registry.constant(*id).name)).collect();
    for id in ids {
        let c = registry.constant(*id);
        // Class-body code sees earlier members unqualified.
        let value = c
            .value
            .target_expr
            .as_deref()
            .unwrap_or(&c.value.expr)
            .replace(&own_prefix, "");
        let trailer = if c.value.inlined.is_empty() {
            String::new()
        } else {
            format!("  # {}", c.value.inlined.join(", "))
        };
        let name = ident(&c.name);
        out.push_str(&format!("    {} = {}{}\n", name, value, trailer));
        out.push_str(&docstring(&c.comment, "    "));
        if let Some(old) = &c.old_name {
            let old = ident(old);
            if names.insert(old.clone()) {
                out.push_str(&format!("    {} = {}\n", old, name));
            }
        }
    }
    if ids.is_empty() && ty.comment.is_empty() {
        out.push_str("    pass\n");
    }
    out
}

impl Backend for PythonBackend {
    fn lang(&self) -> Lang {
        Lang::Py
    }

    fn emit_enum(&self, registry: &Registry, ty: &TpmType, e: &EnumType) -> Result<String> {
        Ok(constant_class(registry, ty, &e.underlying, &e.members))
    }

    fn emit_bitfield(&self, registry: &Registry, ty: &TpmType, b: &BitfieldType) -> Result<String> {
        Ok(constant_class(registry, ty, &format!("{} bitfield", b.underlying), &b.constants))
    }

    fn emit_union_decl(&self, _registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<Option<String>> {
        if u.is_array_union() {
            return Ok(None);
        }
        let doc = if ty.comment.is_empty() { "Union" } else { ty.comment.as_str() };
        Ok(Some(format!("class {}(TpmUnion):\n{}", ty.name, docstring(doc, "    "))))
    }

    fn emit_union_factory(&self, registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<String> {
        let mut lines = Vec::new();
        let (name, doc, fallback) = if u.is_array_union() {
            for (m, size) in array_union_sizes(registry, u)? {
                lines.push(format!("if selector == {}: return {}", constant_ref(registry, &m.selector)?, size));
            }
            (size_fn_name(&ty.name), format!("Byte size of the {} member selected by selector", ty.name), "0")
        } else {
            for m in u.members.iter().filter(|m| registry.is_struct(&m.type_name)) {
                lines.push(format!(
                    "if selector == {}: return {}()",
                    constant_ref(registry, &m.selector)?,
                    type_name(registry, &m.type_name)?
                ));
            }
            (factory_name(&ty.name), format!("Creates the {} member selected by selector", ty.name), "None")
        };
        lines.push(format!("return {}", fallback));
        Ok(format!("def {}(selector):\n{}{}", name, docstring(&doc, "    "), body(&lines, "    ")))
    }

    fn emit_struct(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String> {
        let mut bases = vec![match &s.base {
            Some(b) => type_name(registry, b)?,
            None => "TpmStructure".to_string(),
        }];
        let unions: BTreeSet<String> = s
            .containing_unions
            .iter()
            .map(|(u, _)| type_name(registry, u))
            .collect::<Result<_>>()?;
        bases.extend(unions);

        let mut out = format!("class {}({}):\n", ty.name, bases.join(", "));
        out.push_str(&docstring(&ty.comment, "    "));

        let fields: Vec<&StructField> = s.data_fields().collect();
        if !fields.is_empty() {
            let params: Vec<String> = fields
                .iter()
                .map(|f| format!("{} = {}", ident(&f.name), default_value(&f.target_type)))
                .collect();
            out.push_str(&format!("    def __init__(self, {}):\n", params.join(", ")));
            out.push_str("        \"\"\"\n        Attributes:\n");
            for f in &fields {
                out.push_str(&format!("            {} ({}): {}\n", ident(&f.name), f.target_type, f.comment));
            }
            out.push_str("        \"\"\"\n");
            if s.base.is_some() {
                out.push_str("        super().__init__()\n");
            }
            for f in &fields {
                out.push_str(&format!("        self.{0} = {0}\n", ident(&f.name)));
            }
        } else if s.base.is_none() {
            out.push_str("    def __init__(self):\n        pass\n");
        }

        if let Some(selector) = union_selector(s) {
            let owner = constant_owner(registry, selector).unwrap_or_default();
            out.push_str(&format!(
                "\n    def GetUnionSelector(self): # {}\n        \"\"\" TpmUnion method \"\"\"\n        return {}\n",
                owner,
                constant_ref(registry, selector)?
            ));
        }

        let inherits_layout = s.base.is_some() && s.fields.is_empty();
        if s.special_marshal.is_some() {
            out.push('\n');
            out.push_str(&method(
                "toTpm(self, buf)",
                "TpmMarshaller method",
                &[format!("customMarshalers['{}'][0](self, buf)", ty.spec_name)],
            ));
            out.push('\n');
            out.push_str(&method(
                "initFromTpm(self, buf)",
                "TpmMarshaller method",
                &[format!("customMarshalers['{}'][1](self, buf)", ty.spec_name)],
            ));
        } else if !inherits_layout {
            out.push('\n');
            out.push_str(&method("toTpm(self, buf)", "TpmMarshaller method", &to_tpm_lines(registry, ty, s, "self")?));
            out.push('\n');
            out.push_str(&method(
                "initFromTpm(self, buf)",
                "TpmMarshaller method",
                &from_tpm_lines(registry, ty, s, "self")?,
            ));
        }

        out.push_str(&format!(
            "\n    @staticmethod\n    def fromTpm(buf):\n        \"\"\" Returns new {0} object constructed from its marshaled representation in the given TpmBuffer buffer \"\"\"\n        return buf.createObj({0})\n",
            ty.name
        ));
        if let Some(info) = s.session_enc {
            out.push('\n');
            out.push_str(&method(
                "getSessEncInfo(self)",
                "",
                &[format!("return SessEncInfo({}, {})", info.size_len, info.val_len)],
            ));
        }
        Ok(out)
    }

    fn emit_custom_marshaler(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String> {
        Ok(format!(
            "def _{0}_toTpm(obj, buf):\n{1}\ndef _{0}_initFromTpm(obj, buf):\n{2}",
            ty.spec_name,
            body(&to_tpm_lines(registry, ty, s, "obj")?, "    "),
            body(&from_tpm_lines(registry, ty, s, "obj")?, "    ")
        ))
    }

    fn emit_command(&self, registry: &Registry, request: &TpmType, s: &StructType) -> Result<String> {
        let StructRole::CommandRequest { command, code } = &s.role else {
            return Err(GenError::inconsistent(&request.spec_name, "not a command request"));
        };
        let params: Vec<&StructField> = s.data_fields().collect();
        let ret = command_return(registry, command);
        let names: Vec<String> = params.iter().map(|p| ident(&p.name)).collect();

        let mut args = vec!["self".to_string()];
        args.extend(names.iter().cloned());
        let mut out = format!("def {}({}):\n", method_name(command), args.join(", "));
        out.push_str(&format!(
            "    \"\"\" {}\n",
            if request.comment.is_empty() { command } else { &request.comment }
        ));
        if !params.is_empty() {
            out.push_str("\n    Args:\n");
            for (p, n) in params.iter().zip(&names) {
                out.push_str(&format!("        {} ({}): {}\n", n, p.target_type, p.comment));
            }
        }
        match ret {
            CommandReturn::Field(_, f) => {
                out.push_str(&format!("\n    Returns:\n        {} - {}\n", ident(&f.name), f.comment))
            }
            CommandReturn::Object(resp) => out.push_str(&format!("\n    Returns:\n        {}\n", resp.name)),
            CommandReturn::Nothing => {}
        }
        out.push_str("    \"\"\"\n");

        out.push_str(&format!("    req = {}({})\n", request.name, names.join(", ")));
        let response = match ret {
            CommandReturn::Nothing => "None".to_string(),
            CommandReturn::Field(resp, _) | CommandReturn::Object(resp) => resp.name.clone(),
        };
        let dispatch = format!(
            "self.dispatchCommand({}, req, {}, {}, {})",
            command_code(registry, code),
            s.num_handles,
            s.num_auth_handles,
            response
        );
        match ret {
            CommandReturn::Nothing => out.push_str(&format!("    {}\n", dispatch)),
            CommandReturn::Field(_, f) => {
                out.push_str(&format!("    res = {}\n", dispatch));
                out.push_str(&format!("    return res.{} if res else None\n", ident(&f.name)));
            }
            CommandReturn::Object(_) => out.push_str(&format!("    return {}\n", dispatch)),
        }
        Ok(out)
    }

    fn assemble(&self, registry: &Registry, sections: Sections) -> Result<GeneratedFiles> {
        let mut types = String::from(HEADER);
        types.push_str("from .TpmMarshaller import *\n");
        for fragment in sections
            .union_decls
            .iter()
            .chain(&sections.types)
            .chain(&sections.union_factories)
            .chain(&sections.custom_marshalers)
        {
            types.push_str("\n\n");
            types.push_str(fragment);
        }
        types.push_str("\n\ncustomMarshalers = {\n");
        for (ty, s) in registry.all_of::<StructType>() {
            if s.special_marshal.is_some() {
                types.push_str(&format!(
                    "    '{0}': (_{0}_toTpm, _{0}_initFromTpm),\n",
                    ty.spec_name
                ));
            }
        }
        types.push_str("}\n");

        let mut tpm = String::from(HEADER);
        tpm.push_str("from .TpmBase import *\nfrom .TpmTypes import *\n\n\nclass Tpm(TpmBase):\n");
        if sections.commands.is_empty() {
            tpm.push_str("    pass\n");
        } else {
            let methods: Vec<String> = sections.commands.iter().map(|c| indent(c, "    ")).collect();
            tpm.push_str(&methods.join("\n\n"));
            tpm.push('\n');
        }

        let mut files = GeneratedFiles::new();
        files.add(TYPES_FILE, types);
        files.add(COMMANDS_FILE, tpm);
        Ok(files)
    }
}
