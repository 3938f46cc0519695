//! TypeScript (`node`) backend.
//!
//! Emits `TpmTypes.ts` (enums, bitfields, union interfaces, structure classes with
//! `toTpm`/`initFromTpm`, union factories, custom marshalers) and `Tpm.ts` (one `async`
//! method per command). Generated code links against the hand-written `TpmBuffer` /
//! `TpmStructure` / `TpmBase` runtime.

use super::*;
use crate::adapt::literal;
use crate::wire::{layout, ArrayLen, Elem, Scalar, WireOp};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeScriptBackend;

const TYPES_FILE: &str = "TpmTypes.ts";
const COMMANDS_FILE: &str = "Tpm.ts";
const HEADER: &str = "/*\n *  Generated by tpmgen. Do not edit.\n */\n";

fn doc(comment: &str, indent: &str) -> String {
    if comment.is_empty() {
        String::new()
    } else {
        format!("{}/** {} */\n", indent, comment)
    }
}

fn type_name(registry: &Registry, spec_name: &str) -> Result<String> {
    Ok(registry.require(spec_name, "typescript backend")?.name.clone())
}

fn default_value(target_type: &str) -> &'static str {
    match target_type {
        "number" => "0",
        "boolean" => "false",
        _ => "null",
    }
}

fn write_scalar(s: Scalar, expr: &str) -> String {
    if s.is_bool {
        format!("buf.writeBool({});", expr)
    } else if s.signed {
        format!("buf.writeInt({}, {});", expr, s.size)
    } else {
        format!("buf.writeNum({}, {});", expr, s.size)
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

/// `if (<selector> == <null>) return;` for null-algorithm structures.
fn null_skip(registry: &Registry, s: &StructType, field: &str, expr: &str) -> Result<Option<String>> {
    match &s.special_marshal {
        Some(SpecialMarshal::NullAlgorithmSkip { selector, null_value }) if selector == field => Ok(Some(
            format!("if ({} == {}) return;", expr, constant_ref(registry, null_value)?),
        )),
        _ => Ok(None),
    }
}

/// Statements marshaling the structure held in `obj`.
fn to_tpm_lines(registry: &Registry, ty: &TpmType, s: &StructType, obj: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for step in layout(registry, &ty.spec_name)? {
        let this = format!("{}.{}", obj, step.field.name);
        lines.push(match &step.op {
            WireOp::Scalar(sc) => write_scalar(*sc, &this),
            WireOp::Object(_) | WireOp::Union { .. } => format!("{}.toTpm(buf);", this),
            WireOp::Constant { scalar, value } => write_scalar(*scalar, &literal(registry.evaluate(value)?)),
            WireOp::Count { scalar, array } => {
                write_scalar(*scalar, &format!("{}.{}?.length ?? 0", obj, array))
            }
            WireOp::Array { elem: Elem::Byte, .. } => format!("buf.writeByteBuf({});", this),
            WireOp::Array { elem: Elem::Scalar(sc), .. } => format!("buf.writeValArr({}, {});", this, sc.size),
            WireOp::Array { elem: Elem::Object(_), .. } => format!("buf.writeObjArr({});", this),
            WireOp::Sized { size, .. } => format!("buf.writeSizedObj({}, {});", this, size.size),
            WireOp::Selector { scalar, object, derived: true } => {
                write_scalar(*scalar, &format!("{}.{}.GetUnionSelector()", obj, object))
            }
            WireOp::Selector { scalar, .. } => write_scalar(*scalar, &this),
        });
        if let Some(skip) = null_skip(registry, s, &step.field.name, &this)? {
            lines.push(skip);
        }
    }
    Ok(lines)
}

/// Statements unmarshaling into the structure held in `obj`.
fn from_tpm_lines(registry: &Registry, ty: &TpmType, s: &StructType, obj: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut exprs: HashMap<String, String> = HashMap::new();
    for step in layout(registry, &ty.spec_name)? {
        let name = &step.field.name;
        let this = format!("{}.{}", obj, name);
        let local = format!("_{}", name);
        let sel_expr = |selector: &str, exprs: &HashMap<String, String>| {
            exprs.get(selector).cloned().unwrap_or_else(|| format!("{}.{}", obj, selector))
        };
        match &step.op {
            WireOp::Scalar(sc) => {
                lines.push(format!("{} = {};", this, read_scalar(*sc)));
                exprs.insert(name.clone(), this.clone());
            }
            WireOp::Object(t) => lines.push(format!("{} = buf.createObj({});", this, type_name(registry, t)?)),
            WireOp::Constant { scalar, value } => lines.push(format!(
                "buf.expectNum({}, {});",
                literal(registry.evaluate(value)?),
                scalar.size
            )),
            WireOp::Count { scalar, .. } | WireOp::Selector { scalar, derived: true, .. } => {
                lines.push(format!("const {} = {};", local, read_scalar(*scalar)));
                exprs.insert(name.clone(), local.clone());
            }
            WireOp::Selector { scalar, .. } => {
                lines.push(format!("{} = {};", this, read_scalar(*scalar)));
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
                    Elem::Byte => format!("{} = buf.readByteBuf({});", this, count),
                    Elem::Scalar(sc) => format!("{} = buf.readValArr({}, {});", this, sc.size, count),
                    Elem::Object(t) => format!("{} = buf.readObjArr({}, {});", this, type_name(registry, t)?, count),
                });
            }
            WireOp::Sized { size, type_name: inner } => lines.push(format!(
                "{} = buf.createSizedObj({}, {});",
                this,
                type_name(registry, inner)?,
                size.size
            )),
            WireOp::Union { union, selector } => {
                lines.push(format!(
                    "{} = {}({});",
                    this,
                    factory_name(&type_name(registry, union)?),
                    sel_expr(selector, &exprs)
                ));
                lines.push(format!("{}?.initFromTpm(buf);", this));
            }
        }
        if let Some(skip) = null_skip(registry, s, name, &this)? {
            lines.push(skip);
        }
    }
    Ok(lines)
}

fn method(signature: &str, lines: &[String]) -> String {
    let mut out = format!("    {} {{\n", signature);
    for l in lines {
        out.push_str(&format!("        {}\n", l));
    }
    out.push_str("    }\n");
    out
}

fn constant_members(registry: &Registry, ids: &[ConstId]) -> String {
    let mut out = String::new();
    let mut names: BTreeSet<&str> = ids.iter().map(|id| registry.constant(*id).name.as_str()).collect();
    for id in ids {
        let c = registry.constant(*id);
        let value = c.value.target_expr.as_deref().unwrap_or(&c.value.expr);
        out.push_str(&doc(&c.comment, "    "));
        out.push_str(&format!("    {} = {},\n", c.name, value));
        if let Some(old) = &c.old_name {
            if names.insert(old.as_str()) {
                out.push_str(&format!("    /** @deprecated Use {} instead */\n", c.name));
                out.push_str(&format!("    {} = {},\n", old, value));
            }
        }
    }
    out
}

impl Backend for TypeScriptBackend {
    fn lang(&self) -> Lang {
        Lang::Node
    }

    fn emit_enum(&self, registry: &Registry, ty: &TpmType, e: &EnumType) -> Result<String> {
        Ok(format!(
            "{}export enum {} // {}\n{{\n{}}}\n",
            doc(&ty.comment, ""),
            ty.name,
            e.underlying,
            constant_members(registry, &e.members)
        ))
    }

    fn emit_bitfield(&self, registry: &Registry, ty: &TpmType, b: &BitfieldType) -> Result<String> {
        Ok(format!(
            "{}export enum {} // {} bitfield\n{{\n{}}}\n",
            doc(&ty.comment, ""),
            ty.name,
            b.underlying,
            constant_members(registry, &b.constants)
        ))
    }

    fn emit_union_decl(&self, _registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<Option<String>> {
        if u.is_array_union() {
            return Ok(None);
        }
        Ok(Some(format!("{}export interface {} extends TpmUnion {{}}\n", doc(&ty.comment, ""), ty.name)))
    }

    fn emit_union_factory(&self, registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<String> {
        let selector = selector_type(registry, u).unwrap_or_else(|| "number".to_string());
        let mut out = String::new();
        if u.is_array_union() {
            out.push_str(&format!("/** Byte size of the {} member selected by `selector`. */\n", ty.name));
            out.push_str(&format!(
                "export function {}(selector: {}): number {{\n    switch (selector) {{\n",
                size_fn_name(&ty.name),
                selector
            ));
            for (m, size) in array_union_sizes(registry, u)? {
                out.push_str(&format!("        case {}: return {};\n", constant_ref(registry, &m.selector)?, size));
            }
            out.push_str("    }\n    return 0;\n}\n");
            return Ok(out);
        }
        out.push_str(&format!("/** Creates the {} member selected by `selector`. */\n", ty.name));
        out.push_str(&format!(
            "export function {}(selector: {}): {} {{\n    switch (selector) {{\n",
            factory_name(&ty.name),
            selector,
            ty.name
        ));
        for m in u.members.iter().filter(|m| registry.is_struct(&m.type_name)) {
            out.push_str(&format!(
                "        case {}: return new {}();\n",
                constant_ref(registry, &m.selector)?,
                type_name(registry, &m.type_name)?
            ));
        }
        out.push_str("    }\n    return null;\n}\n");
        Ok(out)
    }

    fn emit_struct(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String> {
        let base = match &s.base {
            Some(b) => type_name(registry, b)?,
            None => "TpmStructure".to_string(),
        };
        let unions: BTreeSet<String> = s
            .containing_unions
            .iter()
            .map(|(u, _)| type_name(registry, u))
            .collect::<Result<_>>()?;
        let implements = if unions.is_empty() {
            String::new()
        } else {
            format!(" implements {}", unions.into_iter().collect::<Vec<_>>().join(", "))
        };

        let mut out = doc(&ty.comment, "");
        out.push_str(&format!("export class {} extends {}{}\n{{\n", ty.name, base, implements));

        let params: Vec<String> = s
            .data_fields()
            .map(|f| {
                format!(
                    "{}        public {}: {} = {}",
                    doc(&f.comment, "        "),
                    f.name,
                    f.target_type,
                    default_value(&f.target_type)
                )
            })
            .collect();
        if params.is_empty() {
            out.push_str("    constructor() { super(); }\n");
        } else {
            out.push_str(&format!("    constructor(\n{}\n    ) {{ super(); }}\n", params.join(",\n")));
        }

        if let Some(selector) = union_selector(s) {
            let owner = constant_owner(registry, selector).unwrap_or_else(|| "number".to_string());
            out.push_str("\n    /** TpmUnion method */\n");
            out.push_str(&format!(
                "    GetUnionSelector(): {} {{ return {}; }}\n",
                owner,
                constant_ref(registry, selector)?
            ));
        }

        let inherits_layout = s.base.is_some() && s.fields.is_empty();
        if s.special_marshal.is_some() {
            out.push_str("\n    /** TpmMarshaller method */\n");
            out.push_str(&format!(
                "    toTpm(buf: TpmBuffer): void {{ customMarshalers.{}.toTpm(this, buf); }}\n",
                ty.spec_name
            ));
            out.push_str("\n    /** TpmMarshaller method */\n");
            out.push_str(&format!(
                "    initFromTpm(buf: TpmBuffer): void {{ customMarshalers.{}.initFromTpm(this, buf); }}\n",
                ty.spec_name
            ));
        } else if !inherits_layout {
            out.push_str("\n    /** TpmMarshaller method */\n");
            out.push_str(&method("toTpm(buf: TpmBuffer): void", &to_tpm_lines(registry, ty, s, "this")?));
            out.push_str("\n    /** TpmMarshaller method */\n");
            out.push_str(&method("initFromTpm(buf: TpmBuffer): void", &from_tpm_lines(registry, ty, s, "this")?));
        }

        out.push_str(&format!(
            "\n    static fromTpm(buf: TpmBuffer): {0} {{ return buf.createObj({0}); }}\n",
            ty.name
        ));
        if let Some(info) = s.session_enc {
            out.push_str(&format!(
                "\n    getSessEncInfo(): SessEncInfo {{ return new SessEncInfo({}, {}); }}\n",
                info.size_len, info.val_len
            ));
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn emit_custom_marshaler(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String> {
        let body = |lines: Vec<String>| {
            lines.iter().map(|l| format!("            {}\n", l)).collect::<String>()
        };
        Ok(format!(
            "    {0}: {{\n        toTpm(obj: {1}, buf: TpmBuffer): void {{\n{2}        }},\n        initFromTpm(obj: {1}, buf: TpmBuffer): void {{\n{3}        }},\n    }},\n",
            ty.spec_name,
            ty.name,
            body(to_tpm_lines(registry, ty, s, "obj")?),
            body(from_tpm_lines(registry, ty, s, "obj")?)
        ))
    }

    fn emit_command(&self, registry: &Registry, request: &TpmType, s: &StructType) -> Result<String> {
        let StructRole::CommandRequest { command, code } = &s.role else {
            return Err(GenError::inconsistent(&request.spec_name, "not a command request"));
        };
        let params: Vec<&StructField> = s.data_fields().collect();
        let ret = command_return(registry, command);

        let mut out = String::new();
        out.push_str(&format!("/** {}\n", if request.comment.is_empty() { command } else { &request.comment }));
        for p in &params {
            out.push_str(&format!(" *  @param {} {}\n", p.name, p.comment));
        }
        match ret {
            CommandReturn::Field(_, f) => out.push_str(&format!(" *  @return {} - {}\n", f.name, f.comment)),
            CommandReturn::Object(resp) => out.push_str(&format!(" *  @return {}\n", resp.name)),
            CommandReturn::Nothing => {}
        }
        out.push_str(" */\n");

        let args: Vec<String> = params.iter().map(|p| format!("{}: {}", p.name, p.target_type)).collect();
        let ret_type = match ret {
            CommandReturn::Nothing => "void".to_string(),
            CommandReturn::Field(_, f) => f.target_type.clone(),
            CommandReturn::Object(resp) => resp.name.clone(),
        };
        out.push_str(&format!(
            "async {}({}): Promise<{}>\n{{\n",
            method_name(command),
            args.join(", "),
            ret_type
        ));
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        out.push_str(&format!("    const req = new {}({});\n", request.name, names.join(", ")));
        let response = match ret {
            CommandReturn::Nothing => "null".to_string(),
            CommandReturn::Field(resp, _) | CommandReturn::Object(resp) => resp.name.clone(),
        };
        let dispatch = format!(
            "this.dispatchCommand({}, req, {}, {}, {})",
            command_code(registry, code),
            s.num_handles,
            s.num_auth_handles,
            response
        );
        match ret {
            CommandReturn::Nothing => out.push_str(&format!("    await {};\n", dispatch)),
            CommandReturn::Field(_, f) => {
                out.push_str(&format!("    const res = await {};\n", dispatch));
                out.push_str(&format!("    return res.{};\n", f.name));
            }
            CommandReturn::Object(_) => out.push_str(&format!("    return await {};\n", dispatch)),
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn assemble(&self, registry: &Registry, sections: Sections) -> Result<GeneratedFiles> {
        let mut types = String::from(HEADER);
        types.push_str(
            "\nimport { TpmBuffer, TpmStructure, TpmUnion, SessEncInfo } from \"./TpmMarshaller\";\n",
        );
        for fragment in sections
            .union_decls
            .iter()
            .chain(&sections.types)
            .chain(&sections.union_factories)
        {
            types.push('\n');
            types.push_str(fragment);
        }
        types.push_str("\n/** Marshalers of structures whose wire layout depends on a selector value. */\n");
        types.push_str("export const customMarshalers = {\n");
        for m in &sections.custom_marshalers {
            types.push_str(m);
        }
        types.push_str("};\n");

        let imported: BTreeSet<&str> = registry
            .iter()
            .filter(|t| t.implement && !matches!(t.kind, TypeKind::Value(_) | TypeKind::Typedef(_)))
            .map(|t| t.name.as_str())
            .collect();
        let mut tpm = String::from(HEADER);
        tpm.push_str("\nimport { TpmBase } from \"./TpmBase\";\n");
        tpm.push_str(&format!(
            "import {{\n{}\n}} from \"./TpmTypes\";\n",
            imported.iter().map(|n| format!("    {},", n)).collect::<Vec<_>>().join("\n")
        ));
        tpm.push_str("\nexport class Tpm extends TpmBase\n{\n");
        let methods: Vec<String> = sections.commands.iter().map(|c| indent(c, "    ")).collect();
        tpm.push_str(&methods.join("\n\n"));
        if !methods.is_empty() {
            tpm.push('\n');
        }
        tpm.push_str("}\n");

        let mut files = GeneratedFiles::new();
        files.add(TYPES_FILE, types);
        files.add(COMMANDS_FILE, tpm);
        Ok(files)
    }
}
