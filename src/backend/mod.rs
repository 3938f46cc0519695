//! Code generator backends.
//!
//! [`generate`] walks an adapted registry in order and asks a [`Backend`] for one fragment per
//! declaration; the backend then assembles the fragments into whole files. Nothing is written
//! until every fragment has been produced, so a failure leaves no partial output.

pub mod python;
pub mod typescript;

use crate::adapt::Lang;
use crate::ast::*;
use crate::error::{GenError, Result};
use crate::registry::Registry;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub use python::PythonBackend;
pub use typescript::TypeScriptBackend;

/// Fragments collected from one registry, in registry order.
#[derive(Debug, Default)]
pub struct Sections {
    /// Union declarations (interfaces or marker classes).
    pub union_decls: Vec<String>,
    /// Enums, bitfields and structures.
    pub types: Vec<String>,
    /// Selector-keyed union factories and array-union size functions.
    pub union_factories: Vec<String>,
    /// Custom marshalers of structures with a special wire layout.
    pub custom_marshalers: Vec<String>,
    /// One method per command.
    pub commands: Vec<String>,
}

pub trait Backend {
    fn lang(&self) -> Lang;

    fn emit_enum(&self, registry: &Registry, ty: &TpmType, e: &EnumType) -> Result<String>;

    fn emit_bitfield(&self, registry: &Registry, ty: &TpmType, b: &BitfieldType) -> Result<String>;

    /// Declaration of a union; `None` when the language needs none.
    fn emit_union_decl(&self, registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<Option<String>>;

    /// Factory creating the member a selector chooses, or the byte size of an array union.
    fn emit_union_factory(&self, registry: &Registry, ty: &TpmType, u: &UnionType) -> Result<String>;

    fn emit_struct(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String>;

    fn emit_custom_marshaler(&self, registry: &Registry, ty: &TpmType, s: &StructType) -> Result<String>;

    fn emit_command(&self, registry: &Registry, request: &TpmType, s: &StructType) -> Result<String>;

    /// Assemble the collected fragments into files.
    fn assemble(&self, registry: &Registry, sections: Sections) -> Result<GeneratedFiles>;
}

/// Generated sources, keyed by path relative to the output directory.
#[derive(Debug, Default)]
pub struct GeneratedFiles {
    files: Vec<(PathBuf, String)>,
}

impl GeneratedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, contents: String) {
        self.files.push((path.into(), contents));
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(p, _)| p.as_path() == Path::new(path))
            .map(|(_, c)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().map(|(p, c)| (p.as_path(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every file under `dir`, creating directories as needed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        for (path, contents) in &self.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, contents)?;
            debug!("wrote {}", target.display());
        }
        Ok(())
    }
}

/// Backend for `lang`, if one is implemented.
pub fn backend_for(lang: Lang) -> Option<Box<dyn Backend>> {
    match lang {
        Lang::Node => Some(Box::new(TypeScriptBackend)),
        Lang::Py => Some(Box::new(PythonBackend)),
        Lang::Cpp | Lang::CSharp | Lang::Java => None,
    }
}

/// Generate all files for a registry adapted for the backend's language.
pub fn generate(registry: &Registry, backend: &dyn Backend) -> Result<GeneratedFiles> {
    let lang = backend.lang();
    if registry.adapted_for() != Some(lang) {
        return Err(GenError::NotAdapted {
            expected: lang,
            found: registry
                .adapted_for()
                .map_or_else(|| "an unadapted registry".to_string(), |l| l.to_string()),
        });
    }

    let mut sections = Sections::default();
    for ty in registry.iter().filter(|t| t.implement) {
        match &ty.kind {
            TypeKind::Enum(e) => sections.types.push(backend.emit_enum(registry, ty, e)?),
            TypeKind::Bitfield(b) => sections.types.push(backend.emit_bitfield(registry, ty, b)?),
            TypeKind::Union(u) => {
                if let Some(decl) = backend.emit_union_decl(registry, ty, u)? {
                    sections.union_decls.push(decl);
                }
                sections.union_factories.push(backend.emit_union_factory(registry, ty, u)?);
            }
            TypeKind::Struct(s) => {
                sections.types.push(backend.emit_struct(registry, ty, s)?);
                if s.special_marshal.is_some() {
                    sections.custom_marshalers.push(backend.emit_custom_marshaler(registry, ty, s)?);
                }
                if s.is_request() {
                    sections.commands.push(backend.emit_command(registry, ty, s)?);
                }
            }
            TypeKind::Value(_) | TypeKind::Typedef(_) => {}
        }
    }
    info!(
        "{}: {} types, {} unions, {} commands, {} custom marshalers",
        lang,
        sections.types.len(),
        sections.union_factories.len(),
        sections.commands.len(),
        sections.custom_marshalers.len()
    );
    backend.assemble(registry, sections)
}

/// Target-language reference to a constant: `Owner.Member`, or the bare name without an owner.
pub fn constant_ref(registry: &Registry, name: &str) -> Result<String> {
    let lang = registry.adapted_for();
    let id = registry
        .resolve_constant(name)
        .ok_or_else(|| GenError::UnresolvedConstant(name.to_string()))?;
    let c = registry.constant(id);
    Ok(match (registry.lookup(&c.owner), lang) {
        (Some(owner), Some(lang)) => format!("{}{}{}", owner.name, lang.scope_separator(), c.name),
        (Some(owner), None) => format!("{}.{}", owner.name, c.name),
        (None, _) => c.name.clone(),
    })
}

/// Command-code reference of a request; a code with no registered constant stays symbolic.
pub fn command_code(registry: &Registry, code: &str) -> String {
    constant_ref(registry, code).unwrap_or_else(|_| {
        warn!("command code {} is not a registered constant", code);
        code.to_string()
    })
}

/// Response structure paired with `command`, if it is implemented.
pub fn command_response<'r>(registry: &'r Registry, command: &str) -> Option<(&'r TpmType, &'r StructType)> {
    registry
        .all_of::<StructType>()
        .find(|(_, s)| matches!(&s.role, StructRole::CommandResponse { command: c } if c == command))
}

/// What a command method hands back to its caller.
#[derive(Debug, Clone, Copy)]
pub enum CommandReturn<'r> {
    Nothing,
    /// The single data field of the response.
    Field(&'r TpmType, &'r StructField),
    Object(&'r TpmType),
}

pub fn command_return<'r>(registry: &'r Registry, command: &str) -> CommandReturn<'r> {
    let Some((ty, s)) = command_response(registry, command) else {
        return CommandReturn::Nothing;
    };
    let fields: Vec<&StructField> = s.data_fields().collect();
    match fields.as_slice() {
        [] => CommandReturn::Nothing,
        [f] => CommandReturn::Field(ty, f),
        _ => CommandReturn::Object(ty),
    }
}

/// Target name of the enum owning a constant.
pub fn constant_owner(registry: &Registry, name: &str) -> Option<String> {
    let id = registry.resolve_constant(name)?;
    registry.lookup(&registry.constant(id).owner).map(|t| t.name.clone())
}

/// Type of the constants selecting a union's members.
pub fn selector_type(registry: &Registry, u: &UnionType) -> Option<String> {
    constant_owner(registry, &u.members.first()?.selector)
}

/// Byte size of each member of an array union, as `(selector, size)`.
pub fn array_union_sizes<'u>(registry: &Registry, u: &'u UnionType) -> Result<Vec<(&'u UnionMember, usize)>> {
    let mut sizes = Vec::new();
    for (i, m) in u.members.iter().enumerate() {
        if Some(i) == u.null_member {
            continue;
        }
        let count = match &m.array_size {
            Some(expr) => registry.evaluate(expr)?,
            None => 1,
        };
        let size = (registry.wire_size(&m.type_name)? as i64)
            .checked_mul(count)
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| GenError::inconsistent(&m.type_name, format!("member {} has an invalid array size", m.name)))?;
        sizes.push((m, size));
    }
    Ok(sizes)
}

/// Selector each union containing `s` uses for it (consistent across unions after linting).
pub fn union_selector(s: &StructType) -> Option<&str> {
    s.containing_unions.first().map(|(_, selector)| selector.as_str())
}

/// Name of the function returning an array union's byte size.
pub fn size_fn_name(union: &str) -> String {
    format!("{}_size", union)
}

/// Name of the union member factory.
pub fn factory_name(union: &str) -> String {
    format!("create_{}", union)
}

/// Short method name of a command (`TPM2_` dropped).
pub fn method_name(command: &str) -> &str {
    command.strip_prefix("TPM2_").unwrap_or(command)
}

/// Prefix each non-empty line of `text` with `indent`.
pub(crate) fn indent(text: &str, indent: &str) -> String {
    text.lines()
        .map(|l| if l.is_empty() { String::new() } else { format!("{}{}", indent, l) })
        .collect::<Vec<_>>()
        .join("\n")
}
