//! Type extraction: raw tables → registry.
//!
//! Algorithm-ID tables are processed first so the classifier can drive `!ALG` macro
//! expansion of every other table. Each remaining table is expanded, classified by caption
//! and turned into registry nodes row by row. Tables whose caption is not recognized, or whose
//! macro matches no algorithm, are skipped with a [`Diagnostic`]; any other anomaly aborts.

use crate::algmacro::expand_table;
use crate::ast::*;
use crate::classify::{classify_table, parse_row, FieldSpec, RowSpec, TableKind};
use crate::config::GeneratorConfig;
use crate::domain::Domain;
use crate::error::{GenError, Result};
use crate::raw::RawTable;
use crate::registry::Registry;
use log::{debug, error, info, warn};
use regex::Regex;
use std::sync::LazyLock;

static COMMAND_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TPM_CC_\w+").expect("valid regex"));

/// C base type names used by the base-types table.
const C_BASE_TYPES: &[(&str, &str)] = &[
    ("uint8_t", "UINT8"),
    ("int8_t", "INT8"),
    ("uint16_t", "UINT16"),
    ("int16_t", "INT16"),
    ("uint32_t", "UINT32"),
    ("int32_t", "INT32"),
    ("uint64_t", "UINT64"),
    ("int64_t", "INT64"),
    ("int", "INT32"),
    ("unsigned", "UINT32"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnrecognizedCaption,
    UnclassifiedAlgorithm { classes: String },
}

/// A table that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub caption: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    /// Tables after macro expansion that produced registry content.
    pub processed: usize,
    /// Tables produced by `!ALG` expansion (caption templates and row expansions).
    pub expanded: usize,
    pub skipped: Vec<Diagnostic>,
}

/// Build a registry from raw tables.
pub fn extract(tables: &[RawTable], config: &GeneratorConfig) -> Result<(Registry, ExtractReport)> {
    let mut ex = Extractor::new(config);

    for table in tables {
        if let Some(kind @ TableKind::AlgorithmConstants { .. }) = classify_table(&table.caption) {
            ex.table(table, kind)?;
        }
    }
    info!("{} algorithms classified", ex.registry.algorithms().len());

    for table in tables {
        let expanded = match expand_table(table, ex.registry.algorithms()) {
            Ok(Some(tables)) => {
                ex.report.expanded += tables.len();
                tables
            }
            Ok(None) => vec![table.clone()],
            Err(e) => {
                error!("skipping '{}': {}", table.caption, e);
                ex.report.skipped.push(Diagnostic {
                    caption: table.caption.clone(),
                    reason: SkipReason::UnclassifiedAlgorithm { classes: e.classes },
                });
                continue;
            }
        };
        for table in &expanded {
            match classify_table(&table.caption) {
                Some(TableKind::AlgorithmConstants { .. }) => {}
                Some(kind) => ex.table(table, kind)?,
                None => {
                    warn!("skipping unrecognized table '{}'", table.caption);
                    ex.report.skipped.push(Diagnostic {
                        caption: table.caption.clone(),
                        reason: SkipReason::UnrecognizedCaption,
                    });
                }
            }
        }
    }

    ex.finish()
}

fn locate(err: GenError, caption: &str, row: usize) -> GenError {
    match err {
        GenError::UnmatchedRow { kind, cells, .. } => GenError::UnmatchedRow {
            caption: caption.to_string(),
            kind,
            row,
            cells,
        },
        other => other,
    }
}

fn unexpected(caption: &str, row: &RowSpec) -> GenError {
    GenError::MalformedTable {
        caption: caption.to_string(),
        reason: format!("unexpected row {:?}", row),
    }
}

fn domain_of(text: Option<&str>) -> Result<Domain> {
    let mut domain = Domain::new();
    if let Some(text) = text {
        domain.add_constraints(text)?;
    }
    Ok(domain)
}

struct Extractor<'a> {
    config: &'a GeneratorConfig,
    registry: Registry,
    report: ExtractReport,
}

impl<'a> Extractor<'a> {
    fn new(config: &'a GeneratorConfig) -> Self {
        let mut registry = Registry::new();
        registry.set_alg_prefix(&config.alg_prefix);
        Extractor {
            config,
            registry,
            report: ExtractReport::default(),
        }
    }

    fn table(&mut self, table: &RawTable, kind: TableKind) -> Result<()> {
        debug!("{} table '{}' ({} rows)", kind.label(), table.caption, table.rows.len());
        let mut rows = Vec::with_capacity(table.rows.len());
        for (i, cells) in table.rows.iter().enumerate() {
            rows.push(parse_row(&kind, cells).map_err(|e| locate(e, &table.caption, i))?);
        }
        let caption = table.caption.as_str();
        match kind {
            TableKind::AlgorithmConstants { base } => self.algorithms(caption, &base, rows)?,
            TableKind::Constants { name, base } => self.constants(caption, &name, base, rows)?,
            TableKind::Typedefs => self.typedefs(caption, rows)?,
            TableKind::Interface { name, base } => self.interface(caption, &name, &base, rows)?,
            TableKind::Bitfield { name, base } => self.bitfield(caption, &name, &base, rows)?,
            TableKind::Structure { name } => self.structure(caption, &name, rows, &table.comment)?,
            TableKind::Union { name } => self.union(caption, &name, rows, &table.comment)?,
            TableKind::CommandRequest { command } => {
                self.command(caption, &command, true, table.num_handles, rows)?
            }
            TableKind::CommandResponse { command } => {
                self.command(caption, &command, false, table.num_handles, rows)?
            }
        }
        self.report.processed += 1;
        Ok(())
    }

    /// Add a constant, dropping it when it duplicates a name and the reserved rule allows it.
    fn constant(&mut self, constant: NamedConstant) -> Result<Option<ConstId>> {
        if self.registry.has_constant(&constant.spec_name)
            && self.config.reserved_rule.allows_drop(&constant.owner, &constant.comment)
        {
            debug!("dropping reserved duplicate {}", constant.spec_name);
            return Ok(None);
        }
        self.registry.add_constant(constant).map(Some)
    }

    fn enum_type(&mut self, name: &str, underlying: &str, group: bool) -> Result<()> {
        if !self.registry.contains(name) {
            let e = EnumType {
                underlying: underlying.to_string(),
                constants_group: group,
                ..Default::default()
            };
            self.registry.add(TpmType::new(name, TypeKind::Enum(e)), None)?;
        }
        Ok(())
    }

    fn push_members(&mut self, name: &str, ids: Vec<ConstId>, error_code: Option<String>) {
        if let Some(TypeKind::Enum(e)) = self.registry.lookup_mut(name).map(|t| &mut t.kind) {
            e.members.extend(ids);
            if error_code.is_some() {
                e.error_code = error_code;
            }
        }
    }

    fn algorithms(&mut self, caption: &str, base: &str, rows: Vec<RowSpec>) -> Result<()> {
        let owner = "TPM_ALG_ID";
        self.enum_type(owner, base, false)?;
        let mut ids = Vec::new();
        let mut error_code = None;
        for row in rows {
            match row {
                RowSpec::Algorithm { name, value, classes, comment } => {
                    let mnemonic = name
                        .strip_prefix(self.config.alg_prefix.as_str())
                        .unwrap_or(&name)
                        .to_string();
                    if let Some(id) = self.constant(NamedConstant::new(&name, &value, owner, &comment))? {
                        ids.push(id);
                        self.registry.algorithms_mut().register(&mnemonic, &value, &classes);
                    }
                }
                RowSpec::ErrorCode(code) => error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        self.push_members(owner, ids, error_code);
        Ok(())
    }

    fn constants(&mut self, caption: &str, name: &str, base: Option<String>, rows: Vec<RowSpec>) -> Result<()> {
        let group = base.is_none();
        self.enum_type(name, base.as_deref().unwrap_or("UINT32"), group)?;
        let mut ids = Vec::new();
        let mut error_code = None;
        for row in rows {
            match row {
                RowSpec::Constant { name: c, value, comment } => {
                    if let Some(id) = self.constant(NamedConstant::new(&c, &value, name, &comment))? {
                        ids.push(id);
                    }
                }
                RowSpec::ErrorCode(code) => error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        self.push_members(name, ids, error_code);
        Ok(())
    }

    fn typedefs(&mut self, caption: &str, rows: Vec<RowSpec>) -> Result<()> {
        let mut defined = Vec::new();
        let mut error_code = None;
        for row in rows {
            match row {
                RowSpec::Typedef { base, name, comment } => {
                    if matches!(self.registry.lookup(&name).map(|t| &t.kind), Some(TypeKind::Value(_))) {
                        continue;
                    }
                    let base = C_BASE_TYPES
                        .iter()
                        .find(|(c, _)| *c == base)
                        .map_or(base.clone(), |(_, v)| v.to_string());
                    let t = TypedefType { base, ..Default::default() };
                    self.registry
                        .add(TpmType::new(&name, TypeKind::Typedef(t)).with_comment(&comment), None)?;
                    defined.push(name);
                }
                RowSpec::ErrorCode(code) => error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        if let Some(code) = error_code {
            for name in defined {
                if let Some(TypeKind::Typedef(t)) = self.registry.lookup_mut(&name).map(|t| &mut t.kind) {
                    t.error_code = Some(code.clone());
                }
            }
        }
        Ok(())
    }

    fn interface(&mut self, caption: &str, name: &str, base: &str, rows: Vec<RowSpec>) -> Result<()> {
        let mut t = TypedefType { base: base.to_string(), ..Default::default() };
        for row in rows {
            match row {
                RowSpec::Interface { text, null: true } => t.null_value = Some(text),
                RowSpec::Interface { text, null: false } => t.domain.add_constraints(&text)?,
                RowSpec::ErrorCode(code) => t.error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        self.registry.add(TpmType::new(name, TypeKind::Typedef(t)), None)?;
        Ok(())
    }

    fn bitfield(&mut self, caption: &str, name: &str, base: &str, rows: Vec<RowSpec>) -> Result<()> {
        let mut bf = BitfieldType { underlying: base.to_string(), ..Default::default() };
        for row in rows {
            match row {
                RowSpec::Bits { start, end, name, enum_type, comment } => {
                    bf.members.push(BitfieldMember { name, start_bit: start, end_bit: end, enum_type, comment })
                }
                RowSpec::ErrorCode(code) => bf.error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        for m in bf.members.clone() {
            let prefix = format!("{}_{}", name, m.name);
            let generated = if m.width() == 1 {
                vec![(prefix, format!("1 << {}", m.start_bit))]
            } else {
                vec![
                    (format!("{}_BIT_MASK", prefix), format!("0x{:X}", m.mask())),
                    (format!("{}_BIT_OFFSET", prefix), m.start_bit.to_string()),
                    (format!("{}_BIT_LENGTH", prefix), m.width().to_string()),
                ]
            };
            for (spec_name, value) in generated {
                if let Some(id) = self.constant(NamedConstant::new(&spec_name, &value, name, &m.comment))? {
                    bf.constants.push(id);
                }
            }
        }
        self.registry.add(TpmType::new(name, TypeKind::Bitfield(bf)), None)?;
        Ok(())
    }

    fn structure(&mut self, caption: &str, name: &str, rows: Vec<RowSpec>, comment: &str) -> Result<()> {
        let mut s = StructType::default();
        for row in rows {
            match row {
                RowSpec::Field(spec) => add_field(name, &mut s.fields, spec)?,
                RowSpec::ErrorCode(code) => s.error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        self.registry
            .add(TpmType::new(name, TypeKind::Struct(s)).with_comment(comment), None)?;
        Ok(())
    }

    fn command(
        &mut self,
        caption: &str,
        command: &str,
        request: bool,
        num_handles: usize,
        rows: Vec<RowSpec>,
    ) -> Result<()> {
        let short = command.strip_prefix("TPM2_").unwrap_or(command);
        let name = format!("{}_{}", command, if request { "REQUEST" } else { "RESPONSE" });
        let mut code = format!("TPM_CC_{}", short);
        let mut s = StructType::default();
        for row in rows {
            match row {
                RowSpec::CommandHeader { name: header, comment } => {
                    if header == "commandCode" {
                        if let Some(m) = COMMAND_CODE.find(&comment) {
                            code = m.as_str().to_string();
                        }
                    }
                }
                RowSpec::Field(spec) => {
                    let is_handle = s.fields.len() < num_handles;
                    let auth = spec.requires_auth;
                    add_field(&name, &mut s.fields, spec)?;
                    if let Some(f) = s.fields.last_mut() {
                        f.is_handle = is_handle;
                    }
                    if is_handle {
                        s.num_handles += 1;
                        if auth {
                            s.num_auth_handles += 1;
                        }
                    }
                }
                RowSpec::ErrorCode(code) => s.error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        s.role = if request {
            StructRole::CommandRequest { command: command.to_string(), code }
        } else {
            StructRole::CommandResponse { command: command.to_string() }
        };
        let empty = s.fields.is_empty();
        let mut ty = TpmType::new(&name, TypeKind::Struct(s));
        if !request && empty {
            ty.implement = false;
        }
        self.registry.add(ty, None)?;
        Ok(())
    }

    fn union(&mut self, caption: &str, name: &str, rows: Vec<RowSpec>, comment: &str) -> Result<()> {
        let mut u = UnionType::default();
        for row in rows {
            match row {
                RowSpec::UnionMember { name: member, array_size, type_name, selector, comment } => {
                    let is_null = type_name.is_empty() || self.is_null_selector(&selector);
                    let type_name = if type_name.is_empty() {
                        let suffix = name.strip_prefix("TPMU_").unwrap_or(name);
                        let null_struct = format!("TPMS_NULL_{}", suffix);
                        if !self.registry.contains(&null_struct) {
                            self.registry
                                .add(TpmType::new(&null_struct, TypeKind::Struct(StructType::default())), None)?;
                        }
                        null_struct
                    } else {
                        type_name
                    };
                    if is_null && u.null_member.is_none() {
                        u.null_member = Some(u.members.len());
                    }
                    u.members.push(UnionMember {
                        name: member,
                        type_name,
                        selector,
                        array_size,
                        comment,
                        target_type: String::new(),
                    });
                }
                RowSpec::ErrorCode(code) => u.error_code = Some(code),
                RowSpec::Skip => {}
                other => return Err(unexpected(caption, &other)),
            }
        }
        self.registry
            .add(TpmType::new(name, TypeKind::Union(u)).with_comment(comment), None)?;
        Ok(())
    }

    fn is_null_selector(&self, selector: &str) -> bool {
        selector == self.config.null_selector
            || self
                .registry
                .lookup_constant(selector)
                .is_some_and(|c| c.spec_name == self.config.null_selector)
    }

    fn finish(mut self) -> Result<(Registry, ExtractReport)> {
        let array_unions: Vec<String> = self
            .registry
            .all_of::<UnionType>()
            .filter(|(_, u)| u.is_array_union())
            .map(|(t, _)| t.spec_name.clone())
            .collect();
        for name in self.registry.names_in_order() {
            if let Some(s) = self.registry.lookup_mut(&name).and_then(|t| t.as_struct_mut()) {
                for f in s.fields.iter_mut() {
                    if f.marshal == MarshalType::UnionObject && array_unions.contains(&f.type_name) {
                        f.marshal = MarshalType::SpecialVariableLengthArray;
                    }
                }
            }
        }
        self.registry.link_unions();
        self.registry.check_references()?;
        info!(
            "extracted {} types and {} constants from {} tables ({} skipped)",
            self.registry.len(),
            self.registry.constants().count(),
            self.report.processed,
            self.report.skipped.len()
        );
        Ok((self.registry, self.report))
    }
}

/// Turn one parsed field row into a `StructField`, wiring up tag counterparts.
fn add_field(owner: &str, fields: &mut Vec<StructField>, spec: FieldSpec) -> Result<()> {
    let mut f = StructField::new(&spec.name, &spec.type_name);
    f.requires_auth = spec.requires_auth;
    f.nullable = spec.nullable;
    f.size_marker = spec.size_marker;
    f.comment = spec.comment;
    f.domain = domain_of(spec.domain.as_deref())?;

    if let Some(value) = spec.constant {
        f.marshal = MarshalType::ConstantValue;
        f.domain = Domain::new();
        f.domain.add_single(value);
    }

    if let Some(selector) = spec.selector {
        let tag = fields
            .iter_mut()
            .find(|s| s.name == selector)
            .ok_or_else(|| GenError::inconsistent(owner, format!("{} selected by missing field {}", f.name, selector)))?;
        tag.marshal = MarshalType::UnionSelector;
        tag.related = Some(f.name.clone());
        f.marshal = MarshalType::UnionObject;
        f.related = Some(selector);
    }

    match spec.array {
        Some(count) if count.is_empty() => f.marshal = MarshalType::ImplicitLengthArray,
        Some(count) => match fields.iter_mut().find(|s| s.name == count) {
            Some(tag) => {
                tag.marshal = MarshalType::ArrayCount;
                tag.related = Some(f.name.clone());
                f.marshal = MarshalType::VariableLengthArray;
                f.related = Some(count);
            }
            None => {
                f.marshal = MarshalType::FixedLengthArray;
                f.array_size = Some(count);
            }
        },
        None => {}
    }

    fields.push(f);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alg_table() -> RawTable {
        RawTable::new(
            "Table 9 — Definition of (UINT16) TPM_ALG_ID Constants",
            &[
                &["TPM_ALG_SHA1", "0x0004", "H", "", ""],
                &["TPM_ALG_SHA256", "0x000B", "H", "", ""],
                &["TPM_ALG_NULL", "0x0010", "", "", ""],
            ],
        )
    }

    #[test]
    fn bitfield_generates_constants() {
        let tables = vec![RawTable::new(
            "Definition of (UINT8) TPMA_SESSION Bits",
            &[&["0", "continueSession", ""], &["4:1", "Reserved", ""], &["7:5", "mode", ""]],
        )];
        let (r, _) = extract(&tables, &GeneratorConfig::default()).unwrap();
        assert_eq!(r.constant_value("TPMA_SESSION_continueSession").unwrap(), 1);
        assert_eq!(r.constant_value("TPMA_SESSION_mode_BIT_MASK").unwrap(), 0xE0);
        assert_eq!(r.constant_value("TPMA_SESSION_mode_BIT_OFFSET").unwrap(), 5);
        assert_eq!(r.constant_value("TPMA_SESSION_mode_BIT_LENGTH").unwrap(), 3);
    }

    #[test]
    fn command_handles_and_code() {
        let tables = vec![
            alg_table(),
            RawTable::new(
                "Definition of Base Types",
                &[&["uint32_t", "UINT32", ""], &["UINT32", "TPM_HANDLE", ""]],
            ),
            RawTable::new(
                "TPM2_Flush Command",
                &[
                    &["TPMI_ST_COMMAND_TAG", "tag", ""],
                    &["UINT32", "commandSize", ""],
                    &["TPM_CC", "commandCode", "TPM_CC_FlushContext"],
                    &["TPM_HANDLE", "@flushHandle", ""],
                    &["UINT16", "flags", ""],
                ],
            )
            .with_handles(1),
            RawTable::new(
                "TPM2_Flush Response",
                &[&["TPM_ST", "tag", ""], &["UINT32", "responseSize", ""], &["TPM_RC", "responseCode", ""]],
            ),
        ];
        let (r, report) = extract(&tables, &GeneratorConfig::default()).unwrap();
        assert!(report.skipped.is_empty());
        let req = r.lookup("TPM2_Flush_REQUEST").unwrap();
        let s = req.as_struct().unwrap();
        assert_eq!(s.num_handles, 1);
        assert_eq!(s.num_auth_handles, 1);
        assert!(s.fields[0].is_handle && !s.fields[1].is_handle);
        assert_eq!(
            s.role,
            StructRole::CommandRequest { command: "TPM2_Flush".into(), code: "TPM_CC_FlushContext".into() }
        );
        assert!(!r.lookup("TPM2_Flush_RESPONSE").unwrap().implement);
    }

    #[test]
    fn duplicate_constant_is_fatal_unless_reserved() {
        let dup = |comment: &'static str| {
            vec![RawTable::new(
                "Definition of (UINT32) TPM_RH Constants",
                &[&["TPM_RH_FIRST", "0x40000000", ""], &["TPM_RH_FIRST", "0x40000000", comment]],
            )]
        };
        assert!(extract(&dup("reserved"), &GeneratorConfig::default()).is_ok());
        assert!(matches!(
            extract(&dup("owner"), &GeneratorConfig::default()),
            Err(GenError::DuplicateConstant(_))
        ));
    }

    #[test]
    fn unmatched_row_names_the_table() {
        let tables = vec![RawTable::new("Definition of TPMS_X Structure", &[&["bad name!", "UINT8", ""]])];
        match extract(&tables, &GeneratorConfig::default()) {
            Err(GenError::UnmatchedRow { caption, row, .. }) => {
                assert_eq!(caption, "Definition of TPMS_X Structure");
                assert_eq!(row, 0);
            }
            other => panic!("expected unmatched row, got {:?}", other.map(|_| ())),
        }
    }
}
