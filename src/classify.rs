//! Two-tier table classification.
//!
//! Tier one looks only at a caption and decides what kind of table it is. Tier two looks
//! only at the cells of one row of a table of known kind. Both are pure: the extractor
//! turns their output into registry nodes.

use crate::error::{GenError, Result};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    AlgorithmConstants { base: String },
    Constants { name: String, base: Option<String> },
    Typedefs,
    Interface { name: String, base: String },
    Structure { name: String },
    Bitfield { name: String, base: String },
    Union { name: String },
    CommandRequest { command: String },
    CommandResponse { command: String },
}

impl TableKind {
    pub fn label(&self) -> &'static str {
        match self {
            TableKind::AlgorithmConstants { .. } => "algorithm",
            TableKind::Constants { .. } => "constants",
            TableKind::Typedefs => "typedef",
            TableKind::Interface { .. } => "interface",
            TableKind::Structure { .. } => "structure",
            TableKind::Bitfield { .. } => "bitfield",
            TableKind::Union { .. } => "union",
            TableKind::CommandRequest { .. } => "command",
            TableKind::CommandResponse { .. } => "response",
        }
    }
}

/// Parsed structure or command parameter row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub type_name: String,
    /// `@name`: the handle needs an authorization session.
    pub requires_auth: bool,
    /// `[selector]name`: union-typed field chosen by sibling `selector`.
    pub selector: Option<String>,
    pub nullable: bool,
    /// `name=`: byte size of the following structure.
    pub size_marker: bool,
    /// `name=CONST`: always this value on the wire.
    pub constant: Option<String>,
    /// `name[count]`; `Some("")` for an array whose length is implied.
    pub array: Option<String>,
    /// `{…}` text including the braces.
    pub domain: Option<String>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSpec {
    /// Empty or reserved row that contributes nothing.
    Skip,
    /// `#TPM_RC_X`: error code returned when unmarshaling an out-of-domain value.
    ErrorCode(String),
    Constant { name: String, value: String, comment: String },
    Algorithm { name: String, value: String, classes: String, comment: String },
    Typedef { base: String, name: String, comment: String },
    /// Allowed value or `{…}` domain of an interface type; `null` for `+VALUE` rows.
    Interface { text: String, null: bool },
    Field(FieldSpec),
    /// Command header row (`tag`, `commandCode`, …) consumed by the extractor.
    CommandHeader { name: String, comment: String },
    Bits { start: u32, end: u32, name: String, enum_type: Option<String>, comment: String },
    UnionMember {
        name: String,
        array_size: Option<String>,
        type_name: String,
        selector: String,
        comment: String,
    },
}

pub const COMMAND_HEADER_ROWS: &[&str] =
    &["tag", "commandSize", "commandCode", "responseSize", "responseCode"];

static TABLE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Table\s+[\w.-]+\s*(?:—|–|-|:)\s*").expect("valid regex"));
static ATTRIBUTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static DEPENDENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static ALG_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of \((\w+)\) TPM_ALG_ID Constants$").expect("valid regex"));
static CONSTANTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of (?:\((\w+)\) )?(\w+) Constants$").expect("valid regex"));
static TYPEDEFS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of (?:Types for .+|Base Types)$").expect("valid regex"));
static INTERFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of \((\w+)\) (\w+) Type$").expect("valid regex"));
static STRUCTURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of (\w+) Structure$").expect("valid regex"));
static BITFIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of \((\w+)\) (\w+) Bits$").expect("valid regex"));
static UNION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Definition of (\w+) Union$").expect("valid regex"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(TPM2_\w+) (Command|Response)$").expect("valid regex"));

static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));
static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<auth>@)?\s*(?:\[(?P<sel>\w+)\])?\s*(?P<name>[A-Za-z_]\w*)\s*(?P<plus>\+)?\s*(?:(?P<eq>=)\s*(?P<const>\w+)?)?\s*(?:\[(?P<count>[^\]]*)\])?\s*(?P<domain>\{[^}]*\})?$",
    )
    .expect("valid regex")
});
static FIELD_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+)?\s*([A-Za-z_]\w*)\s*(\+)?$").expect("valid regex"));
static BITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\s*:\s*(\d+))?$").expect("valid regex"));
static BIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)(?:\s*:\s*([A-Za-z_]\w*))?$").expect("valid regex"));
static UNION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*(?:\[([^\]]+)\])?$").expect("valid regex"));

/// Reduce a caption to `Definition of …` form: table label, `<…>` attributes and `{…}`
/// dependency markers removed, whitespace collapsed.
pub fn clean_caption(caption: &str) -> String {
    let s = TABLE_LABEL.replace(caption, "");
    let s = ATTRIBUTES.replace_all(&s, "");
    let s = DEPENDENCY.replace_all(&s, "");
    SPACES.replace_all(s.trim(), " ").into_owned()
}

/// Tier one: decide the kind of a table from its caption alone.
pub fn classify_table(caption: &str) -> Option<TableKind> {
    let c = clean_caption(caption);
    if let Some(m) = ALG_TABLE.captures(&c) {
        return Some(TableKind::AlgorithmConstants { base: m[1].to_string() });
    }
    if let Some(m) = CONSTANTS.captures(&c) {
        return Some(TableKind::Constants {
            name: m[2].to_string(),
            base: m.get(1).map(|b| b.as_str().to_string()),
        });
    }
    if TYPEDEFS.is_match(&c) {
        return Some(TableKind::Typedefs);
    }
    if let Some(m) = INTERFACE.captures(&c) {
        return Some(TableKind::Interface { base: m[1].to_string(), name: m[2].to_string() });
    }
    if let Some(m) = STRUCTURE.captures(&c) {
        return Some(TableKind::Structure { name: m[1].to_string() });
    }
    if let Some(m) = BITFIELD.captures(&c) {
        return Some(TableKind::Bitfield { base: m[1].to_string(), name: m[2].to_string() });
    }
    if let Some(m) = UNION.captures(&c) {
        return Some(TableKind::Union { name: m[1].to_string() });
    }
    if let Some(m) = COMMAND.captures(&c) {
        let command = m[1].to_string();
        return Some(if &m[2] == "Command" {
            TableKind::CommandRequest { command }
        } else {
            TableKind::CommandResponse { command }
        });
    }
    None
}

fn cell(cells: &[String], i: usize) -> &str {
    cells.get(i).map_or("", |c| c.trim())
}

fn rest(cells: &[String], from: usize) -> String {
    cells
        .iter()
        .skip(from)
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn mismatch(kind: &TableKind, cells: &[String]) -> GenError {
    GenError::UnmatchedRow {
        caption: String::new(),
        kind: kind.label(),
        row: 0,
        cells: cells.to_vec(),
    }
}

/// Tier two: interpret one row of a table of known kind.
///
/// A mismatch is reported as [`GenError::UnmatchedRow`] without caption or row number;
/// the caller fills those in.
pub fn parse_row(kind: &TableKind, cells: &[String]) -> Result<RowSpec> {
    if cells.iter().all(|c| c.trim().is_empty()) {
        return Ok(RowSpec::Skip);
    }
    if let Some(code) = cell(cells, 0).strip_prefix('#') {
        let code = code.trim();
        if IDENT.is_match(code) {
            return Ok(RowSpec::ErrorCode(code.to_string()));
        }
        return Err(mismatch(kind, cells));
    }

    let parsed = match kind {
        TableKind::AlgorithmConstants { .. } => {
            let (name, value) = (cell(cells, 0), cell(cells, 1));
            (IDENT.is_match(name) && !value.is_empty()).then(|| RowSpec::Algorithm {
                name: name.to_string(),
                value: value.to_string(),
                classes: cell(cells, 2).chars().filter(|c| !c.is_whitespace()).collect(),
                comment: cell(cells, 4).to_string(),
            })
        }
        TableKind::Constants { .. } => {
            let (name, value) = (cell(cells, 0), cell(cells, 1));
            (IDENT.is_match(name) && !value.is_empty()).then(|| RowSpec::Constant {
                name: name.to_string(),
                value: value.to_string(),
                comment: rest(cells, 2),
            })
        }
        TableKind::Typedefs => {
            let (base, name) = (cell(cells, 0), cell(cells, 1));
            (IDENT.is_match(base) && IDENT.is_match(name)).then(|| RowSpec::Typedef {
                base: base.to_string(),
                name: name.to_string(),
                comment: rest(cells, 2),
            })
        }
        TableKind::Interface { .. } => {
            let text = cell(cells, 0);
            match text.strip_prefix('+') {
                Some(null) if IDENT.is_match(null.trim()) => Some(RowSpec::Interface {
                    text: null.trim().to_string(),
                    null: true,
                }),
                Some(_) => None,
                None => Some(RowSpec::Interface { text: text.to_string(), null: false }),
            }
        }
        TableKind::Structure { .. } => {
            parse_field(cell(cells, 0), cell(cells, 1), rest(cells, 2)).map(RowSpec::Field)
        }
        TableKind::CommandRequest { .. } | TableKind::CommandResponse { .. } => {
            let (ty, name) = (cell(cells, 0), cell(cells, 1));
            if COMMAND_HEADER_ROWS.contains(&name) {
                Some(RowSpec::CommandHeader { name: name.to_string(), comment: rest(cells, 2) })
            } else {
                parse_field(name, ty, rest(cells, 2)).map(RowSpec::Field)
            }
        }
        TableKind::Bitfield { .. } => parse_bits(cells),
        TableKind::Union { .. } => {
            let name = UNION_NAME.captures(cell(cells, 0));
            let (ty, selector) = (cell(cells, 1), cell(cells, 2));
            match name {
                Some(m) if (ty.is_empty() || IDENT.is_match(ty)) && IDENT.is_match(selector) => {
                    Some(RowSpec::UnionMember {
                        name: m[1].to_string(),
                        array_size: m.get(2).map(|s| s.as_str().trim().to_string()),
                        type_name: ty.to_string(),
                        selector: selector.to_string(),
                        comment: rest(cells, 3),
                    })
                }
                _ => None,
            }
        }
    };
    parsed.ok_or_else(|| mismatch(kind, cells))
}

fn parse_bits(cells: &[String]) -> Option<RowSpec> {
    let name = cell(cells, 1);
    if name.to_ascii_lowercase().starts_with("reserved") {
        return Some(RowSpec::Skip);
    }
    let bits = BITS.captures(cell(cells, 0))?;
    let first: u32 = bits[1].parse().ok()?;
    let (start, end) = match bits.get(2) {
        Some(lo) => {
            let lo: u32 = lo.as_str().parse().ok()?;
            (lo.min(first), lo.max(first))
        }
        None => (first, first),
    };
    if end > 63 {
        return None;
    }
    let m = BIT_NAME.captures(name)?;
    Some(RowSpec::Bits {
        start,
        end,
        name: m[1].to_string(),
        enum_type: m.get(2).map(|e| e.as_str().to_string()),
        comment: rest(cells, 2),
    })
}

fn parse_field(name_cell: &str, type_cell: &str, comment: String) -> Option<FieldSpec> {
    let n = FIELD_NAME.captures(name_cell)?;
    let t = FIELD_TYPE.captures(type_cell)?;
    let constant = n.name("const").map(|c| c.as_str().to_string());
    Some(FieldSpec {
        name: n["name"].to_string(),
        type_name: t[2].to_string(),
        requires_auth: n.name("auth").is_some(),
        selector: n.name("sel").map(|s| s.as_str().to_string()),
        nullable: n.name("plus").is_some() || t.get(1).is_some() || t.get(3).is_some(),
        size_marker: n.name("eq").is_some() && constant.is_none(),
        constant,
        array: n.name("count").map(|c| c.as_str().trim().to_string()),
        domain: n.name("domain").map(|d| d.as_str().to_string()),
        comment,
    })
}
