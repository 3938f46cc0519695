//! Generator configuration: the knobs that encode protocol quirks rather than table content.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which duplicate constants are dropped instead of failing the run.
///
/// Some handle-range tables list a placeholder entry under a name another row already uses.
/// A duplicate is dropped when its owning enum is listed here and its comment contains the
/// marker (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservedRule {
    pub enums: Vec<String>,
    pub marker: String,
}

impl Default for ReservedRule {
    fn default() -> Self {
        ReservedRule {
            enums: vec!["TPM_RH".to_string()],
            marker: "RESERVED".to_string(),
        }
    }
}

impl ReservedRule {
    pub fn allows_drop(&self, owner: &str, comment: &str) -> bool {
        self.enums.iter().any(|e| e == owner)
            && comment.to_uppercase().contains(&self.marker.to_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub structure: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub reserved_rule: ReservedRule,
    /// Selector constant marking a union's null member.
    pub null_selector: String,
    pub alg_prefix: String,
    /// Wrapper structures that keep their own identity instead of being flattened into users.
    pub flatten_exemptions: Vec<String>,
    /// Fields whose length is implied by the enclosing sized region.
    pub implicit_length_fields: Vec<FieldRef>,
    /// Structures whose tail is absent when their algorithm selector is the null selector.
    pub null_algorithm_structs: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            reserved_rule: ReservedRule::default(),
            null_selector: "TPM_ALG_NULL".to_string(),
            alg_prefix: "TPM_ALG_".to_string(),
            flatten_exemptions: vec!["TPMT_HA".to_string()],
            implicit_length_fields: vec![FieldRef {
                structure: "TPMS_ID_OBJECT".to_string(),
                field: "encIdentity".to_string(),
            }],
            null_algorithm_structs: vec!["TPMT_SYM_DEF".to_string(), "TPMT_SYM_DEF_OBJECT".to_string()],
        }
    }
}

impl GeneratorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_implicit_length(&self, structure: &str, field: &str) -> bool {
        self.implicit_length_fields
            .iter()
            .any(|f| f.structure == structure && f.field == field)
    }
}
