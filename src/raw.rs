//! Raw tables as produced by the document extraction step.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One table lifted out of a specification document, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    #[serde(rename = "captionText")]
    pub caption: String,
    #[serde(rename = "commentText", default)]
    pub comment: String,
    /// Body rows, header row already removed.
    pub rows: Vec<Vec<String>>,
    /// Number of leading command parameters that are handles.
    #[serde(rename = "numHandles", default)]
    pub num_handles: usize,
}

impl RawTable {
    pub fn new(caption: &str, rows: &[&[&str]]) -> Self {
        RawTable {
            caption: caption.to_string(),
            comment: String::new(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            num_handles: 0,
        }
    }

    pub fn with_handles(mut self, num_handles: usize) -> Self {
        self.num_handles = num_handles;
        self
    }
}

/// Load tables from a JSON file, or from every `*.json` file of a directory in name order.
pub fn load_tables(path: &Path) -> Result<Vec<RawTable>> {
    if !path.is_dir() {
        let text = fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&text)?);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let p = entry?.path();
        if p.extension().is_some_and(|e| e == "json") {
            files.push(p);
        }
    }
    files.sort();
    let mut tables = Vec::new();
    for file in files {
        let text = fs::read_to_string(&file)?;
        let mut doc: Vec<RawTable> = serde_json::from_str(&text)?;
        tables.append(&mut doc);
    }
    Ok(tables)
}

pub fn save_tables(path: &Path, tables: &[RawTable]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(tables)?)?;
    Ok(())
}
