//! Algorithm classification and `!ALG` macro expansion.
//!
//! The algorithm-ID table lists every algorithm with a set of capability letters
//! (`H` hash, `S` symmetric block cipher, `A` asymmetric, `X` signing, `E` encryption mode, …).
//! A caption containing `!ALG.<letters>` is a template instantiated once per algorithm that
//! has all of those letters. Inside the instantiated table `!ALG` becomes the upper-case
//! mnemonic and `!alg` the lower-case one. A marker in a cell of an ordinary table expands only
//! that row.

use crate::raw::RawTable;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!(ALG|alg)(?:\.([A-Z]+))?").expect("valid marker regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmInfo {
    /// Name without the algorithm prefix, e.g. `SHA256`.
    pub mnemonic: String,
    pub value: String,
    pub classes: String,
}

impl AlgorithmInfo {
    pub fn has_classes(&self, wanted: &str) -> bool {
        wanted.chars().all(|c| self.classes.contains(c))
    }
}

/// Algorithms in algorithm-table order, with their capability letters.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmClassifier {
    algorithms: Vec<AlgorithmInfo>,
}

impl AlgorithmClassifier {
    pub fn register(&mut self, mnemonic: &str, value: &str, classes: &str) {
        let classes: String = classes.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        self.algorithms.push(AlgorithmInfo {
            mnemonic: mnemonic.to_string(),
            value: value.to_string(),
            classes,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn get(&self, mnemonic: &str) -> Option<&AlgorithmInfo> {
        self.algorithms.iter().find(|a| a.mnemonic == mnemonic)
    }

    /// Algorithms carrying every letter of `classes`; none when `classes` is empty.
    pub fn matching<'a>(&'a self, classes: &'a str) -> impl Iterator<Item = &'a AlgorithmInfo> + 'a {
        self.algorithms
            .iter()
            .filter(move |a| !classes.is_empty() && a.has_classes(classes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("algorithm macro '!ALG.{classes}' matches no classified algorithm")]
pub struct UnclassifiedAlgorithm {
    pub classes: String,
}

pub fn has_marker(text: &str) -> bool {
    MARKER.is_match(text)
}

fn marker_classes(text: &str) -> Option<String> {
    MARKER
        .captures_iter(text)
        .find_map(|c| c.get(2).map(|m| m.as_str().to_string()))
}

/// Replace every marker of `text` with the mnemonic of `alg`.
pub fn substitute(text: &str, alg: &AlgorithmInfo) -> String {
    MARKER
        .replace_all(text, |caps: &Captures| {
            if &caps[1] == "ALG" {
                alg.mnemonic.to_uppercase()
            } else {
                alg.mnemonic.to_lowercase()
            }
        })
        .into_owned()
}

fn substitute_row(row: &[String], alg: &AlgorithmInfo) -> Vec<String> {
    row.iter().map(|cell| substitute(cell, alg)).collect()
}

/// Expand the macros of one table.
///
/// Returns `Ok(None)` when the table holds no marker, the instantiated tables otherwise.
pub fn expand_table(
    table: &RawTable,
    classifier: &AlgorithmClassifier,
) -> Result<Option<Vec<RawTable>>, UnclassifiedAlgorithm> {
    if has_marker(&table.caption) {
        let classes = marker_classes(&table.caption).unwrap_or_default();
        let tables: Vec<RawTable> = classifier
            .matching(&classes)
            .map(|alg| RawTable {
                caption: substitute(&table.caption, alg),
                comment: substitute(&table.comment, alg),
                rows: table.rows.iter().map(|r| substitute_row(r, alg)).collect(),
                num_handles: table.num_handles,
            })
            .collect();
        if tables.is_empty() {
            return Err(UnclassifiedAlgorithm { classes });
        }
        return Ok(Some(tables));
    }

    if !table.rows.iter().flatten().any(|cell| has_marker(cell)) {
        return Ok(None);
    }

    let mut rows = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        if !row.iter().any(|cell| has_marker(cell)) {
            rows.push(row.clone());
            continue;
        }
        let classes = row
            .iter()
            .find_map(|cell| marker_classes(cell))
            .unwrap_or_default();
        let before = rows.len();
        rows.extend(classifier.matching(&classes).map(|alg| substitute_row(row, alg)));
        if rows.len() == before {
            return Err(UnclassifiedAlgorithm { classes });
        }
    }
    Ok(Some(vec![RawTable {
        caption: table.caption.clone(),
        comment: table.comment.clone(),
        rows,
        num_handles: table.num_handles,
    }]))
}
