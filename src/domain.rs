//! Legal-value sets attached to fields and interface types.

use crate::error::Result;
use crate::parser::{parse_domain, DomainItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    SingleValue(String),
    BoundedRange { min: Option<String>, max: Option<String> },
}

/// Ordered list of constraints. Values are kept as expression text and evaluated on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domain {
    constraints: Vec<Constraint>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the constraints written in one cell: a single token, a `{a, b, c}` list, or
    /// colon-separated ranges. Empty text adds nothing.
    pub fn add_constraints(&mut self, cell: &str) -> Result<()> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(());
        }
        for item in parse_domain(cell)? {
            self.constraints.push(match item {
                DomainItem::Value(v) => Constraint::SingleValue(v),
                DomainItem::Range { min, max } => Constraint::BoundedRange { min, max },
            });
        }
        Ok(())
    }

    pub fn add_single(&mut self, value: impl Into<String>) {
        self.constraints.push(Constraint::SingleValue(value.into()));
    }

    pub fn add_range(&mut self, min: Option<String>, max: Option<String>) {
        self.constraints.push(Constraint::BoundedRange { min, max });
    }

    /// Append every constraint of `other` (used when two table rows described one value set).
    pub fn merge_from(&mut self, other: &Domain) {
        self.constraints.extend(other.constraints.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn get(&self, index: usize) -> Option<&Constraint> {
        self.constraints.get(index)
    }

    pub fn single(&self, index: usize) -> Option<&str> {
        match self.constraints.get(index) {
            Some(Constraint::SingleValue(v)) => Some(v),
            _ => None,
        }
    }

    pub fn min(&self, index: usize) -> Option<&str> {
        match self.constraints.get(index) {
            Some(Constraint::BoundedRange { min, .. }) => min.as_deref(),
            _ => None,
        }
    }

    pub fn max(&self, index: usize) -> Option<&str> {
        match self.constraints.get(index) {
            Some(Constraint::BoundedRange { max, .. }) => max.as_deref(),
            _ => None,
        }
    }

    /// Overwrite the single value at `index`; returns false if it is not a single value.
    pub fn set_single(&mut self, index: usize, value: impl Into<String>) -> bool {
        match self.constraints.get_mut(index) {
            Some(Constraint::SingleValue(v)) => {
                *v = value.into();
                true
            }
            _ => false,
        }
    }

    /// Overwrite the minimum of the range at `index`; returns false if it is not a range.
    pub fn set_min(&mut self, index: usize, value: Option<String>) -> bool {
        match self.constraints.get_mut(index) {
            Some(Constraint::BoundedRange { min, .. }) => {
                *min = value;
                true
            }
            _ => false,
        }
    }

    /// Overwrite the maximum of the range at `index`; returns false if it is not a range.
    pub fn set_max(&mut self, index: usize, value: Option<String>) -> bool {
        match self.constraints.get_mut(index) {
            Some(Constraint::BoundedRange { max, .. }) => {
                *max = value;
                true
            }
            _ => false,
        }
    }

    /// Upper bound of the first range with a maximum, if any.
    pub fn max_bound(&self) -> Option<&str> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::BoundedRange { max: Some(m), .. } => Some(m.as_str()),
            _ => None,
        })
    }

    /// The value when the domain is exactly one single value.
    pub fn only_value(&self) -> Option<&str> {
        match self.constraints.as_slice() {
            [Constraint::SingleValue(v)] => Some(v),
            _ => None,
        }
    }
}
