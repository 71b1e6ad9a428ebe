use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hex color string handed to the UI as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `upper_bound: None` is the unbounded final entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdEntry {
    pub upper_bound: Option<f64>,
    pub color: Color,
}

impl ThresholdEntry {
    pub fn bounded(upper_bound: f64, color: &str) -> Self {
        Self {
            upper_bound: Some(upper_bound),
            color: Color::new(color),
        }
    }

    pub fn unbounded(color: &str) -> Self {
        Self {
            upper_bound: None,
            color: Color::new(color),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("threshold table is empty")]
    Empty,
    #[error("threshold bounds must be finite and strictly increasing (entry {index})")]
    NotIncreasing { index: usize },
    #[error("only the final threshold entry may be unbounded")]
    MisplacedUnbounded,
    #[error("final threshold entry must be unbounded")]
    MissingUnbounded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    entries: Vec<ThresholdEntry>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            entries: default_entries(),
        }
    }
}

pub fn default_entries() -> Vec<ThresholdEntry> {
    vec![
        ThresholdEntry::bounded(0.0, "#d3d3d3"),
        ThresholdEntry::bounded(500.0, "#27ae60"),
        ThresholdEntry::bounded(550.0, "#2ecc71"),
        ThresholdEntry::bounded(600.0, "#f1c40f"),
        ThresholdEntry::bounded(650.0, "#f39c12"),
        ThresholdEntry::bounded(700.0, "#e67e22"),
        ThresholdEntry::bounded(750.0, "#d35400"),
        ThresholdEntry::unbounded("#e74c3c"),
    ]
}

impl ThresholdTable {
    pub fn new(entries: Vec<ThresholdEntry>) -> Result<Self, ThresholdError> {
        let Some(last) = entries.last() else {
            return Err(ThresholdError::Empty);
        };
        if last.upper_bound.is_some() {
            return Err(ThresholdError::MissingUnbounded);
        }

        let mut previous: Option<f64> = None;
        for (index, entry) in entries[..entries.len() - 1].iter().enumerate() {
            let Some(bound) = entry.upper_bound else {
                return Err(ThresholdError::MisplacedUnbounded);
            };
            if !bound.is_finite() || previous.is_some_and(|prev| bound <= prev) {
                return Err(ThresholdError::NotIncreasing { index });
            }
            previous = Some(bound);
        }

        Ok(Self { entries })
    }

    /// Color of the first entry whose bound is at or above `value`. Values past
    /// every finite bound (and NaN) land on the final entry.
    pub fn color_for(&self, value: f64) -> &Color {
        for entry in &self.entries {
            match entry.upper_bound {
                Some(bound) if value <= bound => return &entry.color,
                Some(_) => continue,
                None => return &entry.color,
            }
        }
        // `new` guarantees a final entry
        &self.entries[self.entries.len() - 1].color
    }
}
