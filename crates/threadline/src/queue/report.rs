//! Read-only projections over the task pool buckets

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TaskPoolError;

/// A bucket, or a union of buckets, that can be reported on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    /// Waiting for a slot
    Queued,
    /// Holding a slot
    Active,
    /// Finished
    Completed,
    /// Queued and active
    Remaining,
    /// Active and completed
    Started,
    /// Every bucket
    Total,
}

impl StatusField {
    /// All fields in reporting order
    pub const ALL: [StatusField; 6] = [
        StatusField::Queued,
        StatusField::Active,
        StatusField::Completed,
        StatusField::Remaining,
        StatusField::Started,
        StatusField::Total,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Remaining => "remaining",
            Self::Started => "started",
            Self::Total => "total",
        }
    }
}

impl FromStr for StatusField {
    type Err = TaskPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| TaskPoolError::InvalidField(s.to_string()))
    }
}

impl std::fmt::Display for StatusField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which fields a status query asks for
#[derive(Debug, Clone, Copy)]
pub enum FieldSelector<'a> {
    /// Every field (`"*"`)
    All,
    /// A single field by name
    One(&'a str),
    /// Several fields by name
    Many(&'a [&'a str]),
}

impl<'a> From<&'a str> for FieldSelector<'a> {
    fn from(name: &'a str) -> Self {
        if name == "*" {
            Self::All
        } else {
            Self::One(name)
        }
    }
}

impl<'a> From<&'a [&'a str]> for FieldSelector<'a> {
    fn from(names: &'a [&'a str]) -> Self {
        Self::Many(names)
    }
}

impl<'a, const N: usize> From<&'a [&'a str; N]> for FieldSelector<'a> {
    fn from(names: &'a [&'a str; N]) -> Self {
        Self::Many(names.as_slice())
    }
}

impl FieldSelector<'_> {
    pub(crate) fn resolve(&self) -> Result<Vec<StatusField>, TaskPoolError> {
        match self {
            Self::All => Ok(StatusField::ALL.to_vec()),
            Self::One(name) => Ok(vec![name.parse()?]),
            Self::Many(names) => names.iter().map(|name| name.parse()).collect(),
        }
    }
}

/// How each field is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFormat {
    /// The items themselves
    Raw,
    /// Number of items
    Count,
    /// Share of the total, rounded to the given number of decimal places
    Percent(u32),
}

/// One rendered field
#[derive(Debug, Clone, PartialEq)]
pub enum StatusValue<T> {
    Items(Vec<T>),
    Count(usize),
    Percent(f64),
}

/// Result of a status query, in the order the fields were requested
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport<T> {
    entries: Vec<(StatusField, StatusValue<T>)>,
}

impl<T> StatusReport<T> {
    pub(crate) fn new(entries: Vec<(StatusField, StatusValue<T>)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, field: StatusField) -> Option<&StatusValue<T>> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, value)| value)
    }

    pub fn items(&self, field: StatusField) -> Option<&[T]> {
        match self.get(field)? {
            StatusValue::Items(items) => Some(items),
            _ => None,
        }
    }

    pub fn count(&self, field: StatusField) -> Option<usize> {
        match self.get(field)? {
            StatusValue::Count(n) => Some(*n),
            StatusValue::Items(items) => Some(items.len()),
            StatusValue::Percent(_) => None,
        }
    }

    pub fn percent(&self, field: StatusField) -> Option<f64> {
        match self.get(field)? {
            StatusValue::Percent(p) => Some(*p),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = StatusField> + '_ {
        self.entries.iter().map(|(field, _)| *field)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(StatusField, StatusValue<T>)> {
        self.entries
    }
}

/// Share of `total` as a percentage rounded half away from zero.
///
/// An empty pool reports 0 rather than dividing by zero.
pub(crate) fn percentage(count: usize, total: usize, places: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = count as f64 / total as f64 * 100.0;
    let scale = 10f64.powi(places as i32);
    (raw * scale).round() / scale
}
