use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;

/// A trusted SQL `WHERE` fragment selecting product rows.
///
/// Fragments are interpolated into queries as-is, so only the typed builders
/// below should see untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate(String);

impl Predicate {
    /// Operator-supplied fragment, used verbatim
    pub fn raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Products created on the given day
    pub fn created_on(date: NaiveDate) -> Self {
        Self(format!("created_at LIKE '{}%'", date.format("%Y-%m-%d")))
    }

    /// Products created inside `[start, end]`
    pub fn created_between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        const FMT: &str = "%Y-%m-%d %H:%M:%S";
        Self(format!("created_at BETWEEN '{}' AND '{}'", start.format(FMT), end.format(FMT)))
    }

    pub fn ids(ids: &[i64]) -> Self {
        if ids.is_empty() {
            return Self::default();
        }
        Self(format!("id IN ({})", ids.iter().join(",")))
    }

    /// Products whose similar ids have not been computed yet
    pub fn pending() -> Self {
        Self("similar_ids LIKE '[]'".to_owned())
    }

    /// Both `'` and `\` are escaped, MySQL treats the backslash as an escape
    pub fn with_status(self, status: &str) -> Self {
        let status = status.replace('\\', "\\\\").replace('\'', "''");
        Self(format!("({}) AND status = '{status}'", self.0))
    }

    pub fn as_sql(&self) -> &str {
        &self.0
    }
}

impl Default for Predicate {
    /// Selects nothing
    fn default() -> Self {
        Self("1 != 1".to_owned())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a comma separated id list such as the `PRODUCT_IDS` variable.
///
/// Entries that are not plain digits are ignored.
pub fn parse_product_ids(s: &str) -> Vec<i64> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|s| s.parse().ok())
        .collect()
}
