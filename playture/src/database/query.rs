//! Building blocks for dynamic queries.
//!
//! Column names are never taken from caller strings. Every name that ends up
//! interpolated into SQL text comes from a [`Column`] enum resolved to a
//! `&'static str`; values are always bound.

use std::fmt::Display;

use sqlx::query::QueryAs;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::{Error, Result};

/// A closed set of columns that may appear in query text.
pub trait Column: Copy + Send + Sync + Display + 'static {
    /// The column name as it appears in the schema.
    fn column(&self) -> &'static str;

    /// Every member of the allow-list.
    fn all() -> &'static [Self];

    /// Resolve an externally supplied name against the allow-list.
    fn from_name(name: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.column() == name)
            .ok_or_else(|| Error::validation(format!("unknown column '{}'", name)))
    }
}

/// A value to compare a column against in `find_by_field`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for FieldValue {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(v) => f.write_str(v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl FieldValue {
    pub(crate) fn bind_to<'q, O>(
        &'q self,
        query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
        match self {
            Self::Text(v) => query.bind(v.as_str()),
            Self::Integer(v) => query.bind(*v),
            Self::Real(v) => query.bind(*v),
            Self::Bool(v) => query.bind(*v),
        }
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub page: u32,
}

impl Pagination {
    pub fn new(limit: u32, page: u32) -> Self {
        Self { limit, page }
    }

    /// The first page of `limit` rows.
    pub fn first(limit: u32) -> Self {
        Self { limit, page: 1 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::validation("page size must be at least 1"));
        }
        if self.page == 0 {
            return Err(Error::validation("page numbers start at 1"));
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.limit as i64
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first(50)
    }
}

/// `ORDER BY` fragment for an allow-listed column.
pub(crate) fn order_clause<C: Column>(order_by: C, ascending: bool) -> String {
    let direction = if ascending { "ASC" } else { "DESC" };
    // `id` breaks ties so paging is stable when the sort column repeats
    if order_by.column() == "id" {
        format!("ORDER BY id {}", direction)
    } else {
        format!("ORDER BY {} {}, id {}", order_by.column(), direction, direction)
    }
}

/// `?, ?, ?` for an `IN (...)` list of `n` bound values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `WHERE a AND b` or an empty string.
pub(crate) fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

pub(crate) fn bind_page<'q, O>(
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    pagination: &Pagination,
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    query.bind(pagination.limit as i64).bind(pagination.offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Col {
        Id,
        CreatedAt,
    }

    impl Display for Col {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.column())
        }
    }

    impl Column for Col {
        fn column(&self) -> &'static str {
            match self {
                Self::Id => "id",
                Self::CreatedAt => "created_at",
            }
        }

        fn all() -> &'static [Self] {
            &[Self::Id, Self::CreatedAt]
        }
    }

    #[test]
    fn test_from_name_rejects_unknown() {
        assert_eq!(Col::from_name("created_at").unwrap(), Col::CreatedAt);
        let err = Col::from_name("id; DROP TABLE jobs").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(order_clause(Col::Id, true), "ORDER BY id ASC");
        assert_eq!(
            order_clause(Col::CreatedAt, false),
            "ORDER BY created_at DESC, id DESC"
        );
    }

    #[test]
    fn test_pagination() {
        assert_eq!(Pagination::new(10, 1).offset(), 0);
        assert_eq!(Pagination::new(10, 3).offset(), 20);
        assert!(Pagination::new(0, 1).validate().is_err());
        assert!(Pagination::new(10, 0).validate().is_err());
        assert!(Pagination::first(5).validate().is_ok());
    }

    #[test]
    fn test_clause_helpers() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(where_clause(&[]), "");
        assert_eq!(
            where_clause(&["a = ?".to_string(), "b = ?".to_string()]),
            "WHERE a = ? AND b = ?"
        );
    }
}
