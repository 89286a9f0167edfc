//! Bulk-fetch query model
//!
//! Covers the subset of PostgREST the pages use. The same [`Query`] renders
//! to URL parameters for the HTTP source and evaluates against rows for the
//! in-memory source and for realtime filter checks.

use crate::models::timestamp;
use serde_json::Value;
use std::cmp::Ordering;

/// Column predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    Neq(String, String),
    Lt(String, String),
    Gte(String, String),
    In(String, Vec<String>),
    /// Case-insensitive match; `*` is the wildcard
    ILike(String, String),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::Lt(c, _)
            | Filter::Gte(c, _)
            | Filter::In(c, _)
            | Filter::ILike(c, _) => c,
        }
    }

    /// PostgREST operator expression (`eq.v`, `in.(a,b)`...)
    pub fn expression(&self) -> String {
        match self {
            Filter::Eq(_, v) => format!("eq.{}", v),
            Filter::Neq(_, v) => format!("neq.{}", v),
            Filter::Lt(_, v) => format!("lt.{}", v),
            Filter::Gte(_, v) => format!("gte.{}", v),
            Filter::In(_, vs) => format!("in.({})", vs.join(",")),
            Filter::ILike(_, p) => format!("ilike.{}", p),
        }
    }

    /// Evaluate against a row; a missing column compares as `null`
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, v) => cell_text(cell).as_deref() == Some(v.as_str()),
            Filter::Neq(_, v) => cell_text(cell).as_deref() != Some(v.as_str()),
            Filter::Lt(_, v) => compare(cell, v) == Some(Ordering::Less),
            Filter::Gte(_, v) => matches!(
                compare(cell, v),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Filter::In(_, vs) => cell_text(cell).is_some_and(|t| vs.iter().any(|v| *v == t)),
            Filter::ILike(_, p) => cell_text(cell).is_some_and(|t| ilike(&t, p)),
        }
    }
}

/// Text form of a cell as PostgREST would compare it; `None` for null
pub fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Order a cell against a literal: numerically, then as timestamps, then as text
fn compare(cell: &Value, literal: &str) -> Option<Ordering> {
    let text = cell_text(cell)?;
    if let (Ok(a), Ok(b)) = (text.parse::<f64>(), literal.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (timestamp::parse(&text), timestamp::parse(literal)) {
        return Some(a.cmp(&b));
    }
    Some(text.as_str().cmp(literal))
}

/// Compare two cells for sorting; nulls sort last
pub fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (cell_text(a), cell_text(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(_)) => compare(b, &x).map(Ordering::reverse).unwrap_or(Ordering::Equal),
    }
}

fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase().replace('%', "*");
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return text == pattern;
    }

    let mut rest = text.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Related row embedded through a foreign key (`alias:table(cols)`)
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl Embed {
    fn render(&self) -> String {
        format!("{}:{}({})", self.alias, self.table, self.columns.join(","))
    }
}

/// A bulk-fetch request against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            embeds: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Restrict the returned columns (default `*`)
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn embed(mut self, alias: &str, table: &str, columns: &[&str]) -> Self {
        self.embeds.push(Embed {
            alias: alias.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::Eq(column.to_string(), value.to_string()))
    }

    /// `eq` when a value is given, unchanged otherwise
    pub fn eq_opt<V: ToString>(self, column: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn neq(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::Neq(column.to_string(), value.to_string()))
    }

    pub fn lt(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::Lt(column.to_string(), value.to_string()))
    }

    pub fn gte(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::Gte(column.to_string(), value.to_string()))
    }

    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.filter(Filter::In(
            column.to_string(),
            values.into_iter().map(|v| v.to_string()).collect(),
        ))
    }

    /// Substring match, case-insensitive
    pub fn contains(self, column: &str, needle: &str) -> Self {
        self.filter(Filter::ILike(column.to_string(), format!("*{}*", needle)))
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Value of the `select` parameter
    pub fn select_clause(&self) -> String {
        let mut parts = match &self.columns {
            Some(cols) => cols.clone(),
            None => vec!["*".to_string()],
        };
        parts.extend(self.embeds.iter().map(Embed::render));
        parts.join(",")
    }

    /// Query-string parameters in PostgREST syntax
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select_clause())];
        params.extend(
            self.filters
                .iter()
                .map(|f| (f.column().to_string(), f.expression())),
        );
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Whether a row satisfies every filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Sort rows by the query's ordering
    pub fn sort(&self, rows: &mut [Value]) {
        if self.order.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for o in &self.order {
                let x = a.get(&o.column).unwrap_or(&Value::Null);
                let y = b.get(&o.column).unwrap_or(&Value::Null);
                let ord = compare_cells(x, y);
                let ord = if o.ascending || ord_has_null(x, y) {
                    ord
                } else {
                    ord.reverse()
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

fn ord_has_null(a: &Value, b: &Value) -> bool {
    a.is_null() || b.is_null()
}
