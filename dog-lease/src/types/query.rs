//! Structured, parameterized queries over one partition.
//!
//! Values never appear inside the query text: filters reference named
//! parameters (`@name`) that are bound separately, so a store that speaks
//! SQL receives [`DocumentQuery::to_sql`] plus [`DocumentQuery::parameters`],
//! and the in-memory store evaluates the same structure directly.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde_json::Value;

use crate::{QueueError, QueueResult};

pub const OFFSET_PARAM: &str = "@offset";
pub const LIMIT_PARAM: &str = "@limit";

/// Document predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every inner filter matches
    All(Vec<Filter>),

    /// At least one inner filter matches
    Any(Vec<Filter>),

    /// `doc.field = @param`
    Eq { field: String, param: String },

    /// `doc.field < @param`
    Lt { field: String, param: String },

    /// Field is absent or `null`
    IsUnset(String),

    /// Field is present and not `null`
    IsSet(String),
}

impl Filter {
    pub fn eq(field: &str, param: &str) -> Self {
        Self::Eq { field: field.to_string(), param: param.to_string() }
    }

    pub fn lt(field: &str, param: &str) -> Self {
        Self::Lt { field: field.to_string(), param: param.to_string() }
    }

    pub fn is_unset(field: &str) -> Self {
        Self::IsUnset(field.to_string())
    }

    pub fn is_set(field: &str) -> Self {
        Self::IsSet(field.to_string())
    }

    fn matches(&self, doc: &Value, query: &DocumentQuery) -> QueueResult<bool> {
        Ok(match self {
            Self::All(filters) => {
                for filter in filters {
                    if !filter.matches(doc, query)? {
                        return Ok(false);
                    }
                }
                true
            }
            Self::Any(filters) => {
                for filter in filters {
                    if filter.matches(doc, query)? {
                        return Ok(true);
                    }
                }
                false
            }
            Self::Eq { field, param } => {
                let expected = query.parameter(param)?;
                doc.get(field) == Some(expected)
            }
            Self::Lt { field, param } => {
                let bound = query.parameter(param)?;
                match doc.get(field) {
                    Some(value) if !value.is_null() => compare(value, bound) == Some(Ordering::Less),
                    _ => false,
                }
            }
            Self::IsUnset(field) => doc.get(field).map_or(true, Value::is_null),
            Self::IsSet(field) => doc.get(field).map_or(false, |v| !v.is_null()),
        })
    }

    fn render(&self) -> String {
        match self {
            Self::All(filters) => join(filters, " AND "),
            Self::Any(filters) => format!("({})", join(filters, " OR ")),
            Self::Eq { field, param } => format!("doc.{} = {}", field, param),
            Self::Lt { field, param } => format!("doc.{} < {}", field, param),
            Self::IsUnset(field) => format!("(NOT IS_DEFINED(doc.{0}) OR IS_NULL(doc.{0}))", field),
            Self::IsSet(field) => format!("(IS_DEFINED(doc.{0}) AND NOT IS_NULL(doc.{0}))", field),
        }
    }
}

fn join(filters: &[Filter], separator: &str) -> String {
    filters.iter().map(Filter::render).collect::<Vec<_>>().join(separator)
}

/// What a query returns per matching document
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// The whole document
    Document,

    /// One field value per document
    Value(String),

    /// Distinct values of one field
    DistinctValue(String),

    /// A single number: the count of matching documents
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    projection: Projection,
    filter: Option<Filter>,
    order_by: Option<String>,
    paged: bool,
    parameters: Vec<(String, Value)>,
}

impl DocumentQuery {
    pub fn select(projection: Projection) -> Self {
        Self {
            projection,
            filter: None,
            order_by: None,
            paged: false,
            parameters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Ascending order on a field
    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    /// Offset/limit pagination, bound as `@offset` / `@limit`
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.paged = true;
        self.with_parameter(OFFSET_PARAM, offset)
            .with_parameter(LIMIT_PARAM, limit)
    }

    /// Bind a named parameter; rebinding replaces the previous value
    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((name.to_string(), value)),
        }
        self
    }

    pub fn parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn parameter(&self, name: &str) -> QueueResult<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| QueueError::invalid(format!("unbound query parameter {}", name)))
    }

    fn usize_parameter(&self, name: &str) -> QueueResult<usize> {
        self.parameter(name)?
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| QueueError::invalid(format!("{} must be a non-negative integer", name)))
    }

    /// Cosmos-style SQL text with parameter placeholders
    pub fn to_sql(&self) -> String {
        let mut sql = match &self.projection {
            Projection::Document => "SELECT * FROM doc".to_string(),
            Projection::Value(field) => format!("SELECT VALUE doc.{} FROM doc", field),
            Projection::DistinctValue(field) => format!("SELECT DISTINCT VALUE doc.{} FROM doc", field),
            Projection::Count => "SELECT VALUE COUNT(1) FROM doc".to_string(),
        };
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.render());
        }
        if let Some(field) = &self.order_by {
            sql.push_str(&format!(" ORDER BY doc.{}", field));
        }
        if self.paged {
            sql.push_str(&format!(" OFFSET {} LIMIT {}", OFFSET_PARAM, LIMIT_PARAM));
        }
        sql
    }

    /// Run the query against a set of documents
    pub fn evaluate<'a, I>(&self, documents: I) -> QueueResult<Vec<Value>>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut matched = Vec::new();
        for doc in documents {
            let keep = match &self.filter {
                Some(filter) => filter.matches(doc, self)?,
                None => true,
            };
            if keep {
                matched.push(doc);
            }
        }

        if let Some(field) = &self.order_by {
            matched.sort_by(|a, b| compare_field(a.get(field), b.get(field)));
        }

        if self.paged {
            let offset = self.usize_parameter(OFFSET_PARAM)?;
            let limit = self.usize_parameter(LIMIT_PARAM)?;
            matched = matched.into_iter().skip(offset).take(limit).collect();
        }

        Ok(match &self.projection {
            Projection::Document => matched.into_iter().cloned().collect(),
            Projection::Value(field) => matched
                .into_iter()
                .map(|doc| doc.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
            Projection::DistinctValue(field) => {
                let mut seen = HashSet::new();
                matched
                    .into_iter()
                    .filter_map(|doc| doc.get(field))
                    .filter(|value| seen.insert(value.to_string()))
                    .cloned()
                    .collect()
            }
            Projection::Count => vec![Value::from(matched.len())],
        })
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// Absent and null sort first
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
    }
}
