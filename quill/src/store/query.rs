//! Collection queries evaluated against JSON documents.
//!
//! Both store backends fetch candidate documents and evaluate the same [`Query`] client-side, so
//! filter semantics are identical regardless of where the data lives.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoredDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A single `field <op> value` condition. A missing field compares equal to `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterCondition {
    pub fn matches(&self, document: &Value) -> bool {
        let actual = document.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            FilterOperator::Eq => values_equal(actual, &self.value),
            FilterOperator::Ne => !values_equal(actual, &self.value),
            FilterOperator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Conjunctive filter over one collection with optional ordering and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FilterCondition>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        self.filters.push(FilterCondition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOperator::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|condition| condition.matches(document))
    }

    /// Filters, orders and truncates a candidate set. Ties are broken by document id so results
    /// are deterministic.
    pub fn apply(&self, candidates: impl IntoIterator<Item = StoredDocument>) -> Vec<StoredDocument> {
        let mut matched: Vec<StoredDocument> = candidates
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            .collect();

        match &self.order_by {
            Some(order) => matched.sort_by(|left, right| {
                let lhs = left.data.get(&order.field).unwrap_or(&Value::Null);
                let rhs = right.data.get(&order.field).unwrap_or(&Value::Null);
                let ordering = compare_values(lhs, rhs).unwrap_or(Ordering::Equal);
                let ordering = match order.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
                ordering.then_with(|| left.id.cmp(&right.id))
            }),
            None => matched.sort_by(|left, right| left.id.cmp(&right.id)),
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Orders numbers numerically and strings lexicographically; mixed or non-scalar values are
/// incomparable. `null` sorts before everything else.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
