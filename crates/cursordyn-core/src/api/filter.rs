//! Caller-facing query filters.
//!
//! A [`WhereClause`] maps key attributes to conditions. On the wire a condition
//! is either a bare value (equality) or a single-key operator object:
//!
//! ```json
//! {"customer": "c-1", "order_id": {"begins_with": "2024-"}}
//! {"customer": "c-1", "order_id": {"between": ["a", "m"]}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::KeyValue;

use super::cursor::Cursor;

/// Sort direction of returned items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderBy {
    #[default]
    Asc,
    Desc,
}

/// Range operator on a sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCondition {
    BeginsWith(KeyValue),
    /// Inclusive on both ends.
    Between(KeyValue, KeyValue),
    Lt(KeyValue),
    Le(KeyValue),
    Gt(KeyValue),
    Ge(KeyValue),
}

/// The condition attached to one attribute of a [`WhereClause`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Op(SortCondition),
    /// Equality. Holds the raw value so non-scalars can be rejected with a
    /// proper validation error instead of a parse failure.
    Value(Value),
}

/// Attribute name to condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WhereClause(BTreeMap<String, Condition>);

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, attr: &str, condition: Condition) -> Self {
        self.0.insert(attr.to_string(), condition);
        self
    }

    pub fn eq(self, attr: &str, value: impl Into<Value>) -> Self {
        self.condition(attr, Condition::Value(value.into()))
    }

    pub fn begins_with(self, attr: &str, prefix: &str) -> Self {
        self.op(attr, SortCondition::BeginsWith(KeyValue::from(prefix)))
    }

    pub fn between(self, attr: &str, low: impl Into<KeyValue>, high: impl Into<KeyValue>) -> Self {
        self.op(attr, SortCondition::Between(low.into(), high.into()))
    }

    pub fn lt(self, attr: &str, value: impl Into<KeyValue>) -> Self {
        self.op(attr, SortCondition::Lt(value.into()))
    }

    pub fn le(self, attr: &str, value: impl Into<KeyValue>) -> Self {
        self.op(attr, SortCondition::Le(value.into()))
    }

    pub fn gt(self, attr: &str, value: impl Into<KeyValue>) -> Self {
        self.op(attr, SortCondition::Gt(value.into()))
    }

    pub fn ge(self, attr: &str, value: impl Into<KeyValue>) -> Self {
        self.op(attr, SortCondition::Ge(value.into()))
    }

    fn op(self, attr: &str, op: SortCondition) -> Self {
        self.condition(attr, Condition::Op(op))
    }

    pub fn get(&self, attr: &str) -> Option<&Condition> {
        self.0.get(attr)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// A cursor-paginated query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "where")]
    pub where_clause: WhereClause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<Cursor>,
    /// Opt in to reading a whole partition of an index that has a sort key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub whole_partition: bool,
}

impl Filter {
    pub fn new(where_clause: WhereClause) -> Self {
        Self {
            where_clause,
            ..Self::default()
        }
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Continue from a cursor returned by a previous call. `None` starts over.
    pub fn prev_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.prev_cursor = cursor;
        self
    }

    pub fn whole_partition(mut self) -> Self {
        self.whole_partition = true;
        self
    }
}
