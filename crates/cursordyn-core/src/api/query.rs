//! Translation of a [`Filter`] into a store-native key-condition query.

use std::collections::BTreeMap;

use crate::config::IndexKeys;
use crate::error::ValidationError;
use crate::types::KeyValue;

use super::filter::{Condition, Filter, OrderBy, SortCondition};

const PK_NAME: &str = "#pk";
const SK_NAME: &str = "#sk";
const PK_VALUE: &str = ":pk";
const SK_VALUE: &str = ":sk";
const SK_LOW: &str = ":sk_lo";
const SK_HIGH: &str = ":sk_hi";

/// A validated key-condition query against one index.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyConditionQuery {
    pub index_name: String,
    pub key_condition_expression: String,
    /// Placeholder (`#pk`) to attribute name.
    pub attribute_names: BTreeMap<String, String>,
    /// Placeholder (`:pk`) to value.
    pub attribute_values: BTreeMap<String, KeyValue>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
}

/// Validate `filter` against the key layout of `index_name` and build the
/// key-condition expression.
pub fn build_key_condition(
    filter: &Filter,
    index_name: &str,
    keys: &IndexKeys,
) -> Result<KeyConditionQuery, ValidationError> {
    let clause = &filter.where_clause;

    for attr in clause.attributes() {
        if attr == keys.partition_key || keys.sort_key.as_deref() == Some(attr) {
            continue;
        }
        return Err(match keys.sort_key {
            None => ValidationError::SortKeyNotSupported {
                index: index_name.to_string(),
                attribute: attr.to_string(),
            },
            Some(_) => ValidationError::UnknownKeyAttribute(attr.to_string()),
        });
    }

    let pk = &keys.partition_key;
    let pk_value = match clause.get(pk) {
        None => return Err(ValidationError::PartitionKeyRequired(pk.clone())),
        Some(Condition::Op(_)) => return Err(ValidationError::PartitionKeyNotScalar(pk.clone())),
        Some(Condition::Value(val)) => KeyValue::from_json(val)
            .ok_or_else(|| ValidationError::PartitionKeyNotScalar(pk.clone()))?,
    };

    let mut query = KeyConditionQuery {
        index_name: index_name.to_string(),
        key_condition_expression: format!("{PK_NAME} = {PK_VALUE}"),
        attribute_names: BTreeMap::from([(PK_NAME.to_string(), pk.clone())]),
        attribute_values: BTreeMap::from([(PK_VALUE.to_string(), pk_value)]),
        limit: filter.limit,
        scan_forward: filter.order_by.unwrap_or_default() == OrderBy::Asc,
    };

    let Some(sk) = &keys.sort_key else {
        return Ok(query);
    };
    let Some(condition) = clause.get(sk) else {
        if filter.whole_partition {
            return Ok(query);
        }
        return Err(ValidationError::SortKeyConditionRequired(
            index_name.to_string(),
        ));
    };

    let sk_condition = match condition {
        Condition::Value(val) => {
            let val =
                KeyValue::from_json(val).ok_or_else(|| ValidationError::SortKeyNotScalar(sk.clone()))?;
            query.attribute_values.insert(SK_VALUE.to_string(), val);
            format!("{SK_NAME} = {SK_VALUE}")
        }
        Condition::Op(SortCondition::BeginsWith(prefix)) => {
            if prefix.as_str().is_none() {
                return Err(ValidationError::BeginsWithRequiresString(sk.clone()));
            }
            query
                .attribute_values
                .insert(SK_VALUE.to_string(), prefix.clone());
            format!("begins_with({SK_NAME}, {SK_VALUE})")
        }
        Condition::Op(SortCondition::Between(low, high)) => {
            if !low.same_kind(high) || low > high {
                return Err(ValidationError::InvalidBetween(sk.clone()));
            }
            query
                .attribute_values
                .insert(SK_LOW.to_string(), low.clone());
            query
                .attribute_values
                .insert(SK_HIGH.to_string(), high.clone());
            format!("{SK_NAME} BETWEEN {SK_LOW} AND {SK_HIGH}")
        }
        Condition::Op(SortCondition::Lt(val)) => comparison(&mut query, "<", val),
        Condition::Op(SortCondition::Le(val)) => comparison(&mut query, "<=", val),
        Condition::Op(SortCondition::Gt(val)) => comparison(&mut query, ">", val),
        Condition::Op(SortCondition::Ge(val)) => comparison(&mut query, ">=", val),
    };

    query
        .attribute_names
        .insert(SK_NAME.to_string(), sk.clone());
    query.key_condition_expression = format!("{PK_NAME} = {PK_VALUE} AND {sk_condition}");
    Ok(query)
}

fn comparison(query: &mut KeyConditionQuery, symbol: &str, val: &KeyValue) -> String {
    query
        .attribute_values
        .insert(SK_VALUE.to_string(), val.clone());
    format!("{SK_NAME} {symbol} {SK_VALUE}")
}
