//! In-memory [`StoreClient`] with DynamoDB-style paging semantics.
//!
//! Items live in a `BTreeMap` ordered by primary key. Queries evaluate at most
//! `limit` items (expired items count as evaluated but are not returned) and
//! report a continuation key only when more matching items remain. A few knobs
//! reproduce store behaviour the access layer has to cope with: sparse pages,
//! partially served batch gets, and outages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::api::apply_projection;
use crate::config::{IndexKeys, TableConfig};
use crate::error::{ConfigError, StoreError};
use crate::types::{BATCH_GET_MAX_KEYS, Key, KeyValue, PrimaryKey};

use super::expression::KeyExpression;
use super::{BatchGetOutput, BatchGetRequest, QueryOutput, QueryRequest, StoreClient};

/// Position of an item within one index: its index sort value, then its
/// primary key to break ties on non-unique secondary indexes.
type Position = (Option<KeyValue>, PrimaryKey);

#[derive(Debug)]
pub struct MemoryStore {
    table_name: String,
    primary: IndexKeys,
    secondary: BTreeMap<String, IndexKeys>,
    ttl_attribute: Option<String>,
    page_scan_limit: Option<usize>,
    max_batch_served: Option<usize>,
    items: RwLock<BTreeMap<PrimaryKey, Value>>,
    unavailable: RwLock<Option<String>>,
    query_calls: AtomicUsize,
    batch_get_sizes: Mutex<Vec<usize>>,
}

impl MemoryStore {
    /// Create an empty store for `table`. `primary_index` names the index that
    /// holds the table's primary key; every other index is secondary.
    pub fn new(table: &TableConfig, primary_index: &str) -> Result<Self, ConfigError> {
        let primary = table.indexes.get(primary_index).cloned().ok_or_else(|| {
            ConfigError::MissingPrimaryIndex {
                table: table.table_name.clone(),
                index: primary_index.to_string(),
            }
        })?;
        let secondary = table
            .indexes
            .iter()
            .filter(|(name, _)| name.as_str() != primary_index)
            .map(|(name, keys)| (name.clone(), keys.clone()))
            .collect();

        Ok(Self {
            table_name: table.table_name.clone(),
            primary,
            secondary,
            ttl_attribute: None,
            page_scan_limit: None,
            max_batch_served: None,
            items: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(None),
            query_calls: AtomicUsize::new(0),
            batch_get_sizes: Mutex::new(Vec::new()),
        })
    }

    /// Items whose `attr` holds an epoch-seconds timestamp in the past are
    /// treated as deleted.
    pub fn with_ttl_attribute(mut self, attr: &str) -> Self {
        self.ttl_attribute = Some(attr.to_string());
        self
    }

    /// Evaluate at most `n` items per query regardless of the requested limit.
    pub fn with_page_scan_limit(mut self, n: usize) -> Self {
        self.page_scan_limit = Some(n);
        self
    }

    /// Serve at most `n` keys per batch get; the rest come back unprocessed.
    pub fn with_max_batch_served(mut self, n: usize) -> Self {
        self.max_batch_served = Some(n);
        self
    }

    pub fn put(&self, item: Value) -> Result<(), StoreError> {
        let primary = self.primary_key_of_item(&item).ok_or_else(|| {
            StoreError::InvalidKey(format!(
                "item is missing scalar primary key attributes ({})",
                self.primary.attribute_names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        self.items.write().insert(primary, item);
        Ok(())
    }

    /// Insert every item, stopping at the first invalid one.
    pub fn extend(&self, items: impl IntoIterator<Item = Value>) -> Result<usize, StoreError> {
        let mut count = 0;
        for item in items {
            self.put(item)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(str::to_string);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn batch_get_calls(&self) -> usize {
        self.batch_get_sizes.lock().len()
    }

    /// Number of keys in each batch get received so far.
    pub fn batch_get_sizes(&self) -> Vec<usize> {
        self.batch_get_sizes.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.query_calls.store(0, Ordering::SeqCst);
        self.batch_get_sizes.lock().clear();
    }

    fn check_call(&self, table_name: &str) -> Result<(), StoreError> {
        if let Some(reason) = self.unavailable.read().as_ref() {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        if table_name != self.table_name {
            return Err(StoreError::TableNotFound(table_name.to_string()));
        }
        Ok(())
    }

    fn primary_key_of_item(&self, item: &Value) -> Option<PrimaryKey> {
        let pk = KeyValue::from_json(item.get(&self.primary.partition_key)?)?;
        let sk = match &self.primary.sort_key {
            Some(name) => Some(KeyValue::from_json(item.get(name)?)?),
            None => None,
        };
        Some((pk, sk))
    }

    fn primary_key_of_key(&self, key: &Key) -> Option<PrimaryKey> {
        key.primary_key(&self.primary)
    }

    /// Index keys plus primary keys of `item`, as returned to callers.
    fn continuation_key(&self, item: &Value, index: &IndexKeys) -> Option<Key> {
        let mut key = Key::from_item(item, index)?;
        for name in self.primary.attribute_names() {
            if !key.contains(name) {
                key.insert(name, KeyValue::from_json(item.get(name)?)?);
            }
        }
        Some(key)
    }

    fn start_position(&self, esk: &Key, index: &IndexKeys) -> Result<Position, StoreError> {
        let missing = |name: &str| StoreError::InvalidKey(format!("start key is missing '{name}'"));
        let sk = match &index.sort_key {
            Some(name) => Some(esk.get(name).cloned().ok_or_else(|| missing(name.as_str()))?),
            None => None,
        };
        let primary = self
            .primary_key_of_key(esk)
            .ok_or_else(|| missing(self.primary.partition_key.as_str()))?;
        Ok((sk, primary))
    }

    fn is_ttl_expired(&self, item: &Value) -> bool {
        let Some(attr) = &self.ttl_attribute else {
            return false;
        };
        let Some(epoch_secs) = item.get(attr).and_then(Value::as_f64) else {
            return false;
        };
        if epoch_secs == 0.0 {
            return false;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        epoch_secs <= now
    }

    fn run_query(&self, request: &QueryRequest) -> Result<QueryOutput, StoreError> {
        self.check_call(&request.table_name)?;
        let index = match &request.index_name {
            None => &self.primary,
            Some(name) => self
                .secondary
                .get(name)
                .ok_or_else(|| StoreError::IndexNotFound(name.clone()))?,
        };

        let expr = KeyExpression::parse(
            &request.key_condition_expression,
            &request.attribute_names,
            &request.attribute_values,
        )?;
        if expr.partition_attr != index.partition_key {
            return Err(StoreError::InvalidExpression(format!(
                "'{}' is not the partition key of the queried index",
                expr.partition_attr
            )));
        }
        if let Some((attr, _)) = &expr.sort
            && index.sort_key.as_deref() != Some(attr.as_str())
        {
            return Err(StoreError::InvalidExpression(format!(
                "'{attr}' is not the sort key of the queried index"
            )));
        }

        let start = request
            .exclusive_start_key
            .as_ref()
            .map(|esk| self.start_position(esk, index))
            .transpose()?;

        let items = self.items.read();
        let mut matched: Vec<(Position, &Value)> = Vec::new();
        for (primary, item) in items.iter() {
            if item
                .get(&index.partition_key)
                .and_then(KeyValue::from_json)
                .is_none_or(|pk| pk != expr.partition_value)
            {
                continue;
            }
            // Items without the index's sort key are not part of the index.
            let sk = match &index.sort_key {
                Some(name) => match item.get(name).and_then(KeyValue::from_json) {
                    Some(sk) => Some(sk),
                    None => continue,
                },
                None => None,
            };
            if let (Some((_, predicate)), Some(sk)) = (&expr.sort, &sk)
                && !predicate.matches(sk)
            {
                continue;
            }
            matched.push(((sk, primary.clone()), item));
        }

        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if !request.scan_forward {
            matched.reverse();
        }
        if let Some(start) = &start {
            matched.retain(|(pos, _)| {
                if request.scan_forward {
                    pos > start
                } else {
                    pos < start
                }
            });
        }

        let limit = match (request.limit, self.page_scan_limit) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => usize::MAX,
        }
        .max(1);
        let has_more = matched.len() > limit;
        matched.truncate(limit);

        let mut output = QueryOutput {
            scanned_count: matched.len(),
            ..QueryOutput::default()
        };
        if has_more {
            output.last_evaluated_key = matched
                .last()
                .and_then(|(_, item)| self.continuation_key(item, index));
        }
        output.items = matched
            .into_iter()
            .filter(|(_, item)| !self.is_ttl_expired(item))
            .map(|(_, item)| item.clone())
            .collect();

        debug!(
            table = %self.table_name,
            index = request.index_name.as_deref().unwrap_or("<primary>"),
            returned = output.items.len(),
            scanned = output.scanned_count,
            has_more,
            "memory store query"
        );
        Ok(output)
    }

    fn run_batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        self.check_call(&request.table_name)?;
        if request.keys.len() > BATCH_GET_MAX_KEYS {
            return Err(StoreError::TooManyKeys {
                max: BATCH_GET_MAX_KEYS,
                actual: request.keys.len(),
            });
        }
        self.batch_get_sizes.lock().push(request.keys.len());

        let mut keys = request.keys;
        let served = self.max_batch_served.unwrap_or(usize::MAX).min(keys.len());
        let unprocessed_keys = keys.split_off(served);

        let items = self.items.read();
        let mut responses = Vec::with_capacity(keys.len());
        for key in &keys {
            let primary = self.primary_key_of_key(key).ok_or_else(|| {
                StoreError::InvalidKey("batch get key is missing primary key attributes".to_string())
            })?;
            if let Some(item) = items.get(&primary)
                && !self.is_ttl_expired(item)
            {
                responses.push(match &request.projection {
                    Some(paths) => apply_projection(item, paths),
                    None => item.clone(),
                });
            }
        }
        // Stores make no ordering promise for batch responses.
        responses.reverse();

        Ok(BatchGetOutput {
            responses,
            unprocessed_keys,
        })
    }
}

impl StoreClient for MemoryStore {
    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.run_query(&request)
    }

    async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        tokio::task::yield_now().await;
        self.run_batch_get(request)
    }
}
