//! The store-client contract consumed by the access layer, plus an in-memory
//! reference implementation.

mod expression;
mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;

use crate::error::StoreError;
use crate::types::{Key, KeyValue};

pub use memory::MemoryStore;

/// One key-condition query against a table or one of its indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table_name: String,
    /// `None` addresses the table's primary key.
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub attribute_names: BTreeMap<String, String>,
    pub attribute_values: BTreeMap<String, KeyValue>,
    pub exclusive_start_key: Option<Key>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub items: Vec<Value>,
    /// Present when the store stopped before exhausting the key range.
    pub last_evaluated_key: Option<Key>,
    /// Items the store examined, including ones it did not return.
    pub scanned_count: usize,
}

/// A point lookup of up to [`BATCH_GET_MAX_KEYS`](crate::types::BATCH_GET_MAX_KEYS) keys.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetRequest {
    pub table_name: String,
    pub keys: Vec<Key>,
    /// Attributes to return. `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

/// Batch-get results in no particular order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub responses: Vec<Value>,
    /// Keys the store did not get to; the caller must reissue them.
    pub unprocessed_keys: Vec<Key>,
}

/// A partitioned key-value store.
///
/// Implementations are shared across concurrent calls and must be reentrant.
pub trait StoreClient: Send + Sync {
    fn query(
        &self,
        request: QueryRequest,
    ) -> impl Future<Output = Result<QueryOutput, StoreError>> + Send;

    fn batch_get(
        &self,
        request: BatchGetRequest,
    ) -> impl Future<Output = Result<BatchGetOutput, StoreError>> + Send;
}

impl<S: StoreClient> StoreClient for std::sync::Arc<S> {
    fn query(
        &self,
        request: QueryRequest,
    ) -> impl Future<Output = Result<QueryOutput, StoreError>> + Send {
        S::query(self, request)
    }

    fn batch_get(
        &self,
        request: BatchGetRequest,
    ) -> impl Future<Output = Result<BatchGetOutput, StoreError>> + Send {
        S::batch_get(self, request)
    }
}
