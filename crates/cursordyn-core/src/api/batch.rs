//! Batch point lookups: deduplicate, split into store-sized chunks, fetch the
//! chunks concurrently with bounded retry of unprocessed keys, then rebuild the
//! caller's order.

use std::cmp;
use std::collections::{BTreeMap, BTreeSet};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AccessConfig, IndexKeys, RetryConfig};
use crate::error::{Error, Result, ValidationError};
use crate::store::{BatchGetRequest, StoreClient};
use crate::types::{BATCH_GET_MAX_KEYS, Key, PrimaryKey};

/// Input keys reduced to unique primary keys, remembering each input
/// position's primary key.
#[derive(Debug)]
pub(crate) struct BatchPlan {
    ids: Vec<PrimaryKey>,
    unique: Vec<Key>,
}

impl BatchPlan {
    pub(crate) fn new(keys: &[Key], primary: &IndexKeys) -> std::result::Result<Self, ValidationError> {
        let mut ids = Vec::with_capacity(keys.len());
        let mut unique = Vec::new();
        let mut seen = BTreeSet::new();

        for key in keys {
            let mut primary_key = Key::new();
            for name in primary.attribute_names() {
                let val = key
                    .get(name)
                    .ok_or_else(|| ValidationError::MissingKeyAttribute(name.to_string()))?;
                primary_key.insert(name, val.clone());
            }
            let id = primary_key
                .primary_key(primary)
                .ok_or_else(|| ValidationError::MissingKeyAttribute(primary.partition_key.clone()))?;
            if seen.insert(id.clone()) {
                unique.push(primary_key);
            }
            ids.push(id);
        }

        Ok(Self { ids, unique })
    }

    pub(crate) fn unique_keys(&self) -> &[Key] {
        &self.unique
    }

    /// Lay `found` out over the input order. Positions with no matching item
    /// are `None`; duplicate inputs each receive the item.
    pub(crate) fn assemble(self, found: Vec<Value>, primary: &IndexKeys) -> Vec<Option<Value>> {
        let mut by_id: BTreeMap<PrimaryKey, Value> = BTreeMap::new();
        for item in found {
            if let Some(id) = Key::from_item(&item, primary).and_then(|k| k.primary_key(primary)) {
                by_id.insert(id, item);
            }
        }

        let mut remaining: BTreeMap<&PrimaryKey, usize> = BTreeMap::new();
        for id in &self.ids {
            *remaining.entry(id).or_default() += 1;
        }

        self.ids
            .iter()
            .map(|id| {
                let left = remaining.get_mut(id)?;
                *left -= 1;
                if *left == 0 {
                    by_id.remove(id)
                } else {
                    by_id.get(id).cloned()
                }
            })
            .collect()
    }
}

/// Fetch every key, `access.batch_chunk_size` keys per store request with at
/// most `access.batch_concurrency` requests in flight. Items come back in no
/// particular order.
pub(crate) async fn fetch_all<S: StoreClient>(
    store: &S,
    table_name: &str,
    keys: &[Key],
    projection: Option<&[String]>,
    access: &AccessConfig,
) -> Result<Vec<Value>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_size = access.batch_chunk_size.clamp(1, BATCH_GET_MAX_KEYS);
    let chunks: Vec<Vec<Key>> = keys.chunks(chunk_size).map(<[Key]>::to_vec).collect();
    let concurrency = cmp::max(1, chunks.len().min(access.batch_concurrency));
    debug!(
        table = table_name,
        keys = keys.len(),
        chunks = chunks.len(),
        concurrency,
        "batch get"
    );

    let fetches: Vec<_> = chunks
        .into_iter()
        .map(|chunk| fetch_chunk(store, table_name, chunk, projection, &access.retry))
        .collect();

    stream::iter(fetches)
        .buffer_unordered(concurrency)
        .try_fold(Vec::with_capacity(keys.len()), |mut acc, items| async move {
            acc.extend(items);
            Ok(acc)
        })
        .await
}

/// Fetch one chunk, reissuing exactly the unprocessed keys until none remain or
/// the retry budget runs out.
async fn fetch_chunk<S: StoreClient>(
    store: &S,
    table_name: &str,
    chunk: Vec<Key>,
    projection: Option<&[String]>,
    retry: &RetryConfig,
) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(chunk.len());
    let mut pending = chunk;
    let mut attempt = 0;

    loop {
        let output = store
            .batch_get(BatchGetRequest {
                table_name: table_name.to_string(),
                keys: pending,
                projection: projection.map(<[String]>::to_vec),
            })
            .await?;
        items.extend(output.responses);

        if output.unprocessed_keys.is_empty() {
            return Ok(items);
        }
        if attempt >= retry.max_retries {
            return Err(Error::UnprocessedKeys {
                remaining: output.unprocessed_keys.len(),
                attempts: attempt + 1,
            });
        }

        let delay = retry.retry_delay(attempt);
        warn!(
            table = table_name,
            unprocessed = output.unprocessed_keys.len(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying unprocessed batch-get keys"
        );
        tokio::time::sleep(delay).await;

        attempt += 1;
        pending = output.unprocessed_keys;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyValue;
    use serde_json::json;

    fn primary() -> IndexKeys {
        IndexKeys::new("customer").with_sort_key("order_id")
    }

    fn key(c: &str, o: &str) -> Key {
        Key::new().with("customer", c).with("order_id", o)
    }

    #[test]
    fn test_plan_dedupes_and_strips_extra_attributes() {
        let keys = vec![
            key("c", "1"),
            key("c", "2").with("status", "open"),
            key("c", "1"),
        ];
        let plan = BatchPlan::new(&keys, &primary()).unwrap();
        assert_eq!(plan.unique_keys(), &[key("c", "1"), key("c", "2")]);
        assert_eq!(plan.ids.len(), 3);
        assert_eq!(plan.ids[0], plan.ids[2]);
        assert_ne!(plan.ids[0], plan.ids[1]);
    }

    #[test]
    fn test_plan_requires_primary_key_attributes() {
        let err = BatchPlan::new(&[Key::new().with("customer", "c")], &primary()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingKeyAttribute(name) if name == "order_id"));
    }

    #[test]
    fn test_assemble_restores_order_and_fills_duplicates() {
        let keys = vec![key("c", "3"), key("c", "1"), key("c", "2"), key("c", "1")];
        let plan = BatchPlan::new(&keys, &primary()).unwrap();
        let found = vec![
            json!({"customer": "c", "order_id": "1", "n": 1}),
            json!({"customer": "c", "order_id": "3", "n": 3}),
        ];
        let out = plan.assemble(found, &primary());
        assert_eq!(
            out,
            vec![
                Some(json!({"customer": "c", "order_id": "3", "n": 3})),
                Some(json!({"customer": "c", "order_id": "1", "n": 1})),
                None,
                Some(json!({"customer": "c", "order_id": "1", "n": 1})),
            ]
        );
    }

    #[test]
    fn test_keys_with_colliding_display_forms_stay_separate() {
        let pk = |p: &str, s: KeyValue| Key::new().with("customer", p).with("order_id", s);
        let keys = vec![
            pk("a::b", KeyValue::from("c")),
            pk("a", KeyValue::from("b::c")),
            pk("n", KeyValue::from(1)),
            pk("n", KeyValue::from("1")),
        ];
        let plan = BatchPlan::new(&keys, &primary()).unwrap();
        assert_eq!(plan.unique_keys().len(), 4);

        let found = vec![
            json!({"customer": "a", "order_id": "b::c", "v": 2}),
            json!({"customer": "n", "order_id": "1", "v": "string"}),
            json!({"customer": "a::b", "order_id": "c", "v": 1}),
            json!({"customer": "n", "order_id": 1, "v": "number"}),
        ];
        let out = plan.assemble(found, &primary());
        let vs: Vec<_> = out.iter().map(|item| item.as_ref().map(|i| i["v"].clone())).collect();
        assert_eq!(
            vs,
            vec![
                Some(json!(1)),
                Some(json!(2)),
                Some(json!("number")),
                Some(json!("string")),
            ]
        );
    }
}
