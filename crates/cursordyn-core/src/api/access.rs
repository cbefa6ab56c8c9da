//! The table access handle: cursor-paginated queries and batch point lookups.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::{AccessConfig, IndexKeys, TableConfig};
use crate::error::{ConfigError, CursorError, Error, Result, ValidationError};
use crate::store::{QueryRequest, StoreClient};
use crate::types::Key;

use super::batch::{self, BatchPlan};
use super::cursor::{Cursor, CursorCodec};
use super::filter::Filter;
use super::projection::augment_projection;
use super::query::build_key_condition;

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    /// Pass back as [`Filter::prev_cursor`] to fetch the next page. `None` once
    /// the key range is exhausted.
    pub cursor: Option<Cursor>,
    /// Items the store examined across every request made for this page.
    pub scanned_count: usize,
}

/// Read access to one table through a [`StoreClient`].
#[derive(Debug)]
pub struct TableAccess<S> {
    store: S,
    table: TableConfig,
    access: AccessConfig,
}

impl<S: StoreClient> TableAccess<S> {
    pub fn new(store: S, table: TableConfig) -> Self {
        Self::with_access_config(store, table, AccessConfig::default())
    }

    pub fn with_access_config(store: S, table: TableConfig, access: AccessConfig) -> Self {
        Self {
            store,
            table,
            access,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn table(&self) -> &TableConfig {
        &self.table
    }

    pub fn access_config(&self) -> &AccessConfig {
        &self.access
    }

    /// Fetch one page of items matching `filter` from `index_name` (the default
    /// index when `None`).
    ///
    /// Issues as many store queries as needed to fill the page, because a store
    /// page may hold fewer items than requested. The returned cursor is `None`
    /// exactly when the store reported the key range exhausted.
    ///
    /// Every configuration and validation error is raised before the first
    /// store call.
    pub async fn query_with_cursor<T: DeserializeOwned>(
        &self,
        filter: &Filter,
        index_name: Option<&str>,
    ) -> Result<QueryResult<T>> {
        let index_name = index_name.unwrap_or(&self.access.default_index);
        let keys = self.table.index(index_name)?;
        if keys.sort_key.is_none() {
            return Err(ConfigError::MissingSortKey(index_name.to_string()).into());
        }
        let secret = self
            .table
            .cursor_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingCursorSecret(self.table.table_name.clone()))?;
        let page_size = self.page_size(filter.limit)?;
        let query = build_key_condition(filter, index_name, keys)?;

        let codec = CursorCodec::new(secret);
        let mut start_key = codec.decode(filter.prev_cursor.as_ref())?;
        if let Some(key) = &start_key {
            check_cursor_key(key, keys)?;
        }

        let store_index = (index_name != self.access.default_index).then(|| index_name.to_string());
        let mut items = Vec::with_capacity(page_size);
        let mut scanned_count = 0;
        let mut requests = 0;

        loop {
            let request = QueryRequest {
                table_name: self.table.table_name.clone(),
                index_name: store_index.clone(),
                key_condition_expression: query.key_condition_expression.clone(),
                attribute_names: query.attribute_names.clone(),
                attribute_values: query.attribute_values.clone(),
                exclusive_start_key: start_key.take(),
                limit: Some(page_size - items.len()),
                scan_forward: query.scan_forward,
            };
            let output = self.store.query(request).await?;
            requests += 1;
            scanned_count += output.scanned_count;
            debug!(
                table = %self.table.table_name,
                index = index_name,
                returned = output.items.len(),
                scanned = output.scanned_count,
                has_more = output.last_evaluated_key.is_some(),
                "store page"
            );

            for item in output.items {
                items.push(serde_json::from_value(item).map_err(Error::Deserialize)?);
            }
            start_key = output.last_evaluated_key;
            if start_key.is_none() || items.len() >= page_size {
                break;
            }
        }

        debug!(
            table = %self.table.table_name,
            index = index_name,
            items = items.len(),
            scanned_count,
            requests,
            "query page complete"
        );
        Ok(QueryResult {
            items,
            cursor: codec.encode(start_key.as_ref())?,
            scanned_count,
        })
    }

    /// Fetch the items with the given primary keys, returned in the order of
    /// `keys` with `None` where no item exists.
    ///
    /// `fields` restricts the returned attributes; the primary-key attributes
    /// are always included.
    pub async fn batch_get_items<T: DeserializeOwned>(
        &self,
        keys: &[Key],
        fields: Option<&[String]>,
    ) -> Result<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let primary = self.primary_index()?;
        let plan = BatchPlan::new(keys, primary)?;
        let projection = fields.map(|f| augment_projection(f, primary));

        let found = batch::fetch_all(
            &self.store,
            &self.table.table_name,
            plan.unique_keys(),
            projection.as_deref(),
            &self.access,
        )
        .await?;

        plan.assemble(found, primary)
            .into_iter()
            .map(|item| item.map(deserialize_item).transpose())
            .collect()
    }

    fn primary_index(&self) -> Result<&IndexKeys> {
        self.table
            .indexes
            .get(&self.access.default_index)
            .ok_or_else(|| {
                ConfigError::MissingPrimaryIndex {
                    table: self.table.table_name.clone(),
                    index: self.access.default_index.clone(),
                }
                .into()
            })
    }

    fn page_size(&self, limit: Option<usize>) -> std::result::Result<usize, ValidationError> {
        let size = limit.unwrap_or(self.access.default_page_size);
        if size == 0 {
            return Err(ValidationError::ZeroPageSize);
        }
        if size > self.access.max_page_size {
            return Err(ValidationError::PageSizeExceeded {
                requested: size,
                max: self.access.max_page_size,
            });
        }
        Ok(size)
    }
}

fn check_cursor_key(key: &Key, keys: &IndexKeys) -> std::result::Result<(), CursorError> {
    match keys.attribute_names().find(|name| !key.contains(name)) {
        Some(name) => Err(CursorError::KeyMismatch(name.to_string())),
        None => Ok(()),
    }
}

fn deserialize_item<T: DeserializeOwned>(item: Value) -> Result<T> {
    serde_json::from_value(item).map_err(Error::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::filter::{OrderBy, WhereClause};
    use crate::config::RetryConfig;
    use crate::store::MemoryStore;
    use crate::types::DEFAULT_INDEX;
    use serde::Deserialize;
    use serde_json::json;

    fn orders_table() -> TableConfig {
        TableConfig::new("orders")
            .with_index(
                DEFAULT_INDEX,
                IndexKeys::new("customer").with_sort_key("order_id"),
            )
            .with_index("by_status", IndexKeys::new("status").with_sort_key("created"))
            .with_index("by_sku", IndexKeys::new("sku"))
            .with_cursor_secret("test-secret")
    }

    fn seeded_store(count: usize) -> MemoryStore {
        let store = MemoryStore::new(&orders_table(), DEFAULT_INDEX).unwrap();
        store
            .extend((0..count).map(|i| {
                json!({
                    "customer": "c-1",
                    "order_id": format!("o-{i:03}"),
                    "status": if i % 2 == 0 { "open" } else { "shipped" },
                    "created": i,
                    "sku": "sku-1",
                    "total": i * 10,
                })
            }))
            .unwrap();
        store
    }

    fn access(store: MemoryStore) -> TableAccess<MemoryStore> {
        TableAccess::new(store, orders_table())
    }

    fn c1() -> Filter {
        Filter::new(WhereClause::new().eq("customer", "c-1")).whole_partition()
    }

    fn order_ids(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|item| item["order_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        customer: String,
        order_id: String,
        total: u64,
    }

    #[tokio::test]
    async fn test_pages_visit_every_item_once() {
        let table = access(seeded_store(50));
        let mut cursor = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page: QueryResult<Value> = table
                .query_with_cursor(&c1().limit(5).prev_cursor(cursor), None)
                .await
                .unwrap();
            assert_eq!(page.items.len(), 5);
            seen.extend(order_ids(&page.items));
            pages += 1;
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(pages, 10);
        assert_eq!(table.store().query_calls(), 10);
        let expected: Vec<String> = (0..50).map(|i| format!("o-{i:03}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_descending_reverses_order() {
        let table = access(seeded_store(8));
        let asc: QueryResult<Value> = table.query_with_cursor(&c1().limit(8), None).await.unwrap();
        let desc: QueryResult<Value> = table
            .query_with_cursor(&c1().limit(8).order_by(OrderBy::Desc), None)
            .await
            .unwrap();
        let mut reversed = order_ids(&asc.items);
        reversed.reverse();
        assert_eq!(order_ids(&desc.items), reversed);
        assert!(asc.cursor.is_none());
    }

    #[tokio::test]
    async fn test_descending_pages_continue_downwards() {
        let table = access(seeded_store(6));
        let first: QueryResult<Value> = table
            .query_with_cursor(&c1().limit(4).order_by(OrderBy::Desc), None)
            .await
            .unwrap();
        assert_eq!(order_ids(&first.items), vec!["o-005", "o-004", "o-003", "o-002"]);
        let second: QueryResult<Value> = table
            .query_with_cursor(
                &c1().limit(4).order_by(OrderBy::Desc).prev_cursor(first.cursor),
                None,
            )
            .await
            .unwrap();
        assert_eq!(order_ids(&second.items), vec!["o-001", "o-000"]);
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_sparse_pages_are_filled_and_scanned_count_sums() {
        let store = seeded_store(10).with_page_scan_limit(3);
        let table = access(store);
        let page: QueryResult<Value> = table.query_with_cursor(&c1().limit(7), None).await.unwrap();
        assert_eq!(page.items.len(), 7);
        // Requests of 3, 3 and 1 items.
        assert_eq!(table.store().query_calls(), 3);
        assert_eq!(page.scanned_count, 7);
        assert!(page.cursor.is_some());
    }

    #[tokio::test]
    async fn test_expired_items_count_as_scanned() {
        let store = MemoryStore::new(&orders_table(), DEFAULT_INDEX)
            .unwrap()
            .with_ttl_attribute("expires");
        store
            .extend((0..4).map(|i| {
                json!({"customer": "c-1", "order_id": format!("o-{i}"), "expires": i % 2})
            }))
            .unwrap();
        let table = access(store);
        let page: QueryResult<Value> = table.query_with_cursor(&c1().limit(2), None).await.unwrap();
        assert_eq!(order_ids(&page.items), vec!["o-0", "o-2"]);
        assert_eq!(page.scanned_count, 3);
        assert_eq!(table.store().query_calls(), 2);
    }

    #[tokio::test]
    async fn test_secondary_index_with_range_condition() {
        let table = access(seeded_store(10));
        let filter = Filter::new(WhereClause::new().eq("status", "open").ge("created", 4)).limit(2);
        let first: QueryResult<Value> = table
            .query_with_cursor(&filter, Some("by_status"))
            .await
            .unwrap();
        assert_eq!(order_ids(&first.items), vec!["o-004", "o-006"]);

        let second: QueryResult<Value> = table
            .query_with_cursor(&filter.clone().prev_cursor(first.cursor), Some("by_status"))
            .await
            .unwrap();
        assert_eq!(order_ids(&second.items), vec!["o-008"]);
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_typed_items() {
        let table = access(seeded_store(2));
        let page: QueryResult<Order> = table.query_with_cursor(&c1(), None).await.unwrap();
        assert_eq!(
            page.items[1],
            Order {
                customer: "c-1".to_string(),
                order_id: "o-001".to_string(),
                total: 10,
            }
        );

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Wrong {
            total: String,
        }
        let err = table
            .query_with_cursor::<Wrong>(&c1(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Deserialize(_)));
    }

    #[tokio::test]
    async fn test_configuration_errors_precede_store_calls() {
        let table = access(seeded_store(3));
        let filter = Filter::new(WhereClause::new().eq("sku", "sku-1"));
        assert!(matches!(
            table.query_with_cursor::<Value>(&filter, Some("by_sku")).await,
            Err(Error::Config(ConfigError::MissingSortKey(index))) if index == "by_sku"
        ));
        assert!(matches!(
            table.query_with_cursor::<Value>(&c1(), Some("nope")).await,
            Err(Error::Config(ConfigError::UnknownIndex(_)))
        ));

        let mut no_secret = orders_table();
        no_secret.cursor_secret = None;
        let unkeyed = TableAccess::new(seeded_store(3), no_secret);
        assert!(matches!(
            unkeyed.query_with_cursor::<Value>(&c1(), None).await,
            Err(Error::Config(ConfigError::MissingCursorSecret(_)))
        ));

        assert_eq!(table.store().query_calls(), 0);
        assert_eq!(unkeyed.store().query_calls(), 0);
    }

    #[tokio::test]
    async fn test_validation_errors_precede_store_calls() {
        let table = access(seeded_store(3));
        let cases = [
            Filter::new(WhereClause::new().eq("customer", json!({"a": 1}))).whole_partition(),
            Filter::new(WhereClause::new().eq("order_id", "o-1")),
            Filter::new(WhereClause::new().eq("customer", "c-1")),
            c1().limit(101),
            c1().limit(0),
        ];
        for filter in cases {
            let err = table
                .query_with_cursor::<Value>(&filter, None)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{filter:?} gave {err:?}");
        }
        assert_eq!(table.store().query_calls(), 0);
    }

    #[tokio::test]
    async fn test_cursor_errors() {
        let table = access(seeded_store(10));
        let page: QueryResult<Value> = table.query_with_cursor(&c1().limit(2), None).await.unwrap();

        let other = TableAccess::new(
            seeded_store(10),
            table_with_secret("other-secret"),
        );
        assert!(matches!(
            other
                .query_with_cursor::<Value>(&c1().prev_cursor(page.cursor.clone()), None)
                .await,
            Err(Error::Cursor(CursorError::Authentication))
        ));

        // A primary-index cursor lacks the secondary index's key attributes.
        let status = Filter::new(WhereClause::new().eq("status", "open"))
            .whole_partition()
            .prev_cursor(page.cursor);
        assert!(matches!(
            table.query_with_cursor::<Value>(&status, Some("by_status")).await,
            Err(Error::Cursor(CursorError::KeyMismatch(_)))
        ));

        let garbage = c1().prev_cursor(Some(Cursor::from("garbage")));
        assert!(matches!(
            table.query_with_cursor::<Value>(&garbage, None).await,
            Err(Error::Cursor(CursorError::Malformed))
        ));
    }

    fn table_with_secret(secret: &str) -> TableConfig {
        let mut table = orders_table();
        table.cursor_secret = Some(secret.to_string());
        table
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let table = access(seeded_store(3));
        table.store().set_unavailable(Some("throttled"));
        assert!(matches!(
            table.query_with_cursor::<Value>(&c1(), None).await,
            Err(Error::Store(crate::error::StoreError::Unavailable(_)))
        ));
        assert!(matches!(
            table
                .batch_get_items::<Value>(&[Key::new().with("customer", "c-1").with("order_id", "o-000")], None)
                .await,
            Err(Error::Store(_))
        ));
    }

    fn order_key(i: usize) -> Key {
        Key::new()
            .with("customer", "c-1")
            .with("order_id", format!("o-{i:03}"))
    }

    #[tokio::test]
    async fn test_batch_get_chunks_and_restores_order() {
        let table = access(seeded_store(120));
        // 150 unique keys, 30 of which do not exist, in reverse order.
        let keys: Vec<Key> = (0..150).rev().map(order_key).collect();
        let items: Vec<Option<Value>> = table.batch_get_items(&keys, None).await.unwrap();

        assert_eq!(items.len(), 150);
        let mut sizes = table.store().batch_get_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100]);
        for (key, item) in keys.iter().zip(&items) {
            let id = key.get("order_id").unwrap().as_str().unwrap();
            let n: usize = id[2..].parse().unwrap();
            if n < 120 {
                assert_eq!(item.as_ref().unwrap()["order_id"], json!(id));
            } else {
                assert!(item.is_none(), "{id} should be missing");
            }
        }
    }

    #[tokio::test]
    async fn test_batch_get_empty_input() {
        let table = access(seeded_store(3));
        let items: Vec<Option<Value>> = table.batch_get_items(&[], None).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(table.store().batch_get_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_get_projection_includes_primary_key() {
        let table = access(seeded_store(3));
        let fields = vec!["total".to_string()];
        let items: Vec<Option<Value>> = table
            .batch_get_items(&[order_key(2), order_key(0)], Some(&fields))
            .await
            .unwrap();
        assert_eq!(
            items,
            vec![
                Some(json!({"customer": "c-1", "order_id": "o-002", "total": 20})),
                Some(json!({"customer": "c-1", "order_id": "o-000", "total": 0})),
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_get_duplicates_and_typed_items() {
        let table = access(seeded_store(3));
        let items: Vec<Option<Order>> = table
            .batch_get_items(&[order_key(1), order_key(9), order_key(1)], None)
            .await
            .unwrap();
        assert_eq!(items[0].as_ref().map(|o| o.total), Some(10));
        assert!(items[1].is_none());
        assert_eq!(items[0], items[2]);
        assert_eq!(table.store().batch_get_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_batch_get_distinguishes_keys_with_equal_display_forms() {
        let store = MemoryStore::new(&orders_table(), DEFAULT_INDEX).unwrap();
        store
            .extend([
                json!({"customer": "a::b", "order_id": "c", "v": 1}),
                json!({"customer": "a", "order_id": "b::c", "v": 2}),
                json!({"customer": "n", "order_id": 1, "v": "number"}),
                json!({"customer": "n", "order_id": "1", "v": "string"}),
            ])
            .unwrap();
        let table = access(store);

        let separator_keys = [
            Key::new().with("customer", "a::b").with("order_id", "c"),
            Key::new().with("customer", "a").with("order_id", "b::c"),
        ];
        let items: Vec<Option<Value>> = table.batch_get_items(&separator_keys, None).await.unwrap();
        let vs: Vec<_> = items.iter().map(|item| item.as_ref().map(|i| i["v"].clone())).collect();
        assert_eq!(vs, vec![Some(json!(1)), Some(json!(2))]);
        assert_eq!(table.store().batch_get_sizes(), vec![2]);

        table.store().reset_counters();
        let typed_keys = [
            Key::new().with("customer", "n").with("order_id", 1),
            Key::new().with("customer", "n").with("order_id", "1"),
        ];
        let items: Vec<Option<Value>> = table.batch_get_items(&typed_keys, None).await.unwrap();
        let vs: Vec<_> = items.iter().map(|item| item.as_ref().map(|i| i["v"].clone())).collect();
        assert_eq!(vs, vec![Some(json!("number")), Some(json!("string"))]);
        assert_eq!(table.store().batch_get_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_batch_get_retries_unprocessed_keys() {
        let store = seeded_store(10).with_max_batch_served(3);
        let access_config = AccessConfig {
            retry: RetryConfig::immediate(5),
            ..AccessConfig::default()
        };
        let table = TableAccess::with_access_config(store, orders_table(), access_config);
        let keys: Vec<Key> = (0..10).map(order_key).collect();
        let items: Vec<Option<Value>> = table.batch_get_items(&keys, None).await.unwrap();
        assert!(items.iter().all(Option::is_some));
        assert_eq!(table.store().batch_get_sizes(), vec![10, 7, 4, 1]);
    }

    #[tokio::test]
    async fn test_batch_get_retry_exhaustion() {
        let store = seeded_store(10).with_max_batch_served(0);
        let access_config = AccessConfig {
            retry: RetryConfig::immediate(2),
            ..AccessConfig::default()
        };
        let table = TableAccess::with_access_config(store, orders_table(), access_config);
        let err = table
            .batch_get_items::<Value>(&[order_key(1), order_key(2)], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnprocessedKeys {
                remaining: 2,
                attempts: 3
            }
        ));
        assert_eq!(table.store().batch_get_calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_get_rejects_incomplete_keys() {
        let table = access(seeded_store(3));
        let err = table
            .batch_get_items::<Value>(&[Key::new().with("customer", "c-1")], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingKeyAttribute(name)) if name == "order_id"
        ));
        assert_eq!(table.store().batch_get_calls(), 0);
    }
}
