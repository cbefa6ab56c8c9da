//! # cursordyn
//!
//! A read-side access layer for DynamoDB-style partitioned key-value stores.
//!
//! It turns a structured [`Filter`](api::Filter) into a key-condition query,
//! drives the store's continuation-key paging until a page is full, and hands
//! callers a single opaque, authenticated [`Cursor`](api::Cursor) to continue
//! from. Batch point lookups are chunked, retried and put back in the order
//! the caller asked for.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cursordyn_core::api::{Filter, QueryResult, TableAccess, WhereClause};
//! use cursordyn_core::config::{IndexKeys, TableConfig};
//! use cursordyn_core::store::MemoryStore;
//! use cursordyn_core::types::DEFAULT_INDEX;
//! use serde_json::{Value, json};
//!
//! # async fn run() -> cursordyn_core::error::Result<()> {
//! let table = TableConfig::new("orders")
//!     .with_index(DEFAULT_INDEX, IndexKeys::new("customer").with_sort_key("order_id"))
//!     .with_cursor_secret("change-me");
//!
//! let store = MemoryStore::new(&table, DEFAULT_INDEX)?;
//! store.put(json!({"customer": "c-1", "order_id": "2024-03-01#1", "total": 12}))?;
//!
//! let access = TableAccess::new(store, table);
//! let filter = Filter::new(
//!     WhereClause::new()
//!         .eq("customer", "c-1")
//!         .begins_with("order_id", "2024-"),
//! )
//! .limit(10);
//!
//! let page: QueryResult<Value> = access.query_with_cursor(&filter, None).await?;
//! if let Some(cursor) = page.cursor {
//!     let _next: QueryResult<Value> = access
//!         .query_with_cursor(&filter.clone().prev_cursor(Some(cursor)), None)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
