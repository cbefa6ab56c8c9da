//! Wire protocol: JSON-over-newlines request/response types.
//!
//! Each request is a single JSON line; each response is a single JSON line.

use cursordyn_core::api::{Cursor, Filter, QueryResult};
use cursordyn_core::config::TableConfig;
use cursordyn_core::types::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Query {
        filter: Filter,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<String>,
    },
    BatchGet {
        keys: Vec<Key>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<String>>,
    },
    Describe,
}

/// A response to a client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response variants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OkResponse {
    Page {
        ok: bool,
        items: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
        scanned_count: usize,
    },
    BatchItems {
        ok: bool,
        items: Vec<Option<Value>>,
    },
    Table {
        ok: bool,
        table: TableConfig,
    },
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl Response {
    pub fn ok_page(page: QueryResult<Value>) -> Self {
        Response::Ok(OkResponse::Page {
            ok: true,
            items: page.items,
            cursor: page.cursor,
            scanned_count: page.scanned_count,
        })
    }

    pub fn ok_batch_items(items: Vec<Option<Value>>) -> Self {
        Response::Ok(OkResponse::BatchItems { ok: true, items })
    }

    pub fn ok_table(table: TableConfig) -> Self {
        Response::Ok(OkResponse::Table { ok: true, table })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error: error.into(),
            message: message.into(),
        })
    }
}
