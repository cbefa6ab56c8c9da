//! Client library for connecting to a `cursordyn-server` via Unix socket.
//!
//! Each method serializes a JSON-line request, sends it, reads a JSON-line
//! response, and returns the parsed result.

use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use cursordyn_core::api::{Cursor, Filter, QueryResult};
use cursordyn_core::config::TableConfig;
use cursordyn_core::types::Key;

use crate::error::ClientError;
use crate::protocol::{ErrorResponse, Request};

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for a cursordyn server.
pub struct CursordynClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
}

impl CursordynClient {
    /// Connect to a cursordyn server at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::new(),
        })
    }

    /// Fetch one page. Pass the returned cursor back through
    /// [`Filter::prev_cursor`] for the next one.
    pub async fn query(&mut self, filter: &Filter, index: Option<&str>) -> Result<QueryResult<Value>> {
        let req = Request::Query {
            filter: filter.clone(),
            index: index.map(str::to_string),
        };
        let resp = self.send_request(&req).await?;
        page_from_response(&resp)
    }

    /// Look up items by primary key, in the order given.
    pub async fn batch_get(
        &mut self,
        keys: &[Key],
        fields: Option<&[String]>,
    ) -> Result<Vec<Option<Value>>> {
        let req = Request::BatchGet {
            keys: keys.to_vec(),
            fields: fields.map(<[String]>::to_vec),
        };
        let resp = self.send_request(&req).await?;
        batch_items_from_response(&resp)
    }

    /// The served table's layout. The cursor secret is never sent.
    pub async fn describe(&mut self) -> Result<TableConfig> {
        let resp = self.send_request(&Request::Describe).await?;
        check_error(&resp)?;
        let table = resp
            .get("table")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("missing 'table' in describe response".to_string()))?;
        serde_json::from_value(table).map_err(ClientError::Serialization)
    }

    /// Send a raw JSON request line and return the raw response.
    pub async fn send_raw(&mut self, req: &Value) -> Result<Value> {
        self.send_line(req).await
    }

    async fn send_request(&mut self, req: &Request) -> Result<Value> {
        self.send_line(req).await
    }

    async fn send_line(&mut self, req: &impl serde::Serialize) -> Result<Value> {
        let mut data = serde_json::to_vec(req).map_err(ClientError::Serialization)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        self.line_buf.clear();
        let n = self.reader.read_line(&mut self.line_buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        let resp: Value =
            serde_json::from_str(self.line_buf.trim()).map_err(ClientError::Serialization)?;
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn check_error(resp: &Value) -> Result<()> {
    if let Some(err) = resp.get("error") {
        let error = err.as_str().unwrap_or("Unknown").to_string();
        let message = resp
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        return Err(ClientError::Server(ErrorResponse { error, message }));
    }
    Ok(())
}

fn page_from_response(resp: &Value) -> Result<QueryResult<Value>> {
    check_error(resp)?;
    let items = resp
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .ok_or_else(|| ClientError::Protocol("missing 'items' array in query response".to_string()))?;
    let cursor = resp
        .get("cursor")
        .and_then(|v| v.as_str())
        .map(Cursor::from);
    let scanned_count = resp
        .get("scanned_count")
        .and_then(|v| v.as_u64())
        .unwrap_or_default() as usize;
    Ok(QueryResult {
        items,
        cursor,
        scanned_count,
    })
}

fn batch_items_from_response(resp: &Value) -> Result<Vec<Option<Value>>> {
    check_error(resp)?;
    let items = resp
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            ClientError::Protocol("missing 'items' array in batch_get response".to_string())
        })?;
    Ok(items
        .iter()
        .map(|v| if v.is_null() { None } else { Some(v.clone()) })
        .collect())
}
