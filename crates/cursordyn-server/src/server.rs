//! Unix domain socket server that wraps a `TableAccess` handle.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses. Connections are served concurrently; requests on one connection
//! are answered in order.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use cursordyn_core::api::{Filter, TableAccess};
use cursordyn_core::error::Error as AccessError;
use cursordyn_core::store::StoreClient;
use cursordyn_core::types::Key;

use crate::protocol::{Request, Response};

/// A cursordyn server listening on a Unix socket.
pub struct AccessServer<S> {
    access: Arc<TableAccess<S>>,
    socket_path: PathBuf,
}

impl<S: StoreClient + 'static> AccessServer<S> {
    pub fn new(access: TableAccess<S>, socket_path: PathBuf) -> Self {
        Self {
            access: Arc::new(access),
            socket_path,
        }
    }

    /// Run the server, accepting connections until a shutdown signal is received.
    ///
    /// On startup, removes any stale socket file and binds a new one.
    /// On shutdown (SIGINT or SIGTERM), removes the socket file before exiting.
    pub async fn run(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(
            path = %self.socket_path.display(),
            table = %self.access.table().table_name,
            "server listening"
        );

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let access = Arc::clone(&self.access);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(access, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

async fn handle_connection<S: StoreClient>(
    access: Arc<TableAccess<S>>,
    stream: UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(req) => dispatch(&access, req).await,
            Err(e) => Response::error("ParseError", e.to_string()),
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                let fallback = Response::error("SerializationError", e.to_string());
                serde_json::to_vec(&fallback).map_err(std::io::Error::other)?
            }
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn dispatch<S: StoreClient>(access: &TableAccess<S>, req: Request) -> Response {
    match req {
        Request::Query { filter, index } => handle_query(access, &filter, index.as_deref()).await,
        Request::BatchGet { keys, fields } => {
            handle_batch_get(access, &keys, fields.as_deref()).await
        }
        Request::Describe => Response::ok_table(access.table().clone()),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_query<S: StoreClient>(
    access: &TableAccess<S>,
    filter: &Filter,
    index: Option<&str>,
) -> Response {
    match access.query_with_cursor::<Value>(filter, index).await {
        Ok(page) => {
            debug!(
                index = index.unwrap_or(&access.access_config().default_index),
                items = page.items.len(),
                has_more = page.cursor.is_some(),
                "query served"
            );
            Response::ok_page(page)
        }
        Err(e) => error_to_response(e),
    }
}

async fn handle_batch_get<S: StoreClient>(
    access: &TableAccess<S>,
    keys: &[Key],
    fields: Option<&[String]>,
) -> Response {
    match access.batch_get_items::<Value>(keys, fields).await {
        Ok(items) => {
            debug!(keys = keys.len(), "batch get served");
            Response::ok_batch_items(items)
        }
        Err(e) => error_to_response(e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

/// Stable wire name for each error family.
fn error_to_response(err: AccessError) -> Response {
    let name = match &err {
        AccessError::Config(_) => "ConfigurationError",
        AccessError::Validation(_) => "ValidationError",
        AccessError::Cursor(_) => "CursorError",
        AccessError::Store(_) => "StoreError",
        AccessError::UnprocessedKeys { .. } => "UnprocessedKeys",
        AccessError::Deserialize(_) => "InternalError",
    };
    Response::error(name, err.to_string())
}
