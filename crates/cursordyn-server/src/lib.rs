//! cursordyn server and client library.
//!
//! Serves one table's cursor-paginated queries and batch lookups over a local
//! Unix socket, so out-of-process callers share a single access layer and
//! never see the cursor secret.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::CursordynClient;
pub use server::AccessServer;
