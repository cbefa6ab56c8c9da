//! Public API: filters, the key-condition builder, cursors, and the
//! [`TableAccess`] handle that ties them to a store.

mod access;
mod batch;
pub mod cursor;
pub mod filter;
mod projection;
pub mod query;

pub use access::{QueryResult, TableAccess};
pub use cursor::{Cursor, CursorCodec, decode_cursor, encode_cursor};
pub use filter::{Condition, Filter, OrderBy, SortCondition, WhereClause};
pub use projection::{apply_projection, augment_projection};
pub use query::{KeyConditionQuery, build_key_condition};
