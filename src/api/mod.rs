//! Purpose: Define the public Rust API boundary of the data-access layer.
//! Exports: `Dal`, its configuration, and the core types callers need to drive it.
//! Role: Additive-only surface used by the CLI, tests and an embedding REST layer.
//! Invariants: Callers reach pooling and operations only through `Dal`.
//! Invariants: Buffer layouts are shared with the REST layer via `RequestBuilder`/`ResponseView`.

mod dal;
mod node;

pub use crate::core::client::{
    ApiNodeState, Cluster, Connector, NodeStatus, Session, Transaction,
};
pub use crate::core::error::{Classification, Error, ErrorKind, NativeError, http_code};
pub use crate::core::memory::{MemoryCluster, MemoryConnector};
pub use crate::core::operation::ReadOutcome;
pub use crate::core::pool::{PoolStats, ShutdownReport};
pub use crate::core::request::{PkReadRequest, RequestBuilder};
pub use crate::core::response::{ColumnValue, ResponseView};
pub use crate::core::schema::{ColumnDescriptor, ColumnType, TableSchema};
pub use crate::core::text::Charset;
pub use dal::Dal;
pub use node::{DEFAULT_CONNECTION_STRING, DalConfig, NodeSelector};
