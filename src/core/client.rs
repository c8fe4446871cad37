//! Purpose: Capability set of the external database client, expressed as traits.
//! Exports: `Connector`, `Cluster`, `Session`, `Transaction`, `ApiNodeState`, `NodeStatus`, call enums.
//! Role: Seam between the data-access core and whatever drives the storage cluster.
//! Invariants: The core only sequences these calls; membership and replication live behind them.
//! Invariants: A transaction is closed by handing it back to its session, which consumes it.
use serde::Deserialize;

use crate::core::error::NativeError;
use crate::core::schema::TableSchema;

/// Connection status of an API node slot as reported by the management server.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    /// Free slot; nobody is connected with this node id.
    NoContact,
    Starting,
    Started,
    ShuttingDown,
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiNodeState {
    pub node_id: u32,
    pub status: NodeStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Lock-free read of the latest committed row version.
    CommittedRead,
    Read,
    Exclusive,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecType {
    NoCommit,
    Commit,
    Rollback,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitStatus {
    NotStarted,
    Started,
    Committed,
    Aborted,
}

/// Handle for a value registered with `Transaction::get_value`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RecAttrId(pub usize);

/// Establishes the process-wide cluster connection.
pub trait Connector {
    type Cluster: Cluster;

    /// API node slots known to the management server at `connection_string`.
    fn api_nodes(&self, connection_string: &str) -> Result<Vec<ApiNodeState>, NativeError>;

    /// Connects, optionally claiming a specific API node id.
    fn connect(&self, connection_string: &str, node_id: Option<u32>) -> Result<Self::Cluster, NativeError>;
}

/// A live cluster connection that hands out independent sessions.
pub trait Cluster: Send + Sync {
    type Session: Session;

    /// Creates and initializes a session handle.
    fn new_session(&self) -> Result<Self::Session, NativeError>;
}

/// Per-thread session handle; used by one caller at a time.
pub trait Session: Send {
    type Transaction: Transaction;

    /// Dictionary lookup of a table's schema.
    fn table(&mut self, db: &str, table: &str) -> Result<TableSchema, NativeError>;

    fn start_transaction(&mut self) -> Result<Self::Transaction, NativeError>;

    fn close_transaction(&mut self, transaction: Self::Transaction);
}

pub trait Transaction {
    /// Defines the single primary-key read of this transaction.
    fn read_tuple(&mut self, table: &TableSchema, lock: LockMode) -> Result<(), NativeError>;

    /// Binds one key column to its native bytes.
    fn equal(&mut self, column: &str, value: &[u8]) -> Result<(), NativeError>;

    /// Registers a column for retrieval.
    fn get_value(&mut self, column: &str) -> Result<RecAttrId, NativeError>;

    fn execute(&mut self, exec: ExecType) -> Result<(), NativeError>;

    fn commit_status(&self) -> CommitStatus;

    /// Stored bytes of a retrieved column after a successful execute; `None` is SQL NULL.
    fn rec(&self, id: RecAttrId) -> Option<&[u8]>;
}
