//! Purpose: In-process implementation of the client traits backed by a shared catalog.
//! Exports: `MemoryConnector`, `MemoryCluster`, `MemorySession`, `MemoryTransaction`, `Faults`.
//! Role: Drives the core in tests and the CLI without a storage cluster.
//! Invariants: Rows hold native stored bytes; a lookup matches when every bound key equals them.
//! Invariants: Counters (sessions, open transactions, rollbacks) are observable for tests.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::core::client::{
    ApiNodeState, Cluster, CommitStatus, Connector, ExecType, LockMode, RecAttrId, Session,
    Transaction,
};
use crate::core::codec;
use crate::core::error::{Classification, ERR_NO_COLUMN, ERR_NO_TABLE, Error, ErrorKind, NativeError};
use crate::core::schema::TableSchema;

type Row = HashMap<String, Option<Vec<u8>>>;

#[derive(Debug, Default)]
struct MemoryTable {
    schema: Option<TableSchema>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Catalog {
    tables: HashMap<(String, String), MemoryTable>,
}

/// Toggles for failure paths the storage cluster can produce.
#[derive(Debug, Default)]
pub struct Faults {
    failing_sessions: AtomicUsize,
    fail_start_transaction: AtomicBool,
    fail_execute: Mutex<Option<NativeError>>,
}

impl Faults {
    /// Makes the next `count` session initializations fail.
    pub fn fail_next_sessions(&self, count: usize) {
        self.failing_sessions.store(count, Ordering::SeqCst);
    }

    pub fn fail_start_transaction(&self, fail: bool) {
        self.fail_start_transaction.store(fail, Ordering::SeqCst);
    }

    /// Every execute fails with `error` until cleared with `None`.
    pub fn fail_execute(&self, error: Option<NativeError>) {
        *self.fail_execute.lock() = error;
    }

    fn take_session_failure(&self) -> bool {
        self.failing_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions: AtomicUsize,
    open_transactions: AtomicIsize,
    rollbacks: AtomicUsize,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    catalog: Arc<RwLock<Catalog>>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, schema: TableSchema) {
        let key = (schema.db.clone(), schema.name.clone());
        let mut catalog = self.catalog.write();
        let table = catalog.tables.entry(key).or_default();
        table.schema = Some(schema);
        table.rows.clear();
    }

    /// Inserts a row of native stored bytes; omitted columns are NULL.
    pub fn insert_row<'a, I>(&self, db: &str, table: &str, values: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (&'a str, Option<Vec<u8>>)>,
    {
        let mut catalog = self.catalog.write();
        let entry = catalog
            .tables
            .get_mut(&(db.to_string(), table.to_string()))
            .ok_or_else(|| no_table(db, table))?;
        let schema = entry.schema.as_ref().ok_or_else(|| no_table(db, table))?;
        let mut row = Row::new();
        for (name, value) in values {
            if schema.column(name).is_none() {
                return Err(Error::new(ErrorKind::Client)
                    .with_message(ERR_NO_COLUMN)
                    .with_column(name));
            }
            row.insert(name.to_string(), value);
        }
        entry.rows.push(row);
        Ok(())
    }

    /// Inserts a row given as text, converted with each column's stored representation.
    pub fn insert_text_row<'a, I>(&self, db: &str, table: &str, values: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let schema = {
            let catalog = self.catalog.read();
            catalog
                .tables
                .get(&(db.to_string(), table.to_string()))
                .and_then(|entry| entry.schema.clone())
                .ok_or_else(|| no_table(db, table))?
        };
        let mut native = Vec::new();
        for (name, text) in values {
            let column = schema.column(name).ok_or_else(|| {
                Error::new(ErrorKind::Client)
                    .with_message(ERR_NO_COLUMN)
                    .with_column(name)
            })?;
            let value = match text {
                Some(text) => Some(codec::store_value(column, text.as_bytes())?),
                None => None,
            };
            native.push((name, value));
        }
        self.insert_row(db, table, native)
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn sessions_created(&self) -> usize {
        self.counters.sessions.load(Ordering::SeqCst)
    }

    /// Transactions started but not yet handed back to their session.
    pub fn open_transactions(&self) -> isize {
        self.counters.open_transactions.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }
}

impl Cluster for MemoryCluster {
    type Session = MemorySession;

    fn new_session(&self) -> Result<MemorySession, NativeError> {
        if self.faults.take_session_failure() {
            return Err(NativeError::new(
                Classification::TemporaryResourceError,
                4000,
                "session initialization failed",
            ));
        }
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            cluster: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemorySession {
    cluster: MemoryCluster,
}

impl Session for MemorySession {
    type Transaction = MemoryTransaction;

    fn table(&mut self, db: &str, table: &str) -> Result<TableSchema, NativeError> {
        self.cluster
            .catalog
            .read()
            .tables
            .get(&(db.to_string(), table.to_string()))
            .and_then(|entry| entry.schema.clone())
            .ok_or_else(|| NativeError::new(Classification::SchemaError, 723, "No such table existed"))
    }

    fn start_transaction(&mut self) -> Result<MemoryTransaction, NativeError> {
        if self.cluster.faults.fail_start_transaction.load(Ordering::SeqCst) {
            return Err(NativeError::new(
                Classification::OverloadError,
                410,
                "REDO log files overloaded",
            ));
        }
        self.cluster
            .counters
            .open_transactions
            .fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            cluster: self.cluster.clone(),
            read: None,
            status: CommitStatus::NotStarted,
            results: Vec::new(),
        })
    }

    fn close_transaction(&mut self, _transaction: MemoryTransaction) {
        self.cluster
            .counters
            .open_transactions
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct PendingRead {
    db: String,
    table: String,
    keys: Vec<(String, Vec<u8>)>,
    projection: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryTransaction {
    cluster: MemoryCluster,
    read: Option<PendingRead>,
    status: CommitStatus,
    results: Vec<Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn pending(&mut self) -> Result<&mut PendingRead, NativeError> {
        self.read
            .as_mut()
            .ok_or_else(|| NativeError::new(Classification::ApplicationError, 4264, "No operation defined"))
    }

    fn lookup(&self, read: &PendingRead) -> Result<Vec<Option<Vec<u8>>>, NativeError> {
        let catalog = self.cluster.catalog.read();
        let entry = catalog
            .tables
            .get(&(read.db.clone(), read.table.clone()))
            .ok_or_else(|| NativeError::new(Classification::SchemaError, 723, "No such table existed"))?;
        let row = entry
            .rows
            .iter()
            .find(|row| {
                read.keys
                    .iter()
                    .all(|(name, value)| matches!(row.get(name), Some(Some(stored)) if stored == value))
            })
            .ok_or_else(NativeError::no_data_found)?;
        Ok(read
            .projection
            .iter()
            .map(|name| row.get(name).cloned().flatten())
            .collect())
    }
}

impl Transaction for MemoryTransaction {
    fn read_tuple(&mut self, table: &TableSchema, _lock: LockMode) -> Result<(), NativeError> {
        if self.read.is_some() {
            return Err(NativeError::new(
                Classification::ApplicationError,
                4118,
                "operation already defined",
            ));
        }
        self.read = Some(PendingRead {
            db: table.db.clone(),
            table: table.name.clone(),
            keys: Vec::new(),
            projection: Vec::new(),
        });
        Ok(())
    }

    fn equal(&mut self, column: &str, value: &[u8]) -> Result<(), NativeError> {
        self.pending()?
            .keys
            .push((column.to_string(), value.to_vec()));
        Ok(())
    }

    fn get_value(&mut self, column: &str) -> Result<RecAttrId, NativeError> {
        let read = self.pending()?;
        read.projection.push(column.to_string());
        Ok(RecAttrId(read.projection.len() - 1))
    }

    fn execute(&mut self, exec: ExecType) -> Result<(), NativeError> {
        if exec == ExecType::Rollback {
            self.status = CommitStatus::Aborted;
            self.cluster.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.status = CommitStatus::Started;
        if let Some(err) = self.cluster.faults.fail_execute.lock().clone() {
            return Err(err);
        }
        let read = self.read.take().ok_or_else(|| {
            NativeError::new(Classification::ApplicationError, 4264, "No operation defined")
        })?;
        let result = self.lookup(&read);
        self.read = Some(read);
        match result {
            Ok(results) => {
                self.results = results;
                if exec == ExecType::Commit {
                    self.status = CommitStatus::Committed;
                }
                Ok(())
            }
            Err(err) => {
                self.status = CommitStatus::Aborted;
                Err(err)
            }
        }
    }

    fn commit_status(&self) -> CommitStatus {
        self.status
    }

    fn rec(&self, id: RecAttrId) -> Option<&[u8]> {
        self.results.get(id.0).and_then(|value| value.as_deref())
    }
}

/// Connector over a fixed set of API node slots.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
    api_nodes: Vec<ApiNodeState>,
}

impl MemoryConnector {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            api_nodes: Vec::new(),
        }
    }

    pub fn with_api_nodes(mut self, api_nodes: Vec<ApiNodeState>) -> Self {
        self.api_nodes = api_nodes;
        self
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }
}

impl Connector for MemoryConnector {
    type Cluster = MemoryCluster;

    fn api_nodes(&self, _connection_string: &str) -> Result<Vec<ApiNodeState>, NativeError> {
        Ok(self.api_nodes.clone())
    }

    fn connect(&self, connection_string: &str, node_id: Option<u32>) -> Result<MemoryCluster, NativeError> {
        if connection_string.trim().is_empty() {
            return Err(NativeError::new(
                Classification::ApplicationError,
                -1,
                "empty connection string",
            ));
        }
        if let Some(node_id) = node_id {
            if !self.api_nodes.iter().any(|node| node.node_id == node_id) {
                return Err(NativeError::new(
                    Classification::ApplicationError,
                    -1,
                    format!("no API node slot with id {node_id}"),
                ));
            }
        }
        Ok(self.cluster.clone())
    }
}

fn no_table(db: &str, table: &str) -> Error {
    Error::new(ErrorKind::Client)
        .with_message(format!("{ERR_NO_TABLE}: {db}.{table}"))
}

#[cfg(test)]
mod tests {
    use super::MemoryCluster;
    use crate::core::client::{Cluster, CommitStatus, ExecType, LockMode, Session, Transaction};
    use crate::core::error::Classification;
    use crate::core::schema::{ColumnDescriptor, ColumnType, TableSchema};

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.create_table(TableSchema::new(
            "db",
            "t",
            vec![
                ColumnDescriptor::new("id", ColumnType::Int).primary_key(),
                ColumnDescriptor::new("name", ColumnType::Varchar).with_length(10),
            ],
        ));
        cluster
            .insert_text_row("db", "t", [("id", Some("5")), ("name", Some("bob"))])
            .expect("insert");
        cluster
    }

    #[test]
    fn lookup_matches_native_key_bytes() {
        let cluster = cluster();
        let mut session = cluster.new_session().expect("session");
        let schema = session.table("db", "t").expect("table");
        let mut tx = session.start_transaction().expect("tx");
        tx.read_tuple(&schema, LockMode::CommittedRead).expect("read");
        tx.equal("id", &5i32.to_le_bytes()).expect("equal");
        let name = tx.get_value("name").expect("value");
        tx.execute(ExecType::Commit).expect("execute");
        assert_eq!(tx.rec(name), Some(&b"\x03bob"[..]));
        assert_eq!(tx.commit_status(), CommitStatus::Committed);
        session.close_transaction(tx);
        assert_eq!(cluster.open_transactions(), 0);
    }

    #[test]
    fn missing_rows_report_no_data_found() {
        let cluster = cluster();
        let mut session = cluster.new_session().expect("session");
        let schema = session.table("db", "t").expect("table");
        let mut tx = session.start_transaction().expect("tx");
        tx.read_tuple(&schema, LockMode::CommittedRead).expect("read");
        tx.equal("id", &6i32.to_le_bytes()).expect("equal");
        let err = tx.execute(ExecType::Commit).expect_err("missing");
        assert_eq!(err.classification, Classification::NoDataFound);
        assert!(tx.read_tuple(&schema, LockMode::CommittedRead).is_err());
        session.close_transaction(tx);
    }

    #[test]
    fn session_faults_are_consumed() {
        let cluster = cluster();
        cluster.faults().fail_next_sessions(1);
        assert!(cluster.new_session().is_err());
        assert!(cluster.new_session().is_ok());
        assert_eq!(cluster.sessions_created(), 1);
        assert!(cluster.new_session().expect("session").table("db", "nope").is_err());
    }
}
