//! Purpose: State machine for one primary-key read over a leased session.
//! Exports: `PkReadOperation`, `OpState`, `ReadOutcome`.
//! Role: Resolves schema, validates, binds, executes and writes the response buffer.
//! Invariants: No native bind call is issued before the request's key set equals the schema's.
//! Invariants: An opened transaction is handed back to the session exactly once on every path.
//! Invariants: Aborting rolls back a started-but-uncommitted transaction before closing it.
//! Invariants: The response status slot always reflects the outcome, even on failure.
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::core::client::{
    CommitStatus, ExecType, LockMode, RecAttrId, Session, Transaction,
};
use crate::core::codec;
use crate::core::error::{
    Classification, ERR_EXECUTE, ERR_INVALID_DATA, ERR_NO_COLUMN, ERR_NO_TABLE, ERR_OP_EXISTS,
    ERR_PK_COLUMN, ERR_PK_COUNT, ERR_START_READ, ERR_START_TX, Error, ErrorKind,
};
use crate::core::request::RequestBuffer;
use crate::core::response::ResponseBuffer;
use crate::core::schema::{SchemaCache, TableSchema};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpState {
    Created,
    Initialized,
    Validated,
    TransactionOpen,
    OperationBound,
    Executed,
    ResponseBuilt,
    Closed,
    Aborted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Found,
    NotFound,
}

impl ReadOutcome {
    pub fn http_code(self) -> u32 {
        match self {
            ReadOutcome::Found => 200,
            ReadOutcome::NotFound => 404,
        }
    }
}

pub struct PkReadOperation<'r, 'w, S: Session> {
    request: RequestBuffer<'r>,
    response: ResponseBuffer<'w>,
    state: OpState,
    schema: Option<Arc<TableSchema>>,
    /// Schema column index for each request key, in request order.
    keys: Vec<usize>,
    /// Schema column index for each output column, in output order.
    projection: Vec<usize>,
    records: Vec<RecAttrId>,
    transaction: Option<S::Transaction>,
}

impl<'r, 'w, S: Session> PkReadOperation<'r, 'w, S> {
    pub fn new(request: RequestBuffer<'r>, response: ResponseBuffer<'w>) -> Self {
        Self {
            request,
            response,
            state: OpState::Created,
            schema: None,
            keys: Vec::new(),
            projection: Vec::new(),
            records: Vec::new(),
            transaction: None,
        }
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    /// Runs every step; on failure aborts and records the error's status in the response.
    pub fn perform(&mut self, session: &mut S, cache: &mut SchemaCache) -> Result<ReadOutcome, Error> {
        match self.run(session, cache) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                debug!(
                    kind = ?err.kind(),
                    column = err.column().unwrap_or(""),
                    state = ?self.state,
                    "primary-key read failed: {err}"
                );
                self.abort(session);
                self.response.set_status(err.http_code());
                self.response.close();
                Err(err)
            }
        }
    }

    fn run(&mut self, session: &mut S, cache: &mut SchemaCache) -> Result<ReadOutcome, Error> {
        self.initialize(session, cache)?;
        self.validate()?;
        self.open_transaction(session)?;
        let outcome = if self.bind()? {
            self.execute()?
        } else {
            self.state = OpState::Executed;
            ReadOutcome::NotFound
        };
        self.build_response(outcome)?;
        self.close(session);
        Ok(outcome)
    }

    /// Resolves the table through the batch's schema cache.
    pub fn initialize(&mut self, session: &mut S, cache: &mut SchemaCache) -> Result<(), Error> {
        self.expect_state(OpState::Created)?;
        let db = self.request.db()?;
        let table = self.request.table()?;
        let schema = cache.get_or_resolve(db, table, || {
            session.table(db, table).map_err(|native| {
                Error::new(ErrorKind::Client)
                    .with_message(format!("{ERR_NO_TABLE}: {db}.{table}"))
                    .with_native(native)
            })
        })?;
        self.schema = Some(schema);
        self.state = OpState::Initialized;
        Ok(())
    }

    /// Checks the key set and projection against the schema.
    pub fn validate(&mut self) -> Result<(), Error> {
        self.expect_state(OpState::Initialized)?;
        let schema = self.schema()?;
        self.request.check_return_types()?;

        let expected = schema.primary_key_count();
        let given = self.request.pk_count()?;
        if given != expected {
            return Err(Error::new(ErrorKind::Client)
                .with_message(format!("{ERR_PK_COUNT}; expecting {expected}, got {given}")));
        }
        let mut seen = HashSet::with_capacity(given);
        let mut keys = Vec::with_capacity(given);
        for index in 0..given {
            let name = self.request.pk_name(index)?;
            let position = schema
                .columns
                .iter()
                .position(|column| column.primary_key && column.name == name)
                .filter(|_| seen.insert(name))
                .ok_or_else(|| {
                    Error::new(ErrorKind::Client)
                        .with_message(ERR_PK_COLUMN)
                        .with_column(name)
                })?;
            keys.push(position);
        }

        let requested = self.request.read_column_count()?;
        let mut projection = Vec::new();
        if requested > 0 {
            for index in 0..requested {
                let name = self.request.read_column_name(index)?;
                let position = schema
                    .columns
                    .iter()
                    .position(|column| !column.primary_key && column.name == name)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Client)
                            .with_message(ERR_NO_COLUMN)
                            .with_column(name)
                    })?;
                codec::check_readable(&schema.columns[position])?;
                projection.push(position);
            }
        } else {
            for (position, column) in schema.columns.iter().enumerate() {
                if !column.primary_key {
                    codec::check_readable(column)?;
                    projection.push(position);
                }
            }
        }

        self.keys = keys;
        self.projection = projection;
        self.state = OpState::Validated;
        Ok(())
    }

    fn open_transaction(&mut self, session: &mut S) -> Result<(), Error> {
        self.expect_state(OpState::Validated)?;
        let transaction = session
            .start_transaction()
            .map_err(|native| Error::native(ERR_START_TX, native))?;
        self.transaction = Some(transaction);
        self.state = OpState::TransactionOpen;
        Ok(())
    }

    /// Defines the committed read; returns false when a key value cannot match any row.
    fn bind(&mut self) -> Result<bool, Error> {
        self.expect_state(OpState::TransactionOpen)?;
        let schema = self.schema()?;
        let mut bound = Vec::with_capacity(self.keys.len());
        for (index, &position) in self.keys.iter().enumerate() {
            let column = &schema.columns[position];
            match codec::bind_key(column, self.request.pk_value(index)?) {
                Ok(bytes) => bound.push((column.name.as_str(), bytes)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(column = column.name.as_str(), "key value cannot match: {err}");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }

        let transaction = self.transaction.as_mut().ok_or_else(no_transaction)?;
        transaction
            .read_tuple(&schema, LockMode::CommittedRead)
            .map_err(|native| Error::native(ERR_START_READ, native))?;
        for (name, bytes) in &bound {
            transaction.equal(name, bytes).map_err(|native| {
                Error::native(ERR_INVALID_DATA, native).with_column(*name)
            })?;
        }
        let mut records = Vec::with_capacity(self.projection.len());
        for &position in &self.projection {
            let name = &schema.columns[position].name;
            let id = transaction
                .get_value(name)
                .map_err(|native| Error::native(ERR_START_READ, native).with_column(name))?;
            records.push(id);
        }
        self.records = records;
        self.state = OpState::OperationBound;
        Ok(true)
    }

    fn execute(&mut self) -> Result<ReadOutcome, Error> {
        self.expect_state(OpState::OperationBound)?;
        let transaction = self.transaction.as_mut().ok_or_else(no_transaction)?;
        let outcome = match transaction.execute(ExecType::Commit) {
            Ok(()) => ReadOutcome::Found,
            Err(native) if native.classification == Classification::NoDataFound => {
                ReadOutcome::NotFound
            }
            Err(native) => return Err(Error::native(ERR_EXECUTE, native)),
        };
        self.state = OpState::Executed;
        Ok(outcome)
    }

    fn build_response(&mut self, outcome: ReadOutcome) -> Result<(), Error> {
        self.expect_state(OpState::Executed)?;
        let schema = self.schema()?;
        let columns = match outcome {
            ReadOutcome::Found => self.projection.len(),
            ReadOutcome::NotFound => 0,
        };
        self.response.set_no_of_columns(columns)?;
        self.response.set_db(&schema.db)?;
        self.response.set_table(&schema.name)?;
        if let Some(id) = self.request.operation_id()? {
            self.response.set_operation_id(id)?;
        }
        if outcome == ReadOutcome::Found {
            let transaction = self.transaction.as_ref().ok_or_else(no_transaction)?;
            for (&position, &record) in self.projection.iter().zip(&self.records) {
                codec::encode_value(&schema.columns[position], transaction.rec(record), &mut self.response)?;
            }
        }
        self.response.set_status(outcome.http_code());
        self.response.close();
        self.state = OpState::ResponseBuilt;
        Ok(())
    }

    fn close(&mut self, session: &mut S) {
        if let Some(transaction) = self.transaction.take() {
            session.close_transaction(transaction);
        }
        self.state = OpState::Closed;
    }

    fn abort(&mut self, session: &mut S) {
        match self.transaction.take() {
            Some(mut transaction) => {
                if transaction.commit_status() == CommitStatus::Started {
                    if let Err(native) = transaction.execute(ExecType::Rollback) {
                        debug!("rollback failed: {native}");
                    }
                }
                session.close_transaction(transaction);
                self.state = OpState::Aborted;
            }
            None => self.state = OpState::Closed,
        }
    }

    fn schema(&self) -> Result<Arc<TableSchema>, Error> {
        self.schema.clone().ok_or_else(|| {
            Error::new(ErrorKind::Server).with_message("operation has no resolved schema")
        })
    }

    fn expect_state(&self, expected: OpState) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::new(ErrorKind::Server).with_message(format!(
                "{ERR_OP_EXISTS}; operation is {:?}, expected {expected:?}",
                self.state
            )));
        }
        Ok(())
    }
}

fn no_transaction() -> Error {
    Error::new(ErrorKind::Server).with_message("operation has no open transaction")
}
