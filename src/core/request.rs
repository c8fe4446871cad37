//! Purpose: Decode (and, for callers and tests, encode) primary-key read request buffers.
//! Exports: `RequestBuffer`, `RequestBuilder`, `PkReadRequest`, `PkValue`.
//! Role: Read-only view over caller-owned memory; the executor pulls names and key values from it.
//! Invariants: Decoding never mutates or copies the buffer; every access is bounds-checked.
//! Invariants: Key values are stored length-prefixed and NUL-terminated; both views agree.
use serde::Deserialize;

use crate::core::codec;
use crate::core::error::{ERR_MALFORMED_REQUEST, ERR_RETURN_TYPE, Error, ErrorKind};
use crate::core::schema::ColumnDescriptor;
use crate::core::wire::{
    ADDRESS_SIZE, DEFAULT_DRT, PK_REQ_CAPACITY_IDX, PK_REQ_DB_IDX, PK_REQ_HEADER_END,
    PK_REQ_LENGTH_IDX, PK_REQ_OP_ID_IDX, PK_REQ_OP_TYPE, PK_REQ_OP_TYPE_IDX, PK_REQ_PK_COLS_IDX,
    PK_REQ_READ_COLS_IDX, PK_REQ_TABLE_IDX, read_slot, read_str, read_u32, write_slot,
};

#[derive(Clone, Copy, Debug)]
pub struct RequestBuffer<'a> {
    buf: &'a [u8],
}

impl<'a> RequestBuffer<'a> {
    /// Validates the fixed header and wraps `buf`.
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        if buf.len() < PK_REQ_HEADER_END {
            return Err(malformed("buffer shorter than request header"));
        }
        let request = Self { buf };
        let op_type = request.op_type()?;
        if op_type != PK_REQ_OP_TYPE {
            return Err(malformed(format!("unexpected operation type {op_type}")));
        }
        let length = request.length()? as usize;
        if length < PK_REQ_HEADER_END || length > buf.len() {
            return Err(malformed(format!("declared length {length} exceeds buffer")));
        }
        Ok(Self {
            buf: &buf[..length],
        })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn op_type(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_REQ_OP_TYPE_IDX)
    }

    pub fn length(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_REQ_LENGTH_IDX)
    }

    pub fn capacity(&self) -> Result<u32, Error> {
        read_slot(self.buf, PK_REQ_CAPACITY_IDX)
    }

    pub fn db(&self) -> Result<&'a str, Error> {
        read_str(self.buf, self.slot(PK_REQ_DB_IDX)?)
    }

    pub fn table(&self) -> Result<&'a str, Error> {
        read_str(self.buf, self.slot(PK_REQ_TABLE_IDX)?)
    }

    /// Caller-supplied operation id, if any.
    pub fn operation_id(&self) -> Result<Option<&'a str>, Error> {
        match self.slot(PK_REQ_OP_ID_IDX)? {
            0 => Ok(None),
            offset => read_str(self.buf, offset).map(Some),
        }
    }

    pub fn pk_count(&self) -> Result<usize, Error> {
        let list = self.slot(PK_REQ_PK_COLS_IDX)?;
        Ok(read_u32(self.buf, list)? as usize)
    }

    pub fn pk_name(&self, index: usize) -> Result<&'a str, Error> {
        let tuple = self.pk_tuple(index)?;
        read_str(self.buf, read_u32(self.buf, tuple)? as usize)
    }

    /// Raw key value bytes as sent by the caller (text, or base64 for binary columns).
    pub fn pk_value(&self, index: usize) -> Result<&'a [u8], Error> {
        let tuple = self.pk_tuple(index)?;
        let value = read_u32(self.buf, tuple + ADDRESS_SIZE)? as usize;
        let len = read_u32(self.buf, value)? as usize;
        let start = value + ADDRESS_SIZE;
        start
            .checked_add(len)
            .and_then(|end| self.buf.get(start..end))
            .ok_or_else(|| {
                malformed("primary-key value overruns buffer").with_offset(value as u64)
            })
    }

    pub fn pk_value_str(&self, index: usize) -> Result<&'a str, Error> {
        let bytes = self.pk_value(index)?;
        std::str::from_utf8(bytes).map_err(|err| {
            malformed("primary-key value is not valid UTF-8").with_source(err)
        })
    }

    /// Key value rendered into the native padded or length-prefixed form of a character column.
    pub fn pk_value_native(&self, index: usize, column: &ColumnDescriptor) -> Result<Vec<u8>, Error> {
        codec::pack_string(column, self.pk_value(index)?)
    }

    /// Number of explicitly requested read columns; zero means "all non-key columns".
    pub fn read_column_count(&self) -> Result<usize, Error> {
        match self.slot(PK_REQ_READ_COLS_IDX)? {
            0 => Ok(0),
            list => Ok(read_u32(self.buf, list)? as usize),
        }
    }

    pub fn read_column_name(&self, index: usize) -> Result<&'a str, Error> {
        let column = self.read_column(index)?;
        read_str(self.buf, column + ADDRESS_SIZE)
    }

    pub fn read_column_return_type(&self, index: usize) -> Result<u32, Error> {
        let column = self.read_column(index)?;
        read_u32(self.buf, column)
    }

    /// Fails unless every requested column uses the single supported return type.
    pub fn check_return_types(&self) -> Result<(), Error> {
        for index in 0..self.read_column_count()? {
            let return_type = self.read_column_return_type(index)?;
            if return_type != DEFAULT_DRT {
                return Err(Error::new(ErrorKind::Client)
                    .with_message(format!("{ERR_RETURN_TYPE}: {return_type}"))
                    .with_column(self.read_column_name(index)?));
            }
        }
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<usize, Error> {
        Ok(read_slot(self.buf, index)? as usize)
    }

    fn pk_tuple(&self, index: usize) -> Result<usize, Error> {
        let list = self.slot(PK_REQ_PK_COLS_IDX)?;
        list_entry(self.buf, list, index)
    }

    fn read_column(&self, index: usize) -> Result<usize, Error> {
        match self.slot(PK_REQ_READ_COLS_IDX)? {
            0 => Err(malformed("request has no read-column list")),
            list => list_entry(self.buf, list, index),
        }
    }
}

fn list_entry(buf: &[u8], list: usize, index: usize) -> Result<usize, Error> {
    let count = read_u32(buf, list)? as usize;
    if index >= count {
        return Err(malformed(format!("list index {index} out of range (count {count})")));
    }
    Ok(read_u32(buf, list + ADDRESS_SIZE * (index + 1))? as usize)
}

fn malformed(detail: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Client).with_message(format!("{ERR_MALFORMED_REQUEST}: {detail}"))
}

/// Encodes request buffers in the layout `RequestBuffer` reads.
#[derive(Clone, Debug, Default)]
pub struct RequestBuilder {
    db: String,
    table: String,
    pks: Vec<(String, Vec<u8>)>,
    read_columns: Option<Vec<(String, u32)>>,
    operation_id: Option<String>,
}

impl RequestBuilder {
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn pk(mut self, name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.pks.push((name.into(), value.as_ref().to_vec()));
        self
    }

    pub fn column(self, name: impl Into<String>) -> Self {
        self.column_with_return_type(name, DEFAULT_DRT)
    }

    pub fn column_with_return_type(mut self, name: impl Into<String>, return_type: u32) -> Self {
        self.read_columns
            .get_or_insert_with(Vec::new)
            .push((name.into(), return_type));
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PK_REQ_HEADER_END];

        let db = push_cstr(&mut buf, self.db.as_bytes());
        let table = push_cstr(&mut buf, self.table.as_bytes());
        let op_id = self
            .operation_id
            .as_ref()
            .map(|id| push_cstr(&mut buf, id.as_bytes()))
            .unwrap_or(0);

        let mut tuples = Vec::with_capacity(self.pks.len());
        for (name, value) in &self.pks {
            let name_off = push_cstr(&mut buf, name.as_bytes());
            let value_off = push_u32(&mut buf, value.len() as u32);
            buf.extend_from_slice(value);
            buf.push(0);
            let tuple = push_u32(&mut buf, name_off);
            push_u32(&mut buf, value_off);
            tuples.push(tuple);
        }
        let pk_list = push_list(&mut buf, &tuples);

        let read_cols = match &self.read_columns {
            None => 0,
            Some(columns) => {
                let mut entries = Vec::with_capacity(columns.len());
                for (name, return_type) in columns {
                    let entry = push_u32(&mut buf, *return_type);
                    push_cstr(&mut buf, name.as_bytes());
                    entries.push(entry);
                }
                push_list(&mut buf, &entries)
            }
        };

        let len = buf.len() as u32;
        write_slot(&mut buf, PK_REQ_OP_TYPE_IDX, PK_REQ_OP_TYPE);
        write_slot(&mut buf, PK_REQ_CAPACITY_IDX, len);
        write_slot(&mut buf, PK_REQ_LENGTH_IDX, len);
        write_slot(&mut buf, PK_REQ_DB_IDX, db);
        write_slot(&mut buf, PK_REQ_TABLE_IDX, table);
        write_slot(&mut buf, PK_REQ_PK_COLS_IDX, pk_list);
        write_slot(&mut buf, PK_REQ_READ_COLS_IDX, read_cols);
        write_slot(&mut buf, PK_REQ_OP_ID_IDX, op_id);
        buf
    }
}

fn push_u32(buf: &mut Vec<u8>, value: u32) -> u32 {
    let offset = buf.len() as u32;
    buf.extend_from_slice(&value.to_le_bytes());
    offset
}

fn push_cstr(buf: &mut Vec<u8>, bytes: &[u8]) -> u32 {
    let offset = buf.len() as u32;
    buf.extend_from_slice(bytes);
    buf.push(0);
    offset
}

fn push_list(buf: &mut Vec<u8>, entries: &[u32]) -> u32 {
    let offset = push_u32(buf, entries.len() as u32);
    for entry in entries {
        push_u32(buf, *entry);
    }
    offset
}

/// JSON form of a key value: strings pass through, numbers use their literal text.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PkValue {
    Text(String),
    Number(serde_json::Number),
}

impl PkValue {
    pub fn to_text(&self) -> String {
        match self {
            PkValue::Text(text) => text.clone(),
            PkValue::Number(number) => number.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PkFilter {
    pub column: String,
    pub value: PkValue,
}

/// JSON description of one lookup, as the REST layer receives it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PkReadRequest {
    pub db: String,
    pub table: String,
    pub filters: Vec<PkFilter>,
    #[serde(default)]
    pub read_columns: Option<Vec<String>>,
    #[serde(default)]
    pub operation_id: Option<String>,
}

impl PkReadRequest {
    pub fn to_builder(&self) -> RequestBuilder {
        let mut builder = RequestBuilder::new(&self.db, &self.table);
        for filter in &self.filters {
            builder = builder.pk(&filter.column, filter.value.to_text());
        }
        if let Some(columns) = &self.read_columns {
            for column in columns {
                builder = builder.column(column);
            }
        }
        if let Some(id) = &self.operation_id {
            builder = builder.operation_id(id);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::{PkReadRequest, RequestBuffer, RequestBuilder};
    use crate::core::error::ErrorKind;
    use crate::core::schema::{ColumnDescriptor, ColumnType};
    use crate::core::wire::{PK_REQ_LENGTH_IDX, write_slot};

    #[test]
    fn decodes_what_the_builder_encodes() {
        let bytes = RequestBuilder::new("db", "t")
            .pk("id0", "5")
            .pk("id1", "abc")
            .column("col0")
            .column("col1")
            .operation_id("op-1")
            .build();
        let req = RequestBuffer::new(&bytes).expect("decode");

        assert_eq!(req.db().expect("db"), "db");
        assert_eq!(req.table().expect("table"), "t");
        assert_eq!(req.operation_id().expect("op id"), Some("op-1"));
        assert_eq!(req.pk_count().expect("count"), 2);
        assert_eq!(req.pk_name(1).expect("name"), "id1");
        assert_eq!(req.pk_value(0).expect("value"), b"5");
        assert_eq!(req.pk_value_str(1).expect("value"), "abc");
        assert_eq!(req.read_column_count().expect("cols"), 2);
        assert_eq!(req.read_column_name(1).expect("col"), "col1");
        assert_eq!(req.length().expect("len") as usize, bytes.len());
        req.check_return_types().expect("default return types");
    }

    #[test]
    fn missing_optional_sections_read_as_absent() {
        let bytes = RequestBuilder::new("db", "t").pk("id", "1").build();
        let req = RequestBuffer::new(&bytes).expect("decode");
        assert_eq!(req.operation_id().expect("op id"), None);
        assert_eq!(req.read_column_count().expect("cols"), 0);
        assert!(req.read_column_name(0).is_err());
    }

    #[test]
    fn unsupported_return_type_is_a_client_error() {
        let bytes = RequestBuilder::new("db", "t")
            .pk("id", "1")
            .column_with_return_type("col0", 7)
            .build();
        let req = RequestBuffer::new(&bytes).expect("decode");
        let err = req.check_return_types().expect_err("bad return type");
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.column(), Some("col0"));
    }

    #[test]
    fn truncated_buffers_are_rejected_without_panicking() {
        let bytes = RequestBuilder::new("db", "t").pk("id", "1").build();
        assert!(RequestBuffer::new(&bytes[..10]).is_err());

        let mut lying = bytes.clone();
        write_slot(&mut lying, PK_REQ_LENGTH_IDX, bytes.len() as u32 + 100);
        assert!(RequestBuffer::new(&lying).is_err());

        let cut = &bytes[..bytes.len() - 8];
        let mut shortened = cut.to_vec();
        write_slot(&mut shortened, PK_REQ_LENGTH_IDX, cut.len() as u32);
        let req = RequestBuffer::new(&shortened).expect("header still valid");
        assert!(req.pk_name(0).is_err());
    }

    #[test]
    fn pk_value_native_pads_char_columns() {
        let bytes = RequestBuilder::new("db", "t").pk("id", "ab").build();
        let req = RequestBuffer::new(&bytes).expect("decode");
        let column = ColumnDescriptor::new("id", ColumnType::Char).with_length(4);
        assert_eq!(req.pk_value_native(0, &column).expect("pack"), b"ab  ");
        let column = ColumnDescriptor::new("id", ColumnType::Varchar).with_length(4);
        assert_eq!(req.pk_value_native(0, &column).expect("pack"), b"\x02ab");
    }

    #[test]
    fn json_requests_accept_numeric_key_values() {
        let request: PkReadRequest = serde_json::from_str(
            r#"{"db":"t","table":"u","filters":[{"column":"id","value":5}],"operationId":"x"}"#,
        )
        .expect("parse");
        let bytes = request.to_builder().build();
        let req = RequestBuffer::new(&bytes).expect("decode");
        assert_eq!(req.pk_value_str(0).expect("value"), "5");
        assert_eq!(req.operation_id().expect("op id"), Some("x"));
    }
}
