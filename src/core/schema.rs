//! Purpose: Table schema model resolved from the database dictionary.
//! Exports: `ColumnType`, `ArrayType`, `ColumnDescriptor`, `TableSchema`, `SchemaCache`.
//! Role: Typed view of a table the codec and operation dispatch on.
//! Invariants: `ColumnType` is closed; every match over it is exhaustive (no wildcard arms).
//! Invariants: A `TableSchema` is immutable once built and shared via `Arc`.
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::error::Error;
use crate::core::text::Charset;

/// Storage types known to the native client.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Undefined,
    Tinyint,
    Tinyunsigned,
    Smallint,
    Smallunsigned,
    Mediumint,
    Mediumunsigned,
    Int,
    Unsigned,
    Bigint,
    Bigunsigned,
    Float,
    Double,
    Olddecimal,
    Olddecimalunsigned,
    Decimal,
    Decimalunsigned,
    Char,
    Varchar,
    Binary,
    Varbinary,
    Datetime,
    Date,
    Blob,
    Text,
    Bit,
    Longvarchar,
    Longvarbinary,
    Time,
    Year,
    Timestamp,
    Time2,
    Datetime2,
    Timestamp2,
}

impl ColumnType {
    /// SQL-facing name used in diagnostics.
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Undefined => "UNDEFINED",
            ColumnType::Tinyint => "TINYINT",
            ColumnType::Tinyunsigned => "TINYINT UNSIGNED",
            ColumnType::Smallint => "SMALLINT",
            ColumnType::Smallunsigned => "SMALLINT UNSIGNED",
            ColumnType::Mediumint => "MEDIUMINT",
            ColumnType::Mediumunsigned => "MEDIUMINT UNSIGNED",
            ColumnType::Int => "INT",
            ColumnType::Unsigned => "INT UNSIGNED",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Bigunsigned => "BIGINT UNSIGNED",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Olddecimal => "OLDDECIMAL",
            ColumnType::Olddecimalunsigned => "OLDDECIMAL UNSIGNED",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Decimalunsigned => "DECIMAL UNSIGNED",
            ColumnType::Char => "CHAR",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Binary => "BINARY",
            ColumnType::Varbinary => "VARBINARY",
            ColumnType::Datetime => "DATETIME (legacy)",
            ColumnType::Date => "DATE",
            ColumnType::Blob => "BLOB",
            ColumnType::Text => "TEXT",
            ColumnType::Bit => "BIT",
            ColumnType::Longvarchar => "LONGVARCHAR",
            ColumnType::Longvarbinary => "LONGVARBINARY",
            ColumnType::Time => "TIME (legacy)",
            ColumnType::Year => "YEAR",
            ColumnType::Timestamp => "TIMESTAMP (legacy)",
            ColumnType::Time2 => "TIME",
            ColumnType::Datetime2 => "DATETIME",
            ColumnType::Timestamp2 => "TIMESTAMP",
        }
    }

    /// How the stored bytes of a column carry their length.
    pub fn array_type(self) -> ArrayType {
        match self {
            ColumnType::Varchar | ColumnType::Varbinary => ArrayType::ShortVar,
            ColumnType::Longvarchar | ColumnType::Longvarbinary => ArrayType::MediumVar,
            ColumnType::Undefined
            | ColumnType::Tinyint
            | ColumnType::Tinyunsigned
            | ColumnType::Smallint
            | ColumnType::Smallunsigned
            | ColumnType::Mediumint
            | ColumnType::Mediumunsigned
            | ColumnType::Int
            | ColumnType::Unsigned
            | ColumnType::Bigint
            | ColumnType::Bigunsigned
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::Olddecimal
            | ColumnType::Olddecimalunsigned
            | ColumnType::Decimal
            | ColumnType::Decimalunsigned
            | ColumnType::Char
            | ColumnType::Binary
            | ColumnType::Datetime
            | ColumnType::Date
            | ColumnType::Blob
            | ColumnType::Text
            | ColumnType::Bit
            | ColumnType::Time
            | ColumnType::Year
            | ColumnType::Timestamp
            | ColumnType::Time2
            | ColumnType::Datetime2
            | ColumnType::Timestamp2 => ArrayType::Fixed,
        }
    }

    /// Large-object columns are stored out of row and cannot be projected here.
    pub fn is_lob(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::Text)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayType {
    /// No length prefix; data fills the declared length.
    Fixed,
    /// One length byte precedes the data.
    ShortVar,
    /// Two little-endian length bytes precede the data.
    MediumVar,
}

impl ArrayType {
    pub fn prefix_len(self) -> usize {
        match self {
            ArrayType::Fixed => 0,
            ArrayType::ShortVar => 1,
            ArrayType::MediumVar => 2,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Declared length: bytes for character/binary columns, bits for BIT.
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub scale: u32,
    #[serde(default)]
    pub charset: Charset,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: 0,
            precision: 0,
            scale: 0,
            charset: Charset::default(),
            primary_key: false,
            nullable: true,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn array_type(&self) -> ArrayType {
        self.column_type.array_type()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableSchema {
    pub db: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(db: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            db: db.into(),
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| column.primary_key)
    }

    pub fn non_keys(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| !column.primary_key)
    }

    pub fn primary_key_count(&self) -> usize {
        self.primary_keys().count()
    }
}

/// Per-batch memo of resolved table schemas keyed by (database, table).
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<(String, String), Arc<TableSchema>>,
    misses: usize,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema or resolves it once through `resolve`.
    pub fn get_or_resolve<F>(&mut self, db: &str, table: &str, resolve: F) -> Result<Arc<TableSchema>, Error>
    where
        F: FnOnce() -> Result<TableSchema, Error>,
    {
        let key = (db.to_string(), table.to_string());
        if let Some(schema) = self.tables.get(&key) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(resolve()?);
        self.misses += 1;
        self.tables.insert(key, schema.clone());
        Ok(schema)
    }

    /// Number of dictionary lookups performed so far.
    pub fn resolutions(&self) -> usize {
        self.misses
    }
}
