//! Purpose: JSON fixture format describing tables, rows and API node slots.
//! Exports: `Fixture`, `FixtureTable`.
//! Role: Seeds the in-process cluster behind the CLI and integration tests.
//! Invariants: Row values are text in the column's request syntax; numbers use their literal text.
//! Invariants: Loading fails on the first unknown column or unstorable value, naming the column.
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::client::ApiNodeState;
use crate::core::error::{ERR_INVALID_DATA, Error, ErrorKind};
use crate::core::memory::{MemoryCluster, MemoryConnector};
use crate::core::schema::{ColumnDescriptor, TableSchema};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub tables: Vec<FixtureTable>,
    #[serde(default)]
    pub api_nodes: Vec<ApiNodeState>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureTable {
    pub db: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Client)
                .with_message(format!("failed to read fixture {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Client)
                .with_message("fixture is not valid JSON")
                .with_offset(err.column() as u64)
                .with_source(err)
        })
    }

    /// Builds a cluster holding every table and row, behind a connector listing the node slots.
    pub fn into_connector(self) -> Result<MemoryConnector, Error> {
        let cluster = MemoryCluster::new();
        for table in self.tables {
            cluster.create_table(TableSchema::new(&table.db, &table.table, table.columns));
            for row in &table.rows {
                let mut values = Vec::with_capacity(row.len());
                for (name, value) in row {
                    values.push((name.as_str(), row_text(name, value)?));
                }
                cluster.insert_text_row(
                    &table.db,
                    &table.table,
                    values.iter().map(|(name, text)| (*name, text.as_deref())),
                )?;
            }
        }
        Ok(MemoryConnector::new(cluster).with_api_nodes(self.api_nodes))
    }
}

fn row_text(column: &str, value: &Value) -> Result<Option<String>, Error> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(Error::new(ErrorKind::Client)
            .with_message(format!("{ERR_INVALID_DATA}; fixture values are strings, numbers or null"))
            .with_column(column)),
    }
}

#[cfg(test)]
mod tests {
    use super::Fixture;
    use crate::core::client::{Cluster, Session};
    use crate::core::error::ErrorKind;

    const FIXTURE: &str = r#"{
        "tables": [{
            "db": "shop",
            "table": "items",
            "columns": [
                {"name": "id", "type": "int", "primaryKey": true},
                {"name": "label", "type": "varchar", "length": 40},
                {"name": "price", "type": "decimal", "precision": 8, "scale": 2}
            ],
            "rows": [
                {"id": 1, "label": "lamp", "price": "19.99"},
                {"id": 2, "label": null, "price": 5}
            ]
        }],
        "apiNodes": [{"nodeId": 65, "status": "noContact"}]
    }"#;

    #[test]
    fn loads_tables_rows_and_nodes() {
        let fixture = Fixture::from_json(FIXTURE).expect("fixture");
        assert_eq!(fixture.api_nodes.len(), 1);
        let connector = fixture.into_connector().expect("connector");
        let mut session = connector.cluster().new_session().expect("session");
        let schema = session.table("shop", "items").expect("table");
        assert_eq!(schema.primary_key_count(), 1);
        assert_eq!(schema.columns.len(), 3);
    }

    #[test]
    fn rejects_unknown_columns_and_nested_values() {
        let unknown = FIXTURE.replace(r#""label": "lamp""#, r#""colour": "red""#);
        let err = Fixture::from_json(&unknown)
            .expect("fixture")
            .into_connector()
            .expect_err("unknown column");
        assert_eq!(err.column(), Some("colour"));

        let nested = FIXTURE.replace(r#""label": "lamp""#, r#""label": ["lamp"]"#);
        let err = Fixture::from_json(&nested)
            .expect("fixture")
            .into_connector()
            .expect_err("nested value");
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.column(), Some("label"));
    }

    #[test]
    fn malformed_json_is_a_client_error() {
        let err = Fixture::from_json("{\"tables\": [").expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Client);
    }
}
