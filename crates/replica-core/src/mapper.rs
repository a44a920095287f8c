//! Table models and row mappers.
//!
//! A [`TableModel`] is the physical view of one replicated entity: target
//! table, key columns and per-column type binding. A [`RowMapper`] turns remote
//! records and change events into flat rows in table column order, ready for
//! bulk loading.

use serde_json::Value;

use crate::config::{BindingConfig, ConfigError, EntityConfig};
use crate::event::{ChangeEvent, Record};
use crate::model::ReplicationModel;
use crate::types::{AttributeType, DistinctClause, EncodeError};

/// Encoded column values in table column order. `None` is NULL.
pub type Row = Vec<Option<String>>;

/// Name of the remote txid column in staging tables and the local txid column in changes tables.
pub const TXID_COLUMN: &str = "txid";

/// Name of the operation column in staging and changes tables.
pub const OPERATION_COLUMN: &str = "operation";

/// One physical column of a replicated table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnModel {
    /// Column name
    pub name: String,
    /// Remote attribute feeding the column
    pub attribute: String,
    /// Attribute type
    pub attribute_type: AttributeType,
    /// Whether the datamodel allows null
    pub nullable: bool,
}

impl ColumnModel {
    pub fn sql_type(&self) -> &'static str {
        self.attribute_type.binding().sql_type
    }

    pub fn distinct_clause(&self) -> DistinctClause {
        self.attribute_type.binding().distinct_clause
    }
}

/// Physical description of a replicated table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableModel {
    /// Target table name, optionally schema-qualified (`schema.table`)
    pub table: String,
    /// Key column names, in key order
    pub primary_key: Vec<String>,
    /// All replicated columns, in configured attribute order
    pub columns: Vec<ColumnModel>,
}

impl TableModel {
    /// Build the table model for `entity` from the datamodel and its binding.
    pub fn new(
        model: &ReplicationModel,
        entity: &EntityConfig,
        binding: &BindingConfig,
    ) -> Result<Self, ConfigError> {
        let columns = entity
            .attributes
            .iter()
            .map(|attribute| {
                let attribute_model =
                    model
                        .attribute(attribute)
                        .ok_or_else(|| ConfigError::UnknownAttribute {
                            entity: entity.name.clone(),
                            attribute: attribute.clone(),
                        })?;
                Ok(ColumnModel {
                    name: binding.column_name(attribute),
                    attribute: attribute.clone(),
                    attribute_type: attribute_model.attribute_type()?,
                    nullable: attribute_model.nullable,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let primary_key = model
            .key
            .iter()
            .map(|key| {
                if entity.attributes.contains(key) {
                    Ok(binding.column_name(key))
                } else {
                    Err(ConfigError::MissingKeyAttribute {
                        entity: entity.name.clone(),
                        attribute: key.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            table: binding.table.clone(),
            primary_key,
            columns,
        })
    }

    /// Column names in table order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Positions of the key columns within a row.
    pub fn key_indexes(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|key| self.columns.iter().position(|c| &c.name == key))
            .collect()
    }

    /// Columns that are not part of the key.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnModel> {
        self.columns
            .iter()
            .filter(move |c| !self.primary_key.contains(&c.name))
    }

    /// Name of the append-only changes log table.
    pub fn changes_table(&self) -> String {
        format!("{}_changes", self.table)
    }

    /// Unqualified table name, used to derive temporary table names.
    pub fn base_name(&self) -> &str {
        self.table
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.table)
    }

    /// Name of the per-cycle staging table holding raw change events.
    pub fn staging_table(&self) -> String {
        format!("tmp_{}_changes", self.base_name())
    }

    /// Name of the per-cycle scratch table holding a fresh snapshot.
    pub fn scratch_table(&self) -> String {
        format!("download_{}", self.base_name())
    }

    /// Mapper producing rows for this table.
    pub fn mapper(&self) -> RowMapper {
        RowMapper {
            columns: self
                .columns
                .iter()
                .map(|c| (c.attribute.clone(), c.attribute_type))
                .collect(),
        }
    }
}

/// Maps remote records to rows in table column order.
#[derive(Debug, Clone)]
pub struct RowMapper {
    columns: Vec<(String, AttributeType)>,
}

impl RowMapper {
    /// Encode a full record. Attributes missing from the record load as NULL.
    pub fn map_record(&self, record: &Record) -> Result<Row, EncodeError> {
        self.columns
            .iter()
            .map(|(attribute, attribute_type)| {
                let value = record.get(attribute).unwrap_or(&Value::Null);
                attribute_type.encode(attribute, value)
            })
            .collect()
    }

    /// Encode a change event as a staging row: `txid`, `operation`, then the columns.
    pub fn map_event(&self, event: &ChangeEvent) -> Result<Row, EncodeError> {
        let mut row = Vec::with_capacity(self.columns.len() + 2);
        row.push(Some(event.txid.to_string()));
        row.push(Some(event.operation.as_str().to_string()));
        row.extend(self.map_record(&event.data)?);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{normalize, RawReplicationConfig};
    use crate::event::Operation;
    use crate::model::AttributeModel;
    use serde_json::json;

    fn table() -> TableModel {
        let raw = RawReplicationConfig::from_json(
            r#"{
                "replication_url": "http://localhost",
                "replication_schema": "replication",
                "entities": [{"name": "Vejstykke", "attributes": ["kode", "kommunekode", "navn", "aktiv"]}],
                "bindings": {"Vejstykke": {"table": "dar.vejstykker", "attributes": {"navn": {"columnName": "vejnavn"}}}}
            }"#,
        )
        .unwrap();
        let config = normalize(&raw);
        let model = ReplicationModel::new(
            vec!["kommunekode".to_string(), "kode".to_string()],
            vec![
                AttributeModel::new("kommunekode", "integer"),
                AttributeModel::new("kode", "integer"),
                AttributeModel::new("navn", "string"),
                AttributeModel::new("aktiv", "boolean"),
            ],
        );
        TableModel::new(
            &model,
            config.entity("Vejstykke").unwrap(),
            config.binding("Vejstykke").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_table_model_columns_follow_configured_order() {
        let table = table();
        assert_eq!(
            table.column_names(),
            vec!["kode", "kommunekode", "vejnavn", "aktiv"]
        );
        assert_eq!(table.primary_key, vec!["kommunekode", "kode"]);
        assert_eq!(table.key_indexes(), vec![1, 0]);
        assert_eq!(
            table.value_columns().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["vejnavn", "aktiv"]
        );
    }

    #[test]
    fn test_derived_table_names() {
        let table = table();
        assert_eq!(table.changes_table(), "dar.vejstykker_changes");
        assert_eq!(table.staging_table(), "tmp_vejstykker_changes");
        assert_eq!(table.scratch_table(), "download_vejstykker");
    }

    #[test]
    fn test_map_record_encodes_by_type() {
        let record = json!({"kode": 12, "kommunekode": 101, "navn": "Rådhuspladsen", "aktiv": true});
        let row = table()
            .mapper()
            .map_record(record.as_object().unwrap())
            .unwrap();
        assert_eq!(
            row,
            vec![
                Some("12".to_string()),
                Some("101".to_string()),
                Some("Rådhuspladsen".to_string()),
                Some("true".to_string()),
            ]
        );
    }

    #[test]
    fn test_map_event_prefixes_txid_and_operation() {
        let data = json!({"kode": 12, "kommunekode": 101});
        let event = ChangeEvent::new(77, Operation::Delete, data.as_object().unwrap().clone());
        let row = table().mapper().map_event(&event).unwrap();
        assert_eq!(row[0].as_deref(), Some("77"));
        assert_eq!(row[1].as_deref(), Some("delete"));
        assert_eq!(row[4], None);
        assert_eq!(row.len(), 6);
    }
}
