//! A small `Vejnavn` (street name) entity: key `id`, one value column `navn`.

use replica_core::{
    normalize, AttributeModel, ChangeEvent, Datamodel, Operation, RawReplicationConfig, Record,
    ReplicationConfig, ReplicationModel, Row, TableModel,
};
use serde_json::json;

pub const ENTITY: &str = "Vejnavn";

pub fn datamodel() -> Datamodel {
    let mut model = Datamodel::new();
    model.insert(
        ENTITY.to_string(),
        ReplicationModel::new(
            vec!["id".to_string()],
            vec![
                AttributeModel::new("id", "integer"),
                AttributeModel::new("navn", "string"),
            ],
        ),
    );
    model
}

pub fn config() -> ReplicationConfig {
    let raw = RawReplicationConfig {
        replication_url: "static://replikering".to_string(),
        replication_schema: "replication".to_string(),
        entities: vec![replica_core::EntityConfig {
            name: ENTITY.to_string(),
            attributes: vec!["id".to_string(), "navn".to_string()],
        }],
        bindings: Default::default(),
    };
    normalize(&raw)
}

pub fn vejnavn_table() -> TableModel {
    let config = config();
    let model = datamodel();
    match (
        model.get(ENTITY),
        config.entity(ENTITY),
        config.binding(ENTITY),
    ) {
        (Some(model), Ok(entity), Ok(binding)) => TableModel::new(model, entity, binding)
            .unwrap_or_else(|e| panic!("fixture table model is invalid: {e}")),
        _ => panic!("fixture config does not cover {ENTITY}"),
    }
}

/// Target table row.
pub fn vejnavn(id: i64, navn: &str) -> Row {
    vec![Some(id.to_string()), Some(navn.to_string())]
}

/// Staging row: `txid`, `operation`, then the columns.
pub fn vejnavn_event(txid: i64, operation: &str, id: i64, navn: &str) -> Row {
    vec![
        Some(txid.to_string()),
        Some(operation.to_string()),
        Some(id.to_string()),
        Some(navn.to_string()),
    ]
}

/// Remote snapshot record.
pub fn record(id: i64, navn: &str) -> Record {
    match json!({"id": id, "navn": navn}) {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Remote change event.
pub fn event(txid: i64, operation: Operation, id: i64, navn: &str) -> ChangeEvent {
    ChangeEvent::new(txid, operation, record(id, navn))
}
