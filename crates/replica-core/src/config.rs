//! Replication configuration document.
//!
//! Loading a configuration is a three step affair:
//!
//! 1. [`RawReplicationConfig::from_json`] parses and structurally validates the
//!    document (unknown fields, empty lists, duplicates).
//! 2. [`normalize`] fills in default table and column names, producing a
//!    canonical [`ReplicationConfig`]. It is a pure function.
//! 3. [`validate_against_model`] cross-checks the canonical config against the
//!    live remote datamodel.
//!
//! Any failure is a [`ConfigError`] and is fatal at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::model::Datamodel;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Could not read file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not have the expected shape
    #[error("Configuration file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but violates a structural rule
    #[error("Configuration file is not valid: {0}")]
    Invalid(String),

    /// Entity absent from the remote datamodel
    #[error("Entity {0} specified in configuration file was not found in datamodel.")]
    UnknownEntity(String),

    /// Attribute absent from the remote datamodel
    #[error("Attribute {attribute} of entity {entity} specified in configuration was not found in datamodel.")]
    UnknownAttribute { entity: String, attribute: String },

    /// A key attribute is not among the replicated attributes
    #[error("Key attribute {attribute} of entity {entity} must be replicated.")]
    MissingKeyAttribute { entity: String, attribute: String },

    /// Attribute type not present in the type registry
    #[error("Attribute {attribute} has unsupported type '{type_name}'")]
    UnsupportedAttributeType { attribute: String, type_name: String },

    /// Entity requested by the caller but not configured
    #[error("Entity {0} is not configured for replication")]
    EntityNotConfigured(String),
}

// ============================================================================
// Raw document
// ============================================================================

/// One replicated entity and the attributes to replicate, in column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    pub attributes: Vec<String>,
}

/// Attribute binding as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawAttributeBinding {
    #[serde(rename = "columnName", default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
}

/// Entity binding as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawBindingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(default)]
    pub attributes: HashMap<String, RawAttributeBinding>,
}

/// The configuration file before defaults are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawReplicationConfig {
    /// Base URL of the remote replication API
    pub replication_url: String,

    /// Local schema holding the ledger table, the operation type and the txid sequence
    pub replication_schema: String,

    /// Entities to replicate
    pub entities: Vec<EntityConfig>,

    /// Optional per-entity bindings
    #[serde(default)]
    pub bindings: HashMap<String, RawBindingConfig>,
}

impl RawReplicationConfig {
    /// Parse and structurally validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawReplicationConfig = serde_json::from_str(text)?;
        raw.validate_schema()?;
        Ok(raw)
    }

    /// Read, parse and structurally validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Structural rules serde alone does not express.
    pub fn validate_schema(&self) -> Result<(), ConfigError> {
        if self.replication_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "replication_url must not be empty".to_string(),
            ));
        }
        check_identifier("replication_schema", &self.replication_schema)?;
        if self.entities.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one entity must be configured".to_string(),
            ));
        }

        let mut entity_names = HashSet::new();
        for entity in &self.entities {
            if entity.name.is_empty() {
                return Err(ConfigError::Invalid("entity name must not be empty".to_string()));
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "entity {} is configured more than once",
                    entity.name
                )));
            }
            if entity.attributes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "entity {} must replicate at least one attribute",
                    entity.name
                )));
            }
            let mut attribute_names = HashSet::new();
            for attribute in &entity.attributes {
                if !attribute_names.insert(attribute.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "attribute {attribute} of entity {} is listed more than once",
                        entity.name
                    )));
                }
            }
        }

        for (entity_name, binding) in &self.bindings {
            let Some(entity) = self.entities.iter().find(|e| &e.name == entity_name) else {
                return Err(ConfigError::Invalid(format!(
                    "binding for {entity_name} has no matching entity"
                )));
            };
            if let Some(table) = &binding.table {
                check_identifier("table", table)?;
            }
            for (attribute, attribute_binding) in &binding.attributes {
                if !entity.attributes.contains(attribute) {
                    return Err(ConfigError::Invalid(format!(
                        "binding for attribute {attribute} of {entity_name} has no matching attribute"
                    )));
                }
                if let Some(column) = &attribute_binding.column_name {
                    check_identifier("columnName", column)?;
                }
            }
        }
        Ok(())
    }
}

fn check_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
    }
    if value.contains('\0') {
        return Err(ConfigError::Invalid(format!(
            "{field} must not contain NUL characters"
        )));
    }
    Ok(())
}

// ============================================================================
// Canonical config
// ============================================================================

/// Attribute binding after defaults are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeBinding {
    #[serde(rename = "columnName")]
    pub column_name: String,
}

/// Entity binding after defaults are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindingConfig {
    pub table: String,
    pub attributes: HashMap<String, AttributeBinding>,
}

impl BindingConfig {
    /// Column bound to `attribute`, falling back to the default naming rule.
    pub fn column_name(&self, attribute: &str) -> String {
        self.attributes
            .get(attribute)
            .map(|b| b.column_name.clone())
            .unwrap_or_else(|| attribute.to_lowercase())
    }
}

/// Canonical configuration: every entity has a binding, every attribute a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationConfig {
    pub replication_url: String,
    pub replication_schema: String,
    pub entities: Vec<EntityConfig>,
    pub bindings: HashMap<String, BindingConfig>,
}

impl ReplicationConfig {
    /// Look up a configured entity.
    pub fn entity(&self, name: &str) -> Result<&EntityConfig, ConfigError> {
        self.entities
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ConfigError::EntityNotConfigured(name.to_string()))
    }

    /// Binding of a configured entity.
    pub fn binding(&self, name: &str) -> Result<&BindingConfig, ConfigError> {
        self.bindings
            .get(name)
            .ok_or_else(|| ConfigError::EntityNotConfigured(name.to_string()))
    }

    /// Resolve a caller-supplied entity filter; an empty filter selects all entities.
    pub fn select_entities(&self, filter: &[String]) -> Result<Vec<&EntityConfig>, ConfigError> {
        if filter.is_empty() {
            return Ok(self.entities.iter().collect());
        }
        filter.iter().map(|name| self.entity(name)).collect()
    }
}

/// Fill in default table and column names.
///
/// Table defaults to the lowercased entity name and column to the lowercased
/// attribute name. Explicit bindings are kept as written.
pub fn normalize(raw: &RawReplicationConfig) -> ReplicationConfig {
    let bindings = raw
        .entities
        .iter()
        .map(|entity| {
            let raw_binding = raw.bindings.get(&entity.name);
            let table = raw_binding
                .and_then(|b| b.table.clone())
                .unwrap_or_else(|| entity.name.to_lowercase());
            let attributes = entity
                .attributes
                .iter()
                .map(|attribute| {
                    let column_name = raw_binding
                        .and_then(|b| b.attributes.get(attribute))
                        .and_then(|b| b.column_name.clone())
                        .unwrap_or_else(|| attribute.to_lowercase());
                    (attribute.clone(), AttributeBinding { column_name })
                })
                .collect();
            (entity.name.clone(), BindingConfig { table, attributes })
        })
        .collect();

    ReplicationConfig {
        replication_url: raw.replication_url.clone(),
        replication_schema: raw.replication_schema.clone(),
        entities: raw.entities.clone(),
        bindings,
    }
}

/// Cross-validate the configuration against the remote datamodel.
pub fn validate_against_model(
    datamodel: &Datamodel,
    config: &ReplicationConfig,
) -> Result<(), ConfigError> {
    for entity in &config.entities {
        let model = datamodel
            .get(&entity.name)
            .ok_or_else(|| ConfigError::UnknownEntity(entity.name.clone()))?;

        for attribute in &entity.attributes {
            let attribute_model =
                model
                    .attribute(attribute)
                    .ok_or_else(|| ConfigError::UnknownAttribute {
                        entity: entity.name.clone(),
                        attribute: attribute.clone(),
                    })?;
            attribute_model.attribute_type()?;
        }

        for key in &model.key {
            if !entity.attributes.contains(key) {
                return Err(ConfigError::MissingKeyAttribute {
                    entity: entity.name.clone(),
                    attribute: key.clone(),
                });
            }
        }

        tracing::debug!(
            entity = %entity.name,
            attributes = entity.attributes.len(),
            "entity configuration matches datamodel"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeModel, ReplicationModel};

    const CONFIG: &str = r#"{
        "replication_url": "https://example.invalid/replikering",
        "replication_schema": "replication",
        "entities": [
            {"name": "Postnummer", "attributes": ["nr", "navn", "stormodtager"]},
            {"name": "Vejstykke", "attributes": ["kommunekode", "kode", "Navn"]}
        ],
        "bindings": {
            "Vejstykke": {
                "table": "vejstykker",
                "attributes": {"Navn": {"columnName": "vejnavn"}}
            }
        }
    }"#;

    fn datamodel() -> Datamodel {
        let mut datamodel = Datamodel::new();
        datamodel.insert(
            "Postnummer".to_string(),
            ReplicationModel::new(
                vec!["nr".to_string()],
                vec![
                    AttributeModel::new("nr", "integer"),
                    AttributeModel::new("navn", "string"),
                    AttributeModel::new("stormodtager", "boolean"),
                ],
            ),
        );
        datamodel.insert(
            "Vejstykke".to_string(),
            ReplicationModel::new(
                vec!["kommunekode".to_string(), "kode".to_string()],
                vec![
                    AttributeModel::new("kommunekode", "integer"),
                    AttributeModel::new("kode", "integer"),
                    AttributeModel::new("Navn", "string"),
                ],
            ),
        );
        datamodel
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let raw = RawReplicationConfig::from_json(CONFIG).unwrap();
        let config = normalize(&raw);

        let postnummer = config.binding("Postnummer").unwrap();
        assert_eq!(postnummer.table, "postnummer");
        assert_eq!(postnummer.column_name("stormodtager"), "stormodtager");

        let vejstykke = config.binding("Vejstykke").unwrap();
        assert_eq!(vejstykke.table, "vejstykker");
        assert_eq!(vejstykke.column_name("Navn"), "vejnavn");
        assert_eq!(vejstykke.column_name("kommunekode"), "kommunekode");
    }

    #[test]
    fn test_normalize_is_pure() {
        let raw = RawReplicationConfig::from_json(CONFIG).unwrap();
        let before = raw.clone();
        let first = normalize(&raw);
        let second = normalize(&raw);
        assert_eq!(raw, before);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let text = CONFIG.replace("\"replication_schema\"", "\"replikation_schema\"");
        assert!(matches!(
            RawReplicationConfig::from_json(&text),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_structural_rules() {
        let mut raw = RawReplicationConfig::from_json(CONFIG).unwrap();
        raw.entities[0].attributes.push("nr".to_string());
        assert!(matches!(raw.validate_schema(), Err(ConfigError::Invalid(_))));

        let mut raw = RawReplicationConfig::from_json(CONFIG).unwrap();
        raw.entities.clear();
        assert!(matches!(raw.validate_schema(), Err(ConfigError::Invalid(_))));

        let mut raw = RawReplicationConfig::from_json(CONFIG).unwrap();
        raw.bindings
            .insert("Husnummer".to_string(), RawBindingConfig::default());
        assert!(matches!(raw.validate_schema(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_against_model_accepts_matching_config() {
        let config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        validate_against_model(&datamodel(), &config).unwrap();
    }

    #[test]
    fn test_validate_against_model_rejects_unknown_entity() {
        let mut config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        config.entities[0].name = "Navngivenvej".to_string();
        let err = validate_against_model(&datamodel(), &config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Entity Navngivenvej specified in configuration file was not found in datamodel."
        );
    }

    #[test]
    fn test_validate_against_model_rejects_unknown_attribute() {
        let mut config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        config.entities[0].attributes.push("ændret".to_string());
        let err = validate_against_model(&datamodel(), &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_validate_against_model_requires_key() {
        let mut config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        config.entities[1].attributes.retain(|a| a != "kode");
        let err = validate_against_model(&datamodel(), &config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKeyAttribute { .. }));
    }

    #[test]
    fn test_validate_against_model_rejects_unsupported_type() {
        let config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        let mut datamodel = datamodel();
        datamodel.get_mut("Postnummer").unwrap().attributes[1].type_name = "money".to_string();
        let err = validate_against_model(&datamodel, &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedAttributeType { .. }));
    }

    #[test]
    fn test_select_entities() {
        let config = normalize(&RawReplicationConfig::from_json(CONFIG).unwrap());
        assert_eq!(config.select_entities(&[]).unwrap().len(), 2);
        let selected = config.select_entities(&["Vejstykke".to_string()]).unwrap();
        assert_eq!(selected[0].name, "Vejstykke");
        assert!(matches!(
            config.select_entities(&["Adresse".to_string()]),
            Err(ConfigError::EntityNotConfigured(_))
        ));
    }
}
