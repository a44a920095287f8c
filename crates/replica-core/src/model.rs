//! Remote datamodel types.
//!
//! The remote source publishes one [`ReplicationModel`] per entity. The model is
//! authoritative: local configuration is validated against it before any
//! replication cycle runs.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::types::AttributeType;
use crate::ConfigError;

/// Datamodel for every entity offered by the remote source, keyed by entity name.
pub type Datamodel = HashMap<String, ReplicationModel>;

/// A single attribute as described by the remote datamodel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeModel {
    /// Attribute name
    pub name: String,

    /// Attribute type as published by the remote source.
    ///
    /// Kept as the raw string so entities we never replicate may carry types
    /// this client does not understand. Resolve with [`AttributeModel::attribute_type`].
    #[serde(rename = "type")]
    pub type_name: String,

    /// Whether the attribute may be null
    #[serde(default)]
    pub nullable: bool,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AttributeModel {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: false,
            description: None,
        }
    }

    /// Resolve the published type name against the attribute type registry.
    pub fn attribute_type(&self) -> Result<AttributeType, ConfigError> {
        self.type_name
            .parse::<AttributeType>()
            .map_err(|_| ConfigError::UnsupportedAttributeType {
                attribute: self.name.clone(),
                type_name: self.type_name.clone(),
            })
    }
}

/// Schema of one replicated entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationModel {
    /// Attribute names that uniquely identify a row, in order.
    ///
    /// The remote source publishes either a single name or a list.
    #[serde(deserialize_with = "one_or_many")]
    pub key: Vec<String>,

    /// Attributes of the entity
    pub attributes: Vec<AttributeModel>,
}

impl ReplicationModel {
    pub fn new(key: Vec<String>, attributes: Vec<AttributeModel>) -> Self {
        Self { key, attributes }
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeModel> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Names of all attributes, in datamodel order.
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(key) => vec![key],
        OneOrMany::Many(keys) => keys,
    })
}
