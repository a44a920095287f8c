//! Loading the replication configuration and resolving it against the
//! remote datamodel.

use std::collections::BTreeMap;
use std::path::Path;

use replica_core::{
    normalize, validate_against_model, ConfigError, Datamodel, RawReplicationConfig,
    ReplicationConfig, TableModel,
};
use tracing::debug;

/// Read, structurally validate and normalize the configuration at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<ReplicationConfig, ConfigError> {
    let path = path.as_ref();
    let raw = RawReplicationConfig::from_file(path)?;
    let config = normalize(&raw);
    debug!(
        "Loaded replication config from {} with {} entities",
        path.display(),
        config.entities.len()
    );
    Ok(config)
}

/// Cross-validate `config` against `datamodel` and build the table model of
/// every configured entity, keyed by entity name.
pub fn table_models(
    datamodel: &Datamodel,
    config: &ReplicationConfig,
) -> Result<BTreeMap<String, TableModel>, ConfigError> {
    validate_against_model(datamodel, config)?;
    config
        .entities
        .iter()
        .map(|entity| {
            let model = datamodel
                .get(&entity.name)
                .ok_or_else(|| ConfigError::UnknownEntity(entity.name.clone()))?;
            let binding = config.binding(&entity.name)?;
            let table = TableModel::new(model, entity, binding)?;
            Ok((entity.name.clone(), table))
        })
        .collect()
}
