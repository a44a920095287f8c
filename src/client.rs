//! Entity orchestrator.
//!
//! [`ReplicationClient`] runs one replication cycle per call, per entity:
//!
//! | Mode | Requires | Does | Ledger entry |
//! |------|----------|------|--------------|
//! | initialize | uninitialized | snapshot straight into the target table | `download` |
//! | update | initialized | events `watermark+1 ..= current`, reconciled | `event` |
//! | resync | initialized | snapshot into a scratch table, diffed and applied | `download` |
//!
//! Each cycle runs inside one store transaction and records its ledger
//! entry in that same transaction. Any error drops the transaction
//! uncommitted, so a failed cycle leaves no trace and can simply be rerun.
//! Which mode to run, and when, is the caller's decision.

use std::collections::BTreeMap;
use std::fmt;

use ledger::{fetch_window, EntityState, ImportType, SourceTransaction};
use replica_core::{ConfigError, ReplicationConfig, TableModel};
use replica_sink::{ChangeSummary, LoadTarget, ReplicaStore};
use replica_sync_remote::RemoteSource;
use tracing::{debug, info};

use crate::config::table_models;
use crate::pipeline::{copy_stream, DEFAULT_BATCH_SIZE};
use crate::reconcile::{reconcile_staged, ReconcileOutcome};
use crate::ReplicationError;

/// Replication cycle kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Initialize,
    Update,
    Resync,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Initialize => "initialize",
            Mode::Update => "update",
            Mode::Resync => "resync",
        })
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle committed data and a ledger entry.
    Applied {
        /// Remote txid the entity is now consistent with
        source_txid: i64,
        local_txid: i64,
        /// Rows streamed into the target, staging or scratch table
        rows_loaded: u64,
        /// Net changes to the target table
        changes: ChangeSummary,
    },
    /// The remote source is not ahead of the ledger; nothing was written.
    UpToDate { watermark: i64 },
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub entity: String,
    pub mode: Mode,
    pub outcome: CycleOutcome,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            CycleOutcome::Applied {
                source_txid,
                local_txid,
                rows_loaded,
                changes,
            } => write!(
                f,
                "{} {}: remote txid {} applied as local txid {} ({} rows loaded; {})",
                self.mode, self.entity, source_txid, local_txid, rows_loaded, changes
            ),
            CycleOutcome::UpToDate { watermark } => write!(
                f,
                "{} {}: up to date at remote txid {}",
                self.mode, self.entity, watermark
            ),
        }
    }
}

/// Replication state of one entity as seen by the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStatus {
    pub entity: String,
    pub table: String,
    pub state: EntityState,
    pub rows: u64,
}

/// Replication client over a remote source `R` and a replica store `S`.
pub struct ReplicationClient<R, S> {
    remote: R,
    store: S,
    config: ReplicationConfig,
    tables: BTreeMap<String, TableModel>,
    batch_size: usize,
}

impl<R, S> ReplicationClient<R, S>
where
    R: RemoteSource,
    S: ReplicaStore,
{
    /// Fetch the remote datamodel and validate `config` against it.
    pub async fn connect(
        remote: R,
        store: S,
        config: ReplicationConfig,
    ) -> Result<Self, ReplicationError> {
        let datamodel = remote.datamodel().await?;
        let tables = table_models(&datamodel, &config)?;
        info!(
            "Validated {} entities against the remote datamodel",
            tables.len()
        );
        Ok(Self {
            remote,
            store,
            config,
            tables,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Rows per bulk-load batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Table models of all configured entities, in entity name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableModel> {
        self.tables.values()
    }

    pub fn table(&self, entity: &str) -> Result<&TableModel, ConfigError> {
        self.tables
            .get(entity)
            .ok_or_else(|| ConfigError::EntityNotConfigured(entity.to_string()))
    }

    /// Entity names selected by `filter`; an empty filter selects all.
    pub fn select(&self, filter: &[String]) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .config
            .select_entities(filter)?
            .into_iter()
            .map(|e| e.name.clone())
            .collect())
    }

    /// Ledger state and row count of `entity`. Read-only.
    pub async fn status(&mut self, entity: &str) -> Result<EntityStatus, ReplicationError> {
        let table = self.table(entity)?.clone();
        let mut tx = self.store.begin().await?;
        let state = tx.entity_state(entity).await?;
        let rows = tx.row_count(&table).await?;
        tx.rollback().await?;
        Ok(EntityStatus {
            entity: entity.to_string(),
            table: table.table,
            state,
            rows,
        })
    }

    /// Run `mode` for each entity in turn, stopping at the first failure.
    ///
    /// Cycles that committed before the failure stay committed.
    pub async fn run(
        &mut self,
        mode: Mode,
        entities: &[String],
    ) -> Result<Vec<CycleReport>, ReplicationError> {
        let mut reports = Vec::with_capacity(entities.len());
        for entity in entities {
            let report = match mode {
                Mode::Initialize => self.initialize_entity(entity).await?,
                Mode::Update => self.update_entity(entity).await?,
                Mode::Resync => self.resync_entity(entity).await?,
            };
            info!("{}", report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Load a full snapshot of an uninitialized entity.
    pub async fn initialize_entity(&mut self, entity: &str) -> Result<CycleReport, ReplicationError> {
        let table = self.table(entity)?.clone();
        let mut tx = self.store.begin().await?;
        if let EntityState::Initialized { last } = tx.entity_state(entity).await? {
            return Err(ReplicationError::AlreadyInitialized {
                entity: entity.to_string(),
                txid: last.source_txid,
            });
        }

        let source_txid = self.remote.last_transaction().await?.txid;
        let local_txid = tx.allocate_local_txid().await?;
        info!(
            "Initializing {} into {} at remote txid {}",
            entity, table.table, source_txid
        );

        let records = self.remote.download_stream(entity, Some(source_txid)).await?;
        let mapper = table.mapper();
        let sink = tx.bulk_load(&table, LoadTarget::Table).await?;
        let rows_loaded = copy_stream(
            records,
            |record| mapper.map_record(&record),
            sink,
            self.batch_size,
        )
        .await?;

        tx.record(&SourceTransaction::new(
            source_txid,
            local_txid,
            entity,
            ImportType::Download,
        ))
        .await?;
        tx.commit().await?;

        Ok(CycleReport {
            entity: entity.to_string(),
            mode: Mode::Initialize,
            outcome: CycleOutcome::Applied {
                source_txid,
                local_txid,
                rows_loaded,
                changes: ChangeSummary {
                    inserted: rows_loaded,
                    ..ChangeSummary::default()
                },
            },
        })
    }

    /// Apply the remote events after the entity's watermark.
    pub async fn update_entity(&mut self, entity: &str) -> Result<CycleReport, ReplicationError> {
        let table = self.table(entity)?.clone();
        let mut tx = self.store.begin().await?;
        let watermark = match tx.entity_state(entity).await? {
            EntityState::Uninitialized => {
                return Err(ReplicationError::NotInitialized {
                    entity: entity.to_string(),
                })
            }
            EntityState::Initialized { last } => last.source_txid,
        };

        let current = self.remote.last_transaction().await?.txid;
        let Some((from_txid, to_txid)) = fetch_window(watermark, current) else {
            tx.rollback().await?;
            debug!(
                "{} is up to date at remote txid {} (remote at {})",
                entity, watermark, current
            );
            return Ok(CycleReport {
                entity: entity.to_string(),
                mode: Mode::Update,
                outcome: CycleOutcome::UpToDate { watermark },
            });
        };

        let local_txid = tx.allocate_local_txid().await?;
        info!(
            "Updating {} with events {}..={} (local txid {})",
            entity, from_txid, to_txid, local_txid
        );

        tx.create_staging_table(&table).await?;
        let events = self.remote.event_stream(entity, from_txid, to_txid).await?;
        let mapper = table.mapper();
        let sink = tx.bulk_load(&table, LoadTarget::Staging).await?;
        let rows_loaded = copy_stream(
            events,
            |event| mapper.map_event(&event),
            sink,
            self.batch_size,
        )
        .await?;

        let ReconcileOutcome { applied, .. } =
            reconcile_staged(tx.as_mut(), &table, local_txid).await?;

        tx.record(&SourceTransaction::new(
            to_txid,
            local_txid,
            entity,
            ImportType::Event,
        ))
        .await?;
        tx.commit().await?;

        Ok(CycleReport {
            entity: entity.to_string(),
            mode: Mode::Update,
            outcome: CycleOutcome::Applied {
                source_txid: to_txid,
                local_txid,
                rows_loaded,
                changes: applied,
            },
        })
    }

    /// Correct drift by diffing a fresh snapshot against the target table.
    pub async fn resync_entity(&mut self, entity: &str) -> Result<CycleReport, ReplicationError> {
        let table = self.table(entity)?.clone();
        let mut tx = self.store.begin().await?;
        let watermark = match tx.entity_state(entity).await? {
            EntityState::Uninitialized => {
                return Err(ReplicationError::NotInitialized {
                    entity: entity.to_string(),
                })
            }
            EntityState::Initialized { last } => last.source_txid,
        };

        let source_txid = self.remote.last_transaction().await?.txid;
        if source_txid < watermark {
            return Err(ReplicationError::Reconciliation(format!(
                "remote txid {source_txid} of {entity} is behind ledger watermark {watermark}"
            )));
        }
        let local_txid = tx.allocate_local_txid().await?;
        info!(
            "Resyncing {} from snapshot at remote txid {} (local txid {})",
            entity, source_txid, local_txid
        );

        tx.create_scratch_table(&table).await?;
        let records = self.remote.download_stream(entity, Some(source_txid)).await?;
        let mapper = table.mapper();
        let sink = tx.bulk_load(&table, LoadTarget::Scratch).await?;
        let rows_loaded = copy_stream(
            records,
            |record| mapper.map_record(&record),
            sink,
            self.batch_size,
        )
        .await?;

        let diff = tx.diff_scratch(&table, local_txid).await?;
        tx.drop_scratch_table(&table).await?;
        debug!("Snapshot of {} differs by {}", entity, diff);
        let applied = tx.apply_changes(&table, local_txid).await?;
        if applied != diff {
            return Err(ReplicationError::Reconciliation(format!(
                "resync of {entity} computed {diff} but applied {applied}"
            )));
        }

        tx.record(&SourceTransaction::new(
            source_txid,
            local_txid,
            entity,
            ImportType::Download,
        ))
        .await?;
        tx.commit().await?;

        Ok(CycleReport {
            entity: entity.to_string(),
            mode: Mode::Resync,
            outcome: CycleOutcome::Applied {
                source_txid,
                local_txid,
                rows_loaded,
                changes: applied,
            },
        })
    }
}
