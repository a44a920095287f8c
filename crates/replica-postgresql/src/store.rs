//! PostgreSQL replica store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger::{ImportType, Ledger, SourceTransaction};
use replica_core::{TableModel, OPERATION_COLUMN, TXID_COLUMN};
use replica_sink::{
    ChangeSummary, LoadTarget, NormalizationRule, ReplicaStore, ReplicaTransaction, RowSink,
    StoreError,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row as PgRow, Transaction};
use tracing::{debug, error, info};

use crate::copy::CopyRowSink;
use crate::ddl::PostgreSQLDdl;
use crate::sql::ReplicationSql;
use crate::statement::Statement;

/// Replica store backed by one PostgreSQL connection.
pub struct PgStore {
    client: Client,
    sql: ReplicationSql,
}

impl PgStore {
    pub fn new(client: Client, replication_schema: impl Into<String>) -> Self {
        Self {
            client,
            sql: ReplicationSql::new(replication_schema),
        }
    }

    /// Connect to `database_url` and spawn the connection driver.
    pub async fn connect(
        database_url: &str,
        replication_schema: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(StoreError::database)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        Ok(Self::new(client, replication_schema))
    }

    pub fn sql(&self) -> &ReplicationSql {
        &self.sql
    }

    /// DDL script for the replication schema and `tables`.
    pub fn ddl(&self, tables: &[TableModel]) -> String {
        PostgreSQLDdl::new(&self.sql).script(tables)
    }

    /// Create the replication schema and every table in `tables` if missing.
    pub async fn install_schema(&mut self, tables: &[TableModel]) -> Result<(), StoreError> {
        let script = self.ddl(tables);
        info!(
            "Installing replication schema {} with {} tables",
            self.sql.schema(),
            tables.len()
        );
        self.client
            .batch_execute(&script)
            .await
            .map_err(StoreError::database)
    }
}

#[async_trait]
impl ReplicaStore for PgStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn ReplicaTransaction + 'a>, StoreError> {
        let tx = self
            .client
            .transaction()
            .await
            .map_err(StoreError::database)?;
        Ok(Box::new(PgTransaction {
            tx,
            sql: self.sql.clone(),
        }))
    }
}

/// One cycle's transaction. Dropped without commit, it rolls back.
pub struct PgTransaction<'a> {
    tx: Transaction<'a>,
    sql: ReplicationSql,
}

impl<'a> PgTransaction<'a> {
    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        debug!("{}", statement.sql());
        self.tx
            .execute(statement.sql(), &statement.bind())
            .await
            .map_err(StoreError::database)
    }

    async fn query_one(&self, statement: &Statement) -> Result<PgRow, StoreError> {
        debug!("{}", statement.sql());
        self.tx
            .query_one(statement.sql(), &statement.bind())
            .await
            .map_err(StoreError::database)
    }

    async fn count(&self, statement: &Statement) -> Result<u64, StoreError> {
        let row = self.query_one(statement).await?;
        let count: i64 = row.try_get(0).map_err(StoreError::database)?;
        Ok(count as u64)
    }
}

fn entry_from_row(row: &PgRow) -> Result<SourceTransaction, StoreError> {
    let import_type: String = row.try_get(3).map_err(StoreError::database)?;
    let recorded_at: DateTime<Utc> = row.try_get(4).map_err(StoreError::database)?;
    Ok(SourceTransaction {
        source_txid: row.try_get(0).map_err(StoreError::database)?,
        local_txid: row.try_get(1).map_err(StoreError::database)?,
        entity: row.try_get(2).map_err(StoreError::database)?,
        import_type: import_type
            .parse::<ImportType>()
            .map_err(StoreError::invariant)?,
        recorded_at: Some(recorded_at),
    })
}

#[async_trait]
impl<'a> Ledger for PgTransaction<'a> {
    type Error = StoreError;

    async fn last_entry(&mut self, entity: &str) -> Result<Option<SourceTransaction>, StoreError> {
        let statement = self.sql.last_ledger_entry(entity);
        let row = self
            .tx
            .query_opt(statement.sql(), &statement.bind())
            .await
            .map_err(StoreError::database)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn record(&mut self, entry: &SourceTransaction) -> Result<(), StoreError> {
        let watermark = self
            .last_entry(&entry.entity)
            .await?
            .map(|last| last.source_txid);
        entry.check_follows(watermark)?;
        let statement = self.sql.record_ledger_entry(
            entry.source_txid,
            entry.local_txid,
            &entry.entity,
            entry.import_type.as_str(),
        );
        self.query_one(&statement).await?;
        debug!(
            "Recorded {} import of {} at remote txid {} (local txid {})",
            entry.import_type, entry.entity, entry.source_txid, entry.local_txid
        );
        Ok(())
    }
}

#[async_trait]
impl<'a> ReplicaTransaction for PgTransaction<'a> {
    async fn allocate_local_txid(&mut self) -> Result<i64, StoreError> {
        let row = self.query_one(&self.sql.allocate_local_txid()).await?;
        row.try_get(0).map_err(StoreError::database)
    }

    async fn bulk_load<'s>(
        &'s mut self,
        table: &TableModel,
        target: LoadTarget,
    ) -> Result<Box<dyn RowSink + 's>, StoreError> {
        let name = target.table_name(table);
        let mut columns = Vec::with_capacity(table.columns.len() + 2);
        if target == LoadTarget::Staging {
            columns.push(TXID_COLUMN);
            columns.push(OPERATION_COLUMN);
        }
        columns.extend(table.column_names());
        let copy = self.sql.copy_in(&name, &columns);
        let sink = CopyRowSink::open(&self.tx, name, &copy).await?;
        Ok(Box::new(sink))
    }

    async fn create_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.execute(&self.sql.create_staging_table(table)).await?;
        self.execute(&self.sql.add_arrival_column(table)).await?;
        Ok(())
    }

    async fn staged_count(&mut self, table: &TableModel) -> Result<u64, StoreError> {
        self.count(&self.sql.count_rows(&table.staging_table())).await
    }

    async fn promote_staged(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<u64, StoreError> {
        self.execute(&self.sql.promote_staged(table, local_txid)).await
    }

    async fn drop_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.execute(&self.sql.drop_temp_table(&table.staging_table())).await?;
        Ok(())
    }

    async fn normalize_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
        rule: NormalizationRule,
    ) -> Result<u64, StoreError> {
        self.execute(&self.sql.normalize(table, local_txid, rule)).await
    }

    async fn create_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.execute(&self.sql.create_scratch_table(table)).await?;
        Ok(())
    }

    async fn diff_scratch(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError> {
        let inserted = self.execute(&self.sql.diff_inserts(table, local_txid)).await?;
        let updated = match self.sql.diff_updates(table, local_txid) {
            Some(statement) => self.execute(&statement).await?,
            None => 0,
        };
        let deleted = self.execute(&self.sql.diff_deletes(table, local_txid)).await?;
        Ok(ChangeSummary {
            inserted,
            updated,
            deleted,
        })
    }

    async fn drop_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.execute(&self.sql.drop_temp_table(&table.scratch_table())).await?;
        Ok(())
    }

    async fn apply_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError> {
        let deleted = self.execute(&self.sql.apply_deletes(table, local_txid)).await?;
        let updated = match self.sql.apply_updates(table, local_txid) {
            Some(statement) => self.execute(&statement).await?,
            None => 0,
        };
        let statement = self.sql.apply_inserts(table, local_txid);
        let inserted = self
            .tx
            .execute(statement.sql(), &statement.bind())
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::invariant(format!(
                        "insert into {} hit an existing key: {e}",
                        table.table
                    ))
                } else {
                    StoreError::database(e)
                }
            })?;
        Ok(ChangeSummary {
            inserted,
            updated,
            deleted,
        })
    }

    async fn row_count(&mut self, table: &TableModel) -> Result<u64, StoreError> {
        self.count(&self.sql.count_rows(&table.table)).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::database)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::database)
    }
}
