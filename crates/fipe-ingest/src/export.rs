//! Export of unified extraction batches
//!
//! [`PgSink`] upserts each target table in its own transaction. A failure on
//! one table is rolled back and logged; the remaining tables are still
//! exported. Nothing escapes the sink: callers inspect the [`ExportReport`].

use async_trait::async_trait;
use fipe_common::types::ExtractionResult;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{error, info};

/// Rows per INSERT statement (9 binds per fipe row stays far below the
/// 65535 parameter limit)
pub const DEFAULT_EXPORT_BATCH_SIZE: usize = 1000;

/// Target tables, in export order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Fipe,
    Brands,
    Models,
    Years,
}

impl Table {
    pub const EXPORT_ORDER: [Table; 4] = [Table::Fipe, Table::Brands, Table::Models, Table::Years];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Fipe => "fipe",
            Table::Brands => "brands",
            Table::Models => "models",
            Table::Years => "years",
        }
    }

    pub fn row_count(&self, batch: &ExtractionResult) -> usize {
        match self {
            Table::Fipe => batch.data.len(),
            Table::Brands => batch.brand.len(),
            Table::Models => batch.models.len(),
            Table::Years => batch.years.len(),
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of exporting one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub table: Table,
    /// Rows written (after de-duplication) or offered, on failure
    pub rows: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub tables: Vec<TableOutcome>,
}

impl ExportReport {
    /// Every table failed for the same reason (e.g. no connection)
    pub fn unavailable(batch: &ExtractionResult, reason: &str) -> Self {
        Self {
            tables: Table::EXPORT_ORDER
                .iter()
                .map(|table| TableOutcome {
                    table: *table,
                    rows: table.row_count(batch),
                    error: Some(reason.to_string()),
                })
                .collect(),
        }
    }

    pub fn failed_tables(&self) -> Vec<Table> {
        self.tables
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .map(|outcome| outcome.table)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.tables.iter().all(|outcome| outcome.error.is_none())
    }
}

/// Destination of unified batches
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn export_batch(&self, batch: &ExtractionResult) -> ExportReport;
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// Upserts batches into `brands`, `models`, `years` and `fipe`
pub struct PgSink {
    pool: PgPool,
    batch_size: usize,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_EXPORT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    async fn export_table(
        &self,
        conn: &mut PgConnection,
        table: Table,
        batch: &ExtractionResult,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = conn.begin().await?;

        let written = match table {
            Table::Fipe => self.upsert_fipe(&mut tx, batch).await,
            Table::Brands => {
                let rows = last_by_key(&batch.brand, |b| b.id.as_str());
                let rows = rows.iter().map(|b| (b.id.as_str(), b.name.as_str())).collect();
                self.upsert_named(&mut tx, table, rows).await
            },
            Table::Models => {
                let rows = last_by_key(&batch.models, |m| m.id.as_str());
                let rows = rows.iter().map(|m| (m.id.as_str(), m.name.as_str())).collect();
                self.upsert_named(&mut tx, table, rows).await
            },
            Table::Years => {
                let rows = last_by_key(&batch.years, |y| y.id.as_str());
                let rows = rows.iter().map(|y| (y.id.as_str(), y.name.as_str())).collect();
                self.upsert_named(&mut tx, table, rows).await
            },
        };

        match written {
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows)
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(table = %table, error = %rollback, "Failed to roll back");
                }
                Err(e)
            },
        }
    }

    /// `(id, name)` tables
    async fn upsert_named(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: Table,
        rows: Vec<(&str, &str)>,
    ) -> Result<usize, sqlx::Error> {
        for chunk in rows.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} (id, name) ", table.name()));

            query_builder.push_values(chunk, |mut b, (id, name)| {
                b.push_bind(*id).push_bind(*name);
            });

            query_builder.push(" ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name");

            query_builder.build().execute(&mut **tx).await?;
        }

        Ok(rows.len())
    }

    async fn upsert_fipe(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch: &ExtractionResult,
    ) -> Result<usize, sqlx::Error> {
        let rows = last_by_key(&batch.data, |d| d.fipe_id.as_str());

        for chunk in rows.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO fipe (
                    id,
                    type,
                    value,
                    brand,
                    model,
                    year,
                    fuel,
                    month_reference,
                    fuel_sign
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, detail| {
                b.push_bind(detail.fipe_id.as_str())
                    .push_bind(detail.vehicle_type)
                    .push_bind(&detail.value)
                    .push_bind(detail.brand_name.as_str())
                    .push_bind(detail.model_name.as_str())
                    .push_bind(detail.year_name.as_str())
                    .push_bind(detail.fuel.as_str())
                    .push_bind(detail.month_reference.as_str())
                    .push_bind(detail.fuel_sign.as_str());
            });

            query_builder.push(
                r#"
                ON CONFLICT (id)
                DO UPDATE SET
                    type = EXCLUDED.type,
                    value = EXCLUDED.value,
                    brand = EXCLUDED.brand,
                    model = EXCLUDED.model,
                    year = EXCLUDED.year,
                    fuel = EXCLUDED.fuel,
                    month_reference = EXCLUDED.month_reference,
                    fuel_sign = EXCLUDED.fuel_sign
                "#,
            );

            query_builder.build().execute(&mut **tx).await?;
        }

        Ok(rows.len())
    }
}

#[async_trait]
impl ExportSink for PgSink {
    async fn export_batch(&self, batch: &ExtractionResult) -> ExportReport {
        // One connection for the whole multi-table export, released on return
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to acquire database connection, batch not exported");
                return ExportReport::unavailable(batch, &e.to_string());
            },
        };

        let mut report = ExportReport::default();

        for table in Table::EXPORT_ORDER {
            let outcome = match self.export_table(&mut conn, table, batch).await {
                Ok(rows) => {
                    info!(table = %table, rows, "Exported rows");
                    TableOutcome {
                        table,
                        rows,
                        error: None,
                    }
                },
                Err(e) => {
                    error!(table = %table, error = %e, "Failed to insert data, table rolled back");
                    TableOutcome {
                        table,
                        rows: table.row_count(batch),
                        error: Some(e.to_string()),
                    }
                },
            };
            report.tables.push(outcome);
        }

        report
    }
}

// ============================================================================
// Dry run
// ============================================================================

/// Logs what would be exported without touching a database
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

#[async_trait]
impl ExportSink for DryRunSink {
    async fn export_batch(&self, batch: &ExtractionResult) -> ExportReport {
        info!(summary = %batch.summary(), "Dry run, skipping export");

        ExportReport {
            tables: Table::EXPORT_ORDER
                .iter()
                .map(|table| TableOutcome {
                    table: *table,
                    rows: table.row_count(batch),
                    error: None,
                })
                .collect(),
        }
    }
}

/// Drop earlier rows sharing a key with a later one
///
/// A multi-row upsert cannot touch the same key twice, so this reproduces
/// sequential "last write wins" while keeping first-seen order.
pub(crate) fn last_by_key<'a, T, K, F>(rows: &'a [T], key: F) -> Vec<&'a T>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&'a T> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.entry(key(row)) {
            Entry::Occupied(slot) => unique[*slot.get()] = row,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(row);
            },
        }
    }

    unique
}
