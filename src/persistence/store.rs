use std::path::Path;
use std::time::Duration;

use rusqlite::OptionalExtension;
use serde_json::Value;
use tokio_rusqlite::Connection;

use crate::domain::{MetricSnapshot, Run, RunReport, RunStatus, SampleRecord};
use crate::error::PersistenceError;

use super::rows::{metric_from_row, run_from_row, sample_from_row};
use super::schema::DDL;

/// Write attempts before a batched insert gives up and surfaces
/// `PersistenceError::RetriesExhausted`. `SQLITE_BUSY` under WAL is
/// transient (a reader finishing a snapshot) so a short bounded retry
/// clears it without the caller (the metrics aggregator) ever observing it.
const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Async handle onto the run-state SQLite database. Every method proxies a
/// closure through `tokio_rusqlite::Connection::call`, so callers never
/// block the executor on disk I/O.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if absent) the database at `path` and applies the
    /// schema. Safe to call against an existing, already-populated file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails to
    /// apply.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path.as_ref()).await?;
        conn.call(|conn| {
            conn.execute_batch(DDL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// In-memory database, used by tests that need a `Store` without
    /// touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory connection cannot be opened or the
    /// schema fails to apply.
    pub async fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(DDL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn with_retries<F, T>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: Fn(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + Clone + 'static,
        T: Send + 'static,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let attempt_fn = f.clone();
            match self.conn.call(move |conn| attempt_fn(conn)).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "persistence write retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => {
                    return Err(PersistenceError::RetriesExhausted {
                        attempts: attempt,
                        message: err.to_string(),
                    })
                }
            }
        }
    }

    // -- runs ---------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the insert fails or the retry budget is
    /// exhausted.
    pub async fn insert_run(&self, run: &Run) -> Result<(), PersistenceError> {
        let id = run.id.clone();
        let request_id = run.request_id.clone();
        let environment_id = run.environment_id.clone();
        let run_type = run.run_type.as_str();
        let status = run.status.as_str();
        let config_snapshot = run.config_snapshot.to_string();
        let start_time = run.start_time;

        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, request_id, environment_id, type, status, config_snapshot, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
                rusqlite::params![id, request_id, environment_id, run_type, status, config_snapshot, start_time],
            )?;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the update fails or the retry budget is
    /// exhausted.
    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<(), PersistenceError> {
        let run_id = run_id.to_owned();
        let status = status.as_str();

        self.with_retries(move |conn| {
            conn.execute(
                "UPDATE runs SET status = ?1, end_time = ?2 WHERE id = ?3",
                rusqlite::params![status, end_time, run_id],
            )?;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `PersistenceError::RunNotFound` if no run has `run_id`, or a
    /// `Sqlite`/`Handle` error if the query itself fails.
    pub async fn get_run(&self, run_id: &str) -> Result<Run, PersistenceError> {
        let id = run_id.to_owned();
        let row = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, request_id, environment_id, type, status, config_snapshot, start_time, end_time
                     FROM runs WHERE id = ?1",
                    rusqlite::params![id],
                    run_from_row,
                )
                .optional()
            })
            .await?;
        row.ok_or_else(|| PersistenceError::RunNotFound {
            run_id: run_id.to_owned(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_runs(&self) -> Result<Vec<Run>, PersistenceError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, request_id, environment_id, type, status, config_snapshot, start_time, end_time
                     FROM runs ORDER BY start_time DESC",
                )?;
                let rows = stmt.query_map([], run_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(rows)
    }

    /// Deletes a run and every metric, sample, and report row that
    /// references it.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletes fail or the retry budget is
    /// exhausted.
    pub async fn delete_run(&self, run_id: &str) -> Result<(), PersistenceError> {
        let id = run_id.to_owned();
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM samples WHERE run_id = ?1", rusqlite::params![id])?;
            tx.execute("DELETE FROM metrics WHERE run_id = ?1", rusqlite::params![id])?;
            tx.execute("DELETE FROM reports WHERE run_id = ?1", rusqlite::params![id])?;
            tx.execute("DELETE FROM runs WHERE id = ?1", rusqlite::params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // -- metrics --------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the batched insert fails or the retry budget is
    /// exhausted.
    pub async fn insert_metrics_batch(
        &self,
        batch: Vec<MetricSnapshot>,
    ) -> Result<(), PersistenceError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO metrics (run_id, timestamp_ms, name, value, labels) VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for snapshot in &batch {
                    let labels = if snapshot.labels.is_empty() {
                        None
                    } else {
                        Some(serde_json::to_string(&snapshot.labels).unwrap_or_default())
                    };
                    stmt.execute(rusqlite::params![
                        snapshot.run_id,
                        snapshot.timestamp_ms,
                        snapshot.name.as_str(),
                        snapshot.value,
                        labels,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Every persisted metric for a run, oldest first — backfill for a
    /// control-surface subscriber that attaches after a run has already
    /// produced snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_metrics(&self, run_id: &str) -> Result<Vec<MetricSnapshot>, PersistenceError> {
        let id = run_id.to_owned();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, timestamp_ms, name, value, labels FROM metrics
                     WHERE run_id = ?1 ORDER BY timestamp_ms ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![id], metric_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(rows)
    }

    // -- samples ----------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the batched insert fails or the retry budget is
    /// exhausted.
    pub async fn insert_samples_batch(
        &self,
        batch: Vec<SampleRecord>,
    ) -> Result<(), PersistenceError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO samples (run_id, timestamp_ms, status_code, latency_ms, error, trace)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for sample in &batch {
                    let error = sample
                        .error
                        .map(|kind| serde_json::to_string(&kind).unwrap_or_default());
                    let trace = sample
                        .trace
                        .as_ref()
                        .map(|trace| serde_json::to_string(trace).unwrap_or_default());
                    stmt.execute(rusqlite::params![
                        sample.run_id,
                        sample.timestamp_ms,
                        sample.status_code,
                        sample.latency_ms,
                        error,
                        trace,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_samples(&self, run_id: &str) -> Result<Vec<SampleRecord>, PersistenceError> {
        let id = run_id.to_owned();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, timestamp_ms, status_code, latency_ms, error, trace FROM samples
                     WHERE run_id = ?1 ORDER BY timestamp_ms ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![id], sample_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(rows)
    }

    // -- reports ------------------------------------------------------

    /// Stores the terminal report for a run as a single JSON blob,
    /// overwriting any previous report for the same run.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub async fn save_report(&self, report: &RunReport) -> Result<(), PersistenceError> {
        let run_id = report.run_id.clone();
        let encoded = serde_json::to_string(report).map_err(|source| PersistenceError::Sqlite {
            source: rusqlite::Error::ToSqlConversionFailure(Box::new(source)),
        })?;

        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO reports (run_id, report) VALUES (?1, ?2)
                 ON CONFLICT(run_id) DO UPDATE SET report = excluded.report",
                rusqlite::params![run_id, encoded],
            )?;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the query or deserialisation fails.
    pub async fn get_report(&self, run_id: &str) -> Result<Option<RunReport>, PersistenceError> {
        let id = run_id.to_owned();
        let encoded: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT report FROM reports WHERE run_id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        match encoded {
            Some(raw) => {
                let report = serde_json::from_str(&raw).map_err(|source| PersistenceError::Sqlite {
                    source: rusqlite::Error::ToSqlConversionFailure(Box::new(source)),
                })?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    // -- supporting collections -----------------------------------------

    /// Generic key/value accessor backing the `globals`, `config`,
    /// `environments`, `collections`, and `requests` tables, all of which
    /// the control surface reads far more often than it writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_value(&self, table: Table, key: &str) -> Result<Option<Value>, PersistenceError> {
        let key = key.to_owned();
        let sql = table.select_sql();
        let raw: Option<String> = self
            .conn
            .call(move |conn| conn.query_row(&sql, rusqlite::params![key], |row| row.get(0)).optional())
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|source| {
                PersistenceError::Sqlite {
                    source: rusqlite::Error::ToSqlConversionFailure(Box::new(source)),
                }
            })?)),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub async fn set_value(&self, table: Table, key: &str, value: &Value) -> Result<(), PersistenceError> {
        let key = key.to_owned();
        let encoded = value.to_string();
        let sql = table.upsert_sql();
        self.with_retries(move |conn| {
            conn.execute(&sql, rusqlite::params![key, encoded])?;
            Ok(())
        })
        .await
    }
}

/// The key/value-shaped support tables `get_value`/`set_value` operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Globals,
    Config,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Globals => "globals",
            Self::Config => "config",
        }
    }

    fn select_sql(self) -> String {
        format!("SELECT value FROM {} WHERE key = ?1", self.name())
    }

    fn upsert_sql(self) -> String {
        format!(
            "INSERT INTO {} (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            self.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run(id: &str) -> Run {
        Run {
            id: id.to_owned(),
            request_id: None,
            environment_id: None,
            run_type: crate::domain::RunType::Load,
            status: RunStatus::Pending,
            config_snapshot: json!({"mode": "constant"}),
            start_time: 1_000,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_run_through_insert_and_get() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        let run = sample_run("run-1");
        store.insert_run(&run).await.map_err(|e| e.to_string())?;

        let fetched = store.get_run("run-1").await.map_err(|e| e.to_string())?;
        assert_eq!(fetched.id, "run-1");
        assert_eq!(fetched.status, RunStatus::Pending);
        assert_eq!(fetched.config_snapshot, json!({"mode": "constant"}));
        Ok(())
    }

    #[tokio::test]
    async fn missing_run_surfaces_run_not_found() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        let err = store.get_run("absent").await.err().ok_or("expected error")?;
        assert!(matches!(err, PersistenceError::RunNotFound { run_id } if run_id == "absent"));
        Ok(())
    }

    #[tokio::test]
    async fn update_run_status_is_visible_on_next_get() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        store.insert_run(&sample_run("run-2")).await.map_err(|e| e.to_string())?;
        store
            .update_run_status("run-2", RunStatus::Completed, Some(2_000))
            .await
            .map_err(|e| e.to_string())?;

        let fetched = store.get_run("run-2").await.map_err(|e| e.to_string())?;
        assert_eq!(fetched.status, RunStatus::Completed);
        assert_eq!(fetched.end_time, Some(2_000));
        Ok(())
    }

    #[tokio::test]
    async fn delete_run_cascades_to_metrics_and_samples() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        store.insert_run(&sample_run("run-3")).await.map_err(|e| e.to_string())?;
        store
            .insert_metrics_batch(vec![MetricSnapshot::new(
                "run-3",
                1_000,
                crate::domain::MetricName::Rps,
                10.0,
            )])
            .await
            .map_err(|e| e.to_string())?;

        store.delete_run("run-3").await.map_err(|e| e.to_string())?;
        let remaining = store.list_metrics("run-3").await.map_err(|e| e.to_string())?;
        assert!(remaining.is_empty());
        assert!(store.get_run("run-3").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn metrics_batch_round_trips_in_timestamp_order() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        store.insert_run(&sample_run("run-4")).await.map_err(|e| e.to_string())?;
        store
            .insert_metrics_batch(vec![
                MetricSnapshot::new("run-4", 2_000, crate::domain::MetricName::Rps, 5.0),
                MetricSnapshot::new("run-4", 1_000, crate::domain::MetricName::Rps, 3.0),
            ])
            .await
            .map_err(|e| e.to_string())?;

        let rows = store.list_metrics("run-4").await.map_err(|e| e.to_string())?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp_ms, 1_000);
        assert_eq!(rows[1].timestamp_ms, 2_000);
        Ok(())
    }

    #[tokio::test]
    async fn config_value_round_trips() -> Result<(), String> {
        let store = Store::open_in_memory().await.map_err(|e| e.to_string())?;
        store
            .set_value(Table::Config, "max_in_flight", &json!(500))
            .await
            .map_err(|e| e.to_string())?;
        let value = store
            .get_value(Table::Config, "max_in_flight")
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(value, Some(json!(500)));
        Ok(())
    }
}
