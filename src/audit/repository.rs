/*!
 * Queries over the audit store.
 */

use anyhow::Result;
use log::debug;
use rusqlite::{params, OptionalExtension, Row};

use super::connection::AuditConnection;
use super::models::{OutcomeRecord, RunRecord, RunStatus};

const RUN_COLUMNS: &str = "id, document_path, document_hash, source_language, target_language, status, \
     started_at, finished_at, total, processed, exact_matches, fuzzy_repairs, new_translations, \
     errors, fallbacks, skipped, checkpoints";

fn parse_run_row(row: &Row) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        document_path: row.get(1)?,
        document_hash: row.get(2)?,
        source_language: row.get(3)?,
        target_language: row.get(4)?,
        status: row.get::<_, String>(5)?.parse().unwrap_or(RunStatus::Failed),
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
        total: row.get(8)?,
        processed: row.get(9)?,
        exact_matches: row.get(10)?,
        fuzzy_repairs: row.get(11)?,
        new_translations: row.get(12)?,
        errors: row.get(13)?,
        fallbacks: row.get(14)?,
        skipped: row.get(15)?,
        checkpoints: row.get(16)?,
    })
}

/// Repository over runs and their segment outcomes
#[derive(Clone)]
pub struct AuditRepository {
    db: AuditConnection,
}

impl AuditRepository {
    pub fn new(db: AuditConnection) -> Self {
        Self { db }
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(AuditConnection::open_in_memory()?))
    }

    pub fn connection(&self) -> &AuditConnection {
        &self.db
    }

    pub async fn create_run(&self, run: &RunRecord) -> Result<()> {
        let run = run.clone();
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                        RUN_COLUMNS
                    ),
                    params![
                        run.id,
                        run.document_path,
                        run.document_hash,
                        run.source_language,
                        run.target_language,
                        run.status.to_string(),
                        run.started_at,
                        run.finished_at,
                        run.total,
                        run.processed,
                        run.exact_matches,
                        run.fuzzy_repairs,
                        run.new_translations,
                        run.errors,
                        run.fallbacks,
                        run.skipped,
                        run.checkpoints,
                    ],
                )?;
                debug!("Recorded run {}", run.id);
                Ok(())
            })
            .await
    }

    /// Store the final status and counters of a run
    pub async fn finish_run(&self, run: &RunRecord) -> Result<()> {
        let run = run.clone();
        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE runs SET status = ?2, finished_at = ?3, total = ?4, processed = ?5,
                        exact_matches = ?6, fuzzy_repairs = ?7, new_translations = ?8,
                        errors = ?9, fallbacks = ?10, skipped = ?11, checkpoints = ?12
                    WHERE id = ?1
                    "#,
                    params![
                        run.id,
                        run.status.to_string(),
                        run.finished_at,
                        run.total,
                        run.processed,
                        run.exact_matches,
                        run.fuzzy_repairs,
                        run.new_translations,
                        run.errors,
                        run.fallbacks,
                        run.skipped,
                        run.checkpoints,
                    ],
                )?;
                if updated == 0 {
                    anyhow::bail!("Run not found: {}", run.id);
                }
                Ok(())
            })
            .await
    }

    /// Insert a batch of outcomes in one transaction
    pub async fn insert_outcomes(&self, outcomes: Vec<OutcomeRecord>) -> Result<usize> {
        if outcomes.is_empty() {
            return Ok(0);
        }
        self.db
            .transaction_async(move |tx| {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO segment_outcomes (
                        run_id, segment_id, state, decision, weighted_score,
                        provenance, error, resumed, recorded_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )?;
                for outcome in &outcomes {
                    stmt.execute(params![
                        outcome.run_id,
                        outcome.segment_id,
                        outcome.state,
                        outcome.decision,
                        outcome.weighted_score,
                        outcome.provenance,
                        outcome.error,
                        outcome.resumed,
                        outcome.recorded_at,
                    ])?;
                }
                Ok(outcomes.len())
            })
            .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let run_id = run_id.to_string();
        self.db
            .execute_async(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                        [run_id],
                        parse_run_row,
                    )
                    .optional()?)
            })
            .await
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?1",
                    RUN_COLUMNS
                ))?;
                let runs = stmt
                    .query_map([limit as i64], parse_run_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(runs)
            })
            .await
    }

    /// Outcomes of a run in recording order
    pub async fn outcomes_for_run(&self, run_id: &str) -> Result<Vec<OutcomeRecord>> {
        let run_id = run_id.to_string();
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, run_id, segment_id, state, decision, weighted_score,
                           provenance, error, resumed, recorded_at
                    FROM segment_outcomes WHERE run_id = ?1 ORDER BY id
                    "#,
                )?;
                let outcomes = stmt
                    .query_map([run_id], |row| {
                        Ok(OutcomeRecord {
                            id: row.get(0)?,
                            run_id: row.get(1)?,
                            segment_id: row.get(2)?,
                            state: row.get(3)?,
                            decision: row.get(4)?,
                            weighted_score: row.get(5)?,
                            provenance: row.get(6)?,
                            error: row.get(7)?,
                            resumed: row.get(8)?,
                            recorded_at: row.get(9)?,
                        })
                    })?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(outcomes)
            })
            .await
    }

    /// Delete a run and its outcomes
    pub async fn delete_run(&self, run_id: &str) -> Result<bool> {
        let run_id = run_id.to_string();
        self.db
            .transaction_async(move |tx| {
                tx.execute("DELETE FROM segment_outcomes WHERE run_id = ?1", [&run_id])?;
                let deleted = tx.execute("DELETE FROM runs WHERE id = ?1", [&run_id])?;
                Ok(deleted > 0)
            })
            .await
    }
}
