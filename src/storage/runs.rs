//! Run/step state machine.
//!
//! Step: `pending -> running -> completed`, or `running -> errored`. An
//! errored or interrupted step re-enters `running` on retry/resume with the
//! same row. Run: `running -> finished | errored | stopped`, and back to
//! `running` when resumed.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::{NewStep, Node, RelationshipType, Run, RunStatus, Step, StepStatus};

use super::database::{now_timestamp, parse_timestamp, Database, DatabaseError};

const STEP_COLUMNS: &str = "id, run_id, position, type, method, name, config, status, run_at";

fn run_from_row(row: &SqliteRow) -> Result<Run, DatabaseError> {
    let status: String = row.get("status");
    let config: String = row.get("config");
    let created_at: String = row.get("created_at");

    Ok(Run {
        id: row.get("id"),
        status: status.parse()?,
        config: serde_json::from_str(&config)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<Step, DatabaseError> {
    let status: String = row.get("status");
    let config: String = row.get("config");
    let run_at: Option<String> = row.get("run_at");

    Ok(Step {
        id: row.get("id"),
        run_id: row.get("run_id"),
        position: row.get::<i64, _>("position") as u32,
        step_type: row.get("type"),
        method: row.get("method"),
        name: row.get("name"),
        config: serde_json::from_str(&config)?,
        status: status.parse()?,
        run_at: run_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl Database {
    // =========================================================================
    // Runs
    // =========================================================================

    /// Creates a run and its ordered steps (positions start at 1).
    pub async fn create_run(
        &self,
        config: &serde_json::Value,
        steps: &[NewStep],
    ) -> Result<(Run, Vec<Step>), DatabaseError> {
        let created_at = now_timestamp();
        let mut tx = self.pool().begin().await?;

        let run_id = sqlx::query("INSERT INTO run (status, config, created_at) VALUES (?1, ?2, ?3)")
            .bind(RunStatus::Running.as_str())
            .bind(serde_json::to_string(config)?)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let mut created = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let position = index as u32 + 1;
            let step_id = sqlx::query(
                "INSERT INTO step (run_id, position, type, method, name, config, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(run_id)
            .bind(position as i64)
            .bind(&step.step_type)
            .bind(&step.method)
            .bind(&step.name)
            .bind(serde_json::to_string(&step.config)?)
            .bind(StepStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            created.push(Step {
                id: step_id,
                run_id,
                position,
                step_type: step.step_type.clone(),
                method: step.method.clone(),
                name: step.name.clone(),
                config: step.config.clone(),
                status: StepStatus::Pending,
                run_at: None,
            });
        }

        tx.commit().await?;

        let run = Run {
            id: run_id,
            status: RunStatus::Running,
            config: config.clone(),
            created_at: parse_timestamp(&created_at)?,
        };
        tracing::info!(run_id, steps = created.len(), "Run created");
        Ok((run, created))
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<Run>, DatabaseError> {
        let row = sqlx::query("SELECT id, status, config, created_at FROM run WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE run SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(run_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("run {}", run_id)));
        }
        tracing::debug!(run_id, status = %status, "Run status updated");
        Ok(())
    }

    /// Steps of a run in position order.
    pub async fn run_steps(&self, run_id: i64) -> Result<Vec<Step>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM step WHERE run_id = ?1 ORDER BY position",
            STEP_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(run_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(step_from_row).collect()
    }

    // =========================================================================
    // Step transitions
    // =========================================================================

    pub async fn get_step(&self, step_id: i64) -> Result<Option<Step>, DatabaseError> {
        let sql = format!("SELECT {} FROM step WHERE id = ?1", STEP_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(step_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(step_from_row).transpose()
    }

    /// Flips a step to `running` and stamps `run_at`.
    ///
    /// Input links are written unless this is a restart continuation, whose
    /// inputs were linked by the interrupted attempt.
    pub async fn set_step_running(
        &self,
        step_id: i64,
        inputs: &[Node],
        restarted: bool,
    ) -> Result<(), DatabaseError> {
        if !restarted {
            self.link_inputs(step_id, inputs).await?;
        }
        self.update_step(step_id, StepStatus::Running, true).await
    }

    pub async fn set_step_completed(&self, step_id: i64) -> Result<(), DatabaseError> {
        self.update_step(step_id, StepStatus::Completed, false).await
    }

    pub async fn set_step_status(
        &self,
        step_id: i64,
        status: StepStatus,
    ) -> Result<(), DatabaseError> {
        self.update_step(step_id, status, false).await
    }

    async fn update_step(
        &self,
        step_id: i64,
        status: StepStatus,
        stamp: bool,
    ) -> Result<(), DatabaseError> {
        let result = if stamp {
            sqlx::query("UPDATE step SET status = ?1, run_at = ?2 WHERE id = ?3")
                .bind(status.as_str())
                .bind(now_timestamp())
                .bind(step_id)
                .execute(self.pool())
                .await?
        } else {
            sqlx::query("UPDATE step SET status = ?1 WHERE id = ?2")
                .bind(status.as_str())
                .bind(step_id)
                .execute(self.pool())
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("step {}", step_id)));
        }
        tracing::debug!(step_id, status = %status, "Step status updated");
        Ok(())
    }

    // =========================================================================
    // Resume queries
    // =========================================================================

    /// Most recently run errored step across all runs.
    pub async fn get_last_failed(&self) -> Result<Option<Step>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM step WHERE status = ?1 ORDER BY run_at DESC, id DESC LIMIT 1",
            STEP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(StepStatus::Errored.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(step_from_row).transpose()
    }

    /// Earliest step of `run_id` that is not completed.
    pub async fn get_step_to_resume(&self, run_id: i64) -> Result<Option<Step>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM step WHERE run_id = ?1 AND status != ?2 ORDER BY position LIMIT 1",
            STEP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(run_id)
            .bind(StepStatus::Completed.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(step_from_row).transpose()
    }

    /// The step immediately before `step` in its run.
    pub async fn previous_step(&self, step: &Step) -> Result<Option<Step>, DatabaseError> {
        if step.position <= 1 {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM step WHERE run_id = ?1 AND position = ?2",
            STEP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(step.run_id)
            .bind(step.position as i64 - 1)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(step_from_row).transpose()
    }

    /// Surviving (non-ablated) outputs of a completed step.
    pub async fn forwarded_outputs(&self, step_id: i64) -> Result<Vec<Node>, DatabaseError> {
        let outputs = self.step_nodes(step_id, RelationshipType::Output).await?;
        Ok(outputs.into_iter().filter(|n| !n.ablated).collect())
    }
}
