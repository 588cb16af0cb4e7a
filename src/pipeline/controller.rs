//! Pipeline controller.
//!
//! Drives one run through its steps in position order. The three entry
//! points share the same step loop and differ only in where it starts:
//!
//! - [`Pipeline::execute`]: a new run from a definition, starting at the input
//! - [`Pipeline::retry`]: the most recently errored step of any run
//! - [`Pipeline::resume`]: the first incomplete step of a named run
//!
//! Retry and resume rebuild everything from the run's stored configuration
//! snapshot, never from the caller's current definition file.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::StepCache;
use crate::config::{PipelineDefinition, StepConfig};
use crate::error::{ConfigError, InputError, OutputError};
use crate::io::{build_input_loader, build_output_saver};
use crate::llm::ModelProvider;
use crate::model::{NewStep, Node, RelationshipType, Run, RunStatus, Step};
use crate::steps::build_executor;
use crate::storage::{Database, DatabaseError};

use super::executor::{execute_and_update_step, ExecutorError, StepContext};
use super::interrupt::Interrupt;

/// Errors surfaced by the controller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Executor(#[from] ExecutorError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("No failed step to retry")]
    NothingToRetry,

    #[error("Run {0} not found")]
    RunNotFound(i64),

    #[error("Run {0} is already finished")]
    AlreadyFinished(i64),
}

/// How a controller call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Every step completed and the output was saved.
    Finished { run_id: i64, nodes: Vec<Node> },
    /// The operator interrupted the run. It is still `running` and resumable.
    Interrupted { run_id: i64 },
}

impl PipelineOutcome {
    pub fn run_id(&self) -> i64 {
        match self {
            PipelineOutcome::Finished { run_id, .. } | PipelineOutcome::Interrupted { run_id } => {
                *run_id
            }
        }
    }
}

/// Where the step loop starts.
struct Start {
    index: usize,
    pending: Vec<Node>,
    processed: Vec<Node>,
    restarted: bool,
}

/// Runs pipelines against one database and one step cache.
pub struct Pipeline {
    db: Database,
    cache: StepCache,
    models: Arc<dyn ModelProvider>,
    interrupt: Interrupt,
}

impl Pipeline {
    pub fn new(db: Database, cache: StepCache, models: Arc<dyn ModelProvider>) -> Self {
        Self {
            db,
            cache,
            models,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a run for `definition` and executes it from the input.
    ///
    /// Missing provider credentials are reported before any run exists.
    pub async fn execute(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<PipelineOutcome, PipelineError> {
        let missing = self
            .db
            .missing_providers(definition.required_providers())
            .await?;
        if !missing.is_empty() {
            return Err(ConfigError::MissingProvider(missing.join(", ")).into());
        }

        let snapshot = definition.snapshot()?;
        let new_steps = definition
            .pipeline
            .iter()
            .map(|step| {
                Ok(NewStep {
                    step_type: step.kind.step_type().to_string(),
                    method: step.kind.method().to_string(),
                    name: step.name.clone(),
                    config: step.snapshot()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let (run, steps) = self.db.create_run(&snapshot, &new_steps).await?;

        self.guarded(run.id, async {
            let nodes = build_input_loader(&definition.input).load(&self.db).await?;
            let start = Start {
                index: 0,
                pending: nodes,
                processed: Vec::new(),
                restarted: false,
            };
            self.drive(&run, definition, &steps, start).await
        })
        .await
    }

    /// Continues from the most recently errored step across all runs.
    pub async fn retry(&self) -> Result<PipelineOutcome, PipelineError> {
        let step = self
            .db
            .get_last_failed()
            .await?
            .ok_or(PipelineError::NothingToRetry)?;
        let run = self
            .db
            .get_run(step.run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(step.run_id))?;

        tracing::info!(run_id = run.id, step_id = step.id, step = %step.name, "Retrying failed step");
        self.continue_run(run, Some(step)).await
    }

    /// Continues a run from its first step that is not completed.
    pub async fn resume(&self, run_id: i64) -> Result<PipelineOutcome, PipelineError> {
        let run = self
            .db
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;
        if run.status == RunStatus::Finished {
            return Err(PipelineError::AlreadyFinished(run_id));
        }

        let step = self.db.get_step_to_resume(run_id).await?;
        tracing::info!(
            run_id,
            step_id = step.as_ref().map(|s| s.id),
            "Resuming run"
        );
        self.continue_run(run, step).await
    }

    /// Marks an interrupted run as stopped. It stays resumable.
    pub async fn stop(&self, run_id: i64) -> Result<(), PipelineError> {
        self.db.set_run_status(run_id, RunStatus::Stopped).await?;
        tracing::info!(run_id, "Run stopped");
        Ok(())
    }

    async fn continue_run(
        &self,
        run: Run,
        step: Option<Step>,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.db.set_run_status(run.id, RunStatus::Running).await?;

        self.guarded(run.id, async {
            let definition = PipelineDefinition::from_snapshot(&run.config)?;
            let steps = self.db.run_steps(run.id).await?;

            let start = match step {
                Some(step) => self.resume_point(&definition, &steps, &step).await?,
                // All steps completed; only the output is left.
                None => Start {
                    index: steps.len(),
                    pending: match steps.last() {
                        Some(last) => self.db.forwarded_outputs(last.id).await?,
                        None => Vec::new(),
                    },
                    processed: Vec::new(),
                    restarted: false,
                },
            };
            self.drive(&run, &definition, &steps, start).await
        })
        .await
    }

    /// Rebuilds the inputs of `step` from persisted node state.
    async fn resume_point(
        &self,
        definition: &PipelineDefinition,
        steps: &[Step],
        step: &Step,
    ) -> Result<Start, PipelineError> {
        let index = steps
            .iter()
            .position(|s| s.id == step.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("step {} in run {}", step.id, step.run_id)))?;

        let linked = self
            .db
            .count_step_links(step.id, RelationshipType::Input)
            .await?;

        if linked > 0 {
            let pending = self.db.pending_step_inputs(step.id).await?;
            let processed = self.db.step_nodes(step.id, RelationshipType::Output).await?;
            tracing::info!(
                step_id = step.id,
                pending = pending.len(),
                processed = processed.len(),
                "Restarting step from persisted state"
            );
            return Ok(Start {
                index,
                pending,
                processed,
                restarted: true,
            });
        }

        let pending = match self.db.previous_step(step).await? {
            Some(previous) => self.db.forwarded_outputs(previous.id).await?,
            None => build_input_loader(&definition.input).load(&self.db).await?,
        };
        Ok(Start {
            index,
            pending,
            processed: Vec::new(),
            restarted: false,
        })
    }

    /// The step loop shared by every entry point.
    async fn drive(
        &self,
        run: &Run,
        definition: &PipelineDefinition,
        steps: &[Step],
        start: Start,
    ) -> Result<PipelineOutcome, PipelineError> {
        let Start {
            index,
            mut pending,
            mut processed,
            mut restarted,
        } = start;

        for step in steps.iter().skip(index) {
            if self.interrupt.is_set() {
                return Ok(PipelineOutcome::Interrupted { run_id: run.id });
            }

            let config = StepConfig::from_snapshot(&step.config)?;
            let executor = build_executor(&config);
            let ctx = StepContext {
                db: &self.db,
                step,
                models: self.models.as_ref(),
                interrupt: &self.interrupt,
            };

            let result = execute_and_update_step(
                &ctx,
                &self.cache,
                executor.as_ref(),
                std::mem::take(&mut pending),
                std::mem::take(&mut processed),
                restarted,
            )
            .await;

            pending = match result {
                Ok(forwarded) => forwarded,
                Err(ExecutorError::Interrupted) => {
                    return Ok(PipelineOutcome::Interrupted { run_id: run.id })
                }
                Err(err) => return Err(err.into()),
            };
            restarted = false;
        }

        build_output_saver(&definition.output).save(&pending)?;
        self.db.set_run_status(run.id, RunStatus::Finished).await?;
        tracing::info!(run_id = run.id, nodes = pending.len(), "Run finished");

        Ok(PipelineOutcome::Finished {
            run_id: run.id,
            nodes: pending,
        })
    }

    /// Marks the run errored when `work` fails, then hands the error back.
    async fn guarded<F>(&self, run_id: i64, work: F) -> Result<PipelineOutcome, PipelineError>
    where
        F: Future<Output = Result<PipelineOutcome, PipelineError>>,
    {
        match work.await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(run_id, error = %err, "Run failed");
                if let Err(status_err) = self.db.set_run_status(run_id, RunStatus::Errored).await {
                    tracing::error!(run_id, error = %status_err, "Failed to mark run as errored");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionRequest;
    use crate::model::{Provider, StepStatus};
    use crate::storage::database::test_support::temp_database;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl ModelProvider for Offline {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed("offline".to_string()))
        }

        async fn embed(
            &self,
            _provider: &Provider,
            _model: &str,
            _inputs: &[String],
        ) -> Result<Vec<Vec<f64>>, LlmError> {
            Err(LlmError::RequestFailed("offline".to_string()))
        }
    }

    fn definition(dir: &std::path::Path, steps: &str) -> PipelineDefinition {
        let source = dir.join("source.csv");
        std::fs::write(&source, "content\nabcdef\nabcdef\nxyz\n").unwrap();
        let yaml = format!(
            "input:\n  type: csv\n  properties:\n    path: {}\n    target_column: content\n    separator: ','\n\
             pipeline:\n{}\
             output:\n  type: csv\n  properties:\n    path: {}\n    separator: ','\n",
            source.display(),
            steps,
            dir.join("out.csv").display()
        );
        PipelineDefinition::from_yaml_str(&yaml).unwrap()
    }

    async fn pipeline(dir: &tempfile::TempDir) -> Pipeline {
        let db = temp_database(dir).await;
        let cache = StepCache::open(&dir.path().join("cache.db"), true)
            .await
            .unwrap();
        Pipeline::new(db, cache, Arc::new(Offline))
    }

    #[tokio::test]
    async fn test_execute_runs_steps_and_saves_output() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let definition = definition(
            dir.path(),
            "  - type: split\n    method: chunk\n    parameters:\n      size: 3\n\
             \x20 - type: clean\n    method: deduplicate-tf-idf\n",
        );

        let outcome = pipeline.execute(&definition).await.unwrap();
        let PipelineOutcome::Finished { run_id, nodes } = outcome else {
            panic!("run did not finish");
        };

        assert_eq!(
            nodes.iter().map(|n| n.value.as_str()).collect::<Vec<_>>(),
            vec!["abc", "def", "xyz"]
        );
        let run = pipeline.db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        let out = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert_eq!(out, "value\nabc\ndef\nxyz\n");
    }

    #[tokio::test]
    async fn test_missing_provider_creates_no_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let definition = definition(
            dir.path(),
            "  - type: generation\n    method: llm\n    parameters:\n      provider: mistral\n      template: '{source}'\n",
        );

        let err = pipeline.execute(&definition).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingProvider(ref p)) if p == "mistral"
        ));
        assert!(pipeline.db.get_run(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_failure_marks_run_errored() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        pipeline
            .db
            .add_provider(&Provider::new("openai", "sk-test"))
            .await
            .unwrap();
        let definition = definition(
            dir.path(),
            "  - type: generation\n    method: llm\n    parameters:\n      template: '{source}'\n",
        );

        let err = pipeline.execute(&definition).await.unwrap_err();
        assert!(matches!(err, PipelineError::Executor(ExecutorError::Llm(_))));

        let step = pipeline.db.get_last_failed().await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Errored);
        let run = pipeline.db.get_run(step.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Errored);
        assert_eq!(
            pipeline
                .db
                .count_step_links(step.id, RelationshipType::Output)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_retry_without_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        assert!(matches!(
            pipeline.retry().await,
            Err(PipelineError::NothingToRetry)
        ));
        assert!(matches!(
            pipeline.resume(42).await,
            Err(PipelineError::RunNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_interrupted_before_first_step_then_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let definition = definition(
            dir.path(),
            "  - type: split\n    method: chunk\n    parameters:\n      size: 3\n",
        );

        pipeline.interrupt().trigger();
        let outcome = pipeline.execute(&definition).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Interrupted { .. }));
        let run_id = outcome.run_id();

        pipeline.stop(run_id).await.unwrap();
        let steps = pipeline.db.run_steps(run_id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Pending);

        pipeline.interrupt().reset();
        let outcome = pipeline.resume(run_id).await.unwrap();
        let PipelineOutcome::Finished { nodes, .. } = outcome else {
            panic!("resume did not finish");
        };
        assert_eq!(nodes.len(), 5);

        assert!(matches!(
            pipeline.resume(run_id).await,
            Err(PipelineError::AlreadyFinished(_))
        ));
    }
}
