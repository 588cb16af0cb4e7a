//! Integration tests for the pipeline controller over CSV input.
//!
//! A scripted model provider stands in for the HTTP client, so these tests
//! run without network access.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use synda::cache::{CacheKey, StepCache};
use synda::config::PipelineDefinition;
use synda::llm::{CompletionRequest, ModelProvider};
use synda::model::{Provider, RelationshipType, RunStatus, StepStatus};
use synda::pipeline::{ExecutorError, Interrupt, Pipeline, PipelineError, PipelineOutcome};
use synda::storage::Database;
use synda::LlmError;

const PROMPT_PREFIX: &str = "Rewrite: ";

/// Uppercases the text after the prompt prefix.
///
/// Fails prompts containing `fail_on` while `failing` is set, and triggers
/// `interrupt` the first time a prompt contains `interrupt_on`.
#[derive(Default)]
struct MockProvider {
    prompts: Mutex<Vec<String>>,
    fail_on: Option<String>,
    failing: AtomicBool,
    interrupt_on: Option<(String, Interrupt)>,
    interrupted: AtomicBool,
}

impl MockProvider {
    fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            failing: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn interrupting_on(text: &str, interrupt: Interrupt) -> Self {
        Self {
            interrupt_on: Some((text.to_string(), interrupt)),
            ..Default::default()
        }
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    fn calls_containing(&self, text: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(text))
            .count()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());

        if let Some(fail_on) = &self.fail_on {
            if self.failing.load(Ordering::SeqCst) && request.prompt.contains(fail_on.as_str()) {
                return Err(LlmError::RequestFailed("provider unavailable".to_string()));
            }
        }
        if let Some((text, interrupt)) = &self.interrupt_on {
            if request.prompt.contains(text.as_str()) && !self.interrupted.swap(true, Ordering::SeqCst)
            {
                interrupt.trigger();
            }
        }

        Ok(request
            .prompt
            .trim_start_matches(PROMPT_PREFIX)
            .to_uppercase())
    }

    async fn embed(
        &self,
        _provider: &Provider,
        _model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f64>>, LlmError> {
        Ok(inputs.iter().map(|i| vec![i.len() as f64, 1.0]).collect())
    }
}

fn write_source(dir: &Path, rows: &[&str]) -> std::path::PathBuf {
    let path = dir.join("source.csv");
    let mut content = String::from("content\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn definition(dir: &Path, rows: &[&str], steps: &str, columns: &str) -> PipelineDefinition {
    let source = write_source(dir, rows);
    let yaml = format!(
        "input:\n  type: csv\n  properties:\n    path: {}\n    target_column: content\n    separator: ','\n\
         pipeline:\n{}\
         output:\n  type: csv\n  properties:\n    path: {}\n    columns: [{}]\n",
        source.display(),
        steps,
        dir.join("out.csv").display(),
        columns,
    );
    let definition = PipelineDefinition::from_yaml_str(&yaml).unwrap();
    definition.check_paths().unwrap();
    definition
}

const GENERATION_STEP: &str = "  - type: generation\n    method: llm\n    parameters:\n      template: 'Rewrite: {source}'\n";

struct Harness {
    dir: TempDir,
    db: Database,
    cache: StepCache,
}

impl Harness {
    async fn new() -> Self {
        Self::with_cache(true).await
    }

    async fn with_cache(enabled: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("synda.db")).await.unwrap();
        db.add_provider(&Provider::new("openai", "sk-test"))
            .await
            .unwrap();
        let cache = StepCache::open(&dir.path().join("cache").join("cache.db"), enabled)
            .await
            .unwrap();
        Self { dir, db, cache }
    }

    fn pipeline(&self, models: Arc<MockProvider>) -> Pipeline {
        Pipeline::new(self.db.clone(), self.cache.clone(), models)
    }

    fn output_rows(&self) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_path(self.dir.path().join("out.csv"))
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }
}

#[tokio::test]
async fn test_generate_dedup_annotate_end_to_end() {
    let harness = Harness::new().await;
    let models = Arc::new(MockProvider::default());
    let pipeline = harness.pipeline(models.clone());

    let steps = format!(
        "{}\
         \x20 - type: clean\n    method: deduplicate-tf-idf\n\
         \x20 - type: metadata\n    method: word-position\n    parameters:\n      matches:\n        animal: fox\n",
        GENERATION_STEP
    );
    let definition = definition(
        harness.dir.path(),
        &["the fox", "a cat", "the fox"],
        &steps,
        "value, metadata",
    );

    let outcome = pipeline.execute(&definition).await.unwrap();
    let PipelineOutcome::Finished { run_id, nodes } = outcome else {
        panic!("run did not finish");
    };

    let values: Vec<&str> = nodes.iter().map(|n| n.value.as_str()).collect();
    assert_eq!(values, vec!["THE FOX", "A CAT"]);
    assert_eq!(models.calls_containing(PROMPT_PREFIX), 3);

    // Lineage reaches back to the source row through every step.
    let lineage = &nodes[0].ancestors;
    for key in [
        "source",
        "generation_llm",
        "clean_deduplicate-tf-idf",
        "metadata_word-position",
    ] {
        assert!(lineage.contains_key(key), "missing lineage key {key}");
    }
    let source = harness
        .db
        .get_node(lineage["source"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.value, "the fox");

    let run = harness.db.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Finished);
    let steps = harness.db.run_steps(run_id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    // The duplicate stays linked to the dedup step for audit.
    let dedup_outputs = harness
        .db
        .step_nodes(steps[1].id, RelationshipType::Output)
        .await
        .unwrap();
    assert_eq!(dedup_outputs.len(), 3);
    assert_eq!(dedup_outputs.iter().filter(|n| n.ablated).count(), 1);

    let rows = harness.output_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "THE FOX");
    let metadata: serde_json::Value = serde_json::from_str(&rows[0][1]).unwrap();
    assert_eq!(
        metadata,
        serde_json::json!([{ "label": "animal", "start": 4, "end": 7, "value": "FOX" }])
    );
    assert_eq!(rows[1], vec!["A CAT".to_string(), "[]".to_string()]);
}

#[tokio::test]
async fn test_failed_step_is_retried_without_repeating_saved_work() {
    let harness = Harness::new().await;
    let models = Arc::new(MockProvider::failing_on("beta"));
    let pipeline = harness.pipeline(models.clone());
    let definition = definition(
        harness.dir.path(),
        &["alpha", "beta", "gamma"],
        GENERATION_STEP,
        "value",
    );

    let err = pipeline.execute(&definition).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Executor(ExecutorError::Llm(LlmError::RequestFailed(_)))
    ));

    let failed = harness.db.get_last_failed().await.unwrap().unwrap();
    assert_eq!(failed.status, StepStatus::Errored);
    let run = harness.db.get_run(failed.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Errored);
    assert!(!harness.dir.path().join("out.csv").exists());

    // alpha was saved before beta failed.
    assert_eq!(
        harness
            .db
            .count_step_links(failed.id, RelationshipType::Output)
            .await
            .unwrap(),
        1
    );

    models.recover();
    let outcome = pipeline.retry().await.unwrap();
    let PipelineOutcome::Finished { run_id, nodes } = outcome else {
        panic!("retry did not finish");
    };
    assert_eq!(run_id, failed.run_id);

    let values: Vec<&str> = nodes.iter().map(|n| n.value.as_str()).collect();
    assert_eq!(values, vec!["ALPHA", "BETA", "GAMMA"]);
    assert_eq!(models.calls_containing("alpha"), 1);
    assert_eq!(models.calls_containing("beta"), 2);

    let step = harness.db.get_step(failed.id).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(
        harness
            .db
            .count_step_links(step.id, RelationshipType::Output)
            .await
            .unwrap(),
        3
    );
    assert!(harness.db.get_last_failed().await.unwrap().is_none());
    assert!(matches!(
        pipeline.retry().await,
        Err(PipelineError::NothingToRetry)
    ));
}

#[tokio::test]
async fn test_retried_batch_keeps_input_order() {
    let harness = Harness::new().await;
    let models = Arc::new(MockProvider::failing_on("beta"));
    let pipeline = harness.pipeline(models.clone());
    let step = "  - type: generation\n    method: llm\n    parameters:\n      template: 'Rewrite: {source}'\n      batch_size: 3\n";
    let definition = definition(
        harness.dir.path(),
        &["alpha", "beta", "gamma", "delta"],
        step,
        "value",
    );

    assert!(pipeline.execute(&definition).await.is_err());
    // alpha and gamma from the failing batch were kept.
    assert_eq!(models.calls_containing("gamma"), 1);
    assert_eq!(models.calls_containing("delta"), 0);

    models.recover();
    let PipelineOutcome::Finished { nodes, .. } = pipeline.retry().await.unwrap() else {
        panic!("retry did not finish");
    };
    let values: Vec<&str> = nodes.iter().map(|n| n.value.as_str()).collect();
    assert_eq!(values, vec!["ALPHA", "BETA", "GAMMA", "DELTA"]);
    assert_eq!(models.calls_containing("gamma"), 1);

    let rows: Vec<String> = harness.output_rows().into_iter().map(|r| r[0].clone()).collect();
    assert_eq!(rows, vec!["ALPHA", "BETA", "GAMMA", "DELTA"]);
}

#[tokio::test]
async fn test_interrupted_run_is_stopped_then_resumed() {
    let harness = Harness::new().await;
    let interrupt = Interrupt::new();
    let models = Arc::new(MockProvider::interrupting_on("beta", interrupt.clone()));
    let pipeline = harness.pipeline(models.clone()).with_interrupt(interrupt.clone());

    let steps = format!(
        "{}\
         \x20 - type: clean\n    method: deduplicate-tf-idf\n",
        GENERATION_STEP
    );
    let definition = definition(
        harness.dir.path(),
        &["alpha", "beta", "gamma"],
        &steps,
        "value",
    );

    let outcome = pipeline.execute(&definition).await.unwrap();
    let PipelineOutcome::Interrupted { run_id } = outcome else {
        panic!("run was not interrupted");
    };

    let run = harness.db.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
    let steps = harness.db.run_steps(run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Running);
    assert_eq!(steps[1].status, StepStatus::Pending);
    assert_eq!(models.calls_containing("gamma"), 0);

    pipeline.stop(run_id).await.unwrap();
    let run = harness.db.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Stopped);

    interrupt.reset();
    let outcome = pipeline.resume(run_id).await.unwrap();
    let PipelineOutcome::Finished { nodes, .. } = outcome else {
        panic!("resume did not finish");
    };
    let values: Vec<&str> = nodes.iter().map(|n| n.value.as_str()).collect();
    assert_eq!(values, vec!["ALPHA", "BETA", "GAMMA"]);

    for text in ["alpha", "beta", "gamma"] {
        assert_eq!(models.calls_containing(text), 1, "{text} generated twice");
    }

    // A finished run cannot be resumed again, and nothing was re-run.
    assert!(matches!(
        pipeline.resume(run_id).await,
        Err(PipelineError::AlreadyFinished(id)) if id == run_id
    ));
    assert_eq!(models.calls_containing(PROMPT_PREFIX), 3);
    assert!(matches!(
        pipeline.resume(run_id + 100).await,
        Err(PipelineError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_cache_entries_match_step_outputs() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline(Arc::new(MockProvider::default()));
    let steps = "  - type: split\n    method: chunk\n    parameters:\n      size: 2\n\
                 \x20 - type: clean\n    method: deduplicate-tf-idf\n";
    let definition = definition(harness.dir.path(), &["abab", "cd"], steps, "value");

    let outcome = pipeline.execute(&definition).await.unwrap();
    let run_id = outcome.run_id();
    let info = harness.cache.info().await.unwrap();
    assert_eq!(info.entries, 2);
    assert_eq!(info.steps, 2);

    for step in harness.db.run_steps(run_id).await.unwrap() {
        let inputs = harness
            .db
            .step_nodes(step.id, RelationshipType::Input)
            .await
            .unwrap();
        let outputs = harness
            .db
            .step_nodes(step.id, RelationshipType::Output)
            .await
            .unwrap();

        // The key rebuilt from the stored step finds the entry; the same
        // config and inputs under another step id do not.
        let key = CacheKey::new(step.id, &step.config, &inputs);
        let cached = harness.cache.get(&key).await.unwrap().unwrap();
        let other_step = CacheKey::new(step.id + 100, &step.config, &inputs);
        assert!(harness.cache.get(&other_step).await.unwrap().is_none());

        let cached_values: Vec<&str> = cached.iter().map(|c| c.value.as_str()).collect();
        let stored_values: Vec<&str> = outputs.iter().map(|n| n.value.as_str()).collect();
        assert_eq!(cached_values, stored_values);
    }

    assert_eq!(harness.cache.clear().await.unwrap(), 2);
    assert_eq!(harness.cache.info().await.unwrap().entries, 0);
}

#[tokio::test]
async fn test_disabled_cache_stores_nothing() {
    let harness = Harness::with_cache(false).await;
    let pipeline = harness.pipeline(Arc::new(MockProvider::default()));
    let definition = definition(
        harness.dir.path(),
        &["alpha"],
        GENERATION_STEP,
        "value",
    );

    let outcome = pipeline.execute(&definition).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Finished { .. }));

    let info = harness.cache.info().await.unwrap();
    assert!(!info.enabled);
    assert_eq!(info.entries, 0);
}
