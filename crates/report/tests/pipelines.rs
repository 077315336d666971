use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use dproc_llm::{GenerateRequest, LlmError, TextGenerator};
use dproc_report::{
    ExecutionStatus, PipelineExecutor, PipelineRegistry, Processor, ProcessorContext,
    ProcessorRegistry,
};
use serde_json::{json, Map, Value};
use tempfile::tempdir;

struct Canned;

#[async_trait]
impl TextGenerator for Canned {
    async fn generate_text(&self, _request: GenerateRequest) -> Result<String, LlmError> {
        Ok("- prices rose\n- demand held".to_string())
    }
}

/// Notes its workspace, then fails.
#[derive(Default)]
struct Exploding {
    seen: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl Processor for Exploding {
    async fn process(
        &self,
        _inputs: &Map<String, Value>,
        context: &ProcessorContext,
    ) -> anyhow::Result<Value> {
        assert!(context.workspace.is_dir());
        *self.seen.lock().unwrap() = Some(context.workspace.clone());
        bail!("upstream feed unavailable")
    }
}

fn write_pipeline(root: &Path, dir: &str, body: &str, template: &str) {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("pipeline.yaml"), body).unwrap();
    fs::write(path.join("report.md"), template).unwrap();
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn executor(root: &Path, processors: ProcessorRegistry) -> PipelineExecutor {
    let mut registry = PipelineRegistry::new(root);
    registry.scan().unwrap();
    PipelineExecutor::new(Arc::new(registry), Arc::new(processors), Arc::new(Canned))
}

#[tokio::test]
async fn completed_execution_keeps_its_artifact() {
    let dir = tempdir().unwrap();
    write_pipeline(
        dir.path(),
        "greeting",
        "id: greeting\nname: Greeting\nprocessor: echo\ntemplate: report.md\noutputFormats: [md, html]\ninputs:\n  - name: who\n    type: string\n    required: true\n",
        "Hello {{ who }}!",
    );
    let executor = executor(dir.path(), ProcessorRegistry::with_builtins());

    let result = executor.execute("greeting", inputs(json!({"who": "team"}))).await;
    assert_eq!(result.status, ExecutionStatus::Completed, "{:?}", result.error);
    let artifact = result.artifact_path.clone().unwrap();
    assert_eq!(artifact.extension().unwrap(), "md");
    assert_eq!(fs::read_to_string(&artifact).unwrap(), "Hello team!");
    assert!(artifact
        .parent()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&format!("dproc-{}-", result.execution_id)));
    assert_eq!(executor.store().get(&result.execution_id), Some(result.clone()));

    let html = executor
        .execute("greeting", inputs(json!({"who": "ops", "format": "html"})))
        .await;
    assert_eq!(html.artifact_path.unwrap().extension().unwrap(), "html");
    assert_ne!(html.execution_id, result.execution_id);

    fs::remove_dir_all(artifact.parent().unwrap()).unwrap();
}

#[tokio::test]
async fn dataset_summary_feeds_the_template() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("sales.csv");
    fs::write(&data, "date,product,revenue\n2025-01-01,Widget A,1500\n2025-01-02,Gadget B,2300\n").unwrap();
    write_pipeline(
        dir.path(),
        "sales",
        "id: sales-analysis\nname: Sales\nprocessor: dataset-summary\ntemplate: report.md\noutputFormats: [md]\ninputs:\n  - name: dataset\n    type: string\n    required: true\n  - name: computed\n    type: array\n",
        "{{ recordCount }} rows, total {{ computedFields.total }}\n{% for item in insights %}* {{ item }}\n{% endfor %}",
    );
    let executor = executor(dir.path(), ProcessorRegistry::with_builtins());
    let result = executor
        .execute(
            "sales-analysis",
            inputs(json!({
                "dataset": data.to_string_lossy(),
                "computed": [{"name": "total", "function": "SUM(revenue)"}]
            })),
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Completed, "{:?}", result.error);
    let artifact = result.artifact_path.unwrap();
    assert_eq!(
        fs::read_to_string(&artifact).unwrap(),
        "2 rows, total 3800\n* prices rose\n* demand held\n"
    );
    fs::remove_dir_all(artifact.parent().unwrap()).unwrap();
}

#[tokio::test]
async fn failures_are_recorded_and_clean_up() {
    let dir = tempdir().unwrap();
    write_pipeline(
        dir.path(),
        "flaky",
        "id: flaky\nname: Flaky\nprocessor: exploding\ntemplate: report.md\noutputFormats: [md]\ninputs:\n  - name: who\n    type: string\n    required: true\n",
        "never rendered",
    );
    let exploding = Arc::new(Exploding::default());
    let mut processors = ProcessorRegistry::with_builtins();
    processors.register("exploding", exploding.clone());
    let executor = executor(dir.path(), processors);

    let failed = executor.execute("flaky", inputs(json!({"who": "x"}))).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error.unwrap().contains("upstream feed unavailable"));
    let workspace = exploding.seen.lock().unwrap().clone().unwrap();
    assert!(!workspace.exists());

    let invalid = executor.execute("flaky", Map::new()).await;
    assert_eq!(invalid.status, ExecutionStatus::Failed);
    assert!(invalid.error.unwrap().contains("Missing required variable: who"));

    let unknown = executor.execute("nope", Map::new()).await;
    assert_eq!(unknown.error.as_deref(), Some("Pipeline with ID \"nope\" not found."));
    assert_eq!(executor.store().len(), 3);
}
