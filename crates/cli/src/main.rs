mod cli;
mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{info, warn};

use dproc_core::BundleLoader;
use dproc_llm::{LlmClient, TextGenerator};
use dproc_report::config::ProjectLlmConfig;
use dproc_report::pipeline::PIPELINES_DIR;
use dproc_report::prompt::parse_reference;
use dproc_report::spec::PromptSource;
use dproc_report::{
    list_projects, workspace_root, EngineOptions, ExecutionStatus, FrameworkDefaults,
    PipelineExecutor, PipelineRegistry, ProcessorRegistry, ProjectConfig, PromptLibrary,
    ReportEngine, ReportSpec,
};

use crate::cli::{Cli, Commands, EngineArgs, ModelArgs, ProjectArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let defaults = FrameworkDefaults::from_env();

    match cli.command {
        Commands::Generate {
            project,
            data,
            engine,
            model,
            report_json,
        } => generate(&defaults, &project, data.as_deref(), engine, &model, report_json).await,
        Commands::Validate { project } => validate(&defaults, &project),
        Commands::Stats { data, raw } => stats(&data, raw),
        Commands::Prompts { dir, reference } => {
            let root = dir.unwrap_or_else(|| defaults.paths.templates.clone());
            prompts(&root, reference.as_deref())
        }
        Commands::Projects { root } => {
            let root = match root {
                Some(root) => root,
                None => workspace_root()?,
            };
            let projects = list_projects(&root)?;
            if projects.is_empty() {
                println!("no projects under {}", root.display());
            }
            for project in projects {
                println!(
                    "{}\t{}\t{}\t{}",
                    project.id,
                    project.name,
                    project.last_modified.format("%Y-%m-%d %H:%M"),
                    project.path.display()
                );
            }
            Ok(())
        }
        Commands::Pipelines { root } => {
            let registry = pipeline_registry(root)?;
            if registry.is_empty() {
                println!("no pipelines under {}", registry.root().display());
            }
            for pipeline in registry.list() {
                let formats: Vec<&str> = pipeline.output_formats.iter().map(|f| f.as_str()).collect();
                println!(
                    "{}\t{} v{}\t[{}]\t{}",
                    pipeline.id,
                    pipeline.name,
                    pipeline.version,
                    formats.join(","),
                    pipeline.description
                );
            }
            Ok(())
        }
        Commands::RunPipeline {
            id,
            inputs,
            inputs_json,
            root,
            model,
        } => run_pipeline(&defaults, &id, &inputs, inputs_json.as_deref(), root, &model).await,
    }
}

async fn generate(
    defaults: &FrameworkDefaults,
    project: &ProjectArgs,
    data: Option<&Path>,
    args: EngineArgs,
    model: &ModelArgs,
    report_json: Option<PathBuf>,
) -> Result<()> {
    let config = ProjectConfig::load(project.config.as_deref())?;
    let spec = ReportSpec::load(&config.spec_path(), Some(&config.base_dir))?;
    let llm = build_llm(defaults, config.llm.as_ref(), model)?;

    let mut options = EngineOptions {
        use_prompt_library: !args.no_library,
        validate_variables: !args.no_validate,
        manage_context: !args.no_context,
        parse_structured: !args.no_structured,
        processing: !args.raw,
        ..EngineOptions::default()
    };
    if let Some(window) = args.context_window {
        options.context_window = window;
    }
    let mut engine = ReportEngine::new(llm).with_options(options);
    if options.use_prompt_library {
        let root = library_root(defaults, project, &config);
        engine = engine.with_library(Arc::new(PromptLibrary::new(root)));
    }

    let bundle = engine.load_bundle(&config, data)?;
    let report = engine.generate(&config, &spec, &bundle).await?;

    for outcome in &report.variables {
        let status = if outcome.is_resolved() { "ok" } else { "FAILED" };
        println!("{:<24} {:<8} {}ms", outcome.name, status, outcome.elapsed_ms);
        for warning in &outcome.warnings {
            println!("    warning: {warning}");
        }
    }
    for (format, path) in &report.exports.outputs {
        println!("wrote {format}: {}", path.display());
    }
    for (format, error) in &report.exports.failures {
        println!("export {format} failed: {error}");
    }
    if let Some(path) = report_json {
        fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if report.is_degraded() {
        warn!(
            failed = report.failed().count(),
            "report generated with errors; see [Error: ...] placeholders"
        );
    }
    Ok(())
}

fn validate(defaults: &FrameworkDefaults, project: &ProjectArgs) -> Result<()> {
    let config = ProjectConfig::load(project.config.as_deref())?;
    let spec = ReportSpec::load(&config.spec_path(), Some(&config.base_dir))?;
    let library = PromptLibrary::new(library_root(defaults, project, &config));
    let mut problems = Vec::new();

    for source in config.data_source_paths() {
        if !source.is_file() {
            problems.push(format!("data source missing: {}", source.display()));
        }
    }
    if !spec.template_path().is_file() {
        problems.push(format!("template missing: {}", spec.template_path().display()));
    }
    for variable in &spec.variables {
        match variable.prompt_source() {
            PromptSource::Library(reference) => match parse_reference(reference) {
                Ok((category, name)) if library.exists(category, name) => {}
                Ok(_) => problems.push(format!(
                    "{}: library prompt {reference} not found under {}",
                    variable.name,
                    library.root().display()
                )),
                Err(err) => problems.push(format!("{}: {err}", variable.name)),
            },
            PromptSource::File(path) => {
                let path = spec.resolve(path);
                if !path.is_file() {
                    problems.push(format!("{}: prompt missing: {}", variable.name, path.display()));
                }
            }
        }
    }
    for format in &config.output.formats {
        if format.needs_renderer() {
            println!("note: {format} export needs a document renderer and will be skipped");
        }
    }

    if problems.is_empty() {
        println!(
            "{}: {} variables, {} output formats, all references resolve",
            config.report_name,
            spec.variables.len(),
            config.output.formats.len()
        );
        return Ok(());
    }
    for problem in &problems {
        println!("error: {problem}");
    }
    bail!("{} problem(s) found", problems.len())
}

fn stats(data: &Path, raw: bool) -> Result<()> {
    let loader = BundleLoader::new();
    let bundle = if raw {
        loader.load(data)?
    } else {
        loader.load_with_processing(data)?
    };
    let summary = serde_json::json!({
        "metadata": bundle.metadata,
        "stats": bundle.stats,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn prompts(root: &Path, reference: Option<&str>) -> Result<()> {
    let library = PromptLibrary::new(root);
    if let Some(reference) = reference {
        println!("{}", library.resolve(reference)?);
        return Ok(());
    }
    let found = library.list();
    if found.is_empty() {
        println!("no prompts under {}", root.display());
    }
    for entry in found {
        println!("library:{entry}");
    }
    Ok(())
}

async fn run_pipeline(
    defaults: &FrameworkDefaults,
    id: &str,
    pairs: &[String],
    inputs_json: Option<&Path>,
    root: Option<PathBuf>,
    model: &ModelArgs,
) -> Result<()> {
    let mut inputs: Map<String, Value> = match inputs_json {
        Some(path) => serde_json::from_str(
            &fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )
        .context("inputs file must hold a JSON object")?,
        None => Map::new(),
    };
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("input `{pair}` must look like name=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(name.trim().to_string(), value);
    }

    let registry = pipeline_registry(root)?;
    let llm = build_llm(defaults, None, model)?;
    let executor = PipelineExecutor::new(
        Arc::new(registry),
        Arc::new(ProcessorRegistry::with_builtins()),
        llm,
    );
    let result = executor.execute(id, inputs).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.status == ExecutionStatus::Failed {
        bail!(
            "execution {} failed: {}",
            result.execution_id,
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}

fn pipeline_registry(root: Option<PathBuf>) -> Result<PipelineRegistry> {
    let root = match root {
        Some(root) => root,
        None => workspace_root()?.join(PIPELINES_DIR),
    };
    let mut registry = PipelineRegistry::new(root);
    let count = registry.scan()?;
    info!(pipelines = count, root = %registry.root().display(), "pipelines scanned");
    Ok(registry)
}

fn library_root(defaults: &FrameworkDefaults, project: &ProjectArgs, config: &ProjectConfig) -> PathBuf {
    project
        .templates
        .clone()
        .unwrap_or_else(|| config.resolve(&defaults.paths.templates))
}

fn build_llm(
    defaults: &FrameworkDefaults,
    project: Option<&ProjectLlmConfig>,
    args: &ModelArgs,
) -> Result<Arc<dyn TextGenerator>> {
    if args.local {
        return Ok(Arc::new(LlmClient::local()));
    }
    let mut selected = project.cloned().unwrap_or_default();
    if let Some(provider) = &args.provider {
        selected.provider = Some(provider.clone());
    }
    if let Some(model) = &args.model {
        selected.model = Some(model.clone());
    }
    let resolved = defaults.resolve_llm(Some(&selected))?;
    let client = LlmClient::new(resolved.provider, resolved.model)
        .context("model client setup failed (use --local to run offline)")?
        .with_settings(resolved.settings);
    Ok(Arc::new(client))
}
