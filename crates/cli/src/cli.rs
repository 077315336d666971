use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dproc", version, about = "Turn datasets into model-narrated reports")]
pub struct Cli {
    /// Log at debug level (also DPROC_VERBOSE=1).
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate the report described by a project config.
    Generate {
        #[command(flatten)]
        project: ProjectArgs,
        /// Use this data file instead of the config's first data source.
        #[arg(long)]
        data: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        model: ModelArgs,
        /// Also write the per-variable generation report as JSON.
        #[arg(long = "report-json")]
        report_json: Option<PathBuf>,
    },
    /// Check a project config, its spec and every file they reference.
    Validate {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Load a dataset and print its stats.
    Stats {
        data: PathBuf,
        /// Skip normalization, schema inference and enhanced stats.
        #[arg(long, action = ArgAction::SetTrue)]
        raw: bool,
    },
    /// List library prompts, or print one by reference.
    Prompts {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// `library:<category>:<name>`
        reference: Option<String>,
    },
    /// List projects under the workspace root.
    Projects {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// List registered pipelines.
    Pipelines {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Execute one pipeline and print its execution result.
    RunPipeline {
        id: String,
        /// `name=value`; values that parse as JSON are passed as JSON.
        #[arg(short = 'i', long = "input")]
        inputs: Vec<String>,
        /// JSON object file merged under the `--input` values.
        #[arg(long = "inputs-json")]
        inputs_json: Option<PathBuf>,
        #[arg(long)]
        root: Option<PathBuf>,
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project config (defaults to ./dproc.config.json).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Prompt library root (defaults to the framework templates dir).
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct EngineArgs {
    #[arg(long = "no-library", action = ArgAction::SetTrue)]
    pub no_library: bool,
    #[arg(long = "no-validate", action = ArgAction::SetTrue)]
    pub no_validate: bool,
    #[arg(long = "no-context", action = ArgAction::SetTrue)]
    pub no_context: bool,
    #[arg(long = "no-structured", action = ArgAction::SetTrue)]
    pub no_structured: bool,
    /// Load data without normalization or schema inference.
    #[arg(long, action = ArgAction::SetTrue)]
    pub raw: bool,
    #[arg(long = "context-window")]
    pub context_window: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Answer with the offline local model instead of a hosted provider.
    #[arg(long, action = ArgAction::SetTrue)]
    pub local: bool,
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
}
