use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqljudge",
    version,
    about = "Judge SQL answers by comparing their result sets against a reference query"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Judge one candidate statement and print the verdict as JSON
    Judge(JudgeArgs),
    /// List registered datasets
    Datasets(DatasetsArgs),
    /// Run only the statement-safety filter
    Check(CheckArgs),
    /// Judge JSON-lines requests from stdin, one verdict line per request
    Serve(ServeArgs),
    /// Write a sample config file
    Init(InitArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, env = "SQLJUDGE_CONFIG", default_value = "sqljudge.yaml")]
    pub config: PathBuf,

    /// Reject unknown config fields instead of warning
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct JudgeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Dataset key; the config's default_dataset when omitted
    #[arg(long)]
    pub dataset: Option<String>,

    #[arg(long)]
    pub reference: String,

    #[arg(long, conflicts_with = "candidate_file", required_unless_present = "candidate_file")]
    pub candidate: Option<String>,

    #[arg(long)]
    pub candidate_file: Option<PathBuf>,

    /// Per-request execution timeout override
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DatasetsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Include each dataset's schema
    #[arg(long)]
    pub schema: bool,

    #[arg(long, default_value = "text")]
    pub format: String, // text|json
}

#[derive(clap::Args, Debug, Clone)]
pub struct CheckArgs {
    #[arg(long)]
    pub sql: String,

    /// Also describe the result columns on this dataset (needs --config)
    #[arg(long)]
    pub dataset: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Lines longer than this are answered with an error and not parsed
    #[arg(long, env = "SQLJUDGE_MAX_LINE_BYTES", default_value_t = 1_000_000)]
    pub max_line_bytes: usize,

    /// Requests judged at the same time
    #[arg(long, env = "SQLJUDGE_SERVE_CONCURRENCY", default_value_t = 16)]
    pub concurrency: usize,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "sqljudge.yaml")]
    pub config: PathBuf,
}
