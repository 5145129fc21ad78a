use super::args::*;
use anyhow::Context;
use sqljudge_core::config::load_config;
use sqljudge_core::{JudgeEngine, Verdict, VerdictStatus};

pub mod check;
pub mod datasets;
pub mod judge;
pub mod serve;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const FAIL: i32 = 1;
    pub const ERROR: i32 = 2;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Judge(args) => judge::run(args).await,
        Command::Datasets(args) => datasets::run(args).await,
        Command::Check(args) => check::run(args).await,
        Command::Serve(args) => serve::run(args).await,
        Command::Init(args) => cmd_init(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("{} already exists, leaving it alone", args.config.display());
        return Ok(exit_codes::OK);
    }
    sqljudge_core::config::write_sample_config(&args.config)?;
    eprintln!("wrote {}", args.config.display());
    Ok(exit_codes::OK)
}

/// Loads the config, applies `SQLJUDGE_*` overrides and connects every
/// dataset.
pub fn load_engine(args: &ConfigArgs) -> anyhow::Result<JudgeEngine> {
    let mut cfg = load_config(&args.config, args.strict)?;
    cfg.engine
        .apply_env()
        .context("invalid SQLJUDGE_* environment override")?;
    JudgeEngine::from_config(&cfg)
        .with_context(|| format!("failed to start judge from {}", args.config.display()))
}

pub fn exit_code_for(verdict: &Verdict) -> i32 {
    match verdict.status {
        VerdictStatus::Pass => exit_codes::OK,
        VerdictStatus::Fail => exit_codes::FAIL,
        VerdictStatus::Error => exit_codes::ERROR,
    }
}
