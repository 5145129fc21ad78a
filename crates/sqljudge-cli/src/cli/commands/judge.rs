use super::{exit_code_for, load_engine};
use crate::cli::args::JudgeArgs;
use anyhow::Context;
use sqljudge_core::JudgeRequest;

pub async fn run(args: JudgeArgs) -> anyhow::Result<i32> {
    let candidate_sql = match (&args.candidate, &args.candidate_file) {
        (Some(sql), _) => sql.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read candidate file {}", path.display()))?,
        (None, None) => anyhow::bail!("either --candidate or --candidate-file is required"),
    };

    let engine = load_engine(&args.config)?;
    let req = JudgeRequest {
        dataset: args.dataset,
        reference_sql: args.reference,
        candidate_sql,
        timeout_ms: args.timeout_ms,
    };
    let verdict = engine.judge(&req).await;
    engine.shutdown();

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(exit_code_for(&verdict))
}
