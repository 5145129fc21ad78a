use super::{exit_codes, load_engine};
use crate::cli::args::CheckArgs;
use sqljudge_core::executor::safety::check_statement;

pub async fn run(args: CheckArgs) -> anyhow::Result<i32> {
    if let Err(e) = check_statement(&args.sql) {
        println!(
            "{}",
            serde_json::json!({
                "allowed": false,
                "reason": e.kind(),
                "message": e.to_string(),
            })
        );
        return Ok(exit_codes::FAIL);
    }

    let Some(dataset) = args.dataset.as_deref() else {
        println!("{}", serde_json::json!({ "allowed": true }));
        return Ok(exit_codes::OK);
    };

    let engine = load_engine(&args.config)?;
    let described = engine.result_columns(Some(dataset), &args.sql).await;
    engine.shutdown();
    match described {
        Ok(columns) => {
            println!(
                "{}",
                serde_json::json!({ "allowed": true, "dataset": dataset, "columns": columns })
            );
            Ok(exit_codes::OK)
        }
        Err(e) => {
            println!(
                "{}",
                serde_json::json!({
                    "allowed": true,
                    "dataset": dataset,
                    "reason": e.kind(),
                    "message": e.to_string(),
                })
            );
            Ok(exit_codes::ERROR)
        }
    }
}
