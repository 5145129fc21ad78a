use super::{exit_codes, load_engine};
use crate::cli::args::DatasetsArgs;
use serde::Serialize;
use sqljudge_core::executor::TableSchema;
use sqljudge_core::registry::DatasetSummary;

#[derive(Serialize)]
struct DatasetListing {
    #[serde(flatten)]
    summary: DatasetSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<Vec<TableSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_error: Option<String>,
}

pub async fn run(args: DatasetsArgs) -> anyhow::Result<i32> {
    let engine = load_engine(&args.config)?;

    let mut listings = Vec::new();
    for summary in engine.registry().summaries() {
        let (schema, schema_error) = if args.schema && summary.active {
            match engine.describe_schema(Some(&summary.key)).await {
                Ok(tables) => (Some(tables), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };
        listings.push(DatasetListing {
            summary,
            schema,
            schema_error,
        });
    }
    engine.shutdown();

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else {
        for l in &listings {
            let mut flags = Vec::new();
            if l.summary.default {
                flags.push("default");
            }
            if !l.summary.active {
                flags.push("inactive");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!(
                "{}\t{}\t{}{}",
                l.summary.key,
                l.summary.kind.as_str(),
                l.summary.name,
                flags
            );
            if let Some(tables) = &l.schema {
                for line in sqljudge_core::executor::render_schema_text(tables).lines() {
                    println!("    {line}");
                }
            }
            if let Some(err) = &l.schema_error {
                println!("    schema unavailable: {err}");
            }
        }
    }

    let any_broken = listings.iter().any(|l| l.schema_error.is_some());
    Ok(if any_broken {
        exit_codes::ERROR
    } else {
        exit_codes::OK
    })
}
