use super::{exit_codes, load_engine};
use crate::cli::args::ServeArgs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqljudge_core::{JudgeRequest, Verdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

static RID: AtomicU64 = AtomicU64::new(1);

fn next_rid() -> String {
    let n = RID.fetch_add(1, Ordering::Relaxed);
    format!("r-{n:06}")
}

#[derive(Debug, Deserialize)]
struct ServeRequest {
    /// Echoed back so callers can match answers to requests.
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    request: JudgeRequest,
}

#[derive(Debug, Serialize)]
struct ServeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ServeError>,
}

#[derive(Debug, Serialize)]
struct ServeError {
    code: &'static str,
    message: String,
}

impl ServeResponse {
    fn verdict(id: Option<Value>, verdict: Verdict) -> Self {
        Self {
            id,
            verdict: Some(verdict),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: &'static str, message: String) -> Self {
        Self {
            id,
            verdict: None,
            error: Some(ServeError { code, message }),
        }
    }
}

async fn write_line(out: &Mutex<Stdout>, resp: &ServeResponse) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(resp)?;
    line.push(b'\n');
    let mut out = out.lock().await;
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

pub async fn run(args: ServeArgs) -> anyhow::Result<i32> {
    let engine = Arc::new(load_engine(&args.config)?);
    let out = Arc::new(Mutex::new(tokio::io::stdout()));
    let concurrency = args.concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    tracing::info!(
        event = "serve_start",
        config = %args.config.config.display(),
        concurrency = concurrency,
        max_line_bytes = args.max_line_bytes,
    );

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let mut read_error = None;
    loop {
        buf.clear();
        match stdin.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(event = "stdin_read_failed", error = %e);
                read_error = Some(e);
                break;
            }
        }
        let rid = next_rid();
        let raw = trim_line_end(&buf);

        if raw.len() > args.max_line_bytes {
            tracing::warn!(
                event = "limit_exceeded",
                rid = %rid,
                bytes_in = raw.len(),
                max = args.max_line_bytes,
            );
            let resp = ServeResponse::error(
                None,
                "E_LIMIT_EXCEEDED",
                format!("message bytes={} > max={}", raw.len(), args.max_line_bytes),
            );
            write_line(&out, &resp).await?;
            continue;
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(event = "invalid_utf8", rid = %rid, error = %e);
                let resp = ServeResponse::error(
                    None,
                    "E_BAD_REQUEST",
                    format!("request is not valid UTF-8: {e}"),
                );
                write_line(&out, &resp).await?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ServeRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event = "json_parse_error", rid = %rid, error = %e);
                let resp =
                    ServeResponse::error(None, "E_BAD_REQUEST", format!("invalid request: {e}"));
                write_line(&out, &resp).await?;
                continue;
            }
        };

        // Finished tasks are reaped as we go so the set stays bounded.
        if tasks.len() >= concurrency * 4 {
            if let Some(joined) = tasks.join_next().await {
                log_task_outcome(joined);
            }
        }

        let permit = Arc::clone(&permits).acquire_owned().await?;
        let engine = Arc::clone(&engine);
        let out = Arc::clone(&out);
        tasks.spawn(async move {
            let _permit = permit;
            tracing::debug!(event = "request_start", rid = %rid);
            let verdict = engine.judge(&req.request).await;
            write_line(&out, &ServeResponse::verdict(req.id, verdict)).await
        });
    }

    // Requests already accepted are answered even when stdin broke.
    while let Some(joined) = tasks.join_next().await {
        log_task_outcome(joined);
    }
    engine.shutdown();
    tracing::info!(event = "serve_stop");
    match read_error {
        Some(e) => Err(anyhow::Error::new(e).context("failed to read requests from stdin")),
        None => Ok(exit_codes::OK),
    }
}

/// Drops the trailing `\n` or `\r\n`.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn log_task_outcome(joined: Result<anyhow::Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(event = "response_write_failed", error = %e),
        Err(e) => tracing::error!(event = "request_task_crashed", error = %e),
    }
}
