//! Process executor — runs a job as a subprocess of the worker.
//!
//! Request body for `Schedule` / `Manual` / `Debug`:
//! `{"job_id": "...", "cmd": "...", "args": ["..."]}`.
//! Request body for `Cancel`: `{"job_id": "..."}`.
//!
//! A job is registered in [`RunningJobs`] as soon as it is dispatched, so a
//! cancel reaches it whether it is still waiting for a permit or already
//! running. A queued job that was cancelled never spawns; a running one has
//! its child process killed.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;

use jobwire_core::wire::{Request, Response, Status};

use crate::job::{JobCanceller, JobExecutor, RunningJob, WorkContext};

#[derive(Debug, Deserialize)]
struct JobSpec {
    job_id: String,
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CancelSpec {
    job_id: String,
}

/// Runs job requests as child processes in `jobs.work_dir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

/// Cancels jobs started by [`ProcessExecutor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCanceller;

impl JobExecutor for ProcessExecutor {
    fn execute(
        &self,
        ctx: Arc<WorkContext>,
        request: Request,
    ) -> BoxFuture<'static, anyhow::Result<Response>> {
        let admitted = admit(&ctx, &request);
        async move {
            match admitted? {
                Admitted::Run(spec, running) => run_job(ctx, request, spec, running).await,
                Admitted::Refused(response) => Ok(response),
            }
        }
        .boxed()
    }
}

impl JobCanceller for ProcessCanceller {
    fn cancel(
        &self,
        ctx: Arc<WorkContext>,
        request: Request,
    ) -> BoxFuture<'static, anyhow::Result<Response>> {
        async move {
            let spec: CancelSpec = serde_json::from_value(request.body)
                .context("cancel body must contain \"job_id\"")?;

            if ctx.running.cancel(&spec.job_id) {
                tracing::info!(job_id = %spec.job_id, "cancel signalled");
                Ok(Response::ok(
                    request.rid,
                    request.operate,
                    serde_json::json!({ "job_id": spec.job_id, "cancelled": true }),
                ))
            } else {
                tracing::debug!(job_id = %spec.job_id, "cancel for job that is not running");
                Ok(Response::error(
                    request.rid,
                    request.operate,
                    format!("job {} is not running", spec.job_id),
                ))
            }
        }
        .boxed()
    }
}

enum Admitted {
    Run(JobSpec, RunningJob),
    Refused(Response),
}

/// Parse the job body and register it. Runs at dispatch time.
fn admit(ctx: &WorkContext, request: &Request) -> anyhow::Result<Admitted> {
    let spec: JobSpec = serde_json::from_value(request.body.clone())
        .context("job body must contain \"job_id\" and \"cmd\"")?;

    match ctx.running.register(&spec.job_id) {
        Some(running) => Ok(Admitted::Run(spec, running)),
        None => Ok(Admitted::Refused(Response::error(
            request.rid,
            request.operate,
            format!("job {} is already running", spec.job_id),
        ))),
    }
}

fn cancelled_response(request: &Request, spec: &JobSpec) -> Response {
    Response::error(
        request.rid,
        request.operate,
        format!("job {} cancelled", spec.job_id),
    )
}

async fn run_job(
    ctx: Arc<WorkContext>,
    request: Request,
    spec: JobSpec,
    running: RunningJob,
) -> anyhow::Result<Response> {
    if running.is_cancelled() {
        tracing::info!(job_id = %spec.job_id, "job cancelled before it started");
        return Ok(cancelled_response(&request, &spec));
    }

    let work_dir = &ctx.settings.work_dir;
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("failed to create work dir {}", work_dir.display()))?;

    tracing::info!(job_id = %spec.job_id, operate = ?request.operate, cmd = %spec.cmd, "job started");
    let start = Instant::now();

    let child = tokio::process::Command::new(&spec.cmd)
        .args(&spec.args)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", spec.cmd))?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        output = child.wait_with_output() => output.context("failed to wait for job")?,
        _ = running.cancelled() => {
            tracing::info!(job_id = %spec.job_id, "job cancelled");
            return Ok(cancelled_response(&request, &spec));
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    tracing::info!(job_id = %spec.job_id, exit_code = code, elapsed_ms, "job finished");

    let body = serde_json::json!({
        "job_id": spec.job_id,
        "exit_code": code,
        "stdout": stdout,
        "stderr": stderr,
        "elapsed_ms": elapsed_ms,
    });

    let (status, error_text) = if output.status.success() {
        (Status::Ok, None)
    } else {
        let detail = if stderr.is_empty() { &stdout } else { &stderr };
        (Status::Error, Some(format!("exit code {code}: {}", detail.trim())))
    };

    Ok(Response {
        rid: request.rid,
        operate: request.operate,
        status,
        error_text,
        body,
    })
}
