//! The build worker pool.
//!
//! Workers share one receiver behind an async mutex and drain jobs FIFO.
//! Each job runs its strategy under the build deadline; the outcome goes
//! through the cache so the claim token decides whether this worker's
//! report is the one that lands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::analysis::{self, AnalysisContext};
use crate::cache::ReportCache;
use crate::error::ErrorKind;
use crate::models::{AnalysisKind, ReportStatus, RiskReport, Subject, TaskState};
use crate::store::{BuildClaim, Store};

use super::TaskEvent;

pub(crate) struct BuildJob {
    pub task_id: String,
    pub fingerprint: String,
    pub subject: Subject,
    pub claim: BuildClaim,
}

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub store: Store,
    pub cache: ReportCache,
    pub analysis: AnalysisContext,
    pub events: broadcast::Sender<TaskEvent>,
    pub depth: Arc<AtomicUsize>,
    pub build_timeout: Duration,
    pub ttl_company: Duration,
    pub ttl_designer: Duration,
}

pub(crate) async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<BuildJob>>>,
    ctx: WorkerContext,
) {
    loop {
        // Hold the receiver lock only while waiting, never while building.
        let job = {
            let mut receiver = jobs.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };
        ctx.depth.fetch_sub(1, Ordering::SeqCst);
        process_job(worker_id, job, &ctx).await;
    }
    tracing::debug!(worker_id, "analysis worker stopped");
}

async fn process_job(worker_id: usize, job: BuildJob, ctx: &WorkerContext) {
    let kind = job.subject.kind();
    tracing::debug!(
        worker_id,
        task_id = %job.task_id,
        kind = kind.as_str(),
        "build started"
    );

    run_store(&ctx.store, {
        let task_id = job.task_id.clone();
        move |store| store.mark_task_running(&task_id)
    })
    .await;
    emit(ctx, &job.task_id, TaskState::Running);

    // Timing out drops the strategy future, which cancels any in-flight
    // vendor requests.
    let build = analysis::run(&job.subject, &job.fingerprint, &ctx.analysis);
    let mut report = match tokio::time::timeout(ctx.build_timeout, build).await {
        Ok(report) => report,
        Err(_) => {
            tracing::warn!(task_id = %job.task_id, kind = kind.as_str(), "build deadline exceeded");
            RiskReport::failed(job.fingerprint.clone(), kind, ErrorKind::Timeout)
        }
    };

    if report.status == ReportStatus::Completed {
        report.expires_at = ttl_for(kind, ctx).map(|ttl| report.produced_at + ttl);
        match ctx.cache.complete_build(job.claim, report).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    task_id = %job.task_id,
                    fingerprint = %job.fingerprint,
                    "claim superseded, finished report discarded"
                );
            }
            Err(err) => tracing::error!(error = %err, "failed to store completed report"),
        }
        finish(ctx, &job.task_id, TaskState::Completed, None).await;
    } else {
        let error_kind = report.error_kind.or(Some(ErrorKind::Internal));
        match ctx.cache.fail_build(job.claim, report).await {
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "failed to store failed report"),
        }
        finish(ctx, &job.task_id, TaskState::Failed, error_kind).await;
    }
}

/// Completed company and designer reports age out; document audits are
/// pinned to immutable content and keep forever.
fn ttl_for(kind: AnalysisKind, ctx: &WorkerContext) -> Option<chrono::Duration> {
    match kind {
        AnalysisKind::Company => Some(chrono::Duration::seconds(ctx.ttl_company.as_secs() as i64)),
        AnalysisKind::Designer => {
            Some(chrono::Duration::seconds(ctx.ttl_designer.as_secs() as i64))
        }
        _ => None,
    }
}

async fn finish(ctx: &WorkerContext, task_id: &str, state: TaskState, error_kind: Option<ErrorKind>) {
    run_store(&ctx.store, {
        let task_id = task_id.to_string();
        move |store| store.finish_task(&task_id, state, error_kind)
    })
    .await;
    emit(ctx, task_id, state);
}

fn emit(ctx: &WorkerContext, task_id: &str, state: TaskState) {
    let _ = ctx.events.send(TaskEvent::now(task_id, state));
}

async fn run_store<F>(store: &Store, f: F)
where
    F: FnOnce(Store) -> crate::store::Result<()> + Send + 'static,
{
    if let Err(err) = store.run(f).await {
        tracing::error!(error = %err, "store update failed");
    }
}
