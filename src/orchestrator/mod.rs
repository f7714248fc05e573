//! Submission intake and the async build pipeline.
//!
//! `submit` validates the subject, persists the submission, fingerprints
//! it and consults the report cache. Only a `Claimed` outcome charges the
//! user's daily quota and enqueues a build; cache hits and piggy-backed
//! waits are free. A bounded queue feeds the worker pool, and every task
//! state transition is mirrored onto a broadcast channel for SSE.

mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::analysis::AnalysisContext;
use crate::blobs::BlobStore;
use crate::cache::ReportCache;
use crate::error::{ApiError, ErrorKind};
use crate::fingerprint;
use crate::models::{
    AnalysisKind, ReportStatus, RiskReport, Subject, Submission, Task, TaskState,
};
use crate::store::{CacheDecision, Store};

use worker::{BuildJob, WorkerContext};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One task state transition, pushed to SSE subscribers. Duplicates are
/// permitted; consumers key on `task_id` and treat states as monotonic.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    fn now(task_id: &str, state: TaskState) -> Self {
        Self {
            task_id: task_id.to_string(),
            state,
            at: Utc::now(),
        }
    }
}

/// What `submit` hands back: the persisted task, plus the report when it
/// was already cached.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub task: Task,
    pub report: Option<RiskReport>,
}

/// Tunables, wired from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub build_timeout: Duration,
    pub daily_quota: u32,
    pub ttl_company: Duration,
    pub ttl_designer: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            worker_count: 16,
            queue_capacity: 1024,
            build_timeout: Duration::from_secs(120),
            daily_quota: 20,
            ttl_company: Duration::from_secs(30 * 24 * 60 * 60),
            ttl_designer: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct Orchestrator {
    store: Store,
    cache: ReportCache,
    analysis: AnalysisContext,
    options: OrchestratorOptions,
    jobs: mpsc::Sender<BuildJob>,
    depth: Arc<AtomicUsize>,
    events: broadcast::Sender<TaskEvent>,
}

impl Orchestrator {
    /// Build the pipeline and spawn its worker pool. Must be called from
    /// within a tokio runtime. Workers exit when the orchestrator drops.
    pub fn new(
        store: Store,
        cache: ReportCache,
        analysis: AnalysisContext,
        options: OrchestratorOptions,
    ) -> Self {
        let (jobs, receiver) = mpsc::channel(options.queue_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let depth = Arc::new(AtomicUsize::new(0));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker_id in 0..options.worker_count {
            let ctx = WorkerContext {
                store: store.clone(),
                cache: cache.clone(),
                analysis: analysis.clone(),
                events: events.clone(),
                depth: depth.clone(),
                build_timeout: options.build_timeout,
                ttl_company: options.ttl_company,
                ttl_designer: options.ttl_designer,
            };
            tokio::spawn(worker::worker_loop(worker_id, receiver.clone(), ctx));
        }

        Self {
            store,
            cache,
            analysis,
            options,
            jobs,
            depth,
            events,
        }
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Accept one analysis request. Identical requests share a report:
    /// a completed one is returned immediately as a `cached` task, an
    /// in-flight build gets a waiter task, and only a fresh claim costs
    /// quota and queue capacity.
    pub async fn submit(&self, user_id: &str, subject: Subject) -> Result<SubmitOutcome, ApiError> {
        self.validate(&subject)?;

        let submission = Submission::new(user_id, subject.clone());
        let kind = submission.kind;
        let fingerprint = self.fingerprint_for(&subject);

        self.with_store({
            let submission = submission.clone();
            move |store| store.insert_submission(&submission)
        })
        .await?;

        let decision = self
            .cache
            .consult(&fingerprint, kind)
            .await
            .map_err(ApiError::internal)?;

        match decision {
            CacheDecision::Hit(report) => {
                let mut task = Task::new(&submission.id, &fingerprint, TaskState::Cached);
                task.finished_at = Some(Utc::now());
                self.insert_task(task.clone()).await?;
                self.emit(&task.id, TaskState::Cached);
                tracing::debug!(task_id = %task.id, fingerprint = %fingerprint, "served from cache");
                Ok(SubmitOutcome {
                    task,
                    report: Some(report),
                })
            }
            CacheDecision::InFlight => {
                let task = Task::new(&submission.id, &fingerprint, TaskState::Queued);
                self.insert_task(task.clone()).await?;
                self.emit(&task.id, TaskState::Queued);
                self.spawn_waiter(task.clone());
                Ok(SubmitOutcome { task, report: None })
            }
            CacheDecision::Claimed(claim) => {
                let allowed = self
                    .with_store({
                        let user = user_id.to_string();
                        let day = today();
                        let limit = self.options.daily_quota;
                        move |store| store.consume_quota(&user, &day, limit)
                    })
                    .await?;
                if !allowed {
                    // Release the claim so the fingerprint is not stuck
                    // pending until the stale timeout.
                    let refusal =
                        RiskReport::failed(fingerprint.clone(), kind, ErrorKind::QuotaExceeded);
                    if let Err(err) = self.cache.fail_build(claim, refusal).await {
                        tracing::error!(error = %err, "failed to release claim after quota refusal");
                    }
                    return Err(ApiError::new(
                        ErrorKind::QuotaExceeded,
                        "daily analysis quota exhausted",
                    ));
                }

                let task = Task::new(&submission.id, &fingerprint, TaskState::Queued);
                self.insert_task(task.clone()).await?;

                let job = BuildJob {
                    task_id: task.id.clone(),
                    fingerprint: fingerprint.clone(),
                    subject,
                    claim,
                };
                if let Err(err) = self.jobs.try_send(job) {
                    return Err(self.reject_overflow(err, &task, kind).await);
                }
                self.depth.fetch_add(1, Ordering::SeqCst);
                self.emit(&task.id, TaskState::Queued);
                Ok(SubmitOutcome { task, report: None })
            }
        }
    }

    /// Poll a task. Terminal tasks stay readable indefinitely.
    pub async fn status(&self, task_id: &str) -> Result<Option<Task>, ApiError> {
        let id = task_id.to_string();
        self.with_store(move |store| store.get_task(&id)).await
    }

    async fn reject_overflow(
        &self,
        err: mpsc::error::TrySendError<BuildJob>,
        task: &Task,
        kind: AnalysisKind,
    ) -> ApiError {
        let (job, closed) = match err {
            mpsc::error::TrySendError::Full(job) => (job, false),
            mpsc::error::TrySendError::Closed(job) => (job, true),
        };
        let depth = self.queue_depth();
        tracing::warn!(depth, closed, "work queue rejected a build");

        let refusal = RiskReport::failed(job.fingerprint.clone(), kind, ErrorKind::Overloaded);
        if let Err(err) = self.cache.fail_build(job.claim, refusal).await {
            tracing::error!(error = %err, "failed to release claim after queue overflow");
        }
        let finish = self
            .with_store({
                let id = task.id.clone();
                move |store| store.finish_task(&id, TaskState::Failed, Some(ErrorKind::Overloaded))
            })
            .await;
        if let Err(err) = finish {
            tracing::error!(error = %err, "failed to mark overflowed task");
        }
        self.emit(&task.id, TaskState::Failed);

        if closed {
            ApiError::internal("work queue closed")
        } else {
            ApiError::overloaded(depth as u64 / 100 + 1)
        }
    }

    /// A waiter piggy-backs on another submission's in-flight build: it
    /// never runs a strategy, it just waits for the registry to ring and
    /// records the shared outcome on its own task.
    fn spawn_waiter(&self, task: Task) {
        let cache = self.cache.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let deadline = self.options.build_timeout;
        tokio::spawn(async move {
            let (state, error_kind) = match cache.wait_for(&task.fingerprint, deadline).await {
                Ok(Some(report)) if report.status == ReportStatus::Completed => {
                    (TaskState::Cached, None)
                }
                Ok(Some(report)) => (
                    TaskState::Failed,
                    report.error_kind.or(Some(ErrorKind::Internal)),
                ),
                Ok(None) => (TaskState::Failed, Some(ErrorKind::Timeout)),
                Err(err) => {
                    tracing::error!(error = %err, "waiter could not read the report");
                    (TaskState::Failed, Some(ErrorKind::Internal))
                }
            };
            let task_id = task.id.clone();
            let finished = store
                .run(move |store| store.finish_task(&task.id, state, error_kind))
                .await;
            match finished {
                Ok(()) => {
                    let _ = events.send(TaskEvent::now(&task_id, state));
                }
                Err(err) => tracing::error!(error = %err, "failed to finish waiter task"),
            }
        });
    }

    fn validate(&self, subject: &Subject) -> Result<(), ApiError> {
        match subject {
            Subject::Company { name, .. } => {
                if name.trim().is_empty() {
                    return Err(ApiError::invalid("company name is required"));
                }
                if name.chars().count() > 128 {
                    return Err(ApiError::invalid("company name too long (max 128 chars)"));
                }
            }
            Subject::Quote {
                blob_key,
                total_price,
            } => {
                self.validate_blob_key(blob_key)?;
                if let Some(price) = total_price {
                    if !price.is_finite() || *price < 0.0 {
                        return Err(ApiError::invalid("total_price must be a non-negative number"));
                    }
                }
            }
            Subject::Contract { blob_key } => self.validate_blob_key(blob_key)?,
            Subject::Acceptance { blob_key, .. } => self.validate_blob_key(blob_key)?,
            Subject::Designer {
                question,
                image_keys,
            } => {
                if question.trim().is_empty() {
                    return Err(ApiError::invalid("question is required"));
                }
                if question.chars().count() > 2000 {
                    return Err(ApiError::invalid("question too long (max 2000 chars)"));
                }
                for key in image_keys {
                    self.validate_blob_key(key)?;
                }
            }
        }
        Ok(())
    }

    fn validate_blob_key(&self, key: &str) -> Result<(), ApiError> {
        if BlobStore::content_hash_of(key).is_none() {
            return Err(ApiError::invalid(format!("invalid blob key: {key}")));
        }
        if !self.analysis.blobs.exists(key) {
            return Err(ApiError::not_found(format!("unknown blob key: {key}")));
        }
        Ok(())
    }

    /// Cache key for a subject: normalised inputs plus the version vector
    /// of every vendor that will contribute, so a vendor upgrade starts a
    /// fresh build instead of serving stale analysis.
    fn fingerprint_for(&self, subject: &Subject) -> String {
        let vendors = &self.analysis.vendors;
        match subject {
            Subject::Company { name, region } => {
                let mut versions = BTreeMap::new();
                versions.insert("enterprise".to_string(), vendors.enterprise.version().to_string());
                versions.insert("judicial".to_string(), vendors.judicial.version().to_string());
                fingerprint::company(name, region.as_deref(), &versions)
            }
            Subject::Quote { blob_key, .. } => {
                fingerprint::document(AnalysisKind::Quote, blob_hash(blob_key), &self.document_versions())
            }
            Subject::Contract { blob_key } => {
                fingerprint::document(AnalysisKind::Contract, blob_hash(blob_key), &self.document_versions())
            }
            Subject::Acceptance { blob_key, stage } => {
                let mut versions = BTreeMap::new();
                versions.insert("llm".to_string(), vendors.llm.version().to_string());
                versions.insert(
                    "acceptance_prompt".to_string(),
                    crate::analysis::templates::ACCEPTANCE_PROMPT_VERSION.to_string(),
                );
                fingerprint::acceptance(blob_hash(blob_key), *stage, &versions)
            }
            Subject::Designer {
                question,
                image_keys,
            } => {
                let hashes: Vec<String> = image_keys
                    .iter()
                    .filter_map(|key| BlobStore::content_hash_of(key))
                    .map(str::to_string)
                    .collect();
                let mut versions = BTreeMap::new();
                versions.insert("agent".to_string(), vendors.agent_primary.version().to_string());
                fingerprint::designer(question, &hashes, &versions)
            }
        }
    }

    fn document_versions(&self) -> BTreeMap<String, String> {
        let vendors = &self.analysis.vendors;
        let mut versions = BTreeMap::new();
        versions.insert("ocr".to_string(), vendors.ocr.version().to_string());
        versions.insert("llm".to_string(), vendors.llm.version().to_string());
        versions
    }

    async fn insert_task(&self, task: Task) -> Result<(), ApiError> {
        self.with_store(move |store| store.insert_task(&task)).await
    }

    fn emit(&self, task_id: &str, state: TaskState) {
        // Nobody listening is fine; SSE subscribers come and go.
        let _ = self.events.send(TaskEvent::now(task_id, state));
    }

    pub(crate) async fn with_store<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> crate::store::Result<T> + Send + 'static,
    {
        self.store.run(f).await.map_err(ApiError::internal)
    }
}

/// Quota buckets roll over at UTC midnight.
fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn blob_hash(key: &str) -> &str {
    // Submit validation already rejected malformed keys.
    BlobStore::content_hash_of(key).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::analysis::test_support::{fake_context, PNG_BYTES};
    use crate::vendors::{FakeEnterprise, FakeLlm, VendorError};

    fn pipeline_with(
        options: OrchestratorOptions,
    ) -> (tempfile::TempDir, AnalysisContext, Orchestrator) {
        let (dir, ctx) = fake_context();
        let store = Store::new(&dir.path().join("reno.db")).unwrap();
        let cache = ReportCache::new(store.clone(), options.build_timeout);
        let orchestrator = Orchestrator::new(store, cache, ctx.clone(), options);
        (dir, ctx, orchestrator)
    }

    fn pipeline() -> (tempfile::TempDir, AnalysisContext, Orchestrator) {
        pipeline_with(OrchestratorOptions {
            worker_count: 2,
            queue_capacity: 16,
            build_timeout: Duration::from_secs(5),
            daily_quota: 20,
            ..OrchestratorOptions::default()
        })
    }

    async fn wait_terminal(orchestrator: &Orchestrator, task_id: &str) -> Task {
        for _ in 0..200 {
            let task = orchestrator.status(task_id).await.unwrap().unwrap();
            if task.state.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_submit_builds_then_serves_cached() {
        let (_dir, _ctx, orchestrator) = pipeline();
        let subject = Subject::Company {
            name: "北京某某装饰工程有限公司".to_string(),
            region: None,
        };

        let first = orchestrator.submit("u1", subject.clone()).await.unwrap();
        assert_eq!(first.task.state, TaskState::Queued);
        let done = wait_terminal(&orchestrator, &first.task.id).await;
        assert_eq!(done.state, TaskState::Completed);

        let second = orchestrator.submit("u2", subject).await.unwrap();
        assert_eq!(second.task.state, TaskState::Cached);
        assert_eq!(second.task.fingerprint, first.task.fingerprint);
        let report = second.report.expect("cached submit returns the report");
        assert_eq!(report.status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn test_equivalent_company_names_share_a_fingerprint() {
        let (_dir, _ctx, orchestrator) = pipeline();

        let a = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "某某装饰工程有限公司".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap();
        wait_terminal(&orchestrator, &a.task.id).await;
        let b = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "  某某装饰工程  ".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(a.task.fingerprint, b.task.fingerprint);
        assert_eq!(b.task.state, TaskState::Cached);
    }

    #[tokio::test]
    async fn test_concurrent_submits_run_one_build() {
        let (_dir, enterprise, orchestrator) = {
            let (dir, mut ctx, _) = pipeline();
            // Rebuild with a counting enterprise fake shared by all workers.
            let enterprise = Arc::new(FakeEnterprise::new());
            enterprise.insert("甲公司", FakeEnterprise::sample_record("甲公司"));
            ctx.vendors.enterprise = enterprise.clone();
            let store = Store::new(&dir.path().join("reno2.db")).unwrap();
            let cache = ReportCache::new(store.clone(), Duration::from_secs(5));
            let orchestrator = Orchestrator::new(
                store,
                cache,
                ctx,
                OrchestratorOptions {
                    worker_count: 2,
                    queue_capacity: 16,
                    build_timeout: Duration::from_secs(5),
                    ..OrchestratorOptions::default()
                },
            );
            (dir, enterprise, orchestrator)
        };
        let subject = Subject::Company {
            name: "甲公司".to_string(),
            region: None,
        };

        let mut outcomes = Vec::new();
        for i in 0..6 {
            outcomes.push(
                orchestrator
                    .submit(&format!("user-{i}"), subject.clone())
                    .await
                    .unwrap(),
            );
        }
        let mut finals = Vec::new();
        for outcome in &outcomes {
            finals.push(wait_terminal(&orchestrator, &outcome.task.id).await);
        }

        let built = finals
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .count();
        let piggybacked = finals
            .iter()
            .filter(|t| t.state == TaskState::Cached)
            .count();
        assert_eq!(built, 1, "exactly one task runs the build");
        assert_eq!(built + piggybacked, 6);
        // The five sharers never reach the vendor.
        assert_eq!(enterprise.call_count(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_rejects_before_building() {
        let (_dir, _ctx, orchestrator) = pipeline_with(OrchestratorOptions {
            worker_count: 1,
            queue_capacity: 16,
            build_timeout: Duration::from_secs(5),
            daily_quota: 2,
            ..OrchestratorOptions::default()
        });

        for i in 0..2 {
            let outcome = orchestrator
                .submit(
                    "heavy-user",
                    Subject::Company {
                        name: format!("公司{i}"),
                        region: None,
                    },
                )
                .await
                .unwrap();
            wait_terminal(&orchestrator, &outcome.task.id).await;
        }

        let refused = orchestrator
            .submit(
                "heavy-user",
                Subject::Company {
                    name: "公司三".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(refused.kind, ErrorKind::QuotaExceeded);

        // The fingerprint is not left stuck pending: another user builds it.
        let other = orchestrator
            .submit(
                "other-user",
                Subject::Company {
                    name: "公司三".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap();
        let done = wait_terminal(&orchestrator, &other.task.id).await;
        assert_eq!(done.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_cached_hit_does_not_charge_quota() {
        let (_dir, _ctx, orchestrator) = pipeline_with(OrchestratorOptions {
            worker_count: 1,
            queue_capacity: 16,
            build_timeout: Duration::from_secs(5),
            daily_quota: 1,
            ..OrchestratorOptions::default()
        });
        let subject = Subject::Company {
            name: "乙公司".to_string(),
            region: None,
        };

        let first = orchestrator.submit("u1", subject.clone()).await.unwrap();
        wait_terminal(&orchestrator, &first.task.id).await;

        // Quota is spent, but the cached read still succeeds.
        let again = orchestrator.submit("u1", subject).await.unwrap();
        assert_eq!(again.task.state, TaskState::Cached);
    }

    #[tokio::test]
    async fn test_invalid_subjects_rejected() {
        let (_dir, _ctx, orchestrator) = pipeline();

        let err = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "   ".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);

        let err = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "很".repeat(129),
                    region: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);

        let err = orchestrator
            .submit(
                "u1",
                Subject::Designer {
                    question: "字".repeat(2001),
                    image_keys: vec![],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);

        let err = orchestrator
            .submit(
                "u1",
                Subject::Contract {
                    blob_key: "not-a-key".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);
    }

    #[tokio::test]
    async fn test_unknown_blob_is_not_found() {
        let (_dir, _ctx, orchestrator) = pipeline();
        let missing = format!("{}.png", "ab".repeat(32));

        let err = orchestrator
            .submit("u1", Subject::Contract { blob_key: missing })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failed_build_reports_error_kind() {
        let (dir, mut ctx, _) = pipeline();
        let llm = Arc::new(FakeLlm::new());
        llm.script(
            "acceptance_S01",
            Err(VendorError::VendorUnavailable("down".to_string())),
        );
        ctx.vendors.llm = llm;
        let store = Store::new(&dir.path().join("reno3.db")).unwrap();
        let cache = ReportCache::new(store.clone(), Duration::from_secs(5));
        let orchestrator = Orchestrator::new(
            store,
            cache,
            ctx.clone(),
            OrchestratorOptions {
                worker_count: 1,
                queue_capacity: 16,
                build_timeout: Duration::from_secs(5),
                ..OrchestratorOptions::default()
            },
        );
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();

        let outcome = orchestrator
            .submit(
                "u1",
                Subject::Acceptance {
                    blob_key: blob.key,
                    stage: crate::models::Stage::Plumbing,
                },
            )
            .await
            .unwrap();
        let done = wait_terminal(&orchestrator, &outcome.task.id).await;

        assert_eq!(done.state, TaskState::Failed);
        assert_eq!(done.error_kind, Some(ErrorKind::VendorUnavailable));
    }

    #[tokio::test]
    async fn test_queue_overflow_is_overloaded_and_releases_claim() {
        // No workers drain the queue, so the second distinct submission
        // overflows a capacity-1 channel.
        let (_dir, _ctx, orchestrator) = pipeline_with(OrchestratorOptions {
            worker_count: 0,
            queue_capacity: 1,
            build_timeout: Duration::from_secs(5),
            ..OrchestratorOptions::default()
        });

        orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "排队公司一".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap();
        let err = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "排队公司二".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert!(err.retry_after_secs.is_some());

        // The rejected fingerprint can be claimed again immediately.
        let retry = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "排队公司二".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap_err();
        // Capacity is still full, so it overflows again rather than
        // reporting a stuck in-flight build.
        assert_eq!(retry.kind, ErrorKind::Overloaded);
    }

    #[tokio::test]
    async fn test_build_timeout_fails_the_task() {
        let (dir, mut ctx, _) = pipeline();
        let llm = Arc::new(FakeLlm::new());
        llm.set_delay(Duration::from_millis(300));
        ctx.vendors.llm = llm;
        let store = Store::new(&dir.path().join("reno4.db")).unwrap();
        let cache = ReportCache::new(store.clone(), Duration::from_millis(50));
        let orchestrator = Orchestrator::new(
            store,
            cache,
            ctx.clone(),
            OrchestratorOptions {
                worker_count: 1,
                queue_capacity: 4,
                build_timeout: Duration::from_millis(50),
                ..OrchestratorOptions::default()
            },
        );
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();

        let outcome = orchestrator
            .submit(
                "u1",
                Subject::Acceptance {
                    blob_key: blob.key,
                    stage: crate::models::Stage::Material,
                },
            )
            .await
            .unwrap();
        let done = wait_terminal(&orchestrator, &outcome.task.id).await;

        assert_eq!(done.state, TaskState::Failed);
        assert_eq!(done.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let (_dir, _ctx, orchestrator) = pipeline();
        let mut events = orchestrator.subscribe();

        let outcome = orchestrator
            .submit(
                "u1",
                Subject::Company {
                    name: "丙公司".to_string(),
                    region: None,
                },
            )
            .await
            .unwrap();
        wait_terminal(&orchestrator, &outcome.task.id).await;

        let mut seen = Vec::new();
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if let Ok(event) = event {
                if event.task_id == outcome.task.id {
                    seen.push(event.state);
                }
            } else {
                break;
            }
        }
        assert!(seen.contains(&TaskState::Queued));
        assert!(seen.contains(&TaskState::Completed));
    }
}
