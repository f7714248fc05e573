//! Request handlers.
//!
//! Handlers validate the wire shape, hand the work to the orchestrator
//! and project stored reports through the assembler. Anything
//! analysis-specific lives further down the stack.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;

use crate::assembler::{self, ReportView};
use crate::blobs::{BlobError, StoredBlob};
use crate::error::{ApiError, Envelope};
use crate::models::{AnalysisKind, RiskReport, Stage, Subject, Task, TaskState};
use crate::orchestrator::TaskEvent;
use crate::utils::detect_mime;

use super::AppState;

/// A task as returned by submission and polling endpoints, with the
/// report projection when one is available.
#[derive(Serialize)]
pub(super) struct TaskData {
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

#[derive(Deserialize)]
pub(super) struct CompanyRequest {
    name: String,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct DesignerRequest {
    question: String,
    #[serde(default)]
    image_keys: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct ReportQuery {
    view: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct InvalidateRequest {
    fingerprint: Option<String>,
    kind: Option<String>,
    pattern: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct BlobQuery {
    exp: Option<i64>,
    sig: Option<String>,
}

pub(super) async fn healthz() -> Json<Envelope<Value>> {
    Envelope::ok(json!({"status": "ok"}))
}

pub(super) async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let form = read_form(&state, multipart).await?;
    let (bytes, declared) = form
        .file
        .ok_or_else(|| ApiError::invalid("missing file field"))?;
    if bytes.is_empty() {
        return Err(ApiError::invalid("empty file"));
    }

    let blob = store_blob(&state, bytes, declared).await?;
    Ok(Envelope::ok(json!({
        "key": blob.key,
        "size": blob.size,
        "mime": blob.mime,
    })))
}

pub(super) async fn analyse_company(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CompanyRequest>,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let region = req.region.filter(|r| !r.trim().is_empty());
    submit(&state, &headers, Subject::Company {
        name: req.name,
        region,
    })
    .await
}

pub(super) async fn analyse_quote(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let form = read_form(&state, multipart).await?;
    let (bytes, declared) = form
        .file
        .ok_or_else(|| ApiError::invalid("missing file field"))?;
    let total_price = match form.fields.get("total_price") {
        Some(raw) => Some(
            raw.trim()
                .parse::<f64>()
                .map_err(|_| ApiError::invalid("total_price must be a number"))?,
        ),
        None => None,
    };

    let blob = store_blob(&state, bytes, declared).await?;
    submit(&state, &headers, Subject::Quote {
        blob_key: blob.key,
        total_price,
    })
    .await
}

pub(super) async fn analyse_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let form = read_form(&state, multipart).await?;
    let (bytes, declared) = form
        .file
        .ok_or_else(|| ApiError::invalid("missing file field"))?;

    let blob = store_blob(&state, bytes, declared).await?;
    submit(&state, &headers, Subject::Contract { blob_key: blob.key }).await
}

pub(super) async fn analyse_acceptance(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let form = read_form(&state, multipart).await?;
    let (bytes, declared) = form
        .file
        .ok_or_else(|| ApiError::invalid("missing file field"))?;
    let stage_raw = form
        .fields
        .get("stage")
        .ok_or_else(|| ApiError::invalid("missing stage field"))?;
    let stage = Stage::parse(stage_raw)
        .ok_or_else(|| ApiError::invalid(format!("unknown stage: {}", stage_raw)))?;

    let blob = store_blob(&state, bytes, declared).await?;
    submit(&state, &headers, Subject::Acceptance {
        blob_key: blob.key,
        stage,
    })
    .await
}

pub(super) async fn analyse_designer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DesignerRequest>,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    submit(&state, &headers, Subject::Designer {
        question: req.question,
        image_keys: req.image_keys,
    })
    .await
}

pub(super) async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let task = state
        .orchestrator
        .status(&task_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {} not found", task_id)))?;

    let report = match task.state {
        TaskState::Completed | TaskState::Cached => state
            .orchestrator
            .cache()
            .get_report(&task.fingerprint)
            .await
            .map_err(ApiError::internal)?
            .map(|report| serde_json::to_value(assembler::preview(&report)))
            .transpose()
            .map_err(ApiError::internal)?,
        _ => None,
    };

    Ok(Envelope::ok(TaskData { task, report }))
}

/// SSE stream of state transitions for one task. The task's current
/// state is replayed first, so late subscribers see something even
/// when the work already finished.
pub(super) async fn task_events(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task = state
        .orchestrator
        .status(&task_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {} not found", task_id)))?;

    let receiver = state.orchestrator.subscribe();
    let current = TaskEvent {
        task_id: task.id.clone(),
        state: task.state,
        at: Utc::now(),
    };

    let initial = futures::stream::iter(
        event_frame(&current)
            .into_iter()
            .map(Ok::<Event, Infallible>),
    );
    let wanted = task.id;
    let live = BroadcastStream::new(receiver).filter_map(move |result| {
        let wanted = wanted.clone();
        async move {
            match result {
                Ok(event) if event.task_id == wanted => event_frame(&event).map(Ok),
                Ok(_) => None,
                Err(err) => {
                    tracing::debug!(error = %err, "task event stream lagged");
                    None
                }
            }
        }
    });

    let stream = initial.chain(live);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

pub(super) async fn get_report(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let view = match query.view.as_deref() {
        None => ReportView::Preview,
        Some(raw) => ReportView::from_str(raw)
            .ok_or_else(|| ApiError::invalid(format!("unknown view: {}", raw)))?,
    };
    if view == ReportView::Audit {
        require_admin(&state, &headers)?;
    }

    let report = state
        .orchestrator
        .cache()
        .get_report(&fingerprint)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("no report for {}", fingerprint)))?;

    // User views treat an expired report as absent; audit sees history.
    if view != ReportView::Audit && expired(&report) {
        return Err(ApiError::not_found(format!("no report for {}", fingerprint)));
    }

    let data = match view {
        ReportView::Preview => serde_json::to_value(assembler::preview(&report)),
        ReportView::Full => serde_json::to_value(assembler::full(&report)),
        ReportView::Audit => serde_json::to_value(assembler::audit(&report)),
    }
    .map_err(ApiError::internal)?;

    Ok(Envelope::ok(data))
}

pub(super) async fn admin_invalidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    require_admin(&state, &headers)?;

    let invalidated = if let Some(fingerprint) = req.fingerprint {
        state
            .orchestrator
            .with_store(move |store| store.invalidate_fingerprint(&fingerprint))
            .await?
    } else {
        let kind_raw = req
            .kind
            .ok_or_else(|| ApiError::invalid("provide fingerprint, or kind and pattern"))?;
        let kind = AnalysisKind::from_str(&kind_raw)
            .ok_or_else(|| ApiError::invalid(format!("unknown kind: {}", kind_raw)))?;
        let pattern = req
            .pattern
            .ok_or_else(|| ApiError::invalid("provide fingerprint, or kind and pattern"))?;
        state
            .orchestrator
            .with_store(move |store| store.invalidate_matching(kind, &pattern))
            .await?
    };

    Ok(Envelope::ok(json!({"invalidated": invalidated})))
}

pub(super) async fn admin_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Value>>, ApiError> {
    require_admin(&state, &headers)?;

    let store_stats = state.orchestrator.with_store(|store| store.stats()).await?;
    Ok(Envelope::ok(json!({
        "queue_depth": state.orchestrator.queue_depth(),
        "cache_hits": state.orchestrator.cache().hit_count(),
        "cache_misses": state.orchestrator.cache().miss_count(),
        "store": store_stats,
    })))
}

pub(super) async fn fetch_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<Response, ApiError> {
    let exp = query.exp.unwrap_or(0);
    let sig = query.sig.unwrap_or_default();
    if !state.blobs.verify(&key, exp, &sig) {
        return Err(ApiError::auth_required());
    }

    let blobs = state.blobs.clone();
    let read_key = key.clone();
    let bytes = tokio::task::spawn_blocking(move || blobs.read(&read_key))
        .await
        .map_err(ApiError::internal)?
        .map_err(blob_error)?;

    let mime = detect_mime(&bytes, None);
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

/// Shared submission path: resolve the user, run the orchestrator and
/// shape the response. Cached submissions return the full projection
/// inline so the client is spared a second round trip.
async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    subject: Subject,
) -> Result<Json<Envelope<TaskData>>, ApiError> {
    let user = user_id(headers);
    let outcome = state.orchestrator.submit(&user, subject).await?;

    let report = outcome
        .report
        .as_ref()
        .map(|report| serde_json::to_value(assembler::full(report)))
        .transpose()
        .map_err(ApiError::internal)?;

    Ok(Envelope::ok(TaskData {
        task: outcome.task,
        report,
    }))
}

struct FormPayload {
    file: Option<(Vec<u8>, Option<String>)>,
    fields: HashMap<String, String>,
}

/// Drain a multipart body: at most one `file` part plus text fields.
/// The size cap applies to the file part, not the envelope.
async fn read_form(state: &AppState, mut multipart: Multipart) -> Result<FormPayload, ApiError> {
    let mut payload = FormPayload {
        file: None,
        fields: HashMap::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let declared = field.content_type().map(|s| s.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::invalid(format!("unreadable file field: {}", e)))?;
            if bytes.len() as u64 > state.settings.max_upload_bytes {
                return Err(ApiError::invalid(format!(
                    "file exceeds the {} byte limit",
                    state.settings.max_upload_bytes
                )));
            }
            payload.file = Some((bytes.to_vec(), declared));
        } else if !name.is_empty() {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::invalid(format!("unreadable {} field: {}", name, e)))?;
            payload.fields.insert(name, text);
        }
    }

    Ok(payload)
}

/// Sniff, screen and persist an uploaded file.
async fn store_blob(
    state: &AppState,
    bytes: Vec<u8>,
    declared: Option<String>,
) -> Result<StoredBlob, ApiError> {
    let mime = detect_mime(&bytes, declared.as_deref());
    if !state
        .settings
        .allowed_mime_types
        .iter()
        .any(|allowed| allowed == &mime)
    {
        return Err(ApiError::invalid(format!("unsupported file type: {}", mime)));
    }

    let blobs = state.blobs.clone();
    tokio::task::spawn_blocking(move || blobs.put(&bytes, declared.as_deref()))
        .await
        .map_err(ApiError::internal)?
        .map_err(blob_error)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .settings
        .admin_key
        .as_deref()
        .ok_or_else(ApiError::auth_required)?;
    let provided = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err(ApiError::auth_required());
    }
    Ok(())
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn expired(report: &RiskReport) -> bool {
    report
        .expires_at
        .map(|at| at <= Utc::now())
        .unwrap_or(false)
}

fn event_frame(event: &TaskEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event("state").data(json)),
        Err(err) => {
            tracing::warn!(error = %err, "unserialisable task event");
            None
        }
    }
}

fn blob_error(err: BlobError) -> ApiError {
    match err {
        BlobError::InvalidKey(key) => ApiError::invalid(format!("invalid blob key: {}", key)),
        BlobError::NotFound(key) => ApiError::not_found(format!("blob not found: {}", key)),
        BlobError::Io(e) => ApiError::internal(e),
    }
}
