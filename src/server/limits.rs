//! Per-IP request budgets, enforced before any handler or vendor
//! budget runs.
//!
//! One global bucket plus tighter buckets on the endpoints that fan out
//! to expensive vendors. Keys are client IPs; the registries prune
//! idle entries on their own.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::Settings;
use crate::error::ApiError;
use crate::vendors::BucketRegistry;

use super::AppState;

pub struct RateLimits {
    global: BucketRegistry,
    company: BucketRegistry,
    upload: BucketRegistry,
    contract: BucketRegistry,
}

impl RateLimits {
    pub fn new(settings: &Settings) -> Self {
        Self {
            global: BucketRegistry::new(settings.rate_limit_global),
            company: BucketRegistry::new(settings.rate_limit_company),
            upload: BucketRegistry::new(settings.rate_limit_upload),
            contract: BucketRegistry::new(settings.rate_limit_contract),
        }
    }
}

/// Best-effort client identity: proxy header first, then the socket
/// address when the listener provides one.
fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

pub async fn global(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req);
    state
        .limits
        .global
        .try_acquire(&ip)
        .await
        .map_err(ApiError::rate_limited)?;
    Ok(next.run(req).await)
}

pub async fn company(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req);
    state
        .limits
        .company
        .try_acquire(&ip)
        .await
        .map_err(ApiError::rate_limited)?;
    Ok(next.run(req).await)
}

pub async fn upload(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req);
    state
        .limits
        .upload
        .try_acquire(&ip)
        .await
        .map_err(ApiError::rate_limited)?;
    Ok(next.run(req).await)
}

pub async fn contract(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req);
    state
        .limits
        .contract
        .try_acquire(&ip)
        .await
        .map_err(ApiError::rate_limited)?;
    Ok(next.run(req).await)
}
