//! Async cache facade over the report store.
//!
//! Routes the store's atomic claim through [`Store::run`] and adds the
//! in-process build registry: waiters on an in-flight fingerprint park
//! on a `Notify` and re-read the store when the builder rings. Waking
//! without a terminal row is harmless; the waiter just parks again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use crate::models::{AnalysisKind, RiskReport};
use crate::store::{BuildClaim, CacheDecision, Store, StoreError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Shared report cache. Cheap to clone via the inner `Arc`.
#[derive(Clone)]
pub struct ReportCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Store,
    build_timeout: Duration,
    in_flight: std::sync::Mutex<HashMap<String, Arc<Notify>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReportCache {
    pub fn new(store: Store, build_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                build_timeout,
                in_flight: std::sync::Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        Ok(self.inner.store.run(f).await?)
    }

    /// Consult the cache for `fingerprint`. `Claimed` makes the caller
    /// the sole builder; everyone else gets `Hit` or `InFlight`.
    pub async fn consult(
        &self,
        fingerprint: &str,
        kind: AnalysisKind,
    ) -> Result<CacheDecision> {
        let fp = fingerprint.to_string();
        let build_timeout = self.inner.build_timeout;
        let decision = self
            .run_blocking(move |store| store.lookup_or_claim(&fp, kind, build_timeout))
            .await?;

        match &decision {
            CacheDecision::Hit(_) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheDecision::Claimed(_) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheDecision::InFlight => {}
        }
        Ok(decision)
    }

    fn subscribe(&self, fingerprint: &str) -> Arc<Notify> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight
            .entry(fingerprint.to_string())
            .or_default()
            .clone()
    }

    /// Wake everyone parked on `fingerprint`. Builders call this after
    /// the store write, success or failure.
    pub fn ring(&self, fingerprint: &str) {
        let notify = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            in_flight.remove(fingerprint)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Park until the fingerprint has a terminal report or `deadline`
    /// passes. Returns `None` on timeout.
    pub async fn wait_for(
        &self,
        fingerprint: &str,
        deadline: Duration,
    ) -> Result<Option<RiskReport>> {
        let deadline_at = tokio::time::Instant::now() + deadline;
        loop {
            let notify = self.subscribe(fingerprint);
            let notified = notify.notified();
            // Re-read after arming so a ring between the last read and
            // here is not missed.
            if let Some(report) = self.get_report(fingerprint).await? {
                return Ok(Some(report));
            }
            match tokio::time::timeout_at(deadline_at, notified).await {
                Ok(()) => continue,
                Err(_) => return Ok(None),
            }
        }
    }

    pub async fn get_report(&self, fingerprint: &str) -> Result<Option<RiskReport>> {
        let fp = fingerprint.to_string();
        self.run_blocking(move |store| store.get_report(&fp)).await
    }

    /// Write a completed report under `claim` and ring the waiters.
    /// Returns false when the claim went stale.
    pub async fn complete_build(&self, claim: BuildClaim, report: RiskReport) -> Result<bool> {
        let fingerprint = claim.fingerprint.clone();
        let written = self
            .run_blocking(move |store| store.complete_build(&claim, &report))
            .await?;
        self.ring(&fingerprint);
        Ok(written)
    }

    /// Write a failed report under `claim` and ring the waiters.
    pub async fn fail_build(&self, claim: BuildClaim, report: RiskReport) -> Result<bool> {
        let fingerprint = claim.fingerprint.clone();
        let written = self
            .run_blocking(move |store| store.fail_build(&claim, &report))
            .await?;
        self.ring(&fingerprint);
        Ok(written)
    }

    pub fn hit_count(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    const FP: &str = "dddd000000000000000000000000000000000000000000000000000000000000";

    fn cache() -> (tempfile::TempDir, ReportCache) {
        let (dir, store) = test_store();
        (dir, ReportCache::new(store, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_consult_counts_hits_and_misses() {
        let (_dir, cache) = cache();

        let claim = match cache.consult(FP, AnalysisKind::Quote).await.unwrap() {
            CacheDecision::Claimed(claim) => claim,
            other => panic!("expected Claimed, got {other:?}"),
        };
        assert_eq!(cache.miss_count(), 1);

        let report = RiskReport::completed(FP.to_string(), AnalysisKind::Quote);
        assert!(cache.complete_build(claim, report).await.unwrap());

        assert!(matches!(
            cache.consult(FP, AnalysisKind::Quote).await.unwrap(),
            CacheDecision::Hit(_)
        ));
        assert_eq!(cache.hit_count(), 1);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_completion() {
        let (_dir, cache) = cache();

        let claim = match cache.consult(FP, AnalysisKind::Quote).await.unwrap() {
            CacheDecision::Claimed(claim) => claim,
            other => panic!("expected Claimed, got {other:?}"),
        };

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_for(FP, Duration::from_secs(5)).await })
        };

        // Give the waiter a moment to park.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = RiskReport::completed(FP.to_string(), AnalysisKind::Quote);
        cache.complete_build(claim, report).await.unwrap();

        let woken = waiter.await.unwrap().unwrap();
        assert!(woken.is_some());
    }

    #[tokio::test]
    async fn test_waiter_times_out_without_builder() {
        let (_dir, cache) = cache();
        cache.consult(FP, AnalysisKind::Quote).await.unwrap();

        let report = cache
            .wait_for(FP, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_waiter_sees_failed_build() {
        let (_dir, cache) = cache();

        let claim = match cache.consult(FP, AnalysisKind::Quote).await.unwrap() {
            CacheDecision::Claimed(claim) => claim,
            other => panic!("expected Claimed, got {other:?}"),
        };
        let failed = RiskReport::failed(
            FP.to_string(),
            AnalysisKind::Quote,
            crate::error::ErrorKind::VendorUnavailable,
        );
        cache.fail_build(claim, failed).await.unwrap();

        let report = cache
            .wait_for(FP, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, crate::models::ReportStatus::Failed);
    }
}
