//! HTTP surface of the analysis pipeline.
//!
//! Thin handlers over the orchestrator: submission endpoints per
//! analysis kind, task polling and SSE, report views, uploads, signed
//! blob fetches and the admin surface. Every response is wrapped in
//! the `{code, msg, data}` envelope.

mod handlers;
mod limits;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::analysis::AnalysisContext;
use crate::blobs::BlobStore;
use crate::cache::ReportCache;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::store::Store;

use limits::RateLimits;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub blobs: Arc<BlobStore>,
    pub settings: Arc<Settings>,
    pub limits: Arc<RateLimits>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;

        let signing_secret = if settings.blob_signing_secret.is_empty() {
            tracing::warn!(
                "BLOB_SIGNING_SECRET is not set; using an ephemeral secret, \
                 outstanding signed URLs will not survive a restart"
            );
            uuid::Uuid::new_v4().to_string()
        } else {
            settings.blob_signing_secret.clone()
        };

        let store = Store::new(&settings.database_path())?
            .with_blocking_limit(settings.blocking_pool_size);
        let cache = ReportCache::new(store.clone(), settings.build_timeout());
        let blobs = Arc::new(BlobStore::new(settings.blobs_dir(), signing_secret));

        let analysis = AnalysisContext {
            vendors: settings.build_vendors(),
            blobs: blobs.clone(),
            public_base_url: settings.public_base_url.clone(),
            signed_url_ttl: settings.signed_url_ttl(),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            cache,
            analysis,
            settings.orchestrator_options(),
        ));

        Ok(Self {
            orchestrator,
            blobs,
            settings: Arc::new(settings.clone()),
            limits: Arc::new(RateLimits::new(settings)),
        })
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
