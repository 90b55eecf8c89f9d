//! REST API for the catalog.
//!
//! ## Routes
//!
//! - `GET /` - API info.
//! - `GET /health` - liveness check.
//! - `GET {prefix}/services?category=&search=` - list.
//! - `GET {prefix}/services/:name` - get (404 if missing).
//! - `POST {prefix}/services` - create (201, 409 on duplicate name).
//! - `PUT {prefix}/services/:name` - partial update (404, 409).
//! - `DELETE {prefix}/services/:name` - delete (204, 404).
//! - `GET {prefix}/categories` - distinct categories.
//!
//! Every response carries an `X-Correlation-ID` header, echoed from the
//! request or freshly generated.

pub mod error;
pub mod routes;

use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tracing::info;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::store::CatalogStore;

/// Header carrying the request correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Shared handler state. The store and its backend handle are built once at
/// startup and cloned cheaply per request.
#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
}

/// Build the axum `Router` serving the catalog under `api_prefix`.
pub fn router(store: CatalogStore, api_prefix: &str) -> Router {
    let api = Router::new()
        .route(
            "/services",
            get(routes::list_services).post(routes::create_service),
        )
        .route(
            "/services/:name",
            get(routes::get_service)
                .put(routes::update_service)
                .delete(routes::delete_service),
        )
        .route("/categories", get(routes::list_categories));

    let app = Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health));

    let prefix = normalize_prefix(api_prefix);
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };

    app.layer(middleware::from_fn(track_request))
        .with_state(AppState { store })
}

/// Serve the API at `config.addr` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(store: CatalogStore, config: &ServerConfig) -> anyhow::Result<()> {
    let backend = store.backend().backend_tag();
    let app = router(store, &config.api_prefix);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!(
        addr = %listener.local_addr()?,
        backend,
        prefix = %config.api_prefix,
        "starting service catalog api"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down service catalog api");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Attach a correlation id and log request start and completion.
async fn track_request(request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    info!(%method, %path, %correlation_id, "request started");

    let mut response = next.run(request).await;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms,
        %correlation_id,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
