//! HTTP request dispatch for the ingestion path

use crate::config::{ServerConfig, UndeclaredContentType};
use crate::server::validator::{self, Rejection};
use crate::server::SinkRegistry;
use crate::types::{Event, StreamTag};
use crate::CeeLogError;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

#[cfg(feature = "metrics")]
use crate::server::metrics::IngestMetrics;

/// Body of the `GET` status check on the ingestion path
pub const STATUS_RESPONSE: &str = "CEE logging endpoint active";

/// Body of every 404
pub const NOT_FOUND_RESPONSE: &str = "Endpoint not found";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    registry: Arc<SinkRegistry>,
    undeclared: UndeclaredContentType,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<IngestMetrics>>,
}

impl AppState {
    /// Build handler state around an opened registry
    pub fn new(config: &ServerConfig, registry: Arc<SinkRegistry>) -> crate::Result<Self> {
        Ok(Self {
            registry,
            undeclared: config.server.undeclared_content_type,
            #[cfg(feature = "metrics")]
            metrics: if config.metrics.enabled {
                Some(Arc::new(IngestMetrics::new()?))
            } else {
                None
            },
        })
    }

    #[cfg(feature = "metrics")]
    fn record(&self, outcome: &Result<StreamTag, IngestError>) {
        let Some(metrics) = self.metrics.as_deref() else {
            return;
        };
        match outcome {
            Ok(tag) => metrics.event_stored(*tag),
            Err(IngestError::Storage { tag, .. }) => metrics.storage_failed(*tag),
            Err(e) => metrics.event_rejected(e.reason()),
        }
    }
}

/// Why an ingest request did not result in a stored event
#[derive(Debug, Error)]
pub enum IngestError {
    /// `Content-Length` missing or zero
    #[error("No data provided")]
    EmptyBody,
    /// The payload failed classification
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// The sink could not persist the event
    #[error("Error processing event")]
    Storage {
        /// Stream the event was meant for
        tag: StreamTag,
        /// Underlying failure
        #[source]
        source: CeeLogError,
    },
}

impl IngestError {
    /// HTTP status for this outcome
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::EmptyBody | IngestError::Rejected(_) => StatusCode::BAD_REQUEST,
            IngestError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::EmptyBody => "empty_body",
            IngestError::Rejected(rejection) => rejection.reason(),
            IngestError::Storage { .. } => "storage",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Build the application router.
///
/// `PUT` (and `POST` unless disabled) on the ingestion path store events,
/// `GET` answers the status check, every other path is a 404.
pub fn router(config: &ServerConfig, state: AppState) -> Router {
    let mut ingest_route = get(status).put(ingest);
    if config.server.accept_post {
        ingest_route = ingest_route.post(ingest);
    }

    let app = Router::new().route(&config.server.ingest_path, ingest_route);
    with_metrics_route(app, config, &state)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(feature = "metrics")]
fn with_metrics_route(
    app: Router<AppState>,
    config: &ServerConfig,
    state: &AppState,
) -> Router<AppState> {
    if state.metrics.is_some() {
        app.route(&config.metrics.path, get(metrics))
    } else {
        app
    }
}

#[cfg(not(feature = "metrics"))]
fn with_metrics_route(
    app: Router<AppState>,
    _config: &ServerConfig,
    _state: &AppState,
) -> Router<AppState> {
    app
}

/// Store one event and acknowledge it with the stream it went to
#[tracing::instrument(name = "ingest", skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, IngestError> {
    let outcome = store_event(&state, &headers, body).await;
    #[cfg(feature = "metrics")]
    state.record(&outcome);

    outcome.map(|tag| format!("{} event logged", tag.label()))
}

async fn store_event(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StreamTag, IngestError> {
    if declared_length(headers).unwrap_or(0) == 0 || body.is_empty() {
        debug!("Rejected request without body");
        return Err(IngestError::EmptyBody);
    }

    let payload = match String::from_utf8_lossy(&body) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            debug!(bytes = body.len(), "Replaced invalid UTF-8 sequences in payload");
            text
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap_or_default());
    let tag = validator::classify(&payload, content_type, state.undeclared).map_err(|rejection| {
        debug!(content_type = ?content_type, %rejection, "Rejected payload");
        IngestError::Rejected(rejection)
    })?;

    let event = Event::new(tag, payload);
    state
        .registry
        .get(tag)
        .append(&event)
        .await
        .map_err(|source| {
            error!(stream = %tag, error = %source, "Failed to persist event");
            IngestError::Storage { tag, source }
        })?;

    info!(stream = %tag, bytes = body.len(), "Event stored");
    Ok(tag)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Static status check; never touches the sinks
pub async fn status() -> &'static str {
    STATUS_RESPONSE
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, NOT_FOUND_RESPONSE)
}

#[cfg(feature = "metrics")]
async fn metrics(State(state): State<AppState>) -> Response {
    let Some(metrics) = state.metrics.as_deref() else {
        return not_found().await.into_response();
    };
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics").into_response()
        }
    }
}
