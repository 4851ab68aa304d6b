//! HTTP handlers

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opentdf_authz::KasError;
use opentdf_kas::{Application, RequestContext, RewrapOutcome, SignedRequestEnvelope};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

pub const TOTAL_COUNT_HEADER: &str = "meta-total-count";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const JWT_CONTENT_TYPE: &str = "application/jwt";

pub type AppState = Arc<Application>;

/// Routes without any prefix or middleware
pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/kas_public_key", get(public_key))
        .route("/v2/rewrap", post(rewrap))
        .route("/v2/upsert", post(upsert))
        .route("/healthz", get(healthz))
        .route("/entitlements", get(list_entitlements))
        .route(
            "/entitlements/{entity_id}",
            post(add_entitlements).delete(remove_entitlements),
        )
        .with_state(app)
}

/// Routes nested under `root_path` with tracing and CORS applied
pub fn service(app: AppState, root_path: Option<&str>, cors_origins: &[String]) -> Router {
    let routes = router(app);
    let routes = match root_path {
        Some(prefix) => Router::new().nest(prefix, routes),
        None => routes,
    };
    routes
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(TOTAL_COUNT_HEADER)]);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    RequestContext {
        authorization: header(AUTHORIZATION.as_str()),
        request_id: header(REQUEST_ID_HEADER),
    }
}

/// Parse a JSON body into the shared error shape instead of axum's rejection
fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(KasError::BadRequest(format!("request body: {}", e))))
}

#[derive(Debug, Deserialize)]
pub struct PublicKeyQuery {
    pub algorithm: Option<String>,
}

async fn public_key(State(app): State<AppState>, Query(query): Query<PublicKeyQuery>) -> Result<Json<String>, ApiError> {
    Ok(Json(app.public_key(query.algorithm.as_deref())?))
}

async fn rewrap(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    let envelope: SignedRequestEnvelope = json_body(&body)?;
    let ctx = request_context(&headers);
    match app.rewrap(&envelope, &ctx).await? {
        RewrapOutcome::Json(fields) => Ok(Json(fields).into_response()),
        RewrapOutcome::Signed(token) => Ok(([(CONTENT_TYPE, JWT_CONTENT_TYPE)], token).into_response()),
    }
}

async fn upsert(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<Vec<String>>, ApiError> {
    let envelope: SignedRequestEnvelope = json_body(&body)?;
    Ok(Json(app.upsert(&envelope, &request_context(&headers)).await?))
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub probe: Option<String>,
}

async fn healthz(State(app): State<AppState>, Query(query): Query<HealthQuery>) -> Result<StatusCode, ApiError> {
    match query.probe.as_deref().unwrap_or("liveness") {
        "liveness" => Ok(StatusCode::NO_CONTENT),
        "readiness" => {
            if app.is_ready().await {
                Ok(StatusCode::NO_CONTENT)
            } else {
                Err(ApiError(KasError::Unavailable("not ready".to_string())))
            }
        }
        other => Err(ApiError(KasError::BadRequest(format!("unknown probe '{}'", other)))),
    }
}

async fn list_entitlements(State(app): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let listing = app.list_entitlements(&request_context(&headers)).await?;
    debug!(entities = listing.entities.len(), total = listing.total, "Listed entitlements");
    Ok((
        [(HeaderName::from_static(TOTAL_COUNT_HEADER), listing.total.to_string())],
        Json(listing.to_json()),
    )
        .into_response())
}

async fn add_entitlements(
    State(app): State<AppState>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<String>>, ApiError> {
    let uris: Vec<String> = json_body(&body)?;
    app.add_entitlements(&request_context(&headers), &entity_id, &uris).await?;
    Ok(Json(uris))
}

async fn remove_entitlements(
    State(app): State<AppState>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let uris: Vec<String> = json_body(&body)?;
    app.remove_entitlements(&request_context(&headers), &entity_id, &uris).await?;
    Ok(StatusCode::ACCEPTED)
}
