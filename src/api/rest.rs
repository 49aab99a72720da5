//! REST API server

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use uuid::Uuid;

use crate::api::models::{
    CeremonyAttributes, MarriageAttributes, ProposalAttributes, Resource, ResourceDocument,
    ResourceListDocument,
};
use crate::error::{ErrorKind, MarriageError, MarriageResult};
use crate::processor::MarriageService;
use crate::tenant::{
    Tenant, HEADER_MAJOR_VERSION, HEADER_MINOR_VERSION, HEADER_REGION, HEADER_SPAN_ID,
    HEADER_TENANT_ID,
};

#[derive(Clone)]
struct ApiState {
    service: Arc<MarriageService>,
}

/// Build the router for the read-only query surface
pub fn router(service: Arc<MarriageService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/mas/proposals/:id", get(get_proposal))
        .route("/api/mas/marriages/:id", get(get_marriage))
        .route("/api/mas/ceremonies/:id", get(get_ceremony))
        .route("/api/mas/characters/:id/marriage", get(get_character_marriage))
        .route("/api/mas/characters/:id/proposals", get(get_character_proposals))
        .route("/api/mas/characters/:id/ceremony", get(get_character_ceremony))
        .with_state(ApiState { service })
}

/// Serve until the shutdown signal fires, then drain and close
pub async fn serve(
    router: Router,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> MarriageResult<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| MarriageError::Internal(format!("failed to bind port {port}: {e}")))?;
    tracing::info!(port, "rest server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| MarriageError::Internal(format!("rest server failed: {e}")))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// The query surface requires the same tenant headers the bus carries
fn tenant_from_http(headers: &HeaderMap) -> Result<Tenant, StatusCode> {
    let id = headers
        .get(HEADER_TENANT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let region = headers
        .get(HEADER_REGION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let major_version = headers
        .get(HEADER_MAJOR_VERSION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let minor_version = headers
        .get(HEADER_MINOR_VERSION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let span_id = headers
        .get(HEADER_SPAN_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok(Tenant {
        id,
        region,
        major_version,
        minor_version,
        span_id,
    })
}

fn error_status(error: MarriageError) -> StatusCode {
    match error.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transient => {
            tracing::error!(error = %error, "query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn get_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<Json<ResourceDocument<ProposalAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let proposal = state
        .service
        .processor(tenant)
        .get_proposal(id)
        .await
        .map_err(error_status)?;
    Ok(Json(ResourceDocument {
        data: (&proposal).into(),
    }))
}

async fn get_marriage(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<Json<ResourceDocument<MarriageAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let marriage = state
        .service
        .processor(tenant)
        .get_marriage(id)
        .await
        .map_err(error_status)?;
    Ok(Json(ResourceDocument {
        data: (&marriage).into(),
    }))
}

async fn get_ceremony(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<Json<ResourceDocument<CeremonyAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let ceremony = state
        .service
        .processor(tenant)
        .get_ceremony(id)
        .await
        .map_err(error_status)?;
    Ok(Json(ResourceDocument {
        data: (&ceremony).into(),
    }))
}

async fn get_character_marriage(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(character_id): Path<u32>,
) -> Result<Json<ResourceDocument<MarriageAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let marriage = state
        .service
        .processor(tenant)
        .marriage_of(character_id)
        .await
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ResourceDocument {
        data: (&marriage).into(),
    }))
}

async fn get_character_proposals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(character_id): Path<u32>,
) -> Result<Json<ResourceListDocument<ProposalAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let proposals = state
        .service
        .processor(tenant)
        .proposals_involving(character_id)
        .await
        .map_err(error_status)?;
    Ok(Json(ResourceListDocument {
        data: proposals.iter().map(Resource::from).collect(),
    }))
}

async fn get_character_ceremony(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(character_id): Path<u32>,
) -> Result<Json<ResourceDocument<CeremonyAttributes>>, StatusCode> {
    let tenant = tenant_from_http(&headers)?;
    let ceremony = state
        .service
        .processor(tenant)
        .ceremony_of(character_id)
        .await
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ResourceDocument {
        data: (&ceremony).into(),
    }))
}
