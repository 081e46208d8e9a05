//! HTTP surface of the control plane.
//!
//! # Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//!
//! ## Status (read path)
//! - `GET /v1/spaces/:space_id/status` - Space status snapshot
//! - `GET /v1/spaces/:space_id/addresses/:name/status` - Address status
//!
//! ## Admission (used by the API layer)
//! - `POST /internal/spaces` - Create an address space
//! - `GET /internal/spaces` - List address spaces
//! - `GET /internal/spaces/:space_id` - Get an address space
//! - `DELETE /internal/spaces/:space_id` - Delete an address space
//! - `PUT /internal/spaces/:space_id/plan` - Replace the space plan
//! - `POST /internal/spaces/:space_id/addresses` - Create an address
//! - `GET /internal/spaces/:space_id/addresses` - List addresses
//! - `DELETE /internal/spaces/:space_id/addresses/:name` - Delete an address
//! - `PUT /internal/spaces/:space_id/addresses/:name/plan` - Replace the address plan

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use msgplane_core::{AddressSpaceId, CoreError};
use msgplane_store::{Address, AddressSpace};
use serde::Serialize;

use crate::error::ControlError;
use crate::service::ControlPlane;
use crate::status::{AddressStatus, SpaceStatus};
use crate::types::{
    CreateAddressRequest, CreateAddressSpaceRequest, ReplaceAddressPlanRequest,
    ReplaceSpacePlanRequest,
};

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

/// A `ControlError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.http_status_code();
        if code >= 500 {
            tracing::error!(error = %self.0, code = self.0.code(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.code(), "Request rejected");
        }
        (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorResponse {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_space_id(raw: &str) -> ApiResult<AddressSpaceId> {
    raw.parse::<AddressSpaceId>()
        .map_err(|e| ApiError(ControlError::Core(CoreError::from(e))))
}

/// Build the router for a control plane.
pub fn router<C: ControlPlane + 'static>(control: Arc<C>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/v1/spaces/:space_id/status", get(space_status::<C>))
        .route(
            "/v1/spaces/:space_id/addresses/:name/status",
            get(address_status::<C>),
        )
        .route(
            "/internal/spaces",
            get(list_spaces::<C>).post(create_space::<C>),
        )
        .route(
            "/internal/spaces/:space_id",
            get(get_space::<C>).delete(delete_space::<C>),
        )
        .route("/internal/spaces/:space_id/plan", put(replace_space_plan::<C>))
        .route(
            "/internal/spaces/:space_id/addresses",
            get(list_addresses::<C>).post(create_address::<C>),
        )
        .route(
            "/internal/spaces/:space_id/addresses/:name",
            get(get_address::<C>).delete(delete_address::<C>),
        )
        .route(
            "/internal/spaces/:space_id/addresses/:name/plan",
            put(replace_address_plan::<C>),
        )
        .with_state(control)
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "msgplane-control",
    })
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

// ============================================================================
// Status Endpoints
// ============================================================================

async fn space_status<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
) -> ApiResult<Json<SpaceStatus>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(control.get_space_status(&space_id).await?))
}

async fn address_status<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path((space_id, name)): Path<(String, String)>,
) -> ApiResult<Json<AddressStatus>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(control.get_address_status(&space_id, &name).await?))
}

// ============================================================================
// Address Space Endpoints
// ============================================================================

async fn create_space<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Json(request): Json<CreateAddressSpaceRequest>,
) -> ApiResult<(StatusCode, Json<AddressSpace>)> {
    let space = control.create_address_space(request).await?;
    Ok((StatusCode::CREATED, Json(space)))
}

async fn list_spaces<C: ControlPlane>(
    State(control): State<Arc<C>>,
) -> ApiResult<Json<Vec<AddressSpace>>> {
    Ok(Json(control.list_address_spaces().await?))
}

async fn get_space<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
) -> ApiResult<Json<AddressSpace>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(control.get_address_space(&space_id).await?))
}

async fn delete_space<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
) -> ApiResult<StatusCode> {
    let space_id = parse_space_id(&space_id)?;
    control.delete_address_space(&space_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn replace_space_plan<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
    Json(request): Json<ReplaceSpacePlanRequest>,
) -> ApiResult<Json<AddressSpace>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(
        control.replace_address_space_plan(&space_id, request).await?,
    ))
}

// ============================================================================
// Address Endpoints
// ============================================================================

async fn create_address<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
    Json(request): Json<CreateAddressRequest>,
) -> ApiResult<(StatusCode, Json<Address>)> {
    let space_id = parse_space_id(&space_id)?;
    let address = control.create_address(&space_id, request).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

async fn list_addresses<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path(space_id): Path<String>,
) -> ApiResult<Json<Vec<Address>>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(control.list_addresses(&space_id).await?))
}

async fn get_address<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path((space_id, name)): Path<(String, String)>,
) -> ApiResult<Json<Address>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(control.get_address(&space_id, &name).await?))
}

async fn delete_address<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path((space_id, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let space_id = parse_space_id(&space_id)?;
    control.delete_address(&space_id, &name).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn replace_address_plan<C: ControlPlane>(
    State(control): State<Arc<C>>,
    Path((space_id, name)): Path<(String, String)>,
    Json(request): Json<ReplaceAddressPlanRequest>,
) -> ApiResult<Json<Address>> {
    let space_id = parse_space_id(&space_id)?;
    Ok(Json(
        control
            .replace_address_plan(&space_id, &name, request)
            .await?,
    ))
}
