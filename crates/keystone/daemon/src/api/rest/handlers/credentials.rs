//! Resolver lookup over HTTP

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

/// Current credential of an account identity, as served to the bus
pub async fn get_credential(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let credential = state
        .resolver
        .lookup(&identity)
        .ok_or_else(|| ApiError::NotFound(format!("No credential for {identity}")))?;

    Ok(([(header::CONTENT_TYPE, "application/jwt")], credential))
}
