//! Entity declaration handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::storage::{EntityStorage, StatusStorage};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use keystone_types::{
    Entity, EntityId, EntityKey, EntityLevel, EntitySpec, EntityStatus, ReconcilePhase,
};
use serde::{Deserialize, Serialize};

/// List entities query params
#[derive(Debug, Deserialize)]
pub struct ListEntitiesQuery {
    pub level: Option<String>,
}

/// Entity together with its reconciliation state
#[derive(Debug, Serialize)]
pub struct EntityView {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ReconcilePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
}

async fn view(state: &AppState, entity: Entity) -> ApiResult<EntityView> {
    let status = state.storage.get_status(&entity.id).await?;
    Ok(EntityView {
        phase: state.scheduler.phase(&entity.id),
        status,
        entity,
    })
}

/// List declared entities
pub async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<ListEntitiesQuery>,
) -> ApiResult<Json<Vec<EntityView>>> {
    let level = query.level.as_deref().map(parse_level).transpose()?;

    let entities = state.storage.list_entities(level).await?;
    let mut views = Vec::with_capacity(entities.len());
    for entity in entities {
        views.push(view(&state, entity).await?);
    }
    Ok(Json(views))
}

/// Get an entity
pub async fn get_entity(
    State(state): State<AppState>,
    Path((level, scope, name)): Path<(String, String, String)>,
) -> ApiResult<Json<EntityView>> {
    let id = parse_id(&level, scope, name)?;
    let entity = state
        .storage
        .get_entity(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Entity {id} not found")))?;

    Ok(Json(view(&state, entity).await?))
}

/// Declare or update an entity. The body is the bare spec of the level.
pub async fn put_entity(
    State(state): State<AppState>,
    Path((level, scope, name)): Path<(String, String, String)>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<EntityView>)> {
    let id = parse_id(&level, scope, name)?;
    let spec = EntitySpec::from_json(id.level, body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {} spec: {e}", id.level)))?;
    spec.validate()?;

    let declared = state.storage.declare_entity(id.key.clone(), spec).await?;
    if declared.changed {
        state.scheduler.trigger(&id).await?;
        tracing::info!(
            entity = %id,
            generation = declared.entity.generation,
            created = declared.created,
            "Entity declared"
        );
    }

    let code = if declared.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(view(&state, declared.entity).await?)))
}

/// Request deletion of an entity
pub async fn delete_entity(
    State(state): State<AppState>,
    Path((level, scope, name)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&level, scope, name)?;
    if !state.storage.request_deletion(&id).await? {
        return Err(ApiError::NotFound(format!("Entity {id} not found")));
    }

    state.scheduler.mark_deleting(&id);
    state.scheduler.enqueue(id.clone());
    tracing::info!(entity = %id, "Entity deletion requested");

    Ok(StatusCode::ACCEPTED)
}

fn parse_level(level: &str) -> ApiResult<EntityLevel> {
    level
        .parse()
        .map_err(|e: keystone_types::UnknownLevel| ApiError::BadRequest(e.to_string()))
}

fn parse_id(level: &str, scope: String, name: String) -> ApiResult<EntityId> {
    Ok(EntityId::new(parse_level(level)?, EntityKey::new(scope, name)))
}
