//! Event handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::storage::EventStorage;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use keystone_types::{EntityId, EntityKey, TrustEventEnvelope};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Get events query params
#[derive(Debug, Deserialize)]
pub struct GetEventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `level/scope/name`
    pub entity: Option<String>,
}

fn default_limit() -> usize {
    50
}

/// Get recent events, newest first
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<GetEventsQuery>,
) -> ApiResult<Json<Vec<TrustEventEnvelope>>> {
    let events = match query.entity.as_deref() {
        Some(entity) => {
            let id = parse_entity(entity)?;
            state.storage.get_events_for_entity(&id, query.limit).await?
        }
        None => state.storage.get_recent_events(query.limit).await?,
    };

    Ok(Json(events))
}

/// Stream events via SSE
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(envelope) => {
                let event = Event::default()
                    .event(envelope.severity.as_str())
                    .json_data(&envelope)
                    .unwrap_or_else(|_| Event::default().comment("unserializable event"));
                Some((Ok(event), rx))
            }
            Err(RecvError::Lagged(skipped)) => {
                Some((Ok(Event::default().comment(format!("lagged {skipped}"))), rx))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn parse_entity(value: &str) -> ApiResult<EntityId> {
    let mut parts = value.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(level), Some(scope), Some(name)) if !scope.is_empty() && !name.is_empty() => {
            let level = level
                .parse()
                .map_err(|e: keystone_types::UnknownLevel| ApiError::BadRequest(e.to_string()))?;
            Ok(EntityId::new(level, EntityKey::new(scope, name)))
        }
        _ => Err(ApiError::BadRequest(format!(
            "Invalid entity {value}, expected level/scope/name"
        ))),
    }
}
