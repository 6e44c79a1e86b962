use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::monitor::{GroupHandle, Window};
use crate::AppState;

use super::ApiError;

#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub session: Uuid,
    pub running: bool,
    pub subscribers: usize,
    pub dropped: u64,
}

fn find<'a>(state: &'a AppState, name: &str) -> Result<&'a GroupHandle, ApiError> {
    state
        .groups
        .iter()
        .find(|g| g.name() == name)
        .ok_or_else(|| ApiError::UnknownGroup(name.to_owned()))
}

// ─── GET /api/groups ─────────────────────────────────────────────

pub async fn list_groups(State(state): State<Arc<AppState>>) -> Json<Vec<GroupInfo>> {
    Json(
        state
            .groups
            .iter()
            .map(|g| GroupInfo {
                name: g.name().to_owned(),
                session: g.session(),
                running: g.is_running(),
                subscribers: g.subscriber_count(),
                dropped: g.dropped(),
            })
            .collect(),
    )
}

// ─── GET /api/groups/:name/window ────────────────────────────────
/// Pulls a fresh window through the group actor.

pub async fn get_window(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Window>, ApiError> {
    let group = find(&state, &name)?;
    group
        .window()
        .await
        .map(Json)
        .ok_or(ApiError::Stopped(name))
}

// ─── GET /api/groups/:name/stream ────────────────────────────────
/// Server-Sent Events endpoint, one event per ticked window.
/// Slow clients skip windows rather than queueing them.

pub async fn window_stream(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let group = find(&state, &name)?;
    if !group.is_running() {
        return Err(ApiError::Stopped(name));
    }

    let stream = group.subscribe().into_stream().map(|window| {
        let json = serde_json::to_string(&*window).unwrap_or_default();
        Ok(Event::default()
            .event("window")
            .id(window.sequence.to_string())
            .data(json))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
