//! Room endpoints consumed by the surrounding REST/CRUD subsystem.
//!
//! `publish` lets that subsystem push a fresh membership snapshot to a
//! room after out-of-band changes (e.g. an event edit), decoupled from
//! presence itself.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::broadcast::DeliveryResult;
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub event_id: String,
    pub member_count: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub event_id: String,
    pub members: Vec<String>,
}

pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomsResponse> {
    let stats = state.coordinator.stats();
    let mut rooms: Vec<RoomSummary> = stats
        .rooms
        .into_iter()
        .map(|(event_id, member_count)| RoomSummary {
            event_id,
            member_count,
        })
        .collect();
    rooms.sort_by(|a, b| a.event_id.cmp(&b.event_id));

    Json(RoomsResponse { rooms })
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<RoomResponse>> {
    if !state.coordinator.has_room(&event_id) {
        return Err(AppError::NotFound(format!("room {} has no members", event_id)));
    }

    Ok(Json(RoomResponse {
        members: state.coordinator.members_of(&event_id),
        event_id,
    }))
}

pub async fn publish_room(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<DeliveryResult>> {
    if !state.coordinator.has_room(&event_id) {
        return Err(AppError::NotFound(format!("room {} has no members", event_id)));
    }

    let result = state.dispatcher.publish_membership(&event_id);

    tracing::info!(
        event_id = %event_id,
        delivered = result.delivered_to,
        "Membership snapshot published via API"
    );

    Ok(Json(result))
}
