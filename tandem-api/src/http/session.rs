//! Session lookup endpoint

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use tandem_core::{Error, SessionId};

use crate::http::{AppResult, AppState};

/// Look up a live session.
///
/// Path: `GET /api/sessions/{session_id}`
///
/// Lets a client check a code before opening a signaling connection.
///
/// # Response
/// ```json
/// { "sessionId": "k3v9x2qa", "memberCount": 1, "capacity": 2, "createdAt": "..." }
/// ```
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session_id = SessionId::from(session_id);
    let snapshot = state
        .signaling
        .registry()
        .get_session(&session_id)
        .ok_or(Error::SessionNotFound(session_id))?;

    Ok(Json(snapshot))
}
