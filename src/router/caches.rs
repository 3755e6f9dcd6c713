//! Cache administration.

use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;

/// Drop every cached user and negative entry.
pub async fn reinit(State(state): State<AppState>) -> StatusCode {
    state.folder.reinit();
    StatusCode::NO_CONTENT
}
