//! Public status page, used by front-ends and health checks.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

/// Structured status.
#[derive(Debug, Serialize)]
pub struct Status {
    version: String,
    name: String,
    read_only: bool,
}

/// Public server status.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: env!("CARGO_PKG_VERSION").into(),
        name: if state.config.name.is_empty() {
            env!("CARGO_CRATE_NAME").into()
        } else {
            state.config.name.clone()
        },
        read_only: state.folder.is_read_only(),
    })
}
