//! Directory groups.

use axum::Json;
use axum::extract::State;

use crate::lookup::Group;
use crate::{AppState, ServerError};

/// Every group known to the directory.
pub async fn handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Group>>, ServerError> {
    Ok(Json(state.folder.groups().await?))
}
