//! Users lookups for administrators.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router, middleware};

use super::UserResponse;
use crate::error::FolderError;
use crate::{AppState, ServerError};

/// `GET /users/{login}`.
async fn by_login(
    State(state): State<AppState>,
    Path(login): Path<String>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state
        .folder
        .get_user(&login, None)
        .await
        .ok_or(FolderError::NotFound)?;

    Ok(Json(UserResponse::from(user.as_ref())))
}

/// `GET /users/id/{id}`.
async fn by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state
        .folder
        .get_user_by_id(&id)
        .await
        .ok_or(FolderError::NotFound)?;

    Ok(Json(UserResponse::from(user.as_ref())))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users/:LOGIN` goes to `by_login`.
        .route("/{login}", get(by_login))
        // `GET /users/id/:ID` goes to `by_id`.
        .route("/id/{id}", get(by_id))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::require_admin,
        ))
}
