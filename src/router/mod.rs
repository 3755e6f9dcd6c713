//! HTTP routes of the user folder.
pub mod caches;
pub mod groups;
pub mod login;
pub mod status;
pub mod users;

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::ServerError;
use crate::user::{AttributeValue, User};

const PASSWORD_ATTR: &str = "userPassword";

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Public view of a [`User`].
#[derive(Debug, Serialize)]
pub struct UserResponse {
    id: String,
    name: String,
    dn: String,
    roles: Vec<String>,
    groups: Vec<String>,
    domains: Vec<String>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        let mut roles = user.roles();
        roles.sort();

        Self {
            id: user.id().to_owned(),
            name: user.user_name().to_owned(),
            dn: user.dn().to_owned(),
            roles,
            groups: user.groups().to_vec(),
            domains: user.domains().to_vec(),
            attributes: user
                .attributes()
                .iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case(PASSWORD_ATTR))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}
