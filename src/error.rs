//! Error handler for the LDAP user folder.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::directory::DirectoryError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors of the user folder.
///
/// Authentication never returns them: every failure there reads as "no
/// such user".
#[derive(Debug, Error)]
pub enum FolderError {
    #[error("no such user")]
    NotFound,

    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("directory unavailable")]
    DirectoryUnavailable,

    #[error("running in read-only mode, directory changes are disabled")]
    ReadOnly,

    #[error("missing value for the RDN attribute `{0}`")]
    MissingRequiredAttribute(String),

    #[error("the password and confirmation do not match")]
    PasswordMismatch,

    #[error("the password cannot be empty")]
    EmptyPassword,

    #[error("no user with DN `{0}`")]
    NoSuchUser(String),

    #[error("no attributes changed")]
    NothingChanged,

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Directory(DirectoryError),
}

impl From<DirectoryError> for FolderError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable => FolderError::DirectoryUnavailable,
            DirectoryError::InvalidCredentials(_) => {
                FolderError::AuthenticationFailure
            },
            DirectoryError::ReadOnly => FolderError::ReadOnly,
            DirectoryError::NoSuchObject(dn) => FolderError::NoSuchUser(dn),
            err => FolderError::Directory(err),
        }
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Folder(#[from] FolderError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("invalid login or password")]
    InvalidCredentials,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

fn folder_status(err: &FolderError) -> StatusCode {
    match err {
        FolderError::NotFound | FolderError::NoSuchUser(_) => {
            StatusCode::NOT_FOUND
        },
        FolderError::AuthenticationFailure => StatusCode::UNAUTHORIZED,
        FolderError::ReadOnly => StatusCode::FORBIDDEN,
        FolderError::DirectoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FolderError::Directory(_) => StatusCode::BAD_GATEWAY,
        FolderError::MissingRequiredAttribute(_)
        | FolderError::PasswordMismatch
        | FolderError::EmptyPassword
        | FolderError::NothingChanged
        | FolderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Folder(err) => response
                .title("The directory refused the operation.")
                .status(folder_status(err)),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::InvalidCredentials => response
                .title("Authentication failed.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
