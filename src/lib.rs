//! LDAP user folder: authenticate users and resolve their roles against an
//! LDAP directory, with a two-tier cache in front of it.

#![forbid(unsafe_code)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod folder;
pub mod lookup;
mod middleware;
pub mod password;
pub mod roles;
mod router;
pub mod schema;
pub mod telemetry;
pub mod user;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{delete, get, post};
use axum::{Router, middleware as AxumMiddleware};
pub use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::SystemClock;
use crate::directory::ldap::LdapDirectory;
use crate::folder::UserFolder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    state: Option<&AppState>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let token = match state.and_then(|state| state.config.admin_token.as_ref()) {
        Some(token) => format!("Bearer {token}"),
        None => String::default(),
    };

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, token)
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub folder: Arc<UserFolder>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let admin_router = Router::new()
        // `GET /groups` goes to `groups`. Administrators only.
        .route("/groups", get(router::groups::handler))
        // `DELETE /caches` goes to `reinit`. Administrators only.
        .route("/caches", delete(router::caches::reinit))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .nest("/users", router::users::router(state.clone()))
        .merge(admin_router)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// The configuration path is read from `CONFIG_PATH`, `config.yaml` being
/// the default.
pub fn initialize_state() -> AppState {
    let path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_default();
    let config = config::Configuration::default().path(path).read();

    if config.ldap.servers.is_empty() {
        tracing::warn!("no directory server configured, only the emergency user can log in");
    }
    if config.admin_token.is_none() {
        tracing::warn!("missing `admin_token` entry on `config.yaml` file, administrative routes are disabled");
    }

    let directory = Arc::new(LdapDirectory::new(
        config.ldap.servers.clone(),
        config.ldap.read_only,
    ));
    let folder = UserFolder::new(
        config.ldap.clone(),
        config.cache.clone(),
        directory,
        Arc::new(SystemClock::new()),
    )
    .emergency_user(config.emergency_user.clone());

    AppState {
        config,
        folder: Arc::new(folder),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::extract::Request;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    use super::*;
    use crate::config::EmergencyUser;
    use crate::folder::tests::{Fixture, fixture};
    use crate::lookup::tests::{JANE, JANE_PASSWORD};

    const ADMIN_TOKEN: &str = "s3cr3t";

    fn test_app(state: AppState) -> Router {
        app(state).layer(MockConnectInfo(SocketAddr::from(([192, 168, 0, 1], 40000))))
    }

    fn state() -> AppState {
        let Fixture { folder, .. } = fixture();
        let mut config = config::Configuration::default();
        config.name = "Example".into();
        config.admin_token = Some(ADMIN_TOKEN.into());

        AppState {
            config: Arc::new(config),
            folder: Arc::new(folder),
        }
    }

    async fn body(response: axum::http::Response<axum::body::Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let state = state();
        let response = make_request(
            None,
            test_app(state),
            Method::GET,
            "/status.json",
            String::default(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body(response).await;
        assert_eq!(body["name"], "Example");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["read_only"], false);
    }

    #[tokio::test]
    async fn test_login() {
        let state = state();

        let response = make_request(
            None,
            test_app(state.clone()),
            Method::POST,
            "/login",
            json!({ "login": " jane ", "password": JANE_PASSWORD }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body(response).await;
        assert_eq!(body["dn"], JANE);
        assert_eq!(body["name"], "jane");
        assert_eq!(
            body["roles"],
            json!(["Anonymous", "Authenticated", "Manager"])
        );
        assert!(body["attributes"].get("userPassword").is_none());

        let response = make_request(
            None,
            test_app(state.clone()),
            Method::POST,
            "/login",
            json!({ "login": "jane", "password": "wrong" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            None,
            test_app(state),
            Method::POST,
            "/login",
            json!({ "login": "", "password": JANE_PASSWORD }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let state = state();

        for (method, path) in [
            (Method::GET, "/users/jane"),
            (Method::GET, "/users/id/jane"),
            (Method::GET, "/groups"),
            (Method::DELETE, "/caches"),
        ] {
            let response = make_request(
                None,
                test_app(state.clone()),
                method,
                path,
                String::default(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
        }
    }

    #[tokio::test]
    async fn test_admin_routes_disabled_without_token() {
        let mut state = state();
        let mut config = (*state.config).clone();
        config.admin_token = None;
        state.config = Arc::new(config);

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::GET,
            "/groups",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_users() {
        let state = state();

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::GET,
            "/users/jane",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["dn"], JANE);

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::GET,
            "/users/id/jane",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["id"], "jane");

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::GET,
            "/users/nobody",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_groups_and_caches() {
        let state = state();

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::GET,
            "/groups",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await.as_array().unwrap().len(), 3);

        state.folder.get_user("jane", None).await.unwrap();
        assert!(!state
            .folder
            .cached_users(crate::cache::CacheKind::Anonymous)
            .is_empty());

        let response = make_request(
            Some(&state),
            test_app(state.clone()),
            Method::DELETE,
            "/caches",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state
            .folder
            .cached_users(crate::cache::CacheKind::Anonymous)
            .is_empty());
    }

    #[tokio::test]
    async fn test_forged_forwarding_header_does_not_lift_domain_restriction() {
        let Fixture { folder, .. } = fixture();
        let folder = folder.emergency_user(Some(EmergencyUser {
            name: "rescue".into(),
            password: "{SHA}5en6G6MezRroT3XKqkdPOmY/BfQ=".into(),
            roles: vec!["Manager".into()],
            domains: vec!["10.0.*.*".into()],
        }));
        let state = AppState {
            config: Arc::new(config::Configuration::default()),
            folder: Arc::new(folder),
        };
        let login = |peer: [u8; 4]| {
            Request::builder()
                .method(Method::POST)
                .uri("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "10.0.0.5")
                .header("x-real-ip", "10.0.0.5")
                .body(axum::body::Body::from(
                    json!({ "login": "rescue", "password": "secret" }).to_string(),
                ))
                .map(|req| (req, SocketAddr::from((peer, 40000))))
                .unwrap()
        };

        let (request, peer) = login([192, 168, 0, 1]);
        let response = app(state.clone())
            .layer(MockConnectInfo(peer))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (request, peer) = login([10, 0, 1, 2]);
        let response = app(state)
            .layer(MockConnectInfo(peer))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["name"], "rescue");
    }
}
