//! Authenticate against the user folder.

use std::net::{IpAddr, SocketAddr};

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use validator::Validate;

use super::{UserResponse, Valid};
use crate::domain::RequestContext;
use crate::{AppState, ServerError};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

#[derive(Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, max = 256))]
    login: String,
    #[validate(length(min = 1, max = 1024))]
    password: String,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Address of the client.
///
/// Forwarding headers are only read when `peer` is one of the
/// `trusted_proxies`. `X-Forwarded-For` is then walked from the right,
/// skipping trusted proxies, and `X-Real-IP` is the fallback.
pub fn request_context(
    headers: &HeaderMap,
    peer: IpAddr,
    trusted_proxies: &[IpAddr],
) -> RequestContext {
    if !trusted_proxies.contains(&peer) {
        return RequestContext::new(Some(peer));
    }

    let forwarded = header(headers, FORWARDED_FOR).and_then(|value| {
        value
            .rsplit(',')
            .map(|addr| addr.trim().parse::<IpAddr>())
            .take_while(Result::is_ok)
            .flatten()
            .find(|addr| !trusted_proxies.contains(addr))
    });
    let remote_addr = forwarded
        .or_else(|| {
            header(headers, REAL_IP).and_then(|addr| addr.parse::<IpAddr>().ok())
        })
        .unwrap_or(peer);

    RequestContext::new(Some(remote_addr))
}

pub async fn handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<Json<UserResponse>, ServerError> {
    let context =
        request_context(&headers, peer.ip(), &state.config.trusted_proxies);

    match state
        .folder
        .authenticate(&body.login, &body.password, &context)
        .await
    {
        Some(user) => Ok(Json(UserResponse::from(user.as_ref()))),
        None => {
            tracing::debug!(login = %body.login, ?context, "login refused");
            Err(ServerError::InvalidCredentials)
        },
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use axum::http::HeaderValue;

    use super::*;

    const PROXY: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4));

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let headers = headers(&[
            (FORWARDED_FOR, "10.0.0.5"),
            (REAL_IP, "10.0.0.6"),
            ("x-forwarded-host", "intranet.example.org"),
        ]);

        let context = request_context(&headers, CLIENT, &[PROXY]);
        assert_eq!(context, RequestContext::new(Some(CLIENT)));
        assert_eq!(
            request_context(&headers, CLIENT, &[]),
            RequestContext::new(Some(CLIENT))
        );
    }

    #[test]
    fn test_trusted_proxy_forwards_client_address() {
        let trusted = [PROXY, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))];

        let context = request_context(
            &headers(&[(FORWARDED_FOR, "6.6.6.6, 192.168.1.4, 10.0.0.1")]),
            PROXY,
            &trusted,
        );
        assert_eq!(context.remote_addr, Some(CLIENT));
        assert_eq!(context.remote_host, None);

        let context = request_context(
            &headers(&[(FORWARDED_FOR, "unknown"), (REAL_IP, "192.168.1.4")]),
            PROXY,
            &trusted,
        );
        assert_eq!(context.remote_addr, Some(CLIENT));

        let context = request_context(&HeaderMap::new(), PROXY, &trusted);
        assert_eq!(context.remote_addr, Some(PROXY));
    }
}
