//! Network restrictions attached to identities.
//!
//! A restriction is either a dotted-quad address pattern (`10.0.*.*`) or a
//! host name suffix pattern (`*.example.org`, `example.org`), `*` matching
//! one whole component.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex_lite::Regex;

static ADDRESS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9*]+(\.[0-9*]+){3}$").ok());
static HOST_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[-\w*]+(\.[-\w*]+)*$").ok());

/// Origin of the request being authenticated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub remote_addr: Option<IpAddr>,
    pub remote_host: Option<String>,
}

impl RequestContext {
    /// Create a new [`RequestContext`].
    pub fn new(remote_addr: Option<IpAddr>) -> Self {
        Self {
            remote_addr,
            remote_host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }
}

fn components_match(pattern: &[&str], value: &[&str]) -> bool {
    pattern
        .iter()
        .zip(value)
        .all(|(expected, actual)| *expected == "*" || expected == actual)
}

fn matches_address(spec: &str, addr: Option<IpAddr>) -> bool {
    let Some(IpAddr::V4(addr)) = addr else {
        return false;
    };

    let addr = addr.to_string();
    let addr = addr.split('.').collect::<Vec<_>>();
    let spec = spec.split('.').collect::<Vec<_>>();
    components_match(&spec, &addr)
}

fn matches_host(spec: &str, host: Option<&str>) -> bool {
    let Some(host) = host.filter(|h| !h.is_empty()) else {
        return false;
    };

    let host = host.split('.').collect::<Vec<_>>();
    let spec = spec.split('.').collect::<Vec<_>>();

    if host.len() < spec.len() {
        return false;
    }
    components_match(&spec, &host[host.len() - spec.len()..])
}

/// Whether `context` satisfies at least one of `domains`.
///
/// An empty restriction list allows every origin.
pub fn is_allowed(domains: &[String], context: &RequestContext) -> bool {
    if domains.is_empty() {
        return true;
    }

    domains.iter().map(|spec| spec.trim()).any(|spec| {
        let is_address = ADDRESS_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(spec));
        let is_host = HOST_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(spec));

        (is_address && matches_address(spec, context.remote_addr))
            || (is_host && matches_host(spec, context.remote_host.as_deref()))
    })
}
