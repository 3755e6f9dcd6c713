//! Directory (LDAP) collaborator.
//!
//! The folder talks to the directory only through the [`Directory`] port:
//! searches, writes, and binds over an ordered list of servers.

pub mod filter;
pub mod ldap;
#[cfg(test)]
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use ldap3::{LdapError, Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filter::Filter;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Attribute name to raw values, as written to the directory.
pub type AttributeMap = BTreeMap<String, Vec<Vec<u8>>>;

/// `invalidCredentials` result code.
pub const INVALID_CREDENTIALS: u32 = 49;
/// `noSuchObject` result code.
pub const NO_SUCH_OBJECT: u32 = 32;

/// Errors raised by a directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no directory server could be reached")]
    Unavailable,

    #[error("invalid credentials for `{0}`")]
    InvalidCredentials(String),

    #[error("directory is in read-only mode")]
    ReadOnly,

    #[error("no such object `{0}`")]
    NoSuchObject(String),

    #[error(transparent)]
    Ldap(#[from] LdapError),

    #[error("{0}")]
    Operation(String),
}

/// Credentials a connection is bound with.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bind {
    pub dn: String,
    pub password: String,
}

impl Bind {
    /// Create a new [`Bind`].
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.dn.is_empty()
    }
}

impl std::fmt::Debug for Bind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bind")
            .field("dn", &self.dn)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Search scope relative to the base.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    #[serde(alias = "one")]
    OneLevel,
    #[default]
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// One search request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub base: String,
    pub scope: SearchScope,
    pub filter: Filter,
    /// Attributes to return. Empty means all of them.
    pub attrs: Vec<String>,
    pub bind: Bind,
}

impl SearchQuery {
    /// Create a new [`SearchQuery`] returning all attributes, bound
    /// anonymously.
    pub fn new(base: &str, scope: SearchScope, filter: Filter) -> Self {
        Self {
            base: base.to_owned(),
            scope,
            filter,
            attrs: Vec::new(),
            bind: Bind::anonymous(),
        }
    }

    pub fn attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn bind(mut self, bind: Bind) -> Self {
        self.bind = bind;
        self
    }
}

/// Modification applied to the given attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Replace,
    Delete,
}

/// Transport to a directory server.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ldap,
    Ldaps,
    /// Unix domain socket, `host` being the socket path.
    Ldapi,
}

const fn default_conn_timeout() -> u64 {
    5
}

/// One directory server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// `0` selects the protocol's default port.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Connection timeout, in seconds.
    #[serde(default = "default_conn_timeout")]
    pub conn_timeout: u64,
    /// Operation timeout, in seconds. None waits forever.
    #[serde(default)]
    pub op_timeout: Option<u64>,
}

impl ServerConfig {
    /// Create a new [`ServerConfig`] with default timeouts.
    pub fn new(host: &str, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.to_owned(),
            port,
            protocol,
            conn_timeout: default_conn_timeout(),
            op_timeout: None,
        }
    }

    pub fn port(&self) -> u16 {
        match (self.port, self.protocol) {
            (0, Protocol::Ldaps) => 636,
            (0, _) => 389,
            (port, _) => port,
        }
    }

    /// Connection URL understood by the LDAP client.
    pub fn url(&self) -> String {
        match self.protocol {
            Protocol::Ldap => format!("ldap://{}:{}", self.host, self.port()),
            Protocol::Ldaps => format!("ldaps://{}:{}", self.host, self.port()),
            Protocol::Ldapi => format!(
                "ldapi://{}",
                url::form_urlencoded::byte_serialize(self.host.as_bytes())
                    .collect::<String>()
            ),
        }
    }
}

/// Port to the directory.
///
/// Implementations try their servers in order and use the first one that
/// answers. Writes are refused in read-only mode.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Open a connection bound with `bind`.
    ///
    /// A failed bind is the credential check: it returns
    /// [`DirectoryError::InvalidCredentials`].
    async fn connect(&self, bind: &Bind) -> Result<()>;

    /// Run a search. A missing base returns no entries.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchEntry>>;

    /// Create the record `rdn,base`.
    async fn insert(
        &self,
        bind: &Bind,
        base: &str,
        rdn: &str,
        attrs: AttributeMap,
    ) -> Result<()>;

    async fn modify(
        &self,
        bind: &Bind,
        dn: &str,
        op: ModOp,
        attrs: AttributeMap,
    ) -> Result<()>;

    async fn delete(&self, bind: &Bind, dn: &str) -> Result<()>;

    /// Change the RDN of `dn`, keeping it under the same parent.
    async fn rename(&self, bind: &Bind, dn: &str, new_rdn: &str) -> Result<()>;

    /// Configured servers, in order of preference.
    fn servers(&self) -> Vec<ServerConfig>;

    /// Add a server, at the end unless a position is given.
    fn add_server(&self, server: ServerConfig, position: Option<usize>);

    /// Delete servers by position, returning how many were removed.
    fn delete_servers(&self, positions: &[usize]) -> usize;

    fn set_read_only(&self, read_only: bool);

    fn is_read_only(&self) -> bool;
}

/// Build an [`AttributeMap`] from text values.
pub fn text_attributes<'a, I, V>(attrs: I) -> AttributeMap
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: IntoIterator<Item = &'a str>,
{
    attrs
        .into_iter()
        .map(|(name, values)| {
            (
                name.to_owned(),
                values.into_iter().map(|v| v.as_bytes().to_vec()).collect(),
            )
        })
        .collect()
}

/// Remove server positions from `servers`, returning how many were removed.
pub(crate) fn remove_positions(
    servers: &mut Vec<ServerConfig>,
    positions: &[usize],
) -> usize {
    let before = servers.len();
    let mut index = 0;
    servers.retain(|_| {
        let keep = !positions.contains(&index);
        index += 1;
        keep
    });
    before - servers.len()
}

/// Insert `server` at `position`, or at the end.
pub(crate) fn insert_position(
    servers: &mut Vec<ServerConfig>,
    server: ServerConfig,
    position: Option<usize>,
) {
    match position {
        Some(position) if position < servers.len() => {
            servers.insert(position, server)
        },
        _ => servers.push(server),
    }
}
