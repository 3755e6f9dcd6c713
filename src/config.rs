//! Configuration manager for the LDAP user folder.

use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::directory::{Bind, SearchScope, ServerConfig};
use crate::password::Encryption;
use crate::roles::{DEFAULT_ROLES, GroupRoleMapping};
use crate::schema::Schema;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8888";
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_address() -> String {
    DEFAULT_ADDRESS.to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Socket address to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    /// Bearer token required by administrative routes.
    /// Administrative routes are disabled without one.
    #[serde(default, skip_serializing)]
    pub admin_token: Option<String>,
    /// Reverse proxies whose forwarding headers are believed.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    /// Related to the directory.
    #[serde(default)]
    pub ldap: Ldap,
    /// Related to user caches.
    #[serde(default)]
    pub cache: Cache,
    /// Identity usable when the directory is unreachable.
    #[serde(default, skip_serializing)]
    pub emergency_user: Option<EmergencyUser>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: String::default(),
            address: default_address(),
            admin_token: None,
            trusted_proxies: Vec::new(),
            ldap: Ldap::default(),
            cache: Cache::default(),
            emergency_user: None,
            version: String::default(),
            path: PathBuf::default(),
        }
    }
}

/// How the folder binds to the directory.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BindUsage {
    /// Look users up anonymously, then bind as the user.
    #[default]
    Never,
    /// Use the manager for everything, after checking the user's
    /// credentials with a separate bind.
    Always,
    /// Use the manager to look users up, then bind as the user.
    Lookup,
}

/// LDAP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ldap {
    /// Servers, in order of preference.
    pub servers: Vec<ServerConfig>,
    /// Attribute users log in with.
    pub login_attr: String,
    /// Attribute holding the user id.
    pub uid_attr: String,
    /// Attribute of the RDN of new users.
    pub rdn_attr: String,
    pub users_base: String,
    pub users_scope: SearchScope,
    pub groups_base: String,
    pub groups_scope: SearchScope,
    /// Manager DN.
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: String,
    pub bind_usage: BindUsage,
    /// Object classes of user records.
    pub object_classes: Vec<String>,
    /// Filter ANDed to every user search.
    pub extra_user_filter: String,
    pub read_only: bool,
    /// Scheme for new `userPassword` values.
    pub password_encryption: Encryption,
    /// Roles every directory user gets.
    pub roles: Vec<String>,
    /// Treat every group as a role.
    pub implicit_mapping: bool,
    pub group_mappings: GroupRoleMapping,
    pub schema: Schema,
}

impl Default for Ldap {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            login_attr: "cn".to_owned(),
            uid_attr: "cn".to_owned(),
            rdn_attr: "cn".to_owned(),
            users_base: String::default(),
            users_scope: SearchScope::Subtree,
            groups_base: String::default(),
            groups_scope: SearchScope::Subtree,
            bind_dn: String::default(),
            bind_password: String::default(),
            bind_usage: BindUsage::Never,
            object_classes: vec!["top".to_owned(), "person".to_owned()],
            extra_user_filter: String::default(),
            read_only: false,
            password_encryption: Encryption::Ssha,
            roles: DEFAULT_ROLES.iter().map(|r| r.to_string()).collect(),
            implicit_mapping: false,
            group_mappings: GroupRoleMapping::default(),
            schema: Schema::default(),
        }
    }
}

impl Ldap {
    /// Credentials of the manager.
    pub fn manager(&self) -> Bind {
        Bind::new(&self.bind_dn, &self.bind_password)
    }

    /// Credentials used to find users and groups.
    pub fn lookup_bind(&self) -> Bind {
        match self.bind_usage {
            BindUsage::Never => Bind::anonymous(),
            BindUsage::Always | BindUsage::Lookup => self.manager(),
        }
    }
}

const fn default_timeout() -> u64 {
    600
}

/// Cache lifetimes, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default = "default_timeout")]
    pub anonymous_timeout: u64,
    #[serde(default = "default_timeout")]
    pub authenticated_timeout: u64,
    #[serde(default = "default_timeout")]
    pub negative_timeout: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            anonymous_timeout: default_timeout(),
            authenticated_timeout: default_timeout(),
            negative_timeout: default_timeout(),
        }
    }
}

impl Cache {
    pub fn anonymous(&self) -> Duration {
        Duration::from_secs(self.anonymous_timeout)
    }

    pub fn authenticated(&self) -> Duration {
        Duration::from_secs(self.authenticated_timeout)
    }

    pub fn negative(&self) -> Duration {
        Duration::from_secs(self.negative_timeout)
    }
}

/// Emergency user configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyUser {
    pub name: String,
    /// Clear text, `{SHA}` or `{SSHA}` password.
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl std::fmt::Debug for EmergencyUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyUser")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("domains", &self.domains)
            .finish_non_exhaustive()
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => return Arc::new(self.error(err)),
                    };

                // set app version.
                config.version = VERSION.to_owned();
                config.path = file_path.clone();

                Arc::new(config)
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Protocol;

    const CONFIG: &str = r#"
name: Example
admin_token: s3cr3t
trusted_proxies: [127.0.0.1, "::1"]
ldap:
  servers:
    - host: ldap.example.org
      protocol: ldaps
  login_attr: uid
  uid_attr: objectGUID
  users_base: ou=people,dc=example,dc=org
  users_scope: onelevel
  groups_base: ou=groups,dc=example,dc=org
  bind_dn: cn=manager,dc=example,dc=org
  bind_password: secret
  bind_usage: lookup
  password_encryption: SHA
  group_mappings:
    admins: Manager
cache:
  negative_timeout: 30
emergency_user:
  name: rescue
  password: "{SHA}5en6G6MezRroT3XKqkdPOmY/BfQ="
"#;

    #[test]
    fn test_parse_configuration() {
        let config: Configuration = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(config.name, "Example");
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.admin_token.as_deref(), Some("s3cr3t"));
        assert_eq!(
            config.trusted_proxies,
            vec![
                IpAddr::from([127, 0, 0, 1]),
                IpAddr::from(std::net::Ipv6Addr::LOCALHOST)
            ]
        );

        assert_eq!(config.ldap.servers[0].protocol, Protocol::Ldaps);
        assert_eq!(config.ldap.servers[0].port(), 636);
        assert_eq!(config.ldap.login_attr, "uid");
        assert_eq!(config.ldap.rdn_attr, "cn");
        assert_eq!(config.ldap.users_scope, SearchScope::OneLevel);
        assert_eq!(config.ldap.bind_usage, BindUsage::Lookup);
        assert_eq!(config.ldap.password_encryption, Encryption::Sha);
        assert_eq!(config.ldap.roles, vec!["Anonymous"]);
        assert_eq!(config.ldap.group_mappings.roles_of("admins"), ["Manager"]);

        assert_eq!(config.cache.negative(), Duration::from_secs(30));
        assert_eq!(config.cache.anonymous(), Duration::from_secs(600));

        let emergency = config.emergency_user.unwrap();
        assert_eq!(emergency.name, "rescue");
        assert!(!format!("{emergency:?}").contains("SHA"));
    }

    #[test]
    fn test_lookup_bind() {
        let mut ldap = Ldap {
            bind_dn: "cn=manager".into(),
            bind_password: "secret".into(),
            ..Default::default()
        };
        assert!(ldap.lookup_bind().is_anonymous());

        ldap.bind_usage = BindUsage::Always;
        assert_eq!(ldap.lookup_bind(), Bind::new("cn=manager", "secret"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read();

        assert_eq!(config.version, VERSION);
        assert_eq!(config.ldap, Ldap::default());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let config: Configuration = serde_yaml::from_str(CONFIG).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(!yaml.contains("s3cr3t"));
        assert!(!yaml.contains("secret"));
        assert!(!yaml.contains("rescue"));
    }
}
