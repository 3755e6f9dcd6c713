//! The user folder: authentication and user lookups behind a two-tier
//! cache, plus the administrative surface.
//!
//! Every lookup goes through the same states: negative cache, positive
//! cache, directory round trip, role resolution, cache store. Cache locks
//! are never held during directory I/O.

mod admin;
mod manage;
mod query;

pub use admin::NewUser;
pub use query::UserRecord;

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use ldap3::SearchEntry;
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::cache::{CacheKind, ResourceRegistry, TimeoutCache, UserCache};
use crate::clock::Clock;
use crate::config::{self, EmergencyUser, Ldap};
use crate::directory::{Directory, Filter, SearchQuery, SearchScope};
use crate::domain::{self, RequestContext};
use crate::error::FolderError;
use crate::lookup::{DirectoryLookup, Found};
use crate::password;
use crate::schema::SchemaItem;
use crate::user::{User, UserParts, attributes_from_entry, credential_digest};

pub type Result<T> = std::result::Result<T, FolderError>;

const MISC_TIMEOUT: Duration = Duration::from_secs(600);

fn identity_hash() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Key of a negative cache entry.
///
/// The attribute name and the credential digest are part of the key, so a
/// miss for one attribute or one password never answers another lookup.
fn negative_key(attr: &str, value: &str, credential: Option<&str>) -> String {
    format!(
        "{attr}:{value}:{}",
        credential_digest(credential.unwrap_or_default())
    )
}

/// Key of a user cache entry.
fn user_key(attr: &str, value: &str) -> String {
    format!("{attr}:{value}")
}

/// Values of `attr` on `entry`, binary values as lowercase hex.
fn entry_values(entry: &SearchEntry, attr: &str, binary: bool) -> Vec<String> {
    let text = entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .map(|(_, values)| values);

    if let Some(values) = text {
        return if binary {
            values.iter().map(|v| hex::encode(v.as_bytes())).collect()
        } else {
            values.clone()
        };
    }

    entry
        .bin_attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .map(|(_, values)| values.iter().map(hex::encode).collect())
        .unwrap_or_default()
}

fn record_cache(kind: CacheKind, hit: bool) {
    metrics::counter!(
        "ldap_cache_requests_total",
        "cache" => kind.as_str(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Directory-backed user folder.
pub struct UserFolder {
    settings: RwLock<Ldap>,
    timeouts: RwLock<config::Cache>,
    directory: Arc<dyn Directory>,
    registry: ResourceRegistry,
    hash: RwLock<String>,
    emergency: Option<EmergencyUser>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for UserFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFolder")
            .field("hash", &*self.hash.read())
            .field("resources", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl UserFolder {
    /// Create a new [`UserFolder`].
    ///
    /// The RDN, login and uid attributes are added to the schema when
    /// missing.
    pub fn new(
        mut settings: Ldap,
        timeouts: config::Cache,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        for attr in [
            settings.rdn_attr.clone(),
            settings.login_attr.clone(),
            settings.uid_attr.clone(),
        ] {
            if attr != "dn" && !settings.schema.contains(&attr) {
                settings.schema.add(SchemaItem::new(&attr, &attr));
            }
        }
        directory.set_read_only(settings.read_only);

        Self {
            settings: RwLock::new(settings),
            timeouts: RwLock::new(timeouts),
            directory,
            registry: ResourceRegistry::new(),
            hash: RwLock::new(identity_hash()),
            emergency: None,
            clock,
        }
    }

    /// Identity that authenticates without the directory.
    pub fn emergency_user(mut self, user: Option<EmergencyUser>) -> Self {
        self.emergency = user;
        self
    }

    /// Snapshot of the directory settings.
    pub fn settings(&self) -> Ldap {
        self.settings.read().clone()
    }

    fn cache_id(&self, name: &str) -> String {
        format!("{}-{name}", self.hash.read())
    }

    fn timeout(&self, kind: CacheKind) -> Duration {
        let timeouts = self.timeouts.read();
        match kind {
            CacheKind::Anonymous => timeouts.anonymous(),
            CacheKind::Authenticated => timeouts.authenticated(),
            CacheKind::Negative => timeouts.negative(),
        }
    }

    fn user_cache(&self, authenticated: bool) -> Arc<UserCache> {
        let kind = if authenticated {
            CacheKind::Authenticated
        } else {
            CacheKind::Anonymous
        };
        let timeout = self.timeout(kind);

        self.registry
            .get_or_create(&self.cache_id(&format!("{kind}cache")), || {
                UserCache::new(Arc::clone(&self.clock), timeout)
            })
    }

    fn negative_cache(&self) -> Arc<TimeoutCache<()>> {
        let timeout = self.timeout(CacheKind::Negative);

        self.registry.get_or_create(
            &self.cache_id(&format!("{}cache", CacheKind::Negative)),
            || TimeoutCache::new(Arc::clone(&self.clock), timeout),
        )
    }

    fn misc_cache(&self) -> Arc<TimeoutCache<Vec<String>>> {
        self.registry.get_or_create(&self.cache_id("misc_cache"), || {
            TimeoutCache::new(Arc::clone(&self.clock), MISC_TIMEOUT)
        })
    }

    /// Look a user up by any attribute.
    ///
    /// With a `credential`, the directory verifies it and the result goes
    /// to the authenticated cache; otherwise to the anonymous one. Every
    /// failure, including an unreachable directory, is remembered in the
    /// negative cache and returns `None`.
    pub async fn get_user_by_attr(
        &self,
        attr: &str,
        value: &str,
        credential: Option<&str>,
        cache: bool,
    ) -> Option<Arc<User>> {
        if value.is_empty() || credential.is_some_and(str::is_empty) {
            return None;
        }

        let authenticated = credential.is_some();
        let kind = if authenticated {
            CacheKind::Authenticated
        } else {
            CacheKind::Anonymous
        };
        let negative_key = negative_key(attr, value, credential);
        let user_key = user_key(attr, value);

        if cache {
            let negative = self.negative_cache().get(&negative_key).is_some();
            record_cache(CacheKind::Negative, negative);
            if negative {
                tracing::debug!(%attr, %value, "lookup cached as not found");
                return None;
            }

            if let Some(user) = self.user_cache(authenticated).get(&user_key, credential) {
                tracing::debug!(%value, cache = %kind, "user served from cache");
                record_cache(kind, true);
                return Some(user);
            }
            record_cache(kind, false);
        }

        let settings = self.settings();
        let found = DirectoryLookup::new(self.directory.as_ref(), &settings)
            .lookup(attr, value, credential)
            .await;

        let Some(user) = found.and_then(|found| {
            self.build_user(&settings, attr, value, credential, found)
        }) else {
            tracing::debug!(%attr, %value, "user not found");
            self.negative_cache().set(&negative_key, ());
            return None;
        };

        let user = Arc::new(user);
        if cache {
            self.user_cache(authenticated).set(&user_key, Arc::clone(&user));
        }
        Some(user)
    }

    fn build_user(
        &self,
        settings: &Ldap,
        attr: &str,
        value: &str,
        credential: Option<&str>,
        found: Found,
    ) -> Option<User> {
        let Found {
            roles,
            dn,
            entry,
            groups,
        } = found;

        let login = if settings.login_attr == "dn" {
            Some(dn.clone())
        } else {
            let logins = entry_values(
                &entry,
                &settings.login_attr,
                settings.schema.is_binary(&settings.login_attr),
            );
            let requested = value.trim();

            let matching = if attr.eq_ignore_ascii_case(&settings.login_attr) {
                logins.iter().find(|login| login.eq_ignore_ascii_case(requested))
            } else {
                None
            };
            matching.or(logins.first()).cloned()
        };
        let Some(name) = login else {
            tracing::debug!(%dn, attr = %settings.login_attr, "record has no login value");
            return None;
        };

        let id = if settings.uid_attr == "dn" {
            Some(dn.clone())
        } else {
            entry_values(
                &entry,
                &settings.uid_attr,
                settings.schema.is_binary(&settings.uid_attr),
            )
            .into_iter()
            .next()
        };
        let Some(id) = id else {
            tracing::debug!(%dn, attr = %settings.uid_attr, "record has no uid value");
            return None;
        };

        Some(User::new(UserParts {
            id,
            name,
            credential,
            roles,
            domains: Vec::new(),
            attributes: attributes_from_entry(&entry, &settings.schema),
            dn,
            groups,
            created_at: self.now(),
        }))
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        DateTime::from_timestamp(self.clock.now() as i64, 0).unwrap_or_default()
    }

    /// Authenticate `login` with `password` for a request coming from
    /// `context`.
    ///
    /// The login is trimmed and an empty password never reaches the
    /// directory. Users with domain restrictions are refused outside
    /// their domains.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
        context: &RequestContext,
    ) -> Option<Arc<User>> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            metrics::counter!("ldap_authentications_total", "result" => "rejected")
                .increment(1);
            return None;
        }

        let user = match self.emergency(login, password) {
            Some(user) => Some(user),
            None => self.get_user(login, Some(password)).await,
        };

        let user = user.filter(|user| {
            let allowed = domain::is_allowed(user.domains(), context);
            if !allowed {
                tracing::info!(login = %user.user_name(), ?context, "login refused outside allowed domains");
            }
            allowed
        });

        let result = if user.is_some() { "success" } else { "failure" };
        metrics::counter!("ldap_authentications_total", "result" => result)
            .increment(1);
        user
    }

    fn emergency(&self, login: &str, credential: &str) -> Option<Arc<User>> {
        let emergency = self.emergency.as_ref()?;

        if emergency.name != login
            || !password::verify(credential, &emergency.password)
        {
            return None;
        }

        tracing::info!(login = %emergency.name, "emergency user authenticated");
        Some(Arc::new(User::new(UserParts {
            id: emergency.name.clone(),
            name: emergency.name.clone(),
            credential: Some(credential),
            roles: emergency.roles.clone(),
            domains: emergency.domains.clone(),
            created_at: self.now(),
            ..Default::default()
        })))
    }

    /// Look a user up by login name.
    pub async fn get_user(
        &self,
        name: &str,
        credential: Option<&str>,
    ) -> Option<Arc<User>> {
        let login_attr = self.settings.read().login_attr.clone();
        self.get_user_by_attr(&login_attr, name, credential, true)
            .await
    }

    /// Look a user up by user id.
    pub async fn get_user_by_id(&self, id: &str) -> Option<Arc<User>> {
        let uid_attr = self.settings.read().uid_attr.clone();
        self.get_user_by_attr(&uid_attr, id, None, true).await
    }

    /// Look a user up by DN.
    pub async fn get_user_by_dn(&self, dn: &str) -> Option<Arc<User>> {
        if !dn.contains(',') {
            tracing::debug!(%dn, "not a valid dn");
            return None;
        }

        let settings = self.settings();
        if settings.uid_attr == "dn" {
            return self.get_user_by_id(dn).await;
        }

        let query = SearchQuery::new(dn, SearchScope::Base, Filter::any())
            .attrs(vec![settings.uid_attr.clone()])
            .bind(settings.manager());

        let entry = match self.directory.search(&query).await {
            Ok(entries) => entries.into_iter().next()?,
            Err(err) => {
                tracing::debug!(%dn, error = %err, "cannot read user record");
                return None;
            },
        };

        let id = entry_values(
            &entry,
            &settings.uid_attr,
            settings.schema.is_binary(&settings.uid_attr),
        )
        .into_iter()
        .next()?;
        self.get_user_by_id(&id).await
    }

    /// Drop every cache entry of `user`.
    ///
    /// Negative entries are only dropped for the login and uid attributes
    /// looked up without a credential.
    pub fn expire_user(&self, user: &User) {
        let settings = self.settings.read();
        let login_key = negative_key(&settings.login_attr, user.user_name(), None);
        let id_key = negative_key(&settings.uid_attr, user.id(), None);
        let cached_login = user_key(&settings.login_attr, user.user_name());
        let cached_id = user_key(&settings.uid_attr, user.id());
        drop(settings);

        for authenticated in [false, true] {
            let cache = self.user_cache(authenticated);
            cache.invalidate(Some(&cached_login));
            cache.invalidate(Some(&cached_id));
        }

        let negative = self.negative_cache();
        negative.invalidate(Some(&login_key));
        negative.invalidate(Some(&id_key));
        tracing::debug!(login = %user.user_name(), id = %user.id(), "user expired");
    }

    /// Drop the cache entries of a login name.
    pub fn expire_login(&self, login: &str) {
        let login_attr = self.settings.read().login_attr.clone();
        let key = negative_key(&login_attr, login, None);
        let cached = user_key(&login_attr, login);

        for authenticated in [false, true] {
            self.user_cache(authenticated).invalidate(Some(&cached));
        }
        self.negative_cache().invalidate(Some(&key));
    }

    /// Empty every cache.
    pub fn clear_caches(&self) {
        self.user_cache(false).invalidate(None);
        self.user_cache(true).invalidate(None);
        self.negative_cache().invalidate(None);
        self.misc_cache().invalidate(None);
    }

    /// Drop every cache by rotating the identity hash.
    pub fn reinit(&self) {
        self.clear_caches();

        let old = std::mem::replace(&mut *self.hash.write(), identity_hash());
        self.registry.remove_prefix(&format!("{old}-"));
        tracing::info!("user caches cleared");
    }

    /// Valid users of a cache.
    pub fn cached_users(&self, kind: CacheKind) -> Vec<Arc<User>> {
        match kind {
            CacheKind::Anonymous => self.user_cache(false).all_valid(),
            CacheKind::Authenticated => self.user_cache(true).all_valid(),
            CacheKind::Negative => Vec::new(),
        }
    }

    /// Number of entries in the negative cache, expired ones included.
    pub fn negative_entries(&self) -> usize {
        self.negative_cache().len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.directory.is_read_only() {
            return Err(FolderError::ReadOnly);
        }
        Ok(())
    }
}
