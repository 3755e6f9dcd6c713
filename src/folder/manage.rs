//! Settings of a running user folder: schema, group mappings, servers,
//! cache lifetimes and read-only mode.

use std::time::Duration;

use super::UserFolder;
use crate::cache::CacheKind;
use crate::directory::ServerConfig;
use crate::roles::GroupRoleMapping;
use crate::schema::{Schema, SchemaItem};

impl UserFolder {
    pub fn schema(&self) -> Schema {
        self.settings.read().schema.clone()
    }

    /// Add a schema item unless one with the same LDAP name exists.
    ///
    /// Users are rebuilt from the new schema on their next lookup.
    pub fn add_schema_item(&self, item: SchemaItem) -> bool {
        let name = item.ldap_name.clone();
        let added = self.settings.write().schema.add(item);

        if added {
            tracing::info!(attr = %name, "schema item added");
            self.clear_caches();
        }
        added
    }

    /// Delete schema items, returning the names actually deleted.
    ///
    /// The login, uid and RDN attributes cannot be deleted.
    pub fn delete_schema_items(&self, names: &[String]) -> Vec<String> {
        let mut settings = self.settings.write();
        let protected = [
            settings.login_attr.clone(),
            settings.uid_attr.clone(),
            settings.rdn_attr.clone(),
        ];
        let names = names
            .iter()
            .filter(|name| !protected.iter().any(|p| p.eq_ignore_ascii_case(name)))
            .cloned()
            .collect::<Vec<_>>();

        let removed = settings.schema.remove(&names);
        drop(settings);

        if !removed.is_empty() {
            tracing::info!(attrs = ?removed, "schema items deleted");
            self.clear_caches();
        }
        removed
    }

    pub fn group_mappings(&self) -> GroupRoleMapping {
        self.settings.read().group_mappings.clone()
    }

    /// Map a directory group to a role.
    pub fn add_group_mapping(&self, group: &str, role: &str) -> bool {
        let added = self.settings.write().group_mappings.add(group, role);

        if added {
            tracing::info!(%group, %role, "group mapping added");
            self.clear_caches();
        }
        added
    }

    /// Delete the mappings of `groups`, returning the groups actually
    /// unmapped.
    pub fn delete_group_mappings(&self, groups: &[String]) -> Vec<String> {
        let removed = self.settings.write().group_mappings.remove(groups);

        if !removed.is_empty() {
            tracing::info!(groups = ?removed, "group mappings deleted");
            self.clear_caches();
        }
        removed
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        self.directory.servers()
    }

    /// Add a server at `position`, or after the existing ones.
    pub fn add_server(&self, server: ServerConfig, position: Option<usize>) {
        tracing::info!(host = %server.host, port = server.port(), "directory server added");
        self.directory.add_server(server, position);
    }

    /// Delete servers by position, returning how many were deleted.
    pub fn delete_servers(&self, positions: &[usize]) -> usize {
        let deleted = self.directory.delete_servers(positions);
        tracing::info!(deleted, "directory servers deleted");
        deleted
    }

    pub fn is_read_only(&self) -> bool {
        self.directory.is_read_only()
    }

    /// Enable or disable every directory write.
    pub fn set_read_only(&self, read_only: bool) {
        self.settings.write().read_only = read_only;
        self.directory.set_read_only(read_only);
        tracing::info!(read_only, "read-only mode changed");
    }

    pub fn cache_timeout(&self, kind: CacheKind) -> Duration {
        self.timeout(kind)
    }

    /// Change the lifetime of a cache.
    ///
    /// Entries already cached are checked against the new lifetime, from
    /// their original creation time.
    pub fn set_cache_timeout(&self, kind: CacheKind, timeout: Duration) {
        {
            let mut timeouts = self.timeouts.write();
            let seconds = timeout.as_secs();
            match kind {
                CacheKind::Anonymous => timeouts.anonymous_timeout = seconds,
                CacheKind::Authenticated => {
                    timeouts.authenticated_timeout = seconds
                },
                CacheKind::Negative => timeouts.negative_timeout = seconds,
            }
        }

        match kind {
            CacheKind::Anonymous => self.user_cache(false).set_timeout(timeout),
            CacheKind::Authenticated => self.user_cache(true).set_timeout(timeout),
            CacheKind::Negative => self.negative_cache().set_timeout(timeout),
        }
        tracing::info!(cache = %kind, ?timeout, "cache timeout changed");
    }
}
