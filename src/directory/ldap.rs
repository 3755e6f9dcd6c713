//! LDAP support.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, SearchEntry};
use parking_lot::RwLock;

use super::{
    AttributeMap, Bind, Directory, DirectoryError, INVALID_CREDENTIALS, ModOp,
    NO_SUCH_OBJECT, Result, SearchQuery, ServerConfig,
};

/// Directory served by LDAP servers, the first reachable one wins.
#[derive(Debug, Default)]
pub struct LdapDirectory {
    servers: RwLock<Vec<ServerConfig>>,
    read_only: AtomicBool,
}

fn result_code(err: &LdapError) -> Option<u32> {
    match err {
        LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    }
}

fn values(values: Vec<Vec<u8>>) -> HashSet<Vec<u8>> {
    values.into_iter().collect()
}

async fn close(mut conn: Ldap) {
    if let Err(err) = conn.unbind().await {
        tracing::debug!(error = %err, "ldap unbind failed");
    }
}

impl LdapDirectory {
    /// Create a new [`LdapDirectory`].
    pub fn new(servers: Vec<ServerConfig>, read_only: bool) -> Self {
        Self {
            servers: RwLock::new(servers),
            read_only: AtomicBool::new(read_only),
        }
    }

    /// Connect to the first reachable server and bind.
    async fn open(&self, bind: &Bind) -> Result<Ldap> {
        // Never hold the lock across a connection attempt.
        let servers = self.servers.read().clone();

        for server in &servers {
            let url = server.url();
            let settings = LdapConnSettings::new()
                .set_conn_timeout(Duration::from_secs(server.conn_timeout));

            let (conn, mut ldap) =
                match LdapConnAsync::with_settings(settings, &url).await {
                    Ok(connection) => connection,
                    Err(err) => {
                        tracing::warn!(%url, error = %err, "directory server unreachable");
                        continue;
                    },
                };
            ldap3::drive!(conn);

            if let Some(timeout) = server.op_timeout {
                ldap.with_timeout(Duration::from_secs(timeout));
            }

            if !bind.is_anonymous() {
                // An empty password would be an unauthenticated bind.
                if bind.password.is_empty() {
                    return Err(DirectoryError::InvalidCredentials(
                        bind.dn.clone(),
                    ));
                }

                let result = match ldap.simple_bind(&bind.dn, &bind.password).await {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::warn!(%url, error = %err, "directory server dropped the bind");
                        continue;
                    },
                };

                match result.success() {
                    Ok(_) => {},
                    Err(err) if result_code(&err) == Some(INVALID_CREDENTIALS) => {
                        close(ldap).await;
                        return Err(DirectoryError::InvalidCredentials(
                            bind.dn.clone(),
                        ));
                    },
                    Err(err) => {
                        close(ldap).await;
                        return Err(err.into());
                    },
                }
            }

            return Ok(ldap);
        }

        Err(DirectoryError::Unavailable)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(DirectoryError::ReadOnly);
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn connect(&self, bind: &Bind) -> Result<()> {
        let conn = self.open(bind).await?;
        close(conn).await;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchEntry>> {
        let mut conn = self.open(&query.bind).await?;

        let filter = query.filter.to_string();
        let attrs = if query.attrs.is_empty() {
            vec!["*".to_owned()]
        } else {
            query.attrs.clone()
        };

        tracing::debug!(base = %query.base, %filter, bind = %query.bind.dn, "ldap search");
        let result = conn
            .search(&query.base, query.scope.into(), &filter, attrs)
            .await;
        close(conn).await;

        match result?.success() {
            Ok((entries, _)) => {
                Ok(entries.into_iter().map(SearchEntry::construct).collect())
            },
            Err(err) if result_code(&err) == Some(NO_SUCH_OBJECT) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn insert(
        &self,
        bind: &Bind,
        base: &str,
        rdn: &str,
        attrs: AttributeMap,
    ) -> Result<()> {
        self.check_writable()?;

        let dn = if base.is_empty() {
            rdn.to_owned()
        } else {
            format!("{rdn},{base}")
        };
        let attrs = attrs
            .into_iter()
            .map(|(name, vals)| (name.into_bytes(), values(vals)))
            .collect::<Vec<_>>();

        let mut conn = self.open(bind).await?;
        let result = conn.add(&dn, attrs).await;
        close(conn).await;

        result?.success()?;
        Ok(())
    }

    async fn modify(
        &self,
        bind: &Bind,
        dn: &str,
        op: ModOp,
        attrs: AttributeMap,
    ) -> Result<()> {
        self.check_writable()?;

        let mods = attrs
            .into_iter()
            .map(|(name, vals)| {
                let name = name.into_bytes();
                match op {
                    ModOp::Add => Mod::Add(name, values(vals)),
                    ModOp::Replace => Mod::Replace(name, values(vals)),
                    ModOp::Delete => Mod::Delete(name, values(vals)),
                }
            })
            .collect::<Vec<_>>();

        let mut conn = self.open(bind).await?;
        let result = conn.modify(dn, mods).await;
        close(conn).await;

        match result?.success() {
            Ok(_) => Ok(()),
            Err(err) if result_code(&err) == Some(NO_SUCH_OBJECT) => {
                Err(DirectoryError::NoSuchObject(dn.to_owned()))
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, bind: &Bind, dn: &str) -> Result<()> {
        self.check_writable()?;

        let mut conn = self.open(bind).await?;
        let result = conn.delete(dn).await;
        close(conn).await;

        match result?.success() {
            Ok(_) => Ok(()),
            Err(err) if result_code(&err) == Some(NO_SUCH_OBJECT) => {
                Err(DirectoryError::NoSuchObject(dn.to_owned()))
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn rename(&self, bind: &Bind, dn: &str, new_rdn: &str) -> Result<()> {
        self.check_writable()?;

        let mut conn = self.open(bind).await?;
        let result = conn.modifydn(dn, new_rdn, true, None).await;
        close(conn).await;

        result?.success()?;
        Ok(())
    }

    fn servers(&self) -> Vec<ServerConfig> {
        self.servers.read().clone()
    }

    fn add_server(&self, server: ServerConfig, position: Option<usize>) {
        super::insert_position(&mut self.servers.write(), server, position);
    }

    fn delete_servers(&self, positions: &[usize]) -> usize {
        super::remove_positions(&mut self.servers.write(), positions)
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}
