//! In-memory directory for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use ldap3::SearchEntry;
use parking_lot::RwLock;

use super::filter::{Filter, explode_dn, normalize_dn, parent_dn, rdn_attribute, rdn_value};
use super::{
    AttributeMap, Bind, Directory, DirectoryError, ModOp, Result, SearchQuery,
    SearchScope, ServerConfig,
};
use crate::schema::BINARY_ATTRIBUTES;

/// Values compare case-insensitively, DN-valued ones as DNs.
fn same_value(attr: &str, left: &[u8], right: &[u8]) -> bool {
    let dn_valued = ["member", "uniquemember"]
        .contains(&attr.to_lowercase().as_str());

    match (std::str::from_utf8(left), std::str::from_utf8(right)) {
        (Ok(left), Ok(right)) if dn_valued => {
            normalize_dn(left) == normalize_dn(right)
        },
        (Ok(left), Ok(right)) => left.eq_ignore_ascii_case(right),
        _ => left == right,
    }
}

#[derive(Debug, Clone)]
struct Record {
    dn: String,
    attrs: AttributeMap,
}

impl Record {
    fn values(&self, attr: &str) -> Option<&Vec<Vec<u8>>> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values)
    }

    fn texts(&self, attr: &str) -> Vec<String> {
        self.values(attr)
            .map(|values| {
                values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::And(filters) => filters.iter().all(|f| self.matches(f)),
            Filter::Or(filters) => filters.iter().any(|f| self.matches(f)),
            Filter::Not(filter) => !self.matches(filter),
            Filter::Equal(attr, value) => self
                .texts(attr)
                .iter()
                .any(|v| same_value(attr, v.as_bytes(), value.as_bytes())),
            Filter::Binary(attr, bytes) => self
                .values(attr)
                .is_some_and(|values| values.iter().any(|v| v == bytes)),
            Filter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass")
                    || self.values(attr).is_some_and(|v| !v.is_empty())
            },
            Filter::Contains(attr, value) => {
                let value = value.to_lowercase();
                self.texts(attr)
                    .iter()
                    .any(|v| v.to_lowercase().contains(&value))
            },
            Filter::Raw(_) => true,
        }
    }

    fn entry(&self, attrs: &[String]) -> SearchEntry {
        let wanted = |name: &str| {
            attrs.is_empty()
                || attrs.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(name))
        };

        let mut text = HashMap::new();
        let mut binary = HashMap::new();

        for (name, values) in self.attrs.iter().filter(|(name, _)| wanted(name)) {
            let texts = values
                .iter()
                .map(|v| String::from_utf8(v.clone()))
                .collect::<std::result::Result<Vec<_>, _>>();

            match texts {
                Ok(texts)
                    if !BINARY_ATTRIBUTES
                        .contains(&name.to_lowercase().as_str()) =>
                {
                    text.insert(name.clone(), texts);
                },
                _ => {
                    binary.insert(name.clone(), values.clone());
                },
            }
        }

        SearchEntry {
            dn: self.dn.clone(),
            attrs: text,
            bin_attrs: binary,
        }
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);

    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => normalize_dn(&parent_dn(&dn)) == base,
        SearchScope::Subtree => {
            base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
        },
    }
}

/// Directory kept in memory.
///
/// Binds are checked against `userPassword` (clear, `{SHA}` or `{SSHA}`),
/// and against the manager credentials given at creation.
#[derive(Debug)]
pub struct MemoryDirectory {
    records: RwLock<BTreeMap<String, Record>>,
    manager: Bind,
    servers: RwLock<Vec<ServerConfig>>,
    available: AtomicBool,
    read_only: AtomicBool,
    searches: AtomicUsize,
}

impl MemoryDirectory {
    /// Create a new [`MemoryDirectory`].
    pub fn new(manager: Bind) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            manager,
            servers: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            searches: AtomicUsize::new(0),
        }
    }

    /// Store a record, bypassing read-only mode.
    pub fn add_entry(&self, dn: &str, attrs: &[(&str, &[&str])]) {
        let attrs = attrs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                )
            })
            .collect();
        self.records.write().insert(
            normalize_dn(dn),
            Record {
                dn: dn.to_owned(),
                attrs,
            },
        );
    }

    /// Store a raw value, e.g. a binary one.
    pub fn set_value(&self, dn: &str, attr: &str, value: Vec<u8>) {
        if let Some(record) = self.records.write().get_mut(&normalize_dn(dn)) {
            record.attrs.insert(attr.to_owned(), vec![value]);
        }
    }

    /// Text values of `attr` on `dn`.
    pub fn values(&self, dn: &str, attr: &str) -> Vec<String> {
        self.records
            .read()
            .get(&normalize_dn(dn))
            .map(|record| record.texts(attr))
            .unwrap_or_default()
    }

    pub fn contains(&self, dn: &str) -> bool {
        self.records.read().contains_key(&normalize_dn(dn))
    }

    /// Simulate every server being down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of searches served.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(DirectoryError::ReadOnly);
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn connect(&self, bind: &Bind) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable);
        }
        if bind.is_anonymous() || *bind == self.manager {
            return Ok(());
        }

        let invalid = || DirectoryError::InvalidCredentials(bind.dn.clone());
        if bind.password.is_empty() {
            return Err(invalid());
        }

        let records = self.records.read();
        let record = records.get(&normalize_dn(&bind.dn)).ok_or_else(invalid)?;
        let verified = record
            .texts("userPassword")
            .iter()
            .any(|stored| crate::password::verify(&bind.password, stored));

        if verified { Ok(()) } else { Err(invalid()) }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchEntry>> {
        self.connect(&query.bind).await?;
        self.searches.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .records
            .read()
            .values()
            .filter(|record| in_scope(&record.dn, &query.base, query.scope))
            .filter(|record| record.matches(&query.filter))
            .map(|record| record.entry(&query.attrs))
            .collect())
    }

    async fn insert(
        &self,
        bind: &Bind,
        base: &str,
        rdn: &str,
        attrs: AttributeMap,
    ) -> Result<()> {
        self.check_writable()?;
        self.connect(bind).await?;

        let dn = if base.is_empty() {
            rdn.to_owned()
        } else {
            format!("{rdn},{base}")
        };

        let mut records = self.records.write();
        if records.contains_key(&normalize_dn(&dn)) {
            return Err(DirectoryError::Operation(format!("`{dn}` already exists")));
        }
        records.insert(normalize_dn(&dn), Record { dn, attrs });
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
        self.connect(bind).await?;

        let mut records = self.records.write();
        let record = records
            .get_mut(&normalize_dn(dn))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))?;

        for (name, values) in attrs {
            let key = record
                .attrs
                .keys()
                .find(|k| k.eq_ignore_ascii_case(&name))
                .cloned()
                .unwrap_or(name);

            match op {
                ModOp::Add => {
                    let current = record.attrs.entry(key.clone()).or_default();
                    for value in values {
                        if !current.iter().any(|v| same_value(&key, v, &value)) {
                            current.push(value);
                        }
                    }
                },
                ModOp::Replace if values.is_empty() => {
                    record.attrs.remove(&key);
                },
                ModOp::Replace => {
                    record.attrs.insert(key, values);
                },
                ModOp::Delete if values.is_empty() => {
                    record.attrs.remove(&key);
                },
                ModOp::Delete => {
                    if let Some(current) = record.attrs.get_mut(&key) {
                        current.retain(|v| {
                            !values.iter().any(|value| same_value(&key, v, value))
                        });
                        if current.is_empty() {
                            record.attrs.remove(&key);
                        }
                    }
                },
            }
        }
        Ok(())
    }

    async fn delete(&self, bind: &Bind, dn: &str) -> Result<()> {
        self.check_writable()?;
        self.connect(bind).await?;

        self.records
            .write()
            .remove(&normalize_dn(dn))
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))
    }

    async fn rename(&self, bind: &Bind, dn: &str, new_rdn: &str) -> Result<()> {
        self.check_writable()?;
        self.connect(bind).await?;

        let mut records = self.records.write();
        let mut record = records
            .remove(&normalize_dn(dn))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))?;

        let old_rdn = explode_dn(dn).first().cloned().unwrap_or_default();
        let parent = parent_dn(dn);
        let new_dn = if parent.is_empty() {
            new_rdn.to_owned()
        } else {
            format!("{new_rdn},{parent}")
        };

        let old_value = rdn_value(&old_rdn).as_bytes().to_vec();
        let attr = rdn_attribute(new_rdn);
        let key = record
            .attrs
            .keys()
            .find(|k| k.eq_ignore_ascii_case(attr))
            .cloned()
            .unwrap_or_else(|| attr.to_owned());
        let values = record.attrs.entry(key).or_default();
        let new_value = rdn_value(new_rdn).as_bytes().to_vec();
        values.retain(|v| *v != old_value);
        if !values.contains(&new_value) {
            values.push(new_value);
        }

        record.dn = new_dn.clone();
        records.insert(normalize_dn(&new_dn), record);
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

#[cfg(test)]
mod tests {
    use super::*;

    const PEOPLE: &str = "ou=people,dc=example,dc=org";

    fn directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new(Bind::new("cn=manager", "secret"));
        directory.add_entry(
            "cn=jane,ou=people,dc=example,dc=org",
            &[
                ("cn", &["jane"]),
                ("sn", &["Doe"]),
                ("objectClass", &["top", "person"]),
                ("userPassword", &["{SHA}5en6G6MezRroT3XKqkdPOmY/BfQ="]),
            ],
        );
        directory
    }

    #[tokio::test]
    async fn test_bind() {
        let directory = directory();
        let jane = "cn=jane,ou=people,dc=example,dc=org";

        assert!(directory.connect(&Bind::new(jane, "secret")).await.is_ok());
        assert!(matches!(
            directory.connect(&Bind::new(jane, "wrong")).await,
            Err(DirectoryError::InvalidCredentials(_))
        ));
        assert!(directory.connect(&Bind::new(jane, "")).await.is_err());
        assert!(directory.connect(&Bind::new("cn=manager", "secret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let directory = directory();
        let filter = Filter::equal("cn", "JANE");

        let subtree = SearchQuery::new("dc=example,dc=org", SearchScope::Subtree, filter.clone());
        assert_eq!(directory.search(&subtree).await.unwrap().len(), 1);

        let one = SearchQuery::new("dc=example,dc=org", SearchScope::OneLevel, filter.clone());
        assert!(directory.search(&one).await.unwrap().is_empty());

        let one = SearchQuery::new(PEOPLE, SearchScope::OneLevel, filter);
        let entries = directory.search(&one.attrs(vec!["sn".into()])).await.unwrap();
        assert_eq!(entries[0].attrs.get("sn"), Some(&vec!["Doe".to_owned()]));
        assert!(!entries[0].attrs.contains_key("cn"));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let directory = directory();
        directory.set_available(false);

        let query = SearchQuery::new(PEOPLE, SearchScope::Subtree, Filter::any());
        assert!(matches!(
            directory.search(&query).await,
            Err(DirectoryError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_modify_and_rename() {
        let directory = directory();
        let manager = Bind::new("cn=manager", "secret");
        let jane = "cn=jane,ou=people,dc=example,dc=org";

        directory
            .modify(&manager, jane, ModOp::Replace, super::super::text_attributes([("sn", ["Smith"])]))
            .await
            .unwrap();
        assert_eq!(directory.values(jane, "sn"), vec!["Smith"]);

        directory.rename(&manager, jane, "cn=janet").await.unwrap();
        let janet = "cn=janet,ou=people,dc=example,dc=org";
        assert!(directory.contains(janet));
        assert_eq!(directory.values(janet, "cn"), vec!["janet"]);
    }
}
