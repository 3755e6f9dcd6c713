//! Read-only queries: user listings, searches and groups.

use std::collections::BTreeMap;

use super::{Result, UserFolder, entry_values};
use crate::directory::{Filter, SearchQuery, SearchScope};
use crate::error::FolderError;
use crate::lookup::{DirectoryLookup, Group};

/// A user record found by a search: attribute name to value, with
/// multiple values joined by `;`.
pub type UserRecord = BTreeMap<String, String>;

const USER_IDS: &str = "useridlist";
const USER_NAMES: &str = "loginlist";

impl UserFolder {
    /// Every user id, sorted.
    pub async fn user_ids(&self) -> Result<Vec<String>> {
        let uid_attr = self.settings.read().uid_attr.clone();
        self.list_values(USER_IDS, &uid_attr).await
    }

    /// Every login name, sorted.
    pub async fn user_names(&self) -> Result<Vec<String>> {
        let login_attr = self.settings.read().login_attr.clone();
        self.list_values(USER_NAMES, &login_attr).await
    }

    async fn list_values(&self, cache_key: &str, attr: &str) -> Result<Vec<String>> {
        if let Some(values) = self.misc_cache().get(cache_key) {
            return Ok(values);
        }

        let settings = self.settings();
        let lookup = DirectoryLookup::new(self.directory.as_ref(), &settings);
        let query = SearchQuery::new(
            &settings.users_base,
            settings.users_scope,
            lookup.user_filter(vec![Filter::present(attr)]),
        )
        .attrs(vec![attr.to_owned()])
        .bind(settings.lookup_bind());

        let binary = settings.schema.is_binary(attr);
        let mut values = self
            .directory
            .search(&query)
            .await?
            .into_iter()
            .filter_map(|entry| {
                if attr == "dn" {
                    Some(entry.dn)
                } else {
                    entry_values(&entry, attr, binary).into_iter().next()
                }
            })
            .collect::<Vec<_>>();
        values.sort();
        values.dedup();

        self.misc_cache().set(cache_key, values.clone());
        Ok(values)
    }

    /// Search user records.
    ///
    /// `criteria` pairs an attribute (LDAP, friendly or public name) with a
    /// search term. Terms match anywhere in the value unless `exact`, and an
    /// empty term matches any value. A `dn` criterion reads that record
    /// only. `attrs` defaults to the schema attributes.
    pub async fn search_users(
        &self,
        criteria: &[(String, String)],
        exact: bool,
        attrs: &[String],
    ) -> Result<Vec<UserRecord>> {
        let settings = self.settings();
        let lookup = DirectoryLookup::new(self.directory.as_ref(), &settings);

        let mut base = settings.users_base.clone();
        let mut scope = settings.users_scope;
        let mut clauses = Vec::new();

        for (name, term) in criteria {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let attr = settings.schema.translate(name).unwrap_or(name);
            let term = term.trim();

            if attr.eq_ignore_ascii_case("dn") {
                if term.is_empty() {
                    continue;
                }
                base = term.to_owned();
                scope = SearchScope::Base;
            } else if term.is_empty() {
                clauses.push(Filter::present(attr));
            } else if attr.eq_ignore_ascii_case("objectGUID") {
                let guid = hex::decode(term).map_err(|_| {
                    FolderError::InvalidInput(format!("`{term}` is not a valid objectGUID"))
                })?;
                clauses.push(Filter::Binary(attr.to_owned(), guid));
            } else if exact {
                clauses.push(Filter::equal(attr, term));
            } else {
                clauses.push(Filter::Contains(attr.to_owned(), term.to_owned()));
            }
        }

        if clauses.is_empty() && scope != SearchScope::Base {
            return Err(FolderError::InvalidInput(
                "No useful filter criteria given".to_owned(),
            ));
        }

        let mut wanted = if attrs.is_empty() {
            settings.schema.attribute_names()
        } else {
            attrs
                .iter()
                .map(|attr| settings.schema.translate(attr).unwrap_or(attr).to_owned())
                .collect()
        };
        for attr in ["cn", "sn"] {
            if !wanted.iter().any(|w| w.eq_ignore_ascii_case(attr)) {
                wanted.push(attr.to_owned());
            }
        }

        let query = SearchQuery::new(&base, scope, lookup.user_filter(clauses))
            .attrs(wanted.clone())
            .bind(settings.lookup_bind());
        tracing::debug!(%base, filter = %query.filter, "searching users");

        let records = self
            .directory
            .search(&query)
            .await?
            .into_iter()
            .map(|entry| {
                let mut record = UserRecord::new();
                for attr in &wanted {
                    let values =
                        entry_values(&entry, attr, settings.schema.is_binary(attr));
                    record.insert(attr.clone(), values.join(";"));
                }
                record.insert("dn".to_owned(), entry.dn);
                record
            })
            .collect();
        Ok(records)
    }

    /// Search user records on one attribute.
    pub async fn find_user(
        &self,
        attr: &str,
        term: &str,
        exact: bool,
        attrs: &[String],
    ) -> Result<Vec<UserRecord>> {
        self.search_users(&[(attr.to_owned(), term.to_owned())], exact, attrs)
            .await
    }

    /// Whether no user record has `value` for `attr`.
    pub async fn is_unique(&self, attr: &str, value: &str) -> Result<bool> {
        let settings = self.settings();
        let query = SearchQuery::new(
            &settings.users_base,
            settings.users_scope,
            Filter::equal(attr, value),
        )
        .attrs(vec![attr.to_owned()])
        .bind(settings.manager());

        Ok(self.directory.search(&query).await?.is_empty())
    }

    /// Every group, sorted by name.
    pub async fn groups(&self) -> Result<Vec<Group>> {
        let settings = self.settings();
        Ok(DirectoryLookup::new(self.directory.as_ref(), &settings)
            .all_groups()
            .await?)
    }

    /// Groups `dn` is a member of.
    pub async fn groups_of(&self, dn: &str) -> Result<Vec<Group>> {
        let settings = self.settings();
        let mut groups = DirectoryLookup::new(self.directory.as_ref(), &settings)
            .groups_of(dn)
            .await?;
        groups.sort_by(|a, b| a.cn.cmp(&b.cn));
        Ok(groups)
    }

    /// Object class of the group `dn`, `n/a` when unknown.
    pub async fn group_type(&self, dn: &str) -> String {
        let settings = self.settings();
        DirectoryLookup::new(self.directory.as_ref(), &settings)
            .group_type(dn)
            .await
    }
}
