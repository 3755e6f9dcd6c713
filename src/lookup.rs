//! Directory round trip behind every user lookup.

use ldap3::SearchEntry;
use serde::Serialize;

use crate::config::{BindUsage, Ldap};
use crate::directory::filter::{explode_dn, rdn_value};
use crate::directory::{self, Bind, Directory, Filter, SearchQuery, SearchScope};
use crate::roles;

/// Group object classes and the attribute listing their members.
pub const GROUP_MEMBER_MAP: &[(&str, &str)] = &[
    ("groupOfUniqueNames", "uniqueMember"),
    ("groupOfNames", "member"),
    ("accessGroup", "member"),
    ("group", "member"),
    ("univentionGroup", "uniqueMember"),
];

/// Attribute holding the members of a group of `object_class`.
pub fn member_attribute(object_class: &str) -> Option<&'static str> {
    GROUP_MEMBER_MAP
        .iter()
        .find(|(class, _)| class.eq_ignore_ascii_case(object_class))
        .map(|(_, attr)| *attr)
}

/// Distinct membership attributes.
pub fn member_attributes() -> Vec<&'static str> {
    let mut attrs = GROUP_MEMBER_MAP
        .iter()
        .map(|(_, attr)| *attr)
        .collect::<Vec<_>>();
    attrs.sort_unstable();
    attrs.dedup();
    attrs
}

/// A directory group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub cn: String,
    pub dn: String,
}

impl Group {
    fn from_entry(entry: SearchEntry) -> Self {
        let cn = entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("cn"))
            .and_then(|(_, values)| values.first().cloned())
            .unwrap_or_else(|| {
                explode_dn(&entry.dn)
                    .first()
                    .map(|rdn| rdn_value(rdn).to_owned())
                    .unwrap_or_default()
            });

        Self { cn, dn: entry.dn }
    }
}

/// Record found for a lookup.
#[derive(Debug, Clone)]
pub struct Found {
    pub roles: Vec<String>,
    pub dn: String,
    pub entry: SearchEntry,
    pub groups: Vec<String>,
}

/// Directory round trip for one lookup, over a snapshot of the settings.
pub struct DirectoryLookup<'a> {
    directory: &'a dyn Directory,
    settings: &'a Ldap,
}

impl<'a> DirectoryLookup<'a> {
    /// Create a new [`DirectoryLookup`].
    pub fn new(directory: &'a dyn Directory, settings: &'a Ldap) -> Self {
        Self {
            directory,
            settings,
        }
    }

    /// Attributes requested on user records.
    fn known_attributes(&self) -> Vec<String> {
        let mut attrs = self.settings.schema.attribute_names();

        for attr in [&self.settings.login_attr, &self.settings.uid_attr] {
            if attr != "dn" && !attrs.iter().any(|a| a.eq_ignore_ascii_case(attr)) {
                attrs.push(attr.clone());
            }
        }
        attrs
    }

    /// Filter for user records with the given clauses.
    pub fn user_filter(&self, clauses: Vec<Filter>) -> Filter {
        let clauses = if clauses.is_empty() {
            vec![Filter::present(&self.settings.uid_attr)]
        } else {
            clauses
        };

        Filter::users(
            &self.settings.object_classes,
            clauses,
            &self.settings.extra_user_filter,
        )
    }

    /// Search for the record with `attr` equal to `value`.
    fn user_query(&self, attr: &str, value: &str) -> Option<SearchQuery> {
        let query = if attr.eq_ignore_ascii_case("dn") {
            if !value.contains(',') {
                tracing::debug!(dn = %value, "not a valid dn");
                return None;
            }
            SearchQuery::new(value, SearchScope::Base, Filter::any())
        } else if attr.eq_ignore_ascii_case("objectGUID") {
            let Ok(guid) = hex::decode(value) else {
                tracing::debug!(%value, "not a valid objectGUID");
                return None;
            };
            SearchQuery::new(
                &self.settings.users_base,
                self.settings.users_scope,
                self.user_filter(vec![Filter::Binary(attr.to_owned(), guid)]),
            )
        } else {
            SearchQuery::new(
                &self.settings.users_base,
                self.settings.users_scope,
                self.user_filter(vec![Filter::equal(attr, value)]),
            )
        };

        Some(
            query
                .attrs(self.known_attributes())
                .bind(self.settings.lookup_bind()),
        )
    }

    /// Look a user record up, verifying `credential` when given.
    ///
    /// Every failure reads as "not found": missing record, wrong
    /// credential, or unreachable directory.
    pub async fn lookup(
        &self,
        attr: &str,
        value: &str,
        credential: Option<&str>,
    ) -> Option<Found> {
        let query = self.user_query(attr, value)?;
        tracing::debug!(bind = %query.bind.dn, filter = %query.filter, "looking up user");

        let entry = match self.directory.search(&query).await {
            Ok(entries) => entries.into_iter().next(),
            Err(err) => {
                tracing::debug!(%attr, %value, error = %err, "user lookup failed");
                None
            },
        };
        let Some(mut entry) = entry else {
            tracing::debug!(%attr, %value, "no such user");
            metrics::counter!("ldap_directory_lookups_total", "result" => "not_found")
                .increment(1);
            return None;
        };
        let dn = entry.dn.clone();

        if let Some(credential) = credential {
            let user_bind = Bind::new(&dn, credential);

            let refetch_bind = if self.settings.bind_usage == BindUsage::Always {
                // The manager performs the re-fetch, so the credential
                // must be checked on its own.
                if let Err(err) = self.directory.connect(&user_bind).await {
                    tracing::debug!(%dn, error = %err, "binding as user failed");
                    metrics::counter!("ldap_directory_lookups_total", "result" => "bad_credentials")
                        .increment(1);
                    return None;
                }
                self.settings.manager()
            } else {
                user_bind
            };

            tracing::debug!(%dn, bind = %refetch_bind.dn, "re-binding");
            let query = SearchQuery::new(&dn, SearchScope::Base, Filter::any())
                .attrs(self.known_attributes())
                .bind(refetch_bind);

            entry = match self.directory.search(&query).await {
                Ok(entries) if !entries.is_empty() => entries.into_iter().next()?,
                Ok(_) => {
                    tracing::debug!(%dn, "user not visible once bound");
                    return None;
                },
                Err(err) => {
                    tracing::debug!(%dn, error = %err, "re-binding failed");
                    metrics::counter!("ldap_directory_lookups_total", "result" => "bad_credentials")
                        .increment(1);
                    return None;
                },
            };
        }

        let groups = match self.groups_of(&dn).await {
            Ok(groups) => groups.into_iter().map(|group| group.cn).collect(),
            Err(err) => {
                tracing::warn!(%dn, error = %err, "cannot resolve groups");
                Vec::new()
            },
        };
        let roles = roles::resolve(
            &groups,
            &self.settings.roles,
            &self.settings.group_mappings,
            self.settings.implicit_mapping,
        );

        metrics::counter!("ldap_directory_lookups_total", "result" => "found")
            .increment(1);
        Some(Found {
            roles,
            dn,
            entry,
            groups,
        })
    }

    fn groups_query(&self, filter: Filter) -> SearchQuery {
        SearchQuery::new(
            &self.settings.groups_base,
            self.settings.groups_scope,
            filter,
        )
        .attrs(vec!["cn".to_owned()])
        .bind(self.settings.lookup_bind())
    }

    /// Groups `dn` is a member of, across every group schema.
    pub async fn groups_of(&self, dn: &str) -> directory::Result<Vec<Group>> {
        let filter = Filter::Or(
            GROUP_MEMBER_MAP
                .iter()
                .map(|(class, member)| {
                    Filter::And(vec![
                        Filter::equal("objectClass", class),
                        Filter::equal(member, dn),
                    ])
                })
                .collect(),
        );

        let entries = self.directory.search(&self.groups_query(filter)).await?;
        Ok(entries.into_iter().map(Group::from_entry).collect())
    }

    /// Every group of a known group object class.
    pub async fn all_groups(&self) -> directory::Result<Vec<Group>> {
        let filter = Filter::Or(
            GROUP_MEMBER_MAP
                .iter()
                .map(|(class, _)| Filter::equal("objectClass", class))
                .collect(),
        );

        let mut groups = self
            .directory
            .search(&self.groups_query(filter))
            .await?
            .into_iter()
            .map(Group::from_entry)
            .collect::<Vec<_>>();
        groups.sort_by(|a, b| a.cn.cmp(&b.cn));
        Ok(groups)
    }

    /// Object class of the group `dn`, `n/a` when unknown.
    pub async fn group_type(&self, dn: &str) -> String {
        let query = SearchQuery::new(dn, SearchScope::Base, Filter::any())
            .attrs(vec!["objectClass".to_owned()])
            .bind(self.settings.lookup_bind());

        let entries = match self.directory.search(&query).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::info!(%dn, error = %err, "no such group");
                return "n/a".to_owned();
            },
        };

        entries
            .first()
            .into_iter()
            .flat_map(|entry| entry.attrs.iter())
            .filter(|(name, _)| name.eq_ignore_ascii_case("objectClass"))
            .flat_map(|(_, classes)| classes.iter())
            .find(|class| member_attribute(class).is_some())
            .cloned()
            .unwrap_or_else(|| "n/a".to_owned())
    }
}
