//! Directory writes: users, their passwords, roles and groups.
//!
//! Every operation is refused in read-only mode and expires the cache
//! entries it affects.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use super::{Result, UserFolder};
use crate::config::Ldap;
use crate::directory::filter::{explode_dn, normalize_dn, parent_dn, rdn_value};
use crate::directory::{AttributeMap, Filter, ModOp, SearchQuery, SearchScope, text_attributes};
use crate::error::FolderError;
use crate::lookup::{DirectoryLookup, member_attribute};
use crate::password;
use crate::schema::Schema;

/// Form of a user to add.
#[derive(Default, Clone, Deserialize)]
pub struct NewUser {
    /// Attribute values by LDAP or public name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub password: String,
    pub confirm: String,
    /// Group names or DNs the user joins.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("attributes", &self.attributes)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// Non-empty value of `name` in a form, looked up case-insensitively.
fn form_value<'a>(form: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Attribute name and values to write for `value`.
///
/// Binary attributes get the `;binary` option and multivalued ones are
/// split on `;`.
fn encode_value(schema: &Schema, attr: &str, value: &str) -> (String, Vec<Vec<u8>>) {
    match schema.get(attr) {
        Some(item) if item.binary => {
            (format!("{attr};binary"), vec![value.as_bytes().to_vec()])
        },
        Some(item) if item.multivalued => (
            attr.to_owned(),
            value
                .split(';')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| v.as_bytes().to_vec())
                .collect(),
        ),
        _ => {
            let value = value.trim();
            if value.is_empty() {
                (attr.to_owned(), Vec::new())
            } else {
                (attr.to_owned(), vec![value.as_bytes().to_vec()])
            }
        },
    }
}

fn child_dn(rdn: &str, base: &str) -> String {
    if base.is_empty() {
        rdn.to_owned()
    } else {
        format!("{rdn},{base}")
    }
}

impl UserFolder {
    /// Create a user record, returning its DN.
    pub async fn add_user(&self, new_user: NewUser) -> Result<String> {
        self.check_writable()?;
        let settings = self.settings();

        let rdn_value = form_value(&new_user.attributes, &settings.rdn_attr)
            .or_else(|| {
                settings
                    .schema
                    .get(&settings.rdn_attr)
                    .filter(|item| !item.public_name.is_empty())
                    .and_then(|item| form_value(&new_user.attributes, &item.public_name))
            })
            .ok_or_else(|| {
                FolderError::MissingRequiredAttribute(settings.rdn_attr.clone())
            })?;

        if new_user.password != new_user.confirm {
            return Err(FolderError::PasswordMismatch);
        }
        if new_user.password.is_empty() {
            return Err(FolderError::EmptyPassword);
        }

        let mut attrs = AttributeMap::new();
        for item in settings.schema.items() {
            if item.ldap_name.eq_ignore_ascii_case(&settings.rdn_attr) {
                continue;
            }

            let value = form_value(&new_user.attributes, &item.ldap_name).or_else(|| {
                (!item.public_name.is_empty())
                    .then(|| form_value(&new_user.attributes, &item.public_name))
                    .flatten()
            });
            if let Some(value) = value {
                let (name, values) = encode_value(&settings.schema, &item.ldap_name, value);
                if !values.is_empty() {
                    attrs.insert(name, values);
                }
            }
        }

        attrs.insert(
            settings.rdn_attr.clone(),
            vec![rdn_value.as_bytes().to_vec()],
        );
        attrs.insert(
            "objectClass".to_owned(),
            settings
                .object_classes
                .iter()
                .map(|class| class.as_bytes().to_vec())
                .collect(),
        );
        attrs.insert(
            "userPassword".to_owned(),
            vec![
                password::encode(&new_user.password, settings.password_encryption)
                    .into_bytes(),
            ],
        );

        let rdn = format!("{}={}", settings.rdn_attr, ldap3::dn_escape(rdn_value));
        self.directory
            .insert(&settings.manager(), &settings.users_base, &rdn, attrs)
            .await
            .inspect_err(|err| tracing::error!(%rdn, error = %err, "cannot add user"))?;

        let dn = child_dn(&rdn, &settings.users_base);
        if !new_user.roles.is_empty() {
            self.edit_user_roles(&dn, &new_user.roles).await?;
        }

        self.clear_caches();
        tracing::info!(%dn, "user added");
        Ok(dn)
    }

    /// Change schema attributes of a user, renaming the record when the
    /// RDN value changes. Returns the (new) DN.
    pub async fn edit_user(
        &self,
        dn: &str,
        form: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.check_writable()?;
        let settings = self.settings();

        let current = self
            .get_user_by_dn(dn)
            .await
            .ok_or_else(|| FolderError::NoSuchUser(dn.to_owned()))?;

        let mut changes = AttributeMap::new();
        for item in settings.schema.items() {
            if item.ldap_name.eq_ignore_ascii_case(&settings.rdn_attr) {
                continue;
            }

            let value = form
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&item.ldap_name))
                .map(|(_, value)| value.as_str());
            if let Some(value) = value {
                let (name, values) = encode_value(&settings.schema, &item.ldap_name, value);
                changes.insert(name, values);
            }
        }

        let old_rdn_value = explode_dn(dn)
            .first()
            .map(|rdn| rdn_value(rdn).to_owned())
            .unwrap_or_default();
        let rename = form_value(form, &settings.rdn_attr)
            .filter(|value| *value != old_rdn_value);

        if changes.is_empty() && rename.is_none() {
            return Err(FolderError::NothingChanged);
        }

        let manager = settings.manager();
        if !changes.is_empty() {
            self.directory
                .modify(&manager, dn, ModOp::Replace, changes)
                .await
                .inspect_err(|err| tracing::error!(%dn, error = %err, "cannot edit user"))?;
        }

        let mut new_dn = dn.to_owned();
        if let Some(value) = rename {
            let groups = DirectoryLookup::new(self.directory.as_ref(), &settings)
                .groups_of(dn)
                .await?;

            let new_rdn = format!("{}={}", settings.rdn_attr, ldap3::dn_escape(value));
            self.directory
                .rename(&manager, dn, &new_rdn)
                .await
                .inspect_err(|err| tracing::error!(%dn, error = %err, "cannot rename user"))?;
            new_dn = child_dn(&new_rdn, &parent_dn(dn));

            for group in groups {
                self.change_membership(&settings, &group.dn, ModOp::Delete, dn)
                    .await?;
                self.change_membership(&settings, &group.dn, ModOp::Add, &new_dn)
                    .await?;
            }
        }

        self.expire_user(&current);
        tracing::info!(%dn, %new_dn, "user changed");
        Ok(new_dn)
    }

    /// Replace the password of a user.
    pub async fn edit_user_password(&self, dn: &str, new_password: &str) -> Result<()> {
        self.check_writable()?;
        if new_password.is_empty() {
            return Err(FolderError::EmptyPassword);
        }

        let settings = self.settings();
        let encoded = password::encode(new_password, settings.password_encryption);

        self.directory
            .modify(
                &settings.manager(),
                dn,
                ModOp::Replace,
                text_attributes([("userPassword", [encoded.as_str()])]),
            )
            .await
            .inspect_err(|err| tracing::error!(%dn, error = %err, "cannot change password"))?;

        if let Some(user) = self.get_user_by_dn(dn).await {
            self.expire_user(&user);
        }
        tracing::info!(%dn, "password changed");
        Ok(())
    }

    /// Make the groups of a user exactly `roles`.
    ///
    /// A role without `=` is a group name under the groups base.
    pub async fn edit_user_roles(&self, dn: &str, roles: &[String]) -> Result<()> {
        self.check_writable()?;
        let settings = self.settings();
        let lookup = DirectoryLookup::new(self.directory.as_ref(), &settings);

        let all_groups = lookup.all_groups().await?;
        let current = lookup
            .groups_of(dn)
            .await?
            .into_iter()
            .map(|group| normalize_dn(&group.dn))
            .collect::<HashSet<_>>();
        let wanted = roles
            .iter()
            .map(|role| {
                if role.contains('=') {
                    normalize_dn(role)
                } else {
                    normalize_dn(&format!("cn={role},{}", settings.groups_base))
                }
            })
            .collect::<HashSet<_>>();

        for group in all_groups {
            let key = normalize_dn(&group.dn);
            let op = match (current.contains(&key), wanted.contains(&key)) {
                (true, false) => ModOp::Delete,
                (false, true) => ModOp::Add,
                _ => continue,
            };
            self.change_membership(&settings, &group.dn, op, dn).await?;
        }

        if let Some(user) = self.get_user_by_dn(dn).await {
            self.expire_user(&user);
        }
        tracing::info!(%dn, ?roles, "roles changed");
        Ok(())
    }

    /// Set one attribute of a user.
    pub async fn set_user_property(&self, dn: &str, name: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let settings = self.settings();
        let manager = settings.manager();

        let query = SearchQuery::new(dn, SearchScope::Base, Filter::any())
            .attrs(vec![name.to_owned()])
            .bind(manager.clone());
        if self.directory.search(&query).await?.is_empty() {
            return Err(FolderError::NoSuchUser(dn.to_owned()));
        }

        let (attr, values) = encode_value(&settings.schema, name, value);
        self.directory
            .modify(&manager, dn, ModOp::Replace, AttributeMap::from([(attr, values)]))
            .await
            .inspect_err(|err| tracing::error!(%dn, %name, error = %err, "cannot set property"))?;

        if let Some(user) = self.get_user_by_dn(dn).await {
            self.expire_user(&user);
        }
        Ok(())
    }

    /// Delete user records and their group memberships.
    pub async fn delete_users(&self, dns: &[String]) -> Result<()> {
        if dns.is_empty() {
            return Err(FolderError::InvalidInput(
                "no users to delete".to_owned(),
            ));
        }
        self.check_writable()?;

        let settings = self.settings();
        let manager = settings.manager();
        let lookup = DirectoryLookup::new(self.directory.as_ref(), &settings);

        for dn in dns {
            // Memberships are cleaned up even if the record is already gone.
            if let Err(err) = self.directory.delete(&manager, dn).await {
                tracing::warn!(%dn, error = %err, "cannot delete user record");
            }

            for group in lookup.groups_of(dn).await? {
                self.change_membership(&settings, &group.dn, ModOp::Delete, dn)
                    .await?;
            }
        }

        self.clear_caches();
        tracing::info!(?dns, "users deleted");
        Ok(())
    }

    /// Create a group of `object_class` under the groups base, returning
    /// its DN. The manager is its first member.
    pub async fn add_group(&self, name: &str, object_class: &str) -> Result<String> {
        self.check_writable()?;

        let name = name.trim();
        if name.is_empty() {
            return Err(FolderError::InvalidInput("no group name given".to_owned()));
        }
        let member = member_attribute(object_class).ok_or_else(|| {
            FolderError::InvalidInput(format!("unknown group type `{object_class}`"))
        })?;

        let settings = self.settings();
        let mut attrs =
            text_attributes([("cn", vec![name]), ("objectClass", vec!["top", object_class])]);
        if !settings.bind_dn.is_empty() {
            attrs.insert(member.to_owned(), vec![settings.bind_dn.as_bytes().to_vec()]);
        }

        let rdn = format!("cn={}", ldap3::dn_escape(name));
        self.directory
            .insert(&settings.manager(), &settings.groups_base, &rdn, attrs)
            .await
            .inspect_err(|err| tracing::error!(%rdn, error = %err, "cannot add group"))?;

        let dn = child_dn(&rdn, &settings.groups_base);
        tracing::info!(%dn, "group added");
        Ok(dn)
    }

    /// Delete groups, returning how many were deleted.
    pub async fn delete_groups(&self, dns: &[String]) -> Result<usize> {
        if dns.is_empty() {
            return Err(FolderError::InvalidInput(
                "no groups to delete".to_owned(),
            ));
        }
        self.check_writable()?;

        let manager = self.settings().manager();
        let mut deleted = 0;
        for dn in dns {
            match self.directory.delete(&manager, dn).await {
                Ok(()) => deleted += 1,
                Err(err) => tracing::warn!(%dn, error = %err, "cannot delete group"),
            }
        }

        self.clear_caches();
        tracing::info!(deleted, "groups deleted");
        Ok(deleted)
    }

    async fn change_membership(
        &self,
        settings: &Ldap,
        group_dn: &str,
        op: ModOp,
        member_dn: &str,
    ) -> Result<()> {
        let group_type = DirectoryLookup::new(self.directory.as_ref(), settings)
            .group_type(group_dn)
            .await;
        let Some(attr) = member_attribute(&group_type) else {
            tracing::warn!(group = %group_dn, "unknown group type");
            return Ok(());
        };

        self.directory
            .modify(
                &settings.manager(),
                group_dn,
                op,
                text_attributes([(attr, [member_dn])]),
            )
            .await
            .inspect_err(|err| {
                tracing::error!(group = %group_dn, member = %member_dn, error = %err, "cannot change membership")
            })?;
        Ok(())
    }
}
