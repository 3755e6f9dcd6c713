//! Group to role resolution.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Roles granted to every directory user when nothing else is configured.
pub const DEFAULT_ROLES: &[&str] = &["Anonymous"];

/// Roles granted by a group.
///
/// Accepts a single role name as a list of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(roles: OneOrMany) -> Self {
        match roles {
            OneOrMany::One(role) => vec![role],
            OneOrMany::Many(roles) => roles,
        }
    }
}

/// Mapping from directory group name to application roles.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, OneOrMany>")]
pub struct GroupRoleMapping(BTreeMap<String, Vec<String>>);

impl From<BTreeMap<String, OneOrMany>> for GroupRoleMapping {
    fn from(mapping: BTreeMap<String, OneOrMany>) -> Self {
        Self(
            mapping
                .into_iter()
                .map(|(group, roles)| (group, roles.into()))
                .collect(),
        )
    }
}

impl GroupRoleMapping {
    /// Create an empty [`GroupRoleMapping`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `group` to `role` as well.
    ///
    /// Returns `false` when the pair already exists.
    pub fn add(&mut self, group: &str, role: &str) -> bool {
        let roles = self.0.entry(group.to_owned()).or_default();
        if roles.iter().any(|r| r == role) {
            return false;
        }
        roles.push(role.to_owned());
        true
    }

    /// Delete every mapping of the given groups, returning the groups that
    /// had one.
    pub fn remove(&mut self, groups: &[String]) -> Vec<String> {
        groups
            .iter()
            .filter(|group| self.0.remove(group.as_str()).is_some())
            .cloned()
            .collect()
    }

    pub fn roles_of(&self, group: &str) -> &[String] {
        self.0.get(group).map(Vec::as_slice).unwrap_or_default()
    }

    /// `(group, role)` pairs, sorted by group.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .flat_map(|(group, roles)| {
                roles.iter().map(move |role| (group.clone(), role.clone()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compute the roles of a user.
///
/// With `implicit` mapping every group is a role on its own. Mapped roles
/// and static roles are always granted. The result is sorted and has no
/// duplicates.
pub fn resolve(
    groups: &[String],
    static_roles: &[String],
    mapping: &GroupRoleMapping,
    implicit: bool,
) -> Vec<String> {
    let mut roles = BTreeSet::new();

    for group in groups {
        if implicit {
            roles.insert(group.clone());
        }
        roles.extend(mapping.roles_of(group).iter().cloned());
    }
    roles.extend(static_roles.iter().cloned());

    roles.into_iter().collect()
}
