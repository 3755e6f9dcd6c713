//! Directory-backed user object.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ldap3::SearchEntry;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use sha1::{Digest, Sha1};

use crate::schema::Schema;

/// Pseudo-role granted to every identity except the anonymous one.
pub const AUTHENTICATED_ROLE: &str = "Authenticated";
/// Name of the distinguished anonymous identity.
pub const ANONYMOUS_USER: &str = "Anonymous User";

/// Value of a directory attribute on a [`User`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Multi(Vec<String>),
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// First textual value, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(value) => Some(value),
            AttributeValue::Multi(values) => values.first().map(String::as_str),
            AttributeValue::Binary(_) => None,
        }
    }

    /// Every textual value.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            AttributeValue::Text(value) => vec![value.as_str()],
            AttributeValue::Multi(values) => {
                values.iter().map(String::as_str).collect()
            },
            AttributeValue::Binary(_) => Vec::new(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Multi(values)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Text(value) => serializer.serialize_str(value),
            AttributeValue::Multi(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            },
            AttributeValue::Binary(value) => {
                serializer.serialize_str(&hex::encode(value))
            },
        }
    }
}

/// Opaque proof of the credential a user was verified with.
///
/// The clear password is never kept on the user object.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken(String);

impl CredentialToken {
    /// Derive the token of `credential`.
    pub fn of(credential: &str) -> Self {
        Self(credential_digest(credential))
    }

    fn matches(&self, credential: &str) -> bool {
        self.0 == credential_digest(credential)
    }
}

impl std::fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialToken(..)")
    }
}

/// Hex SHA-1 of a credential, also used to key negative cache entries.
pub fn credential_digest(credential: &str) -> String {
    hex::encode(Sha1::digest(credential.as_bytes()))
}

/// Everything needed to build a [`User`].
#[derive(Debug, Default, Clone)]
pub struct UserParts<'a> {
    pub id: String,
    pub name: String,
    /// Credential verified by the directory, `None` for lookups.
    pub credential: Option<&'a str>,
    pub roles: Vec<String>,
    pub domains: Vec<String>,
    pub dn: String,
    pub attributes: HashMap<String, AttributeValue>,
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An authenticated (or looked up) identity.
///
/// Immutable once built: edits go to the directory and the cached object is
/// dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    id: String,
    name: String,
    token: Option<CredentialToken>,
    roles: Vec<String>,
    domains: Vec<String>,
    dn: String,
    attributes: HashMap<String, AttributeValue>,
    groups: Vec<String>,
    created_at: DateTime<Utc>,
}

impl User {
    /// Create a new [`User`].
    pub fn new(parts: UserParts<'_>) -> Self {
        let mut roles = parts.roles;
        roles.sort();
        roles.dedup();

        Self {
            id: parts.id,
            name: parts.name,
            token: parts.credential.map(CredentialToken::of),
            roles,
            domains: parts.domains,
            dn: parts.dn,
            attributes: parts.attributes,
            groups: parts.groups,
            created_at: parts.created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Login name.
    pub fn user_name(&self) -> &str {
        &self.name
    }

    /// Roles, with [`AUTHENTICATED_ROLE`] for every non-anonymous user.
    pub fn roles(&self) -> Vec<String> {
        let mut roles = self.roles.clone();

        if self.name != ANONYMOUS_USER
            && !roles.iter().any(|r| r == AUTHENTICATED_ROLE)
        {
            roles.push(AUTHENTICATED_ROLE.to_owned());
        }

        roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    /// Network restrictions of this user. Empty means none.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Full distinguished name.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Groups on the directory this user belongs to.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Every attribute of the user.
    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    /// Attribute `name`, looked up case-insensitively.
    pub fn property(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// Attribute `name`, or `default` as text.
    pub fn get_property(&self, name: &str, default: &str) -> AttributeValue {
        self.property(name)
            .cloned()
            .unwrap_or_else(|| AttributeValue::Text(default.to_owned()))
    }

    /// Whether `credential` is the one this user was verified with.
    ///
    /// Users built from a lookup carry no credential and never match.
    pub fn verify_credential(&self, credential: &str) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| token.matches(credential))
    }

    /// Whether this user was built from a verified credential.
    pub fn is_verified(&self) -> bool {
        self.token.is_some()
    }
}

/// Turn a directory record into user attributes.
///
/// Single-valued attributes keep their first value, binary ones their raw
/// bytes. Mapped attributes are copied under their public name and `dn` is
/// always present.
pub fn attributes_from_entry(
    entry: &SearchEntry,
    schema: &Schema,
) -> HashMap<String, AttributeValue> {
    let mut attributes = HashMap::new();

    for (key, values) in &entry.attrs {
        let value = if schema.is_binary(key) {
            AttributeValue::Binary(
                values.first().map(|v| v.as_bytes().to_vec()).unwrap_or_default(),
            )
        } else if schema.is_multivalued(key) {
            AttributeValue::Multi(values.clone())
        } else {
            AttributeValue::Text(values.first().cloned().unwrap_or_default())
        };
        attributes.insert(key.clone(), value);
    }

    for (key, values) in &entry.bin_attrs {
        attributes.insert(
            key.clone(),
            AttributeValue::Binary(values.first().cloned().unwrap_or_default()),
        );
    }

    for (ldap_name, public_name) in schema.mapped() {
        let value = attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&ldap_name))
            .map(|(_, value)| value.clone());

        if let Some(value) = value {
            attributes.insert(public_name, value);
        }
    }

    attributes.insert("dn".to_owned(), AttributeValue::Text(entry.dn.clone()));
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaItem;

    fn entry() -> SearchEntry {
        SearchEntry {
            dn: "cn=test,ou=people,dc=example,dc=org".into(),
            attrs: HashMap::from([
                ("cn".into(), vec!["test".into()]),
                ("sn".into(), vec!["User".into()]),
                ("givenName".into(), vec!["Günther".into()]),
                (
                    "objectClass".into(),
                    vec!["top".into(), "person".into()],
                ),
            ]),
            bin_attrs: HashMap::from([(
                "jpegPhoto".into(),
                vec![vec![0xde, 0xad, 0xbe, 0xef]],
            )]),
        }
    }

    fn schema() -> Schema {
        let mut schema = Schema::default();
        schema.add(SchemaItem::new("givenName", "First Name"));
        schema.add(
            SchemaItem::new("objectClass", "Object Classes")
                .public_name("Objektklassen")
                .multivalued(),
        );
        schema.add(SchemaItem::new("jpegPhoto", "Photo"));
        schema
    }

    #[test]
    fn test_attributes_from_entry() {
        let attributes = attributes_from_entry(&entry(), &schema());

        assert_eq!(attributes["cn"], AttributeValue::Text("test".into()));
        assert_eq!(attributes["givenName"], AttributeValue::Text("Günther".into()));
        assert_eq!(
            attributes["Objektklassen"],
            AttributeValue::Multi(vec!["top".into(), "person".into()])
        );
        assert_eq!(
            attributes["jpegPhoto"],
            AttributeValue::Binary(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(
            attributes["dn"].as_text(),
            Some("cn=test,ou=people,dc=example,dc=org")
        );
    }

    #[test]
    fn test_user_roles() {
        let user = User::new(UserParts {
            id: "test".into(),
            name: "test".into(),
            roles: vec!["Manager".into(), "Anonymous".into(), "Manager".into()],
            ..Default::default()
        });
        assert_eq!(user.roles(), vec!["Anonymous", "Manager", "Authenticated"]);
        assert!(user.has_role("Authenticated"));

        let anonymous = User::new(UserParts {
            name: ANONYMOUS_USER.into(),
            roles: vec!["Anonymous".into()],
            ..Default::default()
        });
        assert_eq!(anonymous.roles(), vec!["Anonymous"]);
    }

    #[test]
    fn test_credential() {
        let verified = User::new(UserParts {
            name: "test".into(),
            credential: Some("mypass"),
            ..Default::default()
        });
        assert!(verified.verify_credential("mypass"));
        assert!(!verified.verify_credential("falsepassword"));
        assert!(!format!("{verified:?}").contains("mypass"));

        let looked_up = User::new(UserParts::default());
        assert!(!looked_up.verify_credential(""));
        assert!(!looked_up.is_verified());
    }

    #[test]
    fn test_get_property() {
        let user = User::new(UserParts {
            attributes: attributes_from_entry(&entry(), &schema()),
            ..Default::default()
        });

        assert_eq!(user.get_property("SN", "").as_text(), Some("User"));
        assert_eq!(
            user.get_property("mail", "nobody@example.org"),
            AttributeValue::Text("nobody@example.org".into())
        );
    }

    #[test]
    fn test_serialize_binary_as_hex() {
        let json = serde_json::to_string(&AttributeValue::Binary(vec![0x01, 0xff]))
            .unwrap();
        assert_eq!(json, "\"01ff\"");
    }
}
