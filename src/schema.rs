//! Directory attributes known to the user folder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes whose values are raw bytes and must never be re-encoded.
pub const BINARY_ATTRIBUTES: &[&str] = &["objectguid", "jpegphoto"];

/// One known directory attribute.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaItem {
    /// Attribute name on the directory.
    #[serde(default)]
    pub ldap_name: String,
    /// Human-friendly name.
    #[serde(default)]
    pub friendly_name: String,
    /// Name the attribute is also published under on user objects.
    #[serde(default)]
    pub public_name: String,
    #[serde(default)]
    pub multivalued: bool,
    #[serde(default)]
    pub binary: bool,
}

impl SchemaItem {
    /// Create a single-valued text [`SchemaItem`].
    pub fn new(ldap_name: &str, friendly_name: &str) -> Self {
        Self {
            ldap_name: ldap_name.to_owned(),
            friendly_name: friendly_name.to_owned(),
            ..Default::default()
        }
    }

    pub fn public_name(mut self, public_name: &str) -> Self {
        self.public_name = public_name.to_owned();
        self
    }

    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }
}

/// Schema configuration keyed on attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, SchemaItem>", into = "BTreeMap<String, SchemaItem>")]
pub struct Schema {
    items: BTreeMap<String, SchemaItem>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::from(BTreeMap::from([
            ("cn".to_owned(), SchemaItem::new("cn", "Canonical Name")),
            ("sn".to_owned(), SchemaItem::new("sn", "Last Name")),
        ]))
    }
}

impl From<BTreeMap<String, SchemaItem>> for Schema {
    fn from(items: BTreeMap<String, SchemaItem>) -> Self {
        let items = items
            .into_iter()
            .map(|(key, mut item)| {
                if item.ldap_name.is_empty() {
                    item.ldap_name = key.clone();
                }
                if BINARY_ATTRIBUTES.contains(&key.to_lowercase().as_str()) {
                    item.binary = true;
                }
                (key, item)
            })
            .collect();

        Self { items }
    }
}

impl From<Schema> for BTreeMap<String, SchemaItem> {
    fn from(schema: Schema) -> Self {
        schema.items
    }
}

impl Schema {
    /// Find an item, case-insensitively.
    pub fn get(&self, ldap_name: &str) -> Option<&SchemaItem> {
        self.items.get(ldap_name).or_else(|| {
            self.items
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(ldap_name))
                .map(|(_, item)| item)
        })
    }

    pub fn contains(&self, ldap_name: &str) -> bool {
        self.get(ldap_name).is_some()
    }

    /// Add `item` unless an item with the same name exists.
    ///
    /// Returns whether the item was added.
    pub fn add(&mut self, item: SchemaItem) -> bool {
        if self.contains(&item.ldap_name) {
            return false;
        }

        let mut item = item;
        if BINARY_ATTRIBUTES.contains(&item.ldap_name.to_lowercase().as_str()) {
            item.binary = true;
        }
        self.items.insert(item.ldap_name.clone(), item);
        true
    }

    /// Remove items, returning the names actually removed.
    pub fn remove(&mut self, ldap_names: &[String]) -> Vec<String> {
        ldap_names
            .iter()
            .filter(|name| self.items.remove(name.as_str()).is_some())
            .cloned()
            .collect()
    }

    /// Items sorted by name.
    pub fn items(&self) -> impl Iterator<Item = &SchemaItem> {
        self.items.values()
    }

    /// Attribute names to request on searches.
    pub fn attribute_names(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    /// `(ldap name, public name)` pairs of mapped attributes.
    pub fn mapped(&self) -> Vec<(String, String)> {
        self.items()
            .filter(|item| !item.public_name.is_empty())
            .map(|item| (item.ldap_name.clone(), item.public_name.clone()))
            .collect()
    }

    pub fn is_multivalued(&self, ldap_name: &str) -> bool {
        self.get(ldap_name).is_some_and(|item| item.multivalued)
    }

    pub fn is_binary(&self, ldap_name: &str) -> bool {
        self.get(ldap_name).is_some_and(|item| item.binary)
            || BINARY_ATTRIBUTES.contains(&ldap_name.to_lowercase().as_str())
    }

    /// Resolve a friendly, public or LDAP name to the LDAP name.
    pub fn translate(&self, name: &str) -> Option<&str> {
        self.items()
            .find(|item| {
                item.ldap_name.eq_ignore_ascii_case(name)
                    || (!item.public_name.is_empty() && item.public_name == name)
                    || (!item.friendly_name.is_empty()
                        && item.friendly_name == name)
            })
            .map(|item| item.ldap_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let schema = Schema::default();
        assert_eq!(schema.attribute_names(), vec!["cn", "sn"]);
        assert!(schema.mapped().is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let mut schema = Schema::default();

        assert!(schema.add(SchemaItem::new("mail", "Email").public_name("email")));
        assert!(!schema.add(SchemaItem::new("mail", "Other")));
        assert!(schema.add(SchemaItem::new("jpegPhoto", "Photo")));
        assert!(schema.is_binary("jpegphoto"));
        assert_eq!(schema.mapped(), vec![("mail".to_owned(), "email".to_owned())]);

        let removed = schema.remove(&["mail".to_owned(), "unknown".to_owned()]);
        assert_eq!(removed, vec!["mail"]);
        assert!(!schema.contains("mail"));
    }

    #[test]
    fn test_translate() {
        let mut schema = Schema::default();
        schema.add(SchemaItem::new("givenName", "First Name").public_name("first"));

        assert_eq!(schema.translate("First Name"), Some("givenName"));
        assert_eq!(schema.translate("first"), Some("givenName"));
        assert_eq!(schema.translate("givenname"), Some("givenName"));
        assert_eq!(schema.translate("nothing"), None);
    }

    #[test]
    fn test_deserialize_fills_names() {
        let schema: Schema = serde_yaml::from_str(
            "cn: { friendly_name: Canonical Name }\nobjectGUID: {}\nmemberOf: { multivalued: true }",
        )
        .unwrap();

        assert_eq!(schema.get("cn").map(|i| i.ldap_name.as_str()), Some("cn"));
        assert!(schema.is_binary("objectGUID"));
        assert!(schema.is_multivalued("memberof"));
    }
}
