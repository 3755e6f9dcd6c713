//! Search filters (RFC 4515) and DN helpers.

use std::fmt;

/// Typed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Equality, the value is escaped.
    Equal(String, String),
    /// Equality on raw bytes, every byte is hex-escaped.
    Binary(String, Vec<u8>),
    /// Attribute is present.
    Present(String),
    /// Substring match anywhere in the value.
    Contains(String, String),
    /// Filter text used verbatim.
    Raw(String),
}

impl Filter {
    pub fn equal(attr: &str, value: &str) -> Self {
        Filter::Equal(attr.to_owned(), value.to_owned())
    }

    pub fn present(attr: &str) -> Self {
        Filter::Present(attr.to_owned())
    }

    /// Filter matching every record.
    pub fn any() -> Self {
        Filter::present("objectClass")
    }

    /// Filter for user records: all `object_classes`, all `clauses`, and
    /// the configured extra filter.
    pub fn users(
        object_classes: &[String],
        clauses: Vec<Filter>,
        extra: &str,
    ) -> Self {
        let mut filters = object_classes
            .iter()
            .filter(|class| !class.trim().is_empty())
            .map(|class| Filter::equal("objectClass", class.trim()))
            .collect::<Vec<_>>();
        filters.extend(clauses);

        let extra = extra.trim();
        if !extra.is_empty() {
            filters.push(Filter::Raw(extra.to_owned()));
        }

        match filters.len() {
            0 => Filter::any(),
            1 => filters.remove(0),
            _ => Filter::And(filters),
        }
    }
}

fn write_list(
    f: &mut fmt::Formatter<'_>,
    operator: char,
    filters: &[Filter],
) -> fmt::Result {
    write!(f, "({operator}")?;
    for filter in filters {
        write!(f, "{filter}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => write_list(f, '&', filters),
            Filter::Or(filters) => write_list(f, '|', filters),
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Equal(attr, value) => {
                write!(f, "({attr}={})", ldap3::ldap_escape(value))
            },
            Filter::Binary(attr, bytes) => {
                write!(f, "({attr}={})", escape_bytes(bytes))
            },
            Filter::Present(attr) => write!(f, "({attr}=*)"),
            Filter::Contains(attr, value) => {
                write!(f, "({attr}=*{}*)", ldap3::ldap_escape(value))
            },
            Filter::Raw(text) if text.starts_with('(') => f.write_str(text),
            Filter::Raw(text) => write!(f, "({text})"),
        }
    }
}

/// Escape every byte as `\XX`.
///
/// Generic escaping would corrupt binary identifiers such as `objectGUID`.
pub fn escape_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("\\{byte:02X}")).collect()
}

/// Split a DN into its RDN components.
///
/// Escaped commas stay inside their component.
pub fn explode_dn(dn: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in dn.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            },
            '\\' => {
                current.push(c);
                escaped = true;
            },
            ',' => {
                components.push(current.trim().to_owned());
                current.clear();
            },
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        components.push(current.trim().to_owned());
    }
    components
}

/// Value of an RDN component (`cn=Jane` gives `Jane`).
pub fn rdn_value(rdn: &str) -> &str {
    rdn.split_once('=').map(|(_, value)| value.trim()).unwrap_or(rdn)
}

/// Attribute of an RDN component (`cn=Jane` gives `cn`).
pub fn rdn_attribute(rdn: &str) -> &str {
    rdn.split_once('=').map(|(attr, _)| attr.trim()).unwrap_or_default()
}

/// DN of the parent record.
pub fn parent_dn(dn: &str) -> String {
    explode_dn(dn).get(1..).unwrap_or_default().join(",")
}

/// Canonical form used to compare DNs.
pub fn normalize_dn(dn: &str) -> String {
    explode_dn(dn)
        .iter()
        .map(|component| {
            let attr = rdn_attribute(component).to_lowercase();
            let value = rdn_value(component).to_lowercase();
            format!("{attr}={value}")
        })
        .collect::<Vec<_>>()
        .join(",")
}
