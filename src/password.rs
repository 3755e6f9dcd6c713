//! `userPassword` encoding and verification.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

const SALT_LENGTH: usize = 7;
const SHA1_LENGTH: usize = 20;

/// Scheme used to store new passwords on the directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Encryption {
    Sha,
    #[default]
    Ssha,
    Clear,
}

impl From<String> for Encryption {
    /// Unknown schemes fall back to salted SHA.
    fn from(scheme: String) -> Self {
        match scheme.to_uppercase().as_str() {
            "SHA" => Encryption::Sha,
            "CLEAR" => Encryption::Clear,
            _ => Encryption::Ssha,
        }
    }
}

impl From<Encryption> for String {
    fn from(scheme: Encryption) -> Self {
        match scheme {
            Encryption::Sha => "SHA",
            Encryption::Ssha => "SSHA",
            Encryption::Clear => "CLEAR",
        }
        .to_owned()
    }
}

fn sha1_with_salt(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().to_vec()
}

/// Encode `password` into a `userPassword` value.
pub fn encode(password: &str, scheme: Encryption) -> String {
    match scheme {
        Encryption::Sha => {
            format!("{{SHA}}{}", STANDARD.encode(sha1_with_salt(password, &[])))
        },
        Encryption::Ssha => {
            let mut salt = [0u8; SALT_LENGTH];
            OsRng.fill_bytes(&mut salt);

            let mut digest = sha1_with_salt(password, &salt);
            digest.extend_from_slice(&salt);
            format!("{{SSHA}}{}", STANDARD.encode(digest))
        },
        Encryption::Clear => password.to_owned(),
    }
}

/// Check `password` against a stored `userPassword` value.
///
/// Values without a known `{SCHEME}` prefix are compared as clear text.
pub fn verify(password: &str, stored: &str) -> bool {
    let Some((scheme, encoded)) = stored
        .strip_prefix('{')
        .and_then(|rest| rest.split_once('}'))
    else {
        return !stored.is_empty() && password == stored;
    };

    match scheme.to_uppercase().as_str() {
        "SHA" => STANDARD
            .decode(encoded)
            .is_ok_and(|digest| digest == sha1_with_salt(password, &[])),
        "SSHA" => match STANDARD.decode(encoded) {
            Ok(decoded) if decoded.len() > SHA1_LENGTH => {
                let (digest, salt) = decoded.split_at(SHA1_LENGTH);
                digest == sha1_with_salt(password, salt).as_slice()
            },
            _ => false,
        },
        _ => password == stored,
    }
}
