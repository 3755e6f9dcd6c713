//! In-memory caches, recreated per process.

mod registry;
mod timeout;
mod user;

pub use registry::*;
pub use timeout::*;
pub use user::*;

/// Kinds of caches a user folder keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Users looked up without a credential.
    Anonymous,
    /// Users whose credential was verified by the directory.
    Authenticated,
    /// Lookups that resolved to nothing.
    Negative,
}

impl CacheKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Anonymous => "anonymous",
            CacheKind::Authenticated => "authenticated",
            CacheKind::Negative => "negative",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
