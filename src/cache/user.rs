//! Cache for user objects that re-checks credentials on every hit.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TimeoutCache;
use crate::clock::Clock;
use crate::user::User;

/// A [`TimeoutCache`] of [`User`] objects.
///
/// A hit never bypasses password verification: when a credential is given
/// it must match the token stored on the cached user.
pub struct UserCache {
    inner: TimeoutCache<Arc<User>>,
}

impl UserCache {
    /// Create a new [`UserCache`].
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            inner: TimeoutCache::new(clock, timeout),
        }
    }

    /// Cache `user` under `key`.
    pub fn set(&self, key: &str, user: Arc<User>) {
        self.inner.set(key, user);
    }

    /// Retrieve a cached user if it is valid.
    ///
    /// A credential mismatch reads as a miss but leaves the entry in place,
    /// so a wrong password from one caller cannot evict another caller's
    /// session.
    pub fn get(&self, key: &str, credential: Option<&str>) -> Option<Arc<User>> {
        let user = self.inner.get(key)?;

        match credential {
            Some(credential) if !user.verify_credential(credential) => None,
            _ => Some(user),
        }
    }

    pub fn invalidate(&self, key: Option<&str>) {
        self.inner.invalidate(key);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.set_timeout(timeout);
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Valid cache records.
    pub fn all_valid(&self) -> Vec<Arc<User>> {
        self.inner.all_valid()
    }
}
