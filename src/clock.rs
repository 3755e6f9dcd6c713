//! Time source for cache expiry.
//!
//! Code crash if there is a physical inconsistency (unrecoverable state).

/// Port for getting the current time.
pub trait Clock: Send + Sync {
    /// Get the current Unix timestamp in seconds.
    fn now(&self) -> u64;

    /// Get the current Unix timestamp in milliseconds.
    fn now_millis(&self) -> u128;
}

/// System clock using the OS time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn now_millis(&self) -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }
}

/// Clock moved by hand, so expiry can be tested without sleeping.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(timestamp: u64) -> Self {
        Self {
            millis: std::sync::atomic::AtomicU64::new(timestamp * 1000),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: std::time::Duration) {
        self.millis.fetch_add(
            by.as_millis() as u64,
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst) / 1000
    }

    fn now_millis(&self) -> u128 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst) as u128
    }
}
