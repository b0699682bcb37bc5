//! Watchdog lease records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short-lived exclusive claim on a deployment, held while recovering it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Identifier of the process or sweep holding the lease
    pub holder: String,

    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,

    /// Seconds until the lease can be reclaimed by another holder
    pub ttl_secs: u64,
}

impl Lease {
    pub fn new(holder: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            holder: holder.into(),
            acquired_at: Utc::now(),
            ttl_secs,
        }
    }

    /// Whether the TTL has elapsed
    pub fn expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lease_is_not_expired() {
        let lease = Lease::new("watchdog-1", 60);
        assert!(!lease.expired());
    }

    #[test]
    fn backdated_lease_expires() {
        let mut lease = Lease::new("watchdog-1", 60);
        lease.acquired_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(lease.expired());
    }
}
