//! Timestamped envelope for locally cached API data.
//!
//! The session keeps the last fetched user profile in this envelope so a
//! restart can show who is signed in without waiting on the network, and so
//! an entry that has sat on disk too long can be ignored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        Utc::now() - self.cached_at > max_age
    }
}
