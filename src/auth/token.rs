use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Length of bearer and refresh hashes.
pub const TOKEN_LEN: usize = 12;

/// Server-side session record. `hash` is the bearer credential,
/// `refreshing_hash` is exchanged together with it for a new pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub user_uid: Uuid,
    pub hash: String,
    pub refreshing_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Token {
    pub fn issue(user_uid: Uuid) -> Self {
        Self {
            user_uid,
            hash: random_string(TOKEN_LEN),
            refreshing_hash: random_string(TOKEN_LEN),
            created: OffsetDateTime::now_utc(),
        }
    }

    pub fn expires_at(&self, ttl: Duration) -> OffsetDateTime {
        self.created + ttl
    }

    pub fn is_expired(&self, ttl: Duration, now: OffsetDateTime) -> bool {
        self.expires_at(ttl) <= now
    }
}

pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Five-digit confirmation PIN.
pub fn random_code() -> String {
    rand::thread_rng().gen_range(10_000..=99_999).to_string()
}
