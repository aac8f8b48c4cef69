use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::token::Token;

/// Newest sessions kept per user; older ones are evicted together with their hash keys.
pub const MAX_SESSIONS_PER_USER: usize = 16;
/// Optimistic transaction attempts before giving up with [`TokenStoreError::Conflict`].
pub const MAX_TX_RETRIES: usize = 5;

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token hash and user uid must both be present")]
    InvalidArgument,
    #[error("token list kept changing, gave up after {0} attempts")]
    Conflict(usize),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Picks the slot to overwrite in a user's token list, or `None` to leave it alone.
pub type Rotation<'a> = dyn FnMut(&[Token]) -> Option<(usize, Token)> + Send + 'a;

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores `token` keyed by its hash for `expiration` and records it under its user.
    async fn create(&self, token: &Token, expiration: Duration) -> Result<(), TokenStoreError>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<Token>, TokenStoreError>;
    async fn delete_by_hash(&self, hash: &str) -> Result<(), TokenStoreError>;
    /// Runs `rotate` against a consistent snapshot of the user's tokens and
    /// commits its replacement only if nobody changed the list meanwhile.
    /// Concurrent modification re-runs `rotate` on a fresh snapshot.
    ///
    /// Returns the committed replacement, or `None` if `rotate` declined.
    async fn find_for_update(
        &self,
        user_uid: Uuid,
        expiration: Duration,
        rotate: &mut Rotation<'_>,
    ) -> Result<Option<Token>, TokenStoreError>;
}

fn token_key(hash: &str) -> String {
    format!("auth:token:{hash}")
}

fn user_key(user_uid: Uuid) -> String {
    format!("auth:user:{user_uid}:tokens")
}

fn encode(token: &Token) -> anyhow::Result<String> {
    serde_json::to_string(token).context("serialize token")
}

fn decode(raw: &str) -> anyhow::Result<Token> {
    serde_json::from_str(raw).context("deserialize token")
}

async fn read_list(conn: &mut MultiplexedConnection, list: &str) -> anyhow::Result<Vec<String>> {
    redis::cmd("LRANGE")
        .arg(list)
        .arg(0)
        .arg(-1)
        .query_async(conn)
        .await
        .context("list user tokens")
}

#[derive(Clone)]
pub struct RedisTokenStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisTokenStore {
    /// Connects and pings. Every command, and every connection attempt, is
    /// bounded by `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parse redis url")?;
        let mut conn = client
            .get_multiplexed_tokio_connection_with_response_timeouts(timeout, timeout)
            .await
            .context("connect to redis")?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .context("ping redis")?;
        Ok(Self {
            client,
            conn,
            timeout,
        })
    }

    /// Opens a dedicated connection with `keys` WATCHed. WATCH state is per
    /// connection, so it is never shared with the multiplexed one.
    async fn watch(&self, keys: &[&str]) -> anyhow::Result<MultiplexedConnection> {
        let mut conn = self
            .client
            .get_multiplexed_tokio_connection_with_response_timeouts(self.timeout, self.timeout)
            .await
            .context("open transaction connection")?;
        redis::cmd("WATCH")
            .arg(keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .context("watch keys")?;
        Ok(conn)
    }

    async fn unwatch(conn: &mut MultiplexedConnection) -> anyhow::Result<()> {
        redis::cmd("UNWATCH")
            .query_async::<_, ()>(conn)
            .await
            .context("unwatch keys")
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn create(&self, token: &Token, expiration: Duration) -> Result<(), TokenStoreError> {
        if token.hash.is_empty() || token.user_uid.is_nil() {
            return Err(TokenStoreError::InvalidArgument);
        }
        let raw = encode(token)?;
        let secs = expiration.as_secs().max(1);
        let list = user_key(token.user_uid);

        for attempt in 1..=MAX_TX_RETRIES {
            let mut conn = self.watch(&[list.as_str()]).await?;
            // Entries at MAX-1 and beyond fall off once the new one is pushed.
            let evicted = read_list(&mut conn, &list)
                .await?
                .iter()
                .skip(MAX_SESSIONS_PER_USER - 1)
                .map(|r| decode(r))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("SET")
                .arg(token_key(&token.hash))
                .arg(&raw)
                .arg("EX")
                .arg(secs)
                .ignore()
                .cmd("LPUSH")
                .arg(&list)
                .arg(&raw)
                .ignore()
                .cmd("LTRIM")
                .arg(&list)
                .arg(0)
                .arg(MAX_SESSIONS_PER_USER - 1)
                .ignore()
                .cmd("EXPIRE")
                .arg(&list)
                .arg(secs)
                .ignore();
            for old in &evicted {
                pipe.cmd("DEL").arg(token_key(&old.hash)).ignore();
            }

            let committed: Option<()> = pipe
                .query_async(&mut conn)
                .await
                .context("store token")?;
            if committed.is_some() {
                debug!(
                    user_uid = %token.user_uid,
                    evicted = evicted.len(),
                    attempt,
                    "token stored"
                );
                return Ok(());
            }
            debug!(
                user_uid = %token.user_uid,
                attempt,
                "token list changed during create, retrying"
            );
        }

        Err(TokenStoreError::Conflict(MAX_TX_RETRIES))
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Token>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(token_key(hash))
            .query_async(&mut conn)
            .await
            .context("get token")?;
        Ok(raw.as_deref().map(decode).transpose()?)
    }

    /// Removes the hash key and its list entry in one transaction that
    /// WATCHes both, so it serialises with a concurrent rotation of the
    /// same session.
    async fn delete_by_hash(&self, hash: &str) -> Result<(), TokenStoreError> {
        let key = token_key(hash);
        let Some(token) = self.find_by_hash(hash).await? else {
            return Ok(());
        };
        let list = user_key(token.user_uid);

        for attempt in 1..=MAX_TX_RETRIES {
            let mut conn = self.watch(&[key.as_str(), list.as_str()]).await?;
            let current: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .context("get token")?;
            let Some(current) = current else {
                // Rotated or expired since the lookup.
                Self::unwatch(&mut conn).await?;
                return Ok(());
            };

            let committed: Option<()> = redis::pipe()
                .atomic()
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .cmd("LREM")
                .arg(&list)
                .arg(0)
                .arg(&current)
                .ignore()
                .query_async(&mut conn)
                .await
                .context("delete token")?;
            if committed.is_some() {
                debug!(user_uid = %token.user_uid, attempt, "token deleted");
                return Ok(());
            }
            debug!(user_uid = %token.user_uid, attempt, "token changed during delete, retrying");
        }

        Err(TokenStoreError::Conflict(MAX_TX_RETRIES))
    }

    async fn find_for_update(
        &self,
        user_uid: Uuid,
        expiration: Duration,
        rotate: &mut Rotation<'_>,
    ) -> Result<Option<Token>, TokenStoreError> {
        let list = user_key(user_uid);
        let secs = expiration.as_secs().max(1);

        for attempt in 1..=MAX_TX_RETRIES {
            let mut conn = self.watch(&[list.as_str()]).await?;
            let tokens = read_list(&mut conn, &list)
                .await?
                .iter()
                .map(|r| decode(r))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let Some((index, replacement)) = rotate(&tokens) else {
                Self::unwatch(&mut conn).await?;
                return Ok(None);
            };
            let previous = tokens
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("rotation index {index} out of range"))?;
            let replacement_raw = encode(&replacement)?;

            let committed: Option<()> = redis::pipe()
                .atomic()
                .cmd("LSET")
                .arg(&list)
                .arg(index)
                .arg(&replacement_raw)
                .ignore()
                .cmd("DEL")
                .arg(token_key(&previous.hash))
                .ignore()
                .cmd("SET")
                .arg(token_key(&replacement.hash))
                .arg(&replacement_raw)
                .arg("EX")
                .arg(secs)
                .ignore()
                .cmd("EXPIRE")
                .arg(&list)
                .arg(secs)
                .ignore()
                .query_async(&mut conn)
                .await
                .context("commit token rotation")?;
            if committed.is_some() {
                debug!(user_uid = %user_uid, attempt, "token rotated");
                return Ok(Some(replacement));
            }
            debug!(user_uid = %user_uid, attempt, "token list changed during rotation, retrying");
        }

        Err(TokenStoreError::Conflict(MAX_TX_RETRIES))
    }
}

#[cfg(test)]
impl RedisTokenStore {
    async fn find_by_user(&self, user_uid: Uuid) -> anyhow::Result<Vec<Token>> {
        let mut conn = self.conn.clone();
        read_list(&mut conn, &user_key(user_uid))
            .await?
            .iter()
            .map(|r| decode(r))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    async fn live_store() -> RedisTokenStore {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        RedisTokenStore::connect(&url, Duration::from_secs(2))
            .await
            .expect("connect to redis")
    }

    #[test]
    fn keys_are_namespaced() {
        let uid = Uuid::nil();
        assert_eq!(token_key("abc"), "auth:token:abc");
        assert_eq!(
            user_key(uid),
            "auth:user:00000000-0000-0000-0000-000000000000:tokens"
        );
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_timeout() {
        let started = Instant::now();
        // TEST-NET-1, never routed
        let res = tokio::time::timeout(
            Duration::from_secs(10),
            RedisTokenStore::connect("redis://192.0.2.1:6379", Duration::from_millis(300)),
        )
        .await
        .expect("connect must not hang");
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn create_find_delete() {
        let store = live_store().await;
        let token = Token::issue(Uuid::new_v4());
        store.create(&token, Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            store.find_by_hash(&token.hash).await.unwrap(),
            Some(token.clone())
        );
        assert_eq!(
            store.find_by_user(token.user_uid).await.unwrap(),
            vec![token.clone()]
        );

        store.delete_by_hash(&token.hash).await.unwrap();
        assert!(store.find_by_hash(&token.hash).await.unwrap().is_none());
        assert!(store.find_by_user(token.user_uid).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn token_expires_with_ttl() {
        let store = live_store().await;
        let token = Token::issue(Uuid::new_v4());
        store.create(&token, Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.find_by_hash(&token.hash).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn oldest_session_is_evicted_with_its_key() {
        let store = live_store().await;
        let uid = Uuid::new_v4();
        let mut issued = Vec::new();
        for _ in 0..=MAX_SESSIONS_PER_USER {
            let token = Token::issue(uid);
            store.create(&token, Duration::from_secs(60)).await.unwrap();
            issued.push(token);
        }

        let kept = store.find_by_user(uid).await.unwrap();
        assert_eq!(kept.len(), MAX_SESSIONS_PER_USER);
        assert!(!kept.contains(&issued[0]));
        assert!(store.find_by_hash(&issued[0].hash).await.unwrap().is_none());
        assert!(store.find_by_hash(&issued[1].hash).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn rotation_replaces_slot_and_hash_key() {
        let store = live_store().await;
        let token = Token::issue(Uuid::new_v4());
        store.create(&token, Duration::from_secs(60)).await.unwrap();

        let fresh = Token::issue(token.user_uid);
        let expected = fresh.clone();
        let mut rotate = |tokens: &[Token]| {
            let index = tokens.iter().position(|t| t.hash == token.hash)?;
            Some((index, fresh.clone()))
        };
        let rotated = store
            .find_for_update(token.user_uid, Duration::from_secs(60), &mut rotate)
            .await
            .unwrap();
        assert_eq!(rotated, Some(expected.clone()));
        assert!(store.find_by_hash(&token.hash).await.unwrap().is_none());
        assert_eq!(
            store.find_by_hash(&expected.hash).await.unwrap(),
            Some(expected)
        );
    }

    async fn rotate_pair(store: RedisTokenStore, pair: Token) -> Option<Token> {
        let mut rotate = |tokens: &[Token]| {
            let index = tokens
                .iter()
                .position(|t| t.hash == pair.hash && t.refreshing_hash == pair.refreshing_hash)?;
            Some((index, Token::issue(pair.user_uid)))
        };
        store
            .find_for_update(pair.user_uid, Duration::from_secs(60), &mut rotate)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires REDIS_URL"]
    async fn concurrent_rotation_of_one_pair_has_single_winner() {
        let store = live_store().await;
        for _ in 0..20 {
            let pair = Token::issue(Uuid::new_v4());
            store.create(&pair, Duration::from_secs(60)).await.unwrap();

            let a = tokio::spawn(rotate_pair(store.clone(), pair.clone()));
            let b = tokio::spawn(rotate_pair(store.clone(), pair.clone()));
            let results = [a.await.unwrap(), b.await.unwrap()];

            let winners: Vec<&Token> = results.iter().flatten().collect();
            assert_eq!(winners.len(), 1);
            let sessions = store.find_by_user(pair.user_uid).await.unwrap();
            assert_eq!(sessions, vec![winners[0].clone()]);
            assert!(store.find_by_hash(&pair.hash).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn rotation_gives_up_when_list_keeps_changing() {
        let store = live_store().await;
        let url = std::env::var("REDIS_URL").unwrap();
        let mut side = redis::Client::open(url).unwrap().get_connection().unwrap();
        let pair = Token::issue(Uuid::new_v4());
        store.create(&pair, Duration::from_secs(60)).await.unwrap();

        let mut calls = 0;
        let mut rotate = |tokens: &[Token]| {
            calls += 1;
            // Touch the watched list between snapshot and EXEC.
            let noise = encode(&Token::issue(pair.user_uid)).unwrap();
            redis::cmd("RPUSH")
                .arg(user_key(pair.user_uid))
                .arg(noise)
                .query::<()>(&mut side)
                .unwrap();
            let index = tokens.iter().position(|t| t.hash == pair.hash)?;
            Some((index, Token::issue(pair.user_uid)))
        };
        let err = store
            .find_for_update(pair.user_uid, Duration::from_secs(60), &mut rotate)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenStoreError::Conflict(MAX_TX_RETRIES)));
        assert_eq!(calls, MAX_TX_RETRIES);
        assert!(store.find_by_hash(&pair.hash).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires REDIS_URL"]
    async fn sign_out_and_rotation_serialise() {
        let store = Arc::new(live_store().await);
        for _ in 0..20 {
            let pair = Token::issue(Uuid::new_v4());
            store.create(&pair, Duration::from_secs(60)).await.unwrap();

            let rotation = tokio::spawn(rotate_pair((*store).clone(), pair.clone()));
            let sign_out = tokio::spawn({
                let store = store.clone();
                let hash = pair.hash.clone();
                async move { store.delete_by_hash(&hash).await }
            });
            let rotated = rotation.await.unwrap();
            sign_out.await.unwrap().unwrap();

            let sessions = store.find_by_user(pair.user_uid).await.unwrap();
            assert!(store.find_by_hash(&pair.hash).await.unwrap().is_none());
            match rotated {
                // rotation committed first; sign-out then found nothing to remove
                Some(fresh) => {
                    assert_eq!(sessions, vec![fresh.clone()]);
                    assert!(store.find_by_hash(&fresh.hash).await.unwrap().is_some());
                }
                // sign-out committed first; the pair was gone for the rotation
                None => assert!(sessions.is_empty()),
            }
        }
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn empty_hash_is_rejected() {
        let store = live_store().await;
        let mut token = Token::issue(Uuid::new_v4());
        token.hash.clear();
        let err = store
            .create(&token, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenStoreError::InvalidArgument));
    }
}
