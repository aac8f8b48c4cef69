//! In-memory stand-ins for the storage and mail collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::token::Token;
use crate::auth::token_store::{
    Rotation, TokenStore, TokenStoreError, MAX_SESSIONS_PER_USER, MAX_TX_RETRIES,
};
use crate::config::AppConfig;
use crate::mail::{Letter, Mailer};
use crate::state::AppState;
use crate::users::{User, UserRepoError, UserRepository, UserStatus};

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
    fail_stamps: Mutex<bool>,
}

impl MemoryUserRepository {
    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().insert(user.uid, user);
    }

    pub fn get(&self, uid: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&uid).cloned()
    }

    pub fn by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    /// Makes `save_notified_sign_up_req_time` fail until reset.
    pub fn fail_stamps(&self, fail: bool) {
        *self.fail_stamps.lock().unwrap() = fail;
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.by_email(email))
    }

    async fn find_by_uid(&self, uid: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(uid))
    }

    async fn find_by_sign_up_req_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.sign_up_req.as_ref().is_some_and(|r| r.token == token))
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<(), UserRepoError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == user.email) {
            return Err(UserRepoError::Duplicate);
        }
        users.insert(user.uid, user.clone());
        Ok(())
    }

    async fn confirm_and_delete_sign_up_req(&self, uid: Uuid) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&uid) {
            Some(u) if u.status == UserStatus::Pending => {
                u.status = UserStatus::Confirmed;
                u.confirmed_at = Some(OffsetDateTime::now_utc());
                u.sign_up_req = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_all_not_notified_sign_up_requests(&self) -> anyhow::Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| {
                u.status == UserStatus::Pending
                    && u.sign_up_req.as_ref().is_some_and(|r| r.notified_at.is_none())
            })
            .cloned()
            .collect())
    }

    async fn save_notified_sign_up_req_time(
        &self,
        uid: Uuid,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if *self.fail_stamps.lock().unwrap() {
            anyhow::bail!("document store unavailable");
        }
        if let Some(req) = self
            .users
            .lock()
            .unwrap()
            .get_mut(&uid)
            .and_then(|u| u.sign_up_req.as_mut())
        {
            req.notified_at = Some(at);
        }
        Ok(())
    }

    async fn delete_all_pending_older_than(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|_, u| !(u.status == UserStatus::Pending && u.created_at < cutoff));
        Ok((before - users.len()) as u64)
    }
}

#[derive(Default)]
struct TokenState {
    by_hash: HashMap<String, (Token, OffsetDateTime)>,
    by_user: HashMap<Uuid, (u64, Vec<Token>)>,
}

/// Token store with versioned per-user lists; rotation commits only when
/// the version it read is still current.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<TokenState>,
}

impl MemoryTokenStore {
    /// The user's session list, newest first.
    pub fn sessions(&self, user_uid: Uuid) -> Vec<Token> {
        let state = self.state.lock().unwrap();
        state
            .by_user
            .get(&user_uid)
            .map(|(_, list)| list.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(&self, token: &Token, expiration: Duration) -> Result<(), TokenStoreError> {
        if token.hash.is_empty() || token.user_uid.is_nil() {
            return Err(TokenStoreError::InvalidArgument);
        }
        let mut state = self.state.lock().unwrap();
        let expires = OffsetDateTime::now_utc() + expiration;
        state.by_hash.insert(token.hash.clone(), (token.clone(), expires));
        let (version, list) = state.by_user.entry(token.user_uid).or_default();
        *version += 1;
        list.insert(0, token.clone());
        let evicted = list.split_off(list.len().min(MAX_SESSIONS_PER_USER));
        for old in evicted {
            state.by_hash.remove(&old.hash);
        }
        Ok(())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Token>, TokenStoreError> {
        let state = self.state.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        Ok(state
            .by_hash
            .get(hash)
            .filter(|(_, expires)| *expires > now)
            .map(|(t, _)| t.clone()))
    }

    async fn delete_by_hash(&self, hash: &str) -> Result<(), TokenStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some((token, _)) = state.by_hash.remove(hash) {
            if let Some((version, list)) = state.by_user.get_mut(&token.user_uid) {
                *version += 1;
                list.retain(|t| t.hash != hash);
            }
        }
        Ok(())
    }

    async fn find_for_update(
        &self,
        user_uid: Uuid,
        expiration: Duration,
        rotate: &mut Rotation<'_>,
    ) -> Result<Option<Token>, TokenStoreError> {
        for _ in 0..MAX_TX_RETRIES {
            let (seen, snapshot) = {
                let state = self.state.lock().unwrap();
                state.by_user.get(&user_uid).cloned().unwrap_or_default()
            };
            // Let a competing rotation interleave between read and commit.
            tokio::task::yield_now().await;

            let Some((index, replacement)) = rotate(&snapshot) else {
                return Ok(None);
            };

            let mut state = self.state.lock().unwrap();
            let current = state.by_user.get(&user_uid).map(|(v, _)| *v).unwrap_or_default();
            if current != seen {
                continue;
            }
            let previous = snapshot[index].hash.clone();
            state.by_hash.remove(&previous);
            state.by_hash.insert(
                replacement.hash.clone(),
                (replacement.clone(), OffsetDateTime::now_utc() + expiration),
            );
            let (version, list) = state.by_user.entry(user_uid).or_default();
            *version += 1;
            list[index] = replacement.clone();
            return Ok(Some(replacement));
        }
        Err(TokenStoreError::Conflict(MAX_TX_RETRIES))
    }
}

/// Records every letter; can be told to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Letter>>,
    fail: Mutex<bool>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Letter> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, letter: &Letter) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("smtp relay refused connection");
        }
        self.sent.lock().unwrap().push(letter.clone());
        Ok(())
    }
}

/// Application state wired to in-memory collaborators, with handles kept
/// for inspection.
pub struct Fixture {
    pub users: Arc<MemoryUserRepository>,
    pub tokens: Arc<MemoryTokenStore>,
    pub mailer: Arc<RecordingMailer>,
    pub state: AppState,
}

impl Fixture {
    pub fn new() -> Self {
        let users = Arc::new(MemoryUserRepository::default());
        let tokens = Arc::new(MemoryTokenStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::from_parts(
            Arc::new(AppConfig::for_tests()),
            users.clone(),
            tokens.clone(),
            mailer.clone(),
        );
        Self {
            users,
            tokens,
            mailer,
            state,
        }
    }
}
