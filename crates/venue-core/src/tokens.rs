//! Session access tokens

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use venue_util::{AccessToken, ClientId, SessionId};

/// What a token grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub issued_at: DateTime<Local>,
    pub expires_at: DateTime<Local>,
}

impl TokenClaims {
    pub fn is_expired(&self, now: &DateTime<Local>) -> bool {
        *now >= self.expires_at
    }
}

/// Storage for access tokens issued when sessions open
pub trait TokenStore: Send + Sync {
    /// Issue a new token for a session
    fn create(&self, session_id: SessionId, client_id: &ClientId, now: DateTime<Local>)
        -> AccessToken;

    /// Claims for a live token; expired tokens are treated as absent
    fn get(&self, token: &AccessToken, now: DateTime<Local>) -> Option<TokenClaims>;

    /// Revoke a single token. Returns whether it existed.
    fn invalidate(&self, token: &AccessToken) -> bool;

    /// Revoke every token of a session. Returns how many were removed.
    fn invalidate_session(&self, session_id: &SessionId) -> usize;

    /// Drop expired tokens. Returns how many were removed.
    fn sweep(&self, now: DateTime<Local>) -> usize;
}

/// In-process token store with a fixed time-to-live
pub struct MemoryTokenStore {
    ttl: chrono::Duration,
    tokens: Mutex<HashMap<AccessToken, TokenClaims>>,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for MemoryTokenStore {
    fn create(
        &self,
        session_id: SessionId,
        client_id: &ClientId,
        now: DateTime<Local>,
    ) -> AccessToken {
        let token = AccessToken::generate();
        let claims = TokenClaims {
            session_id,
            client_id: client_id.clone(),
            issued_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(now),
        };

        self.tokens.lock().unwrap().insert(token.clone(), claims);
        debug!(session_id = %session_id, "Access token issued");
        token
    }

    fn get(&self, token: &AccessToken, now: DateTime<Local>) -> Option<TokenClaims> {
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get(token) {
            Some(claims) if claims.is_expired(&now) => {
                tokens.remove(token);
                None
            }
            Some(claims) => Some(claims.clone()),
            None => None,
        }
    }

    fn invalidate(&self, token: &AccessToken) -> bool {
        self.tokens.lock().unwrap().remove(token).is_some()
    }

    fn invalidate_session(&self, session_id: &SessionId) -> usize {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, claims| claims.session_id != *session_id);
        before - tokens.len()
    }

    fn sweep(&self, now: DateTime<Local>) -> usize {
        let mut tokens = self.tokens.lock().unwrap();
        let before = tokens.len();
        tokens.retain(|_, claims| !claims.is_expired(&now));
        let removed = before - tokens.len();
        if removed > 0 {
            debug!(removed, "Expired access tokens swept");
        }
        removed
    }
}
