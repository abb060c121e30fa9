use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::Serialize;

use crate::error::{LibError, Result};

/// Sessions live for 24 hours from creation, enforced lazily on use
/// and by the hourly sweep.
pub const SESSION_TTL: TimeDelta = TimeDelta::hours(24);

const TOKEN_BYTES: usize = 32;
const CREDENTIAL_LOG_PREFIX: usize = 8;

/// Compares a caller credential against the server-held API key.
///
/// A server with no key configured reports a server error, never a
/// client auth failure. Mismatches are logged with a truncated prefix
/// only; the full credential never reaches the log.
pub fn check_api_key(configured: Option<&str>, provided: Option<&str>) -> Result<()> {
    let Some(expected) = configured else {
        return Err(LibError::server_misconfigured(
            "Service is not configured for write access",
            anyhow!("api key check requested but no key is configured"),
        ));
    };

    match provided {
        None => Err(LibError::unauthorized(
            "API key required",
            anyhow!("request carried no api key"),
        )),
        Some(candidate) if candidate.as_bytes() == expected.as_bytes() => Ok(()),
        Some(candidate) => {
            tracing::warn!(
                prefix = credential_prefix(candidate),
                "rejected request with mismatched api key"
            );
            Err(LibError::forbidden(
                "Invalid API key",
                anyhow!("api key mismatch"),
            ))
        }
    }
}

fn credential_prefix(credential: &str) -> &str {
    let end = credential
        .char_indices()
        .nth(CREDENTIAL_LOG_PREFIX)
        .map_or(credential.len(), |(idx, _)| idx);
    &credential[..end]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl SessionEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= SESSION_TTL
    }
}

/// Storage seam for session state; same swap-for-external-store design
/// as the rate-limit store.
pub trait SessionStore: Send + Sync {
    fn insert(&self, token: String, entry: SessionEntry);
    /// Returns the live entry for `token`, evicting it if expired.
    fn get(&self, token: &str, now: DateTime<Utc>) -> Option<SessionEntry>;
    fn remove(&self, token: &str) -> bool;
    /// Evicts every expired entry, returning how many were dropped.
    fn sweep(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, token: String, entry: SessionEntry) {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        sessions.insert(token, entry);
    }

    fn get(&self, token: &str, now: DateTime<Utc>) -> Option<SessionEntry> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let entry = sessions.get(token)?.clone();
        if entry.expired(now) {
            sessions.remove(token);
            return None;
        }
        Some(entry)
    }

    fn remove(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        sessions.remove(token).is_some()
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(now));
        before - sessions.len()
    }
}

#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    credentials: Option<AdminCredentials>,
}

impl SessionService {
    pub fn in_memory(credentials: Option<AdminCredentials>) -> Self {
        Self::with_store(Arc::new(MemorySessionStore::default()), credentials)
    }

    pub fn with_store(
        store: Arc<dyn SessionStore>,
        credentials: Option<AdminCredentials>,
    ) -> Self {
        Self { store, credentials }
    }

    /// Validates admin credentials and mints an opaque session token.
    /// Failed attempts sleep a random 100–400 ms before responding to
    /// blunt timing side-channels.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, SessionEntry)> {
        let Some(credentials) = &self.credentials else {
            return Err(LibError::server_misconfigured(
                "Administrative login is not configured",
                anyhow!("login requested but no admin credentials are configured"),
            ));
        };

        let username_ok = username.as_bytes() == credentials.username.as_bytes();
        let password_ok = password.as_bytes() == credentials.password.as_bytes();
        if !(username_ok && password_ok) {
            let jitter_ms = OsRng.gen_range(100..=400);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            tracing::warn!(
                username = credential_prefix(username),
                "rejected admin login"
            );
            return Err(LibError::unauthorized(
                "Invalid username or password",
                anyhow!("admin credential mismatch"),
            ));
        }

        let token = mint_token();
        let entry = SessionEntry {
            username: credentials.username.clone(),
            created_at: Utc::now(),
        };
        self.store.insert(token.clone(), entry.clone());
        tracing::info!(username = %entry.username, "admin session created");
        Ok((token, entry))
    }

    pub fn verify(&self, token: &str) -> Result<SessionEntry> {
        self.store.get(token, Utc::now()).ok_or_else(|| {
            LibError::unauthorized(
                "Invalid or expired session",
                anyhow!("session token not found or past ttl"),
            )
        })
    }

    pub fn logout(&self, token: &str) -> bool {
        self.store.remove(token)
    }

    pub fn sweep(&self) -> usize {
        let dropped = self.store.sweep(Utc::now());
        if dropped > 0 {
            tracing::debug!(dropped, "swept expired sessions");
        }
        dropped
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
