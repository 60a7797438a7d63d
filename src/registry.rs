//! Token registry: metadata for every minted bearer token.
//!
//! Records are indexed by the SHA-256 of the token (the raw value is never
//! kept) and by record id. The registry is also the [`RevocationCheck`] the
//! middleware consults: deleting a record revokes the token even though its
//! signature stays valid.
//!
//! The record's own `expires_at` is checked here as well as in the token
//! codec. Both checks stay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::auth::{RevocationCheck, RevocationError};
use crate::token::{TOKEN_HASH_LEN, hash_token};

/// SHA-256 of a bearer token.
pub type TokenHash = [u8; TOKEN_HASH_LEN];

/// Stored metadata for one minted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRecord {
    /// Record id (`tok_...`).
    pub id: String,
    /// CN the token was minted for.
    #[serde(rename = "user_cn")]
    pub owner_cn: String,
    /// Caller-chosen label.
    pub name: String,
    /// SHA-256 of the bearer value.
    #[serde(skip)]
    pub token_hash: TokenHash,
    /// Mint time.
    pub created_at: DateTime<Utc>,
    /// Expiry (mirrors the token's `exp`).
    pub expires_at: DateTime<Utc>,
    /// Last successful revocation check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// `true` once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory registry backed by two `DashMap` indices.
///
/// - `by_hash`: token hash → record   (O(1) revocation check)
/// - `by_id`:   record id  → hash     (O(1) delete)
#[derive(Debug, Default)]
pub struct TokenRegistry {
    by_hash: DashMap<TokenHash, TokenRecord>,
    by_id: DashMap<String, TokenHash>,
}

impl TokenRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any record with the same id or hash.
    pub fn insert(&self, record: TokenRecord) {
        if let Some(old_hash) = self.by_id.insert(record.id.clone(), record.token_hash) {
            if old_hash != record.token_hash {
                self.by_hash.remove(&old_hash);
            }
        }
        self.by_hash.insert(record.token_hash, record);
    }

    /// Records owned by `owner_cn`, newest first.
    #[must_use]
    pub fn list_for(&self, owner_cn: &str) -> Vec<TokenRecord> {
        let mut records: Vec<TokenRecord> = self
            .by_hash
            .iter()
            .filter(|e| e.value().owner_cn == owner_cn)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Record by id, regardless of owner.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TokenRecord> {
        let hash = *self.by_id.get(id)?;
        self.by_hash.get(&hash).map(|e| e.value().clone())
    }

    /// Delete `id` if it belongs to `owner_cn`.
    ///
    /// Returns `false` when the id is unknown or owned by someone else.
    pub fn delete(&self, id: &str, owner_cn: &str) -> bool {
        let Some(hash) = self.by_id.get(id).map(|e| *e.value()) else {
            return false;
        };

        let removed = self
            .by_hash
            .remove_if(&hash, |_, record| record.owner_cn == owner_cn)
            .is_some();
        if removed {
            self.by_id.remove(id);
            debug!(token_id = %id, "Deleted token record");
        }
        removed
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// `true` when no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Look `raw_token` up, stamp `last_used_at`, and return its id.
    pub fn check_at(&self, raw_token: &str, now: DateTime<Utc>) -> Result<String, RevocationError> {
        let hash = hash_token(raw_token);

        let expired_id = {
            let Some(mut entry) = self.by_hash.get_mut(&hash) else {
                return Err(RevocationError::NotFound);
            };
            if !entry.is_expired_at(now) {
                entry.last_used_at = Some(now);
                return Ok(entry.id.clone());
            }
            entry.id.clone()
        };

        // Lazy eviction; the shard guard above is already released.
        self.by_hash.remove(&hash);
        self.by_id.remove(&expired_id);
        debug!(token_id = %expired_id, "Lazy-evicted expired token record");
        Err(RevocationError::Expired)
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(TokenHash, String)> = self
            .by_hash
            .iter()
            .filter(|e| e.value().is_expired_at(now))
            .map(|e| (*e.key(), e.value().id.clone()))
            .collect();

        let count = expired.len();
        for (hash, id) in expired {
            self.by_hash.remove(&hash);
            self.by_id.remove(&id);
            debug!(token_id = %id, "Reaped expired token record");
        }
        count
    }
}

#[async_trait]
impl RevocationCheck for TokenRegistry {
    async fn check(&self, raw_token: &str) -> Result<String, RevocationError> {
        self.check_at(raw_token, Utc::now())
    }
}

/// Spawn a background task that reaps expired records every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    registry: Arc<TokenRegistry>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = registry.reap_expired(Utc::now());
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired token records");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Token reaper shutting down");
                    break;
                }
            }
        }
    });
}
