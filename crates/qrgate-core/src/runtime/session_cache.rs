// crates/qrgate-core/src/runtime/session_cache.rs
// ============================================================================
// Module: Session Cache
// Description: Concurrent TTL-bounded cache from API key to resolved session.
// Purpose: Avoid a backend round trip per request while bounding staleness.
// Dependencies: crate::core, crate::runtime::shards, thiserror
// ============================================================================

//! ## Overview
//! Sessions are stored in lock-striped shards keyed by the raw API key.
//! [`SessionCache::get`] only returns sessions inside their TTL; expired
//! entries stay behind as last-known-good until the retention horizon so
//! fail-open grace can reuse them through [`SessionCache::get_stale`].
//!
//! Each shard carries a generation that every invalidation and tier update
//! bumps, cached or not. A validation captures the generation before it calls
//! the backend and [`SessionCache::put_if_current`] refuses to store its
//! result once the generation moved, so a key revoked while its validation
//! was in flight is never re-cached.
//!
//! Security posture: every webhook mutation and every decision read goes
//! through the same shard lock, so a tier change is never observed half
//! applied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use thiserror::Error;

use crate::core::ApiKeySession;
use crate::core::Identity;
use crate::core::Tier;
use crate::core::Timestamp;
use crate::runtime::shards::DEFAULT_SHARD_COUNT;
use crate::runtime::shards::Shards;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Session cache failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionCacheError {
    /// Cache is at capacity after a sweep.
    #[error("session cache full: {0} entries")]
    Capacity(usize),
    /// A shard lock was poisoned.
    #[error("session cache lock poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Stored session plus its lock-free hit timestamp.
struct CachedSession {
    /// Session snapshot; mutated only under the shard write lock.
    session: ApiKeySession,
    /// Most recent hit in unix milliseconds.
    last_used_ms: AtomicI64,
}

impl CachedSession {
    /// Wraps a session.
    fn new(session: ApiKeySession) -> Self {
        let last_used_ms = AtomicI64::new(session.last_used_at.as_unix_millis());
        Self {
            session,
            last_used_ms,
        }
    }

    /// Returns a copy of the session with the current hit timestamp.
    fn snapshot(&self) -> ApiKeySession {
        let mut session = self.session.clone();
        session.last_used_at = Timestamp::from_unix_millis(self.last_used_ms.load(Ordering::Acquire));
        session
    }
}

/// Sessions of one shard plus its mutation generation.
#[derive(Default)]
struct ShardMap {
    /// Stored sessions.
    sessions: HashMap<String, CachedSession>,
    /// Bumped by every webhook-driven mutation routed to this shard.
    generation: u64,
}

impl ShardMap {
    /// Marks an external mutation.
    const fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Shard lock type.
type Shard = RwLock<ShardMap>;

/// Concurrent session cache.
///
/// # Invariants
/// - `get` never returns a session past `validated_at + ttl`.
/// - Entries are retained at most `retention` past `validated_at` (or their TTL when longer).
pub struct SessionCache {
    /// Lock-striped storage.
    shards: Shards<Shard>,
    /// Last-known-good retention horizon.
    retention: Duration,
}

impl SessionCache {
    /// Builds a cache bounded to `max_entries` that keeps expired sessions
    /// until `retention` has passed since validation.
    #[must_use]
    pub fn new(max_entries: usize, retention: Duration) -> Self {
        Self {
            shards: Shards::new(DEFAULT_SHARD_COUNT, max_entries, || RwLock::new(ShardMap::default())),
            retention,
        }
    }

    /// Returns the fresh session for `api_key`, recording the hit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn get(
        &self,
        api_key: &str,
        now: Timestamp,
    ) -> Result<Option<ApiKeySession>, SessionCacheError> {
        let shard = self.shards.for_key(api_key).read().map_err(|_| SessionCacheError::Poisoned)?;
        let Some(entry) = shard.sessions.get(api_key) else {
            return Ok(None);
        };
        if !entry.session.is_fresh(now) {
            return Ok(None);
        }
        entry.last_used_ms.fetch_max(now.as_unix_millis(), Ordering::AcqRel);
        Ok(Some(entry.snapshot()))
    }

    /// Returns the session for `api_key` regardless of TTL while its
    /// `validated_at` is within `grace`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn get_stale(
        &self,
        api_key: &str,
        now: Timestamp,
        grace: Duration,
    ) -> Result<Option<ApiKeySession>, SessionCacheError> {
        let shard = self.shards.for_key(api_key).read().map_err(|_| SessionCacheError::Poisoned)?;
        Ok(shard
            .sessions
            .get(api_key)
            .filter(|entry| entry.session.within_grace(now, grace))
            .map(CachedSession::snapshot))
    }

    /// Returns the mutation generation of the shard owning `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn generation(&self, api_key: &str) -> Result<u64, SessionCacheError> {
        let shard = self.shards.for_key(api_key).read().map_err(|_| SessionCacheError::Poisoned)?;
        Ok(shard.generation)
    }

    /// Stores a freshly validated session for `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Capacity`] when the cache stays full after
    /// a sweep, or [`SessionCacheError::Poisoned`] on lock poisoning.
    pub fn put(
        &self,
        api_key: &str,
        identity: Identity,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<ApiKeySession, SessionCacheError> {
        let session = ApiKeySession::new(api_key, identity, now, ttl);
        self.insert(api_key, &session, None, now)?;
        Ok(session)
    }

    /// Stores a session validated while the shard was at `generation`.
    ///
    /// Returns `Ok(None)` without storing anything when the key's shard was
    /// invalidated or had a tier pushed since `generation` was read.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Capacity`] when the cache stays full after
    /// a sweep, or [`SessionCacheError::Poisoned`] on lock poisoning.
    pub fn put_if_current(
        &self,
        api_key: &str,
        identity: Identity,
        ttl: Duration,
        now: Timestamp,
        generation: u64,
    ) -> Result<Option<ApiKeySession>, SessionCacheError> {
        let session = ApiKeySession::new(api_key, identity, now, ttl);
        let stored = self.insert(api_key, &session, Some(generation), now)?;
        Ok(stored.then_some(session))
    }

    /// Inserts `session` unless the shard moved past `expected`; returns
    /// whether it was stored.
    fn insert(
        &self,
        api_key: &str,
        session: &ApiKeySession,
        expected: Option<u64>,
        now: Timestamp,
    ) -> Result<bool, SessionCacheError> {
        for attempt in 0 .. 2 {
            {
                let mut shard =
                    self.shards.for_key(api_key).write().map_err(|_| SessionCacheError::Poisoned)?;
                if expected.is_some_and(|generation| generation != shard.generation) {
                    return Ok(false);
                }
                if let Some(existing) = shard.sessions.get_mut(api_key) {
                    *existing = CachedSession::new(session.clone());
                    return Ok(true);
                }
                if self.shards.reserve() {
                    shard.sessions.insert(api_key.to_string(), CachedSession::new(session.clone()));
                    return Ok(true);
                }
            }
            if attempt == 0 {
                self.sweep(now)?;
            }
        }
        Err(SessionCacheError::Capacity(self.shards.capacity()))
    }

    /// Removes every cached state for `api_key`, returning whether one existed.
    ///
    /// Bumps the shard generation even when nothing was cached.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn invalidate(&self, api_key: &str) -> Result<bool, SessionCacheError> {
        let mut shard =
            self.shards.for_key(api_key).write().map_err(|_| SessionCacheError::Poisoned)?;
        shard.bump();
        let removed = shard.sessions.remove(api_key).is_some();
        if removed {
            self.shards.release(1);
        }
        Ok(removed)
    }

    /// Drops the entry for `api_key` without bumping the generation.
    ///
    /// Used when the backend itself reports the key invalid.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn evict(&self, api_key: &str) -> Result<bool, SessionCacheError> {
        let mut shard =
            self.shards.for_key(api_key).write().map_err(|_| SessionCacheError::Poisoned)?;
        let removed = shard.sessions.remove(api_key).is_some();
        if removed {
            self.shards.release(1);
        }
        Ok(removed)
    }

    /// Replaces the tier of a cached session, returning whether one existed.
    ///
    /// The tier and its assignment time change under one write lock. Bumps
    /// the shard generation even when nothing was cached, so a validation in
    /// flight cannot store the tier it read before the update.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when the shard lock is poisoned.
    pub fn update_tier(
        &self,
        api_key: &str,
        tier: Tier,
        now: Timestamp,
    ) -> Result<bool, SessionCacheError> {
        let mut shard =
            self.shards.for_key(api_key).write().map_err(|_| SessionCacheError::Poisoned)?;
        shard.bump();
        let Some(entry) = shard.sessions.get_mut(api_key) else {
            return Ok(false);
        };
        entry.session.tier = tier;
        entry.session.tier_assigned_at = now;
        Ok(true)
    }

    /// Drops entries past both their TTL and the retention horizon.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCacheError::Poisoned`] when a shard lock is poisoned.
    pub fn sweep(&self, now: Timestamp) -> Result<usize, SessionCacheError> {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write().map_err(|_| SessionCacheError::Poisoned)?;
            let before = shard.sessions.len();
            shard.sessions.retain(|_, entry| {
                let horizon = entry.session.ttl.max(self.retention);
                entry.session.within_grace(now, horizon)
            });
            removed += before - shard.sessions.len();
        }
        self.shards.release(removed);
        Ok(removed)
    }

    /// Returns the number of stored entries, including last-known-good ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
