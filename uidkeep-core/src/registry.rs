use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::mirror::{Mirror, MirrorAction, MirrorStats};
use crate::record::{Lifetime, Policy, Record, Remaining};
use crate::store::RecordStore;

/// Operations offered to the HTTP layer.
///
/// Each call changes the local store first and mirrors the change upstream
/// afterwards; the mirror never affects the result.
#[derive(Clone)]
pub struct Registry {
    store: RecordStore,
    mirror: Mirror,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(store: RecordStore, mirror: Mirror, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            mirror,
            clock,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Adds or replaces `uid` and grants it upstream.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPolicy` if the lifetime cannot be resolved,
    /// `Error::Storage` if the store cannot be updated.
    pub async fn add_record(&self, uid: &str, lifetime: Lifetime) -> Result<Policy> {
        let policy = lifetime.resolve(self.clock.now())?;
        self.store.upsert(uid, policy).await?;
        tracing::info!("Added UID {} ({})", uid, policy);

        self.mirror.notify(MirrorAction::Add, uid).await;
        Ok(policy)
    }

    /// Removes `uid` and revokes it upstream.
    ///
    /// # Errors
    ///
    /// `Error::RecordNotFound` if the UID is not stored; the store is left
    /// untouched in that case.
    pub async fn remove_record(&self, uid: &str) -> Result<()> {
        if !self.store.remove(uid).await? {
            return Err(Error::RecordNotFound(uid.to_string()));
        }
        tracing::info!("Removed UID {}", uid);

        self.mirror.notify(MirrorAction::Remove, uid).await;
        Ok(())
    }

    /// Reports how long `uid` has left.
    ///
    /// A record past its expiration that the sweep has not reached yet is
    /// `Error::Expired`.
    pub async fn query_remaining(&self, uid: &str) -> Result<Remaining> {
        let raw = self
            .store
            .get(uid)
            .await?
            .ok_or_else(|| Error::RecordNotFound(uid.to_string()))?;

        let policy = Policy::parse(&raw).ok_or_else(|| Error::MalformedRecord {
            uid: uid.to_string(),
            value: raw.clone(),
        })?;

        match policy {
            Policy::Permanent => Ok(Remaining::Permanent),
            Policy::ExpiresAt(expires_at) => {
                let now = self.clock.now();
                if policy.is_expired_at(now) {
                    return Err(Error::Expired(uid.to_string()));
                }
                Ok(Remaining::Expires {
                    expires_at,
                    remaining: expires_at - now,
                })
            }
        }
    }

    /// All readable records, in key order. Unreadable ones are logged and
    /// left out.
    pub async fn list_records(&self) -> Result<Vec<Record>> {
        let records = self.store.load().await?;
        Ok(records
            .into_iter()
            .filter_map(|(uid, raw)| match Policy::parse(&raw) {
                Some(policy) => Some(Record { uid, policy }),
                None => {
                    tracing::warn!("UID {} holds unreadable policy {:?}", uid, raw);
                    None
                }
            })
            .collect())
    }

    pub fn mirror_stats(&self) -> MirrorStats {
        self.mirror.stats()
    }
}
