use crate::connector::{ArtifactSnapshot, ArtifactStore};
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Create/inspect/takeover rounds before giving up on a contended lease.
const CLAIM_ATTEMPTS: usize = 3;

/// Contents of the marker object that claims the artifact for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub run_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        older_than(self.claimed_at, ttl, now)
    }
}

fn older_than(since: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| since.checked_add_signed(ttl))
        .is_some_and(|deadline| deadline <= now)
}

pub enum Claim {
    Acquired(Lease),
    /// Another run holds a live lease. `None` when its marker does not parse.
    Held(Option<LeaseRecord>),
}

/// Claims `key` with a create-if-absent marker so overlapping runs cannot
/// both process the same artifact.
///
/// A stale marker is removed with a conditional delete against the revision
/// that was inspected, so a marker another run wrote in the meantime is never
/// removed by mistake.
pub struct LeaseManager {
    store: Arc<dyn ArtifactStore>,
    key: String,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn ArtifactStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    pub async fn claim(&self, run_id: Uuid) -> Result<Claim> {
        self.claim_at(run_id, Utc::now()).await
    }

    pub async fn claim_at(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<Claim> {
        let record = LeaseRecord {
            run_id,
            claimed_at: now,
        };
        let payload = Bytes::from(serde_json::to_vec(&record)?);

        for _ in 0..CLAIM_ATTEMPTS {
            if let Some(revision) = self.store.create_exclusive(&self.key, payload.clone()).await? {
                return Ok(Claim::Acquired(self.lease(record, revision)));
            }

            let Some(current) = self.store.read(&self.key).await? else {
                // released between the create and the read
                continue;
            };
            let holder = parse(&current);
            match &holder {
                Some(holder) if !holder.expired(self.ttl, now) => {
                    return Ok(Claim::Held(Some(holder.clone())))
                }
                Some(holder) => warn!(
                    key = %self.key,
                    stale_run = %holder.run_id,
                    claimed_at = %holder.claimed_at,
                    "Taking over expired lease"
                ),
                None if !self.marker_stale(&current, now) => return Ok(Claim::Held(None)),
                None => warn!(key = %self.key, "Replacing unreadable lease"),
            }

            if !self.store.delete_if_match(&self.key, &current.revision).await? {
                debug!(key = %self.key, "Lease changed during takeover");
            }
        }

        // lost every round; report whoever holds it now
        let holder = self.store.read(&self.key).await?.and_then(|s| parse(&s));
        Ok(Claim::Held(holder))
    }

    /// An unparsable marker only counts as abandoned once its own age passes
    /// the TTL. Without a modification time it is left alone.
    fn marker_stale(&self, snapshot: &ArtifactSnapshot, now: DateTime<Utc>) -> bool {
        snapshot
            .modified_at
            .is_some_and(|modified| older_than(modified, self.ttl, now))
    }

    fn lease(&self, record: LeaseRecord, revision: String) -> Lease {
        info!(key = %self.key, run_id = %record.run_id, "Lease acquired");
        Lease {
            store: self.store.clone(),
            key: self.key.clone(),
            record,
            revision,
        }
    }
}

fn parse(snapshot: &ArtifactSnapshot) -> Option<LeaseRecord> {
    serde_json::from_slice(&snapshot.bytes).ok()
}

/// A held claim. Must be released explicitly once the run ends.
pub struct Lease {
    store: Arc<dyn ArtifactStore>,
    key: String,
    record: LeaseRecord,
    revision: String,
}

impl Lease {
    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    /// Removes the marker if it is still the one this run wrote. Failure to
    /// release is logged only; the lease then expires after its TTL.
    pub async fn release(self) {
        match self.store.delete_if_match(&self.key, &self.revision).await {
            Ok(true) => info!(key = %self.key, run_id = %self.record.run_id, "Lease released"),
            Ok(false) => warn!(
                key = %self.key,
                run_id = %self.record.run_id,
                "Lease was taken over by another run; leaving its marker"
            ),
            Err(e) => warn!(
                key = %self.key,
                error = %e,
                "Failed to release lease; it will expire on its own"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryArtifactStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const KEY: &str = "novas_avaliacoes.csv.lease";
    const TTL: Duration = Duration::from_secs(60);

    fn manager(store: &Arc<MemoryArtifactStore>) -> LeaseManager {
        LeaseManager::new(store.clone(), KEY, TTL)
    }

    fn acquired(claim: Claim) -> Lease {
        match claim {
            Claim::Acquired(lease) => lease,
            Claim::Held(holder) => panic!("lease should be free, held by {:?}", holder),
        }
    }

    fn held(claim: Claim) -> Option<LeaseRecord> {
        match claim {
            Claim::Held(holder) => holder,
            Claim::Acquired(lease) => panic!("{} must not acquire", lease.record().run_id),
        }
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let store = Arc::new(MemoryArtifactStore::new());
        let run_id = Uuid::new_v4();

        let lease = acquired(manager(&store).claim(run_id).await.unwrap());
        assert_eq!(lease.record().run_id, run_id);
        assert!(store.get(KEY).is_some());

        lease.release().await;
        assert!(store.get(KEY).is_none());
    }

    #[tokio::test]
    async fn test_live_lease_is_held() {
        let store = Arc::new(MemoryArtifactStore::new());
        let first = Uuid::new_v4();
        let now = Utc::now();

        let _lease = manager(&store).claim_at(first, now).await.unwrap();
        let holder = held(
            manager(&store)
                .claim_at(Uuid::new_v4(), now + chrono::Duration::seconds(30))
                .await
                .unwrap(),
        );
        assert_eq!(holder.map(|h| h.run_id), Some(first));
    }

    #[tokio::test]
    async fn test_expired_lease_taken_over() {
        let store = Arc::new(MemoryArtifactStore::new());
        let now = Utc::now();
        manager(&store).claim_at(Uuid::new_v4(), now).await.unwrap();

        let second = Uuid::new_v4();
        let lease = acquired(
            manager(&store)
                .claim_at(second, now + chrono::Duration::seconds(61))
                .await
                .unwrap(),
        );
        assert_eq!(lease.record().run_id, second);
    }

    #[tokio::test]
    async fn test_release_after_takeover_keeps_new_holder() {
        let store = Arc::new(MemoryArtifactStore::new());
        let now = Utc::now();
        let first = acquired(manager(&store).claim_at(Uuid::new_v4(), now).await.unwrap());

        let second = Uuid::new_v4();
        acquired(
            manager(&store)
                .claim_at(second, now + chrono::Duration::seconds(61))
                .await
                .unwrap(),
        );

        first.release().await;
        let marker: LeaseRecord = serde_json::from_slice(&store.get(KEY).unwrap()).unwrap();
        assert_eq!(marker.run_id, second);
    }

    #[tokio::test]
    async fn test_fresh_garbage_lease_is_held() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert(KEY, "");

        assert!(held(manager(&store).claim(Uuid::new_v4()).await.unwrap()).is_none());
        assert_eq!(store.get(KEY).unwrap(), "");
    }

    #[tokio::test]
    async fn test_old_garbage_lease_replaced() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert_at(KEY, "not json", Utc::now() - chrono::Duration::hours(1));

        acquired(manager(&store).claim(Uuid::new_v4()).await.unwrap());
    }

    /// Lets a rival run complete a whole claim right after the first read of
    /// the marker, before the caller acts on what it read.
    struct RivalStore {
        inner: Arc<MemoryArtifactStore>,
        rival: Mutex<Option<(Uuid, DateTime<Utc>)>>,
        rival_claim: Mutex<Option<Claim>>,
    }

    #[async_trait]
    impl ArtifactStore for RivalStore {
        fn describe(&self, key: &str) -> String {
            self.inner.describe(key)
        }

        async fn stat(&self, key: &str) -> Result<Option<u64>> {
            self.inner.stat(key).await
        }

        async fn read(&self, key: &str) -> Result<Option<ArtifactSnapshot>> {
            let snapshot = self.inner.read(key).await?;
            let rival = self.rival.lock().unwrap().take();
            if let Some((run_id, now)) = rival {
                let claim = LeaseManager::new(self.inner.clone(), key, TTL)
                    .claim_at(run_id, now)
                    .await?;
                *self.rival_claim.lock().unwrap() = Some(claim);
            }
            Ok(snapshot)
        }

        async fn create_exclusive(&self, key: &str, bytes: Bytes) -> Result<Option<String>> {
            self.inner.create_exclusive(key, bytes).await
        }

        async fn delete_if_match(&self, key: &str, revision: &str) -> Result<bool> {
            self.inner.delete_if_match(key, revision).await
        }
    }

    #[tokio::test]
    async fn test_interleaved_takeovers_leave_one_holder() {
        let inner = Arc::new(MemoryArtifactStore::new());
        let now = Utc::now();
        let stale = LeaseRecord {
            run_id: Uuid::new_v4(),
            claimed_at: now - chrono::Duration::hours(2),
        };
        inner.insert(KEY, serde_json::to_vec(&stale).unwrap());

        let rival_id = Uuid::new_v4();
        let store = Arc::new(RivalStore {
            inner: inner.clone(),
            rival: Mutex::new(Some((rival_id, now))),
            rival_claim: Mutex::new(None),
        });

        let ours = LeaseManager::new(store.clone(), KEY, TTL)
            .claim_at(Uuid::new_v4(), now)
            .await
            .unwrap();

        let rival = store.rival_claim.lock().unwrap().take().unwrap();
        assert_eq!(acquired(rival).record().run_id, rival_id);
        assert_eq!(held(ours).map(|h| h.run_id), Some(rival_id));
        let marker: LeaseRecord = serde_json::from_slice(&inner.get(KEY).unwrap()).unwrap();
        assert_eq!(marker.run_id, rival_id);
    }
}
