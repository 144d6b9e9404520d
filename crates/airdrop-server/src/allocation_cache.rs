use actix::{Actor, Arbiter, AsyncContext};
use airdrop_lib::AllocationSet;
use db::AllocationSource;
use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

/// The current allocation table. Readers get a whole snapshot; a refresh
/// builds the next table before swapping it in.
pub struct AllocationCache {
    source: AllocationSource,
    current: RwLock<Arc<AllocationSet>>,
}

impl AllocationCache {
    pub fn new(source: AllocationSource, initial: AllocationSet) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn load(source: AllocationSource) -> db::Result<Self> {
        let initial = source.load()?;
        Ok(Self::new(source, initial))
    }

    pub fn source(&self) -> &AllocationSource {
        &self.source
    }

    pub fn snapshot(&self) -> Arc<AllocationSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reload from disk. On error the previous table stays in place.
    pub fn refresh(&self) -> db::Result<Arc<AllocationSet>> {
        let next = Arc::new(self.source.load()?);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();
        Ok(next)
    }
}

/// Periodically refreshes an [`AllocationCache`].
pub struct AllocationRefresher {
    cache: Arc<AllocationCache>,
    interval: Duration,
}

impl AllocationRefresher {
    pub fn start(cache: Arc<AllocationCache>, interval: Duration) -> actix::Addr<Self> {
        let arbiter = Arbiter::new();
        Self::start_in_arbiter(&arbiter.handle(), move |_| Self { cache, interval })
    }
}

impl Actor for AllocationRefresher {
    type Context = actix::Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("refreshing allocations every {:?}", self.interval);
        ctx.run_interval(self.interval, |act, _| match act.cache.refresh() {
            Ok(set) => tracing::debug!("refreshed {} allocations", set.len()),
            Err(error) => tracing::error!("failed to refresh allocations: {}", error),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airdrop_lib::PoolConfig;
    use db::StorageConfig;

    #[test]
    fn test_refresh_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            recipients: dir.path().join("recipients.json"),
            allocations: None,
            claims: dir.path().join("claims.json"),
        };
        std::fs::write(&storage.recipients, r#"[{"wallet":"A"}]"#).unwrap();
        let pool = PoolConfig {
            total_supply: 100,
            airdrop_percent: 100,
            referral_bps: 0,
        };
        let cache = AllocationCache::load(AllocationSource::new(&storage, pool)).unwrap();

        let before = cache.snapshot();
        assert_eq!(before.get("A").unwrap().net_amount, 100);

        std::fs::write(&storage.recipients, r#"[{"wallet":"A"},{"wallet":"B"}]"#).unwrap();
        cache.refresh().unwrap();
        let after = cache.snapshot();
        assert_eq!(after.get("B").unwrap().net_amount, 50);
        // a reader holding the old snapshot still sees a complete table
        assert_eq!(before.get("A").unwrap().net_amount, 100);
        assert!(before.get("B").is_none());

        std::fs::write(&storage.recipients, b"not json").unwrap();
        assert!(cache.refresh().is_err());
        assert_eq!(*cache.snapshot(), *after);
    }
}
