//! Process-local balance cache
//!
//! Entries expire after a fixed TTL. The ledger invalidates on every
//! mutation it makes through this process; the TTL bounds staleness from
//! writes made by other processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use core_kernel::{DomainPort, OrganizationId, PortError};
use domain_ledger::{BalanceCache, BalanceView};

/// `BalanceCache` held in process memory
#[derive(Debug)]
pub struct LocalBalanceCache {
    ttl: Duration,
    entries: RwLock<HashMap<OrganizationId, (Instant, BalanceView)>>,
}

impl LocalBalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl DomainPort for LocalBalanceCache {}

#[async_trait]
impl BalanceCache for LocalBalanceCache {
    async fn get(&self, organization: OrganizationId) -> Result<Option<BalanceView>, PortError> {
        let entries = self.entries.read().await;
        match entries.get(&organization) {
            Some((stored, view)) if stored.elapsed() < self.ttl => Ok(Some(view.clone())),
            Some(_) => {
                debug!(%organization, "cached balance expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, view: &BalanceView) -> Result<(), PortError> {
        self.entries
            .write()
            .await
            .insert(view.organization_id, (Instant::now(), view.clone()));
        Ok(())
    }

    async fn invalidate(&self, organization: OrganizationId) -> Result<(), PortError> {
        self.entries.write().await.remove(&organization);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(org: i64, committed: i64) -> BalanceView {
        BalanceView::new(OrganizationId::new(org), committed, 0)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = LocalBalanceCache::new(Duration::from_secs(60));
        cache.put(&view(1, 100)).await.unwrap();

        let cached = cache.get(OrganizationId::new(1)).await.unwrap().unwrap();
        assert_eq!(cached.committed_units, 100);
        assert!(cache.get(OrganizationId::new(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = LocalBalanceCache::new(Duration::ZERO);
        cache.put(&view(1, 100)).await.unwrap();
        assert!(cache.get(OrganizationId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = LocalBalanceCache::new(Duration::from_secs(60));
        cache.put(&view(1, 100)).await.unwrap();
        cache.invalidate(OrganizationId::new(1)).await.unwrap();
        assert!(cache.is_empty().await);
    }
}
