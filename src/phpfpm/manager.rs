//! Concurrent fan-out over every configured pool.

use std::future::Future;
use std::time::Instant;

use thiserror::Error;

use crate::logging::SharedLogger;
use crate::phpfpm::pool::{scrape, Pool, ScrapeError, ScrapeSettings};
use crate::phpfpm::status::PoolStatus;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// One or more scrape workers died. Their pools kept their previous
    /// status and have the error recorded; every other pool completed
    /// normally.
    #[error("{count} scrape worker(s) panicked during the update cycle")]
    WorkerPanicked { count: usize },
}

/// Owns the configured pools and drives one scrape cycle at a time.
pub struct PoolManager {
    pools: Vec<Pool>,
    settings: ScrapeSettings,
    logger: SharedLogger,
}

impl PoolManager {
    pub fn new(settings: ScrapeSettings, logger: SharedLogger) -> Self {
        Self {
            pools: Vec::new(),
            settings,
            logger,
        }
    }

    /// Registers a pool. Pools are kept in the order they were added.
    pub fn add(&mut self, address: impl Into<String>) -> &Pool {
        self.pools.push(Pool::new(address));
        &self.pools[self.pools.len() - 1]
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Scrapes every pool concurrently and waits for all of them.
    ///
    /// Each worker scrapes from its own copy of the pool's address and hands
    /// back the outcome, which is applied to the pool after the join. Pools
    /// never leave the manager, so dropping this future mid-cycle only
    /// discards the outcomes not yet applied. Individual scrape failures are
    /// recorded on their pool and never fail the cycle.
    pub async fn update(&mut self) -> Result<(), ManagerError> {
        self.update_with(scrape).await
    }

    async fn update_with<F, Fut>(&mut self, scrape: F) -> Result<(), ManagerError>
    where
        F: Fn(String, ScrapeSettings, SharedLogger) -> Fut,
        Fut: Future<Output = Result<PoolStatus, ScrapeError>> + Send + 'static,
    {
        let started = Instant::now();

        let workers: Vec<_> = self
            .pools
            .iter()
            .map(|pool| {
                tokio::spawn(scrape(
                    pool.address().to_string(),
                    self.settings,
                    self.logger.clone(),
                ))
            })
            .collect();

        let mut panicked = 0;
        for (pool, handle) in self.pools.iter_mut().zip(workers) {
            match handle.await {
                Ok(outcome) => pool.apply(outcome, self.logger.as_ref()),
                Err(join_error) => {
                    panicked += 1;
                    pool.record_failure(
                        ScrapeError::WorkerPanicked(join_error.to_string()),
                        self.logger.as_ref(),
                    );
                }
            }
        }

        self.logger.debug(&format!(
            "Updated {} pool(s) in {:.3}s",
            self.pools.len(),
            started.elapsed().as_secs_f64()
        ));

        if panicked > 0 {
            Err(ManagerError::WorkerPanicked { count: panicked })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_update_with_no_pools_is_a_no_op() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        assert!(manager.update().await.is_ok());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_pools_keep_configuration_order_after_update() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        let uris = [
            "http://first/status",
            "unix:///nonexistent/php-fpm.sock;/status",
            "ftp://third/status",
        ];
        for uri in uris {
            manager.add(uri);
        }

        manager.update().await.unwrap();

        let addresses: Vec<_> = manager.pools().iter().map(|p| p.address()).collect();
        assert_eq!(addresses, uris);
        for pool in manager.pools() {
            assert_eq!(pool.failure_count(), 1);
            assert!(pool.last_error().is_some());
        }
    }

    fn pool_status(name: &str, accepted: i64) -> PoolStatus {
        PoolStatus {
            name: name.to_string(),
            accepted_connections: accepted,
            ..PoolStatus::default()
        }
    }

    #[tokio::test]
    async fn test_worker_panic_keeps_pool_and_previous_status() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        for uri in ["tcp://a/status", "tcp://b/status", "tcp://c/status"] {
            manager.add(uri);
        }

        manager
            .update_with(|_, _, _| async { Ok::<_, ScrapeError>(pool_status("www", 1)) })
            .await
            .unwrap();

        let result = manager
            .update_with(|address, _, _| async move {
                if address == "tcp://b/status" {
                    panic!("scrape worker blew up");
                }
                Ok::<_, ScrapeError>(pool_status("www", 2))
            })
            .await;

        assert!(matches!(
            result,
            Err(ManagerError::WorkerPanicked { count: 1 })
        ));
        assert_eq!(manager.len(), 3);

        let pools = manager.pools();
        assert_eq!(pools[0].status().accepted_connections, 2);
        assert_eq!(pools[2].status().accepted_connections, 2);
        assert!(pools[0].is_up() && pools[2].is_up());

        let failed = &pools[1];
        assert_eq!(failed.address(), "tcp://b/status");
        assert_eq!(failed.failure_count(), 1);
        assert_eq!(failed.name(), "www");
        assert_eq!(failed.status().accepted_connections, 1);
        assert!(matches!(
            failed.last_error(),
            Some(ScrapeError::WorkerPanicked(_))
        ));
        assert!(!failed.is_up());
    }

    #[tokio::test]
    async fn test_cancelled_update_keeps_every_pool() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        manager.add("tcp://fast/status");
        manager.add("tcp://slow/status");

        manager
            .update_with(|_, _, _| async { Ok::<_, ScrapeError>(pool_status("www", 1)) })
            .await
            .unwrap();

        let cycle = manager.update_with(|address, _, _| async move {
            if address == "tcp://slow/status" {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Ok::<_, ScrapeError>(pool_status("www", 2))
        });
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), cycle)
                .await
                .is_err()
        );

        assert_eq!(manager.len(), 2);
        for pool in manager.pools() {
            assert_eq!(pool.name(), "www");
            assert_eq!(pool.failure_count(), 0);
        }
    }

    #[test]
    fn test_add_returns_the_new_pool() {
        let mut manager = PoolManager::new(ScrapeSettings::default(), Arc::new(NullLogger));
        let pool = manager.add("tcp://127.0.0.1:9000/status");
        assert_eq!(pool.address(), "tcp://127.0.0.1:9000/status");
        assert_eq!(pool.failure_count(), 0);
        assert_eq!(manager.len(), 1);
    }
}
