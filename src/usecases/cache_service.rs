//! Cache maintenance: stats, query history, cleanup.

use crate::domain::{CacheStats, CleanupCounts, DomainError, QueryStat};
use crate::ports::QueryLogPort;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_QUERY_STATS_DAYS: u32 = 30;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

pub struct CacheService {
    log: Arc<dyn QueryLogPort>,
}

impl CacheService {
    pub fn new(log: Arc<dyn QueryLogPort>) -> Self {
        Self { log }
    }

    pub async fn stats(&self) -> Result<CacheStats, DomainError> {
        self.log.stats().await
    }

    /// Queries over the last `days`, most frequent first.
    pub async fn query_stats(&self, days: u32) -> Result<Vec<QueryStat>, DomainError> {
        self.log.query_stats(days).await
    }

    /// Drop data older than `days` and expired news.
    pub async fn cleanup(&self, days: u32) -> Result<CleanupCounts, DomainError> {
        info!(days, "cleaning cache");
        self.log.cleanup(days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::SqliteCache;
    use crate::domain::indicators::test_support::bars_from_closes;
    use crate::ports::PriceCachePort;

    #[tokio::test]
    async fn test_stats_and_query_stats_over_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SqliteCache::connect(dir.path()).await.unwrap());
        cache
            .save_prices("2330", &bars_from_closes(&[100.0, 101.0]))
            .await
            .unwrap();
        cache.log_query("2330", "analysis").await.unwrap();
        cache.log_query("2330", "analysis").await.unwrap();
        cache.log_query("2317", "analysis").await.unwrap();

        let svc = CacheService::new(cache);
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.stock_prices, 2);
        assert_eq!(stats.query_logs, 3);

        let top = svc.query_stats(30).await.unwrap();
        assert_eq!(top[0].symbol, "2330");
        assert_eq!(top[0].count, 2);
        assert_eq!(top, svc.query_stats(DEFAULT_QUERY_STATS_DAYS).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_retention_keeps_two_month_old_prices() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SqliteCache::connect(dir.path()).await.unwrap());
        let today = chrono::Local::now().date_naive();
        let mut bars = bars_from_closes(&[100.0, 101.0]);
        bars[0].date = today - chrono::Days::new(60);
        bars[1].date = today - chrono::Days::new(120);
        cache.save_prices("2330", &bars).await.unwrap();

        let svc = CacheService::new(cache);
        let counts = svc.cleanup(DEFAULT_RETENTION_DAYS).await.unwrap();

        assert_eq!(counts.stock_prices, 1);
        assert_eq!(svc.stats().await.unwrap().stock_prices, 1);
    }
}
