//! Market data service. Cache-first reads over the FinMind port.

use crate::domain::risk::validate_date_range;
use crate::domain::{
    DomainError, InstitutionalFlow, MarginBalance, MarketBreadth, PriceBar, ProbeReport,
    normalize_code,
};
use crate::ports::{MarketDataPort, PriceCachePort};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarketDataService {
    market: Arc<dyn MarketDataPort>,
    cache: Arc<dyn PriceCachePort>,
}

impl MarketDataService {
    pub fn new(market: Arc<dyn MarketDataPort>, cache: Arc<dyn PriceCachePort>) -> Self {
        Self { market, cache }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    /// Daily bars, ascending. Any cached rows in range count as a hit
    /// unless `force` is set. An empty API result is `NoData`.
    pub async fn prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
    ) -> Result<Vec<PriceBar>, DomainError> {
        let code = normalize_code(symbol);
        let (start, end) = validate_date_range(start, end, Self::today());

        if !force {
            match self.cache.cached_prices(&code, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    info!(code = %code, rows = bars.len(), "prices served from cache");
                    return Ok(bars);
                }
                Ok(_) => {}
                Err(e) => warn!(code = %code, error = %e, "price cache read failed"),
            }
        }

        info!(code = %code, %start, %end, "fetching prices from FinMind");
        let bars = self.market.fetch_prices(&code, start, end).await?;
        if bars.is_empty() {
            return Err(DomainError::NoData { symbol: code });
        }
        if let Err(e) = self.cache.save_prices(&code, &bars).await {
            warn!(code = %code, error = %e, "price cache write failed");
        }
        Ok(bars)
    }

    /// Institutional flows, newest first. Same cache policy as [`Self::prices`].
    pub async fn institutional(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
    ) -> Result<Vec<InstitutionalFlow>, DomainError> {
        let code = normalize_code(symbol);
        let (start, end) = validate_date_range(start, end, Self::today());

        if !force {
            match self.cache.cached_institutional(&code, start, end).await {
                Ok(flows) if !flows.is_empty() => {
                    info!(code = %code, rows = flows.len(), "institutional flows served from cache");
                    return Ok(flows);
                }
                Ok(_) => {}
                Err(e) => warn!(code = %code, error = %e, "institutional cache read failed"),
            }
        }

        let flows = self.market.fetch_institutional(&code, start, end).await?;
        if flows.is_empty() {
            return Err(DomainError::NoData { symbol: code });
        }
        if let Err(e) = self.cache.save_institutional(&code, &flows).await {
            warn!(code = %code, error = %e, "institutional cache write failed");
        }
        Ok(flows)
    }

    /// Latest margin balance in range, if any. Not cached.
    pub async fn latest_margin(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<MarginBalance>, DomainError> {
        let code = normalize_code(symbol);
        let (start, end) = validate_date_range(start, end, Self::today());
        let mut rows = self.market.fetch_margin(&code, start, end).await?;
        Ok(rows.pop())
    }

    pub async fn breadth(&self, date: NaiveDate) -> Result<Option<MarketBreadth>, DomainError> {
        self.market.fetch_breadth(date.min(Self::today())).await
    }

    pub async fn probe(&self, symbol: &str) -> ProbeReport {
        self.market.probe(&normalize_code(symbol)).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FakeMarket, MemoryPriceCache};
    use super::*;
    use crate::domain::indicators::test_support::bars_from_closes;
    use std::sync::atomic::Ordering;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_prices_fetch_then_cache_hit() {
        let market = Arc::new(FakeMarket {
            bars: bars_from_closes(&[100.0, 101.0, 102.0]),
            ..Default::default()
        });
        let cache = Arc::new(MemoryPriceCache::default());
        let svc = MarketDataService::new(market.clone(), cache.clone());

        let first = svc
            .prices("2330.TW", d("2024-01-01"), d("2024-01-31"), false)
            .await
            .unwrap();
        let second = svc
            .prices("2330", d("2024-01-01"), d("2024-01-31"), false)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(market.price_fetches.load(Ordering::SeqCst), 1);
        assert!(cache.prices.lock().unwrap().contains_key("2330"));
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let market = Arc::new(FakeMarket {
            bars: bars_from_closes(&[100.0]),
            ..Default::default()
        });
        let svc = MarketDataService::new(market.clone(), Arc::new(MemoryPriceCache::default()));
        for _ in 0..2 {
            svc.prices("2330", d("2024-01-01"), d("2024-01-31"), true)
                .await
                .unwrap();
        }
        assert_eq!(market.price_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_api_result_is_no_data() {
        let svc = MarketDataService::new(
            Arc::new(FakeMarket::default()),
            Arc::new(MemoryPriceCache::default()),
        );
        let err = svc
            .prices("9999", d("2024-01-01"), d("2024-01-31"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NoData { symbol } if symbol == "9999"));
    }

    #[tokio::test]
    async fn test_latest_margin_is_last_row() {
        let row = |day: &str, bal: f64| MarginBalance {
            date: d(day),
            margin_purchase_balance: bal,
            short_sale_balance: 0.0,
            margin_purchase_buy: 0.0,
            margin_purchase_sell: 0.0,
            short_sale_buy: 0.0,
            short_sale_sell: 0.0,
        };
        let market = Arc::new(FakeMarket {
            margin: vec![row("2024-01-02", 10.0), row("2024-01-03", 20.0)],
            ..Default::default()
        });
        let svc = MarketDataService::new(market, Arc::new(MemoryPriceCache::default()));
        let latest = svc
            .latest_margin("2330", d("2024-01-01"), d("2024-01-31"))
            .await
            .unwrap();
        assert_eq!(latest.map(|m| m.margin_purchase_balance), Some(20.0));
    }
}
