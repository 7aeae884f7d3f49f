//! SQLite-backed market data cache via libsql.
//!
//! One database file (`stock_data.db`) holds daily prices, institutional
//! flows, summarized news with expiry, and a query log. Prices and flows are
//! keyed by (symbol, date) and upserted. Timestamps are Unix seconds.

use crate::domain::{
    CacheStats, CachedNews, CleanupCounts, DomainError, InstitutionalFlow, PriceBar, QueryStat,
};
use crate::ports::{NewsCachePort, PriceCachePort, QueryLogPort};
use chrono::NaiveDate;
use libsql::{Connection, Database, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DB_FILE: &str = "stock_data.db";
const DATE_FMT: &str = "%Y-%m-%d";

const STOCK_PRICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stock_prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    amount REAL,
    change REAL,
    turnover REAL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
)"#;

const INSTITUTIONAL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS institutional_trades (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    foreign_investor REAL NOT NULL DEFAULT 0,
    investment_trust REAL NOT NULL DEFAULT 0,
    dealer_self REAL NOT NULL DEFAULT 0,
    dealer_hedging REAL NOT NULL DEFAULT 0,
    dealer_total REAL NOT NULL DEFAULT 0,
    total REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
)"#;

const NEWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS news_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    content TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)"#;

const QUERY_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS query_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    query_type TEXT NOT NULL,
    created_at INTEGER NOT NULL
)"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_stock_prices_symbol_date ON stock_prices (symbol, date)",
    "CREATE INDEX IF NOT EXISTS idx_institutional_symbol_date ON institutional_trades (symbol, date)",
    "CREATE INDEX IF NOT EXISTS idx_news_symbol_created ON news_cache (symbol, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_query_logs_created ON query_logs (created_at)",
];

fn cache_err(e: impl std::fmt::Display) -> DomainError {
    DomainError::Cache(e.to_string())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_date(s: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(s, DATE_FMT).map_err(|e| cache_err(format!("bad date {s}: {e}")))
}

/// SQLite cache. Safe to share via Arc; opens one connection per operation.
pub struct SqliteCache {
    db: Database,
    db_path: PathBuf,
}

impl SqliteCache {
    /// Connect to (or create) `<data_dir>/stock_data.db` and ensure the schema.
    pub async fn connect(data_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = data_dir.as_ref();
        std::fs::create_dir_all(base).map_err(cache_err)?;
        let db_path = base.join(DB_FILE);
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(cache_err)?;
        let conn = db.connect().map_err(cache_err)?;

        // PRAGMA returns a row; query and drain instead of execute.
        for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL"] {
            let mut rows = conn
                .query(pragma, ())
                .await
                .map_err(|e| cache_err(format!("{pragma} failed: {e}")))?;
            while rows.next().await.map_err(cache_err)?.is_some() {}
        }

        for ddl in [STOCK_PRICES_TABLE, INSTITUTIONAL_TABLE, NEWS_TABLE, QUERY_LOG_TABLE]
            .into_iter()
            .chain(INDEXES.iter().copied())
        {
            conn.execute(ddl, ()).await.map_err(cache_err)?;
        }

        info!(path = %db_path.display(), "cache database ready");
        Ok(Self { db, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection, DomainError> {
        self.db.connect().map_err(cache_err)
    }

    async fn count(conn: &Connection, sql: &str, now: Option<i64>) -> Result<i64, DomainError> {
        let mut rows = match now {
            Some(now) => conn.query(sql, params![now]).await,
            None => conn.query(sql, ()).await,
        }
        .map_err(cache_err)?;
        match rows.next().await.map_err(cache_err)? {
            Some(row) => row.get::<i64>(0).map_err(cache_err),
            None => Ok(0),
        }
    }
}

#[async_trait::async_trait]
impl PriceCachePort for SqliteCache {
    async fn cached_prices(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DomainError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT date, open, high, low, close, volume, amount, change, turnover
                FROM stock_prices
                WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                ORDER BY date ASC
                "#,
                params![
                    code,
                    start.format(DATE_FMT).to_string(),
                    end.format(DATE_FMT).to_string()
                ],
            )
            .await
            .map_err(cache_err)?;

        let mut bars = Vec::new();
        while let Some(row) = rows.next().await.map_err(cache_err)? {
            let date: String = row.get(0).map_err(cache_err)?;
            bars.push(PriceBar {
                date: parse_date(&date)?,
                open: row.get(1).map_err(cache_err)?,
                high: row.get(2).map_err(cache_err)?,
                low: row.get(3).map_err(cache_err)?,
                close: row.get(4).map_err(cache_err)?,
                volume: row.get(5).map_err(cache_err)?,
                amount: row.get::<Option<f64>>(6).map_err(cache_err)?,
                change: row.get::<Option<f64>>(7).map_err(cache_err)?,
                turnover: row.get::<Option<f64>>(8).map_err(cache_err)?,
            });
        }
        debug!(symbol = code, rows = bars.len(), "price cache lookup");
        Ok(bars)
    }

    async fn save_prices(&self, code: &str, bars: &[PriceBar]) -> Result<(), DomainError> {
        if bars.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        let now = now_secs();
        let tx = conn.transaction().await.map_err(cache_err)?;
        for bar in bars {
            tx.execute(
                r#"
                INSERT INTO stock_prices
                    (symbol, date, open, high, low, close, volume, amount, change, turnover, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (symbol, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    amount = excluded.amount,
                    change = excluded.change,
                    turnover = excluded.turnover,
                    created_at = excluded.created_at
                "#,
                params![
                    code,
                    bar.date.format(DATE_FMT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.amount,
                    bar.change,
                    bar.turnover,
                    now
                ],
            )
            .await
            .map_err(cache_err)?;
        }
        tx.commit().await.map_err(cache_err)?;
        info!(symbol = code, rows = bars.len(), "prices cached");
        Ok(())
    }

    async fn cached_institutional(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, DomainError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT date, foreign_investor, investment_trust, dealer_self,
                       dealer_hedging, dealer_total, total
                FROM institutional_trades
                WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                ORDER BY date DESC
                "#,
                params![
                    code,
                    start.format(DATE_FMT).to_string(),
                    end.format(DATE_FMT).to_string()
                ],
            )
            .await
            .map_err(cache_err)?;

        let mut flows = Vec::new();
        while let Some(row) = rows.next().await.map_err(cache_err)? {
            let date: String = row.get(0).map_err(cache_err)?;
            flows.push(InstitutionalFlow {
                date: parse_date(&date)?,
                foreign_investor: row.get(1).map_err(cache_err)?,
                investment_trust: row.get(2).map_err(cache_err)?,
                dealer_self: row.get(3).map_err(cache_err)?,
                dealer_hedging: row.get(4).map_err(cache_err)?,
                dealer_total: row.get(5).map_err(cache_err)?,
                total: row.get(6).map_err(cache_err)?,
            });
        }
        Ok(flows)
    }

    async fn save_institutional(
        &self,
        code: &str,
        flows: &[InstitutionalFlow],
    ) -> Result<(), DomainError> {
        if flows.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        let now = now_secs();
        let tx = conn.transaction().await.map_err(cache_err)?;
        for f in flows {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO institutional_trades
                    (symbol, date, foreign_investor, investment_trust, dealer_self,
                     dealer_hedging, dealer_total, total, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    code,
                    f.date.format(DATE_FMT).to_string(),
                    f.foreign_investor,
                    f.investment_trust,
                    f.dealer_self,
                    f.dealer_hedging,
                    f.dealer_total,
                    f.total,
                    now
                ],
            )
            .await
            .map_err(cache_err)?;
        }
        tx.commit().await.map_err(cache_err)?;
        info!(symbol = code, rows = flows.len(), "institutional flows cached");
        Ok(())
    }
}

#[async_trait::async_trait]
impl NewsCachePort for SqliteCache {
    async fn cached_news(&self, code: &str) -> Result<Option<CachedNews>, DomainError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT content, source, created_at
                FROM news_cache
                WHERE symbol = ?1 AND expires_at > ?2
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                params![code, now_secs()],
            )
            .await
            .map_err(cache_err)?;

        match rows.next().await.map_err(cache_err)? {
            Some(row) => Ok(Some(CachedNews {
                content: row.get(0).map_err(cache_err)?,
                source: row.get(1).map_err(cache_err)?,
                created_at: row.get(2).map_err(cache_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn save_news(
        &self,
        code: &str,
        content: &str,
        source: &str,
        ttl_hours: i64,
    ) -> Result<(), DomainError> {
        let conn = self.conn()?;
        let now = now_secs();
        conn.execute(
            r#"
            INSERT INTO news_cache (symbol, content, source, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![code, content, source, now, now + ttl_hours * 3600],
        )
        .await
        .map_err(cache_err)?;
        debug!(symbol = code, ttl_hours, "news cached");
        Ok(())
    }
}

#[async_trait::async_trait]
impl QueryLogPort for SqliteCache {
    async fn log_query(&self, code: &str, query_type: &str) -> Result<(), DomainError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO query_logs (symbol, query_type, created_at) VALUES (?1, ?2, ?3)",
            params![code, query_type, now_secs()],
        )
        .await
        .map_err(cache_err)?;
        Ok(())
    }

    async fn query_stats(&self, days: u32) -> Result<Vec<QueryStat>, DomainError> {
        let conn = self.conn()?;
        let cutoff = now_secs() - i64::from(days) * 86_400;
        let mut rows = conn
            .query(
                r#"
                SELECT symbol, query_type, COUNT(*) AS count
                FROM query_logs
                WHERE created_at >= ?1
                GROUP BY symbol, query_type
                ORDER BY count DESC, symbol ASC
                "#,
                params![cutoff],
            )
            .await
            .map_err(cache_err)?;

        let mut stats = Vec::new();
        while let Some(row) = rows.next().await.map_err(cache_err)? {
            stats.push(QueryStat {
                symbol: row.get(0).map_err(cache_err)?,
                query_type: row.get(1).map_err(cache_err)?,
                count: row.get(2).map_err(cache_err)?,
            });
        }
        Ok(stats)
    }

    async fn stats(&self) -> Result<CacheStats, DomainError> {
        let conn = self.conn()?;
        let wal_path = self.db_path.with_extension("db-wal");
        let size_bytes: u64 = [self.db_path.as_path(), wal_path.as_path()]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        Ok(CacheStats {
            stock_prices: Self::count(&conn, "SELECT COUNT(*) FROM stock_prices", None).await?,
            institutional: Self::count(&conn, "SELECT COUNT(*) FROM institutional_trades", None)
                .await?,
            live_news: Self::count(
                &conn,
                "SELECT COUNT(*) FROM news_cache WHERE expires_at > ?1",
                Some(now_secs()),
            )
            .await?,
            query_logs: Self::count(&conn, "SELECT COUNT(*) FROM query_logs", None).await?,
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
        })
    }

    async fn cleanup(&self, days: u32) -> Result<CleanupCounts, DomainError> {
        let conn = self.conn()?;
        let now = now_secs();
        let cutoff_secs = now - i64::from(days) * 86_400;
        let cutoff_date = chrono::DateTime::from_timestamp(cutoff_secs, 0)
            .map(|dt| dt.date_naive().format(DATE_FMT).to_string())
            .ok_or_else(|| cache_err("cleanup cutoff out of range"))?;

        let tx = conn.transaction().await.map_err(cache_err)?;
        let counts = CleanupCounts {
            stock_prices: tx
                .execute("DELETE FROM stock_prices WHERE date < ?1", params![cutoff_date.clone()])
                .await
                .map_err(cache_err)?,
            institutional: tx
                .execute(
                    "DELETE FROM institutional_trades WHERE date < ?1",
                    params![cutoff_date],
                )
                .await
                .map_err(cache_err)?,
            news: tx
                .execute("DELETE FROM news_cache WHERE expires_at < ?1", params![now])
                .await
                .map_err(cache_err)?,
            query_logs: tx
                .execute("DELETE FROM query_logs WHERE created_at < ?1", params![cutoff_secs])
                .await
                .map_err(cache_err)?,
        };
        tx.commit().await.map_err(cache_err)?;
        info!(
            days,
            prices = counts.stock_prices,
            institutional = counts.institutional,
            news = counts.news,
            query_logs = counts.query_logs,
            "cache cleanup complete"
        );
        Ok(counts)
    }
}
