//! FinMind REST client.
//!
//! Implements `MarketDataPort` over `GET <base>?dataset=...`. Every dataset
//! shares the `{status, msg, data}` envelope.

use super::mapper;
use crate::domain::{
    DomainError, InstitutionalFlow, MarginBalance, MarketBreadth, PriceBar, ProbeReport,
};
use crate::ports::MarketDataPort;
use chrono::{Days, Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.finmindtrade.com/api/v4/data";

const PRICE_DATASET: &str = "TaiwanStockPrice";
const INSTITUTIONAL_DATASET: &str = "TaiwanStockInstitutionalInvestorsBuySell";
const BREADTH_DATASET: &str = "TaiwanStockMarketBreadth";
const MARGIN_DATASET: &str = "TaiwanStockMarginPurchaseShortSale";

const LONG_TIMEOUT: Duration = Duration::from_secs(60);
const SHORT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

/// One dataset query.
struct Query<'a> {
    dataset: &'static str,
    data_id: Option<&'a str>,
    start: NaiveDate,
    end: Option<NaiveDate>,
    timeout: Duration,
}

pub struct FinMindClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FinMindClient {
    /// # Arguments
    /// * `base_url` - data endpoint (see [`DEFAULT_BASE_URL`])
    /// * `token` - FinMind API token; anonymous access is rate limited harder
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| DomainError::MarketData(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    async fn envelope(&self, q: &Query<'_>) -> Result<Envelope, DomainError> {
        let mut params: Vec<(&str, String)> = vec![
            ("dataset", q.dataset.to_string()),
            ("start_date", q.start.format("%Y-%m-%d").to_string()),
        ];
        if let Some(id) = q.data_id {
            params.push(("data_id", id.to_string()));
        }
        if let Some(end) = q.end {
            params.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }
        if let Some(token) = &self.token {
            params.push(("token", token.clone()));
        }

        debug!(dataset = q.dataset, data_id = ?q.data_id, start = %q.start, "FinMind request");
        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .timeout(q.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DomainError::MarketData(format!("{} request timed out", q.dataset))
                } else {
                    DomainError::MarketData(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DomainError::MarketData(format!(
                "API error {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<Envelope>()
            .await
            .map_err(|e| DomainError::MarketData(format!("Failed to parse API response: {}", e)))
    }

    /// Data rows of a successful envelope.
    async fn rows(&self, q: Query<'_>) -> Result<Vec<Value>, DomainError> {
        let env = self.envelope(&q).await?;
        if env.status != 200 {
            warn!(dataset = q.dataset, status = env.status, msg = %env.msg, "FinMind returned error status");
            return Err(DomainError::MarketData(env.msg));
        }
        info!(dataset = q.dataset, data_id = ?q.data_id, rows = env.data.len(), "FinMind data received");
        Ok(env.data)
    }
}

#[async_trait::async_trait]
impl MarketDataPort for FinMindClient {
    async fn fetch_prices(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DomainError> {
        let rows = self
            .rows(Query {
                dataset: PRICE_DATASET,
                data_id: Some(code),
                start,
                end: Some(end),
                timeout: LONG_TIMEOUT,
            })
            .await?;
        mapper::prices_to_domain(&rows)
    }

    async fn fetch_institutional(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, DomainError> {
        let rows = self
            .rows(Query {
                dataset: INSTITUTIONAL_DATASET,
                data_id: Some(code),
                start,
                end: Some(end),
                timeout: SHORT_TIMEOUT,
            })
            .await?;
        mapper::institutional_to_domain(&rows)
    }

    async fn fetch_breadth(&self, date: NaiveDate) -> Result<Option<MarketBreadth>, DomainError> {
        let rows = self
            .rows(Query {
                dataset: BREADTH_DATASET,
                data_id: None,
                start: date,
                end: Some(date),
                timeout: SHORT_TIMEOUT,
            })
            .await?;
        Ok(mapper::breadth_to_domain(&rows))
    }

    async fn fetch_margin(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarginBalance>, DomainError> {
        let rows = self
            .rows(Query {
                dataset: MARGIN_DATASET,
                data_id: Some(code),
                start,
                end: Some(end),
                timeout: LONG_TIMEOUT,
            })
            .await?;
        mapper::margin_to_domain(&rows)
    }

    async fn probe(&self, code: &str) -> ProbeReport {
        let today = Local::now().date_naive();
        let start = today.checked_sub_days(Days::new(3)).unwrap_or(today);
        let query = Query {
            dataset: PRICE_DATASET,
            data_id: Some(code),
            start,
            end: Some(today),
            timeout: SHORT_TIMEOUT,
        };

        match self.envelope(&query).await {
            Ok(env) if env.status == 200 => {
                let columns = env
                    .data
                    .first()
                    .and_then(Value::as_object)
                    .map(|o| o.keys().cloned().collect())
                    .unwrap_or_default();
                ProbeReport {
                    success: true,
                    message: "API 連線成功".to_string(),
                    data_count: env.data.len(),
                    columns,
                }
            }
            Ok(env) => ProbeReport {
                success: false,
                message: format!("API 錯誤: {}", env.msg),
                data_count: 0,
                columns: Vec::new(),
            },
            Err(e) => {
                warn!(error = %e, "FinMind probe failed");
                ProbeReport {
                    success: false,
                    message: e.to_string(),
                    data_count: 0,
                    columns: Vec::new(),
                }
            }
        }
    }
}
