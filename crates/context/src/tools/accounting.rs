//! Accounting data source
//!
//! Provides:
//! - [`DateRange`] and period-to-range resolution
//! - [`FinancialSnapshot`]: revenue, expenses, cash flow and balance sheet
//!   for a date range
//! - [`AccountingSource`] trait and its HTTP implementation

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use finsight_common::config::AccountingConfig;
use finsight_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// Resolve a reporting period to dates relative to `today`.
///
/// Quarters of 2025 are fixed; rolling windows and YTD end today; anything
/// else is the current quarter to date.
pub fn period_to_range(period: &str, today: NaiveDate) -> DateRange {
    match period {
        "Q1 2025" => DateRange::new(ymd(2025, 1, 1), ymd(2025, 3, 31)),
        "Q2 2025" => DateRange::new(ymd(2025, 4, 1), ymd(2025, 6, 30)),
        "Q3 2025" => DateRange::new(ymd(2025, 7, 1), ymd(2025, 9, 30)),
        "Q4 2025" => DateRange::new(ymd(2025, 10, 1), ymd(2025, 12, 31)),
        "last 30 days" => DateRange::new(today - ChronoDuration::days(30), today),
        "last 90 days" => DateRange::new(today - ChronoDuration::days(90), today),
        "YTD" => DateRange::new(ymd(today.year(), 1, 1), today),
        _ => {
            let quarter_start_month = (today.month0() / 3) * 3 + 1;
            DateRange::new(ymd(today.year(), quarter_start_month, 1), today)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSnapshot {
    pub total_revenue: f64,
    #[serde(default)]
    pub breakdown: BTreeMap<String, f64>,
    #[serde(default)]
    pub growth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSnapshot {
    pub total_expenses: f64,
    #[serde(default)]
    pub breakdown: BTreeMap<String, f64>,
}

impl ExpenseSnapshot {
    pub fn line(&self, key: &str) -> f64 {
        self.breakdown.get(key).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowSnapshot {
    pub operating: f64,
    pub investing: f64,
    pub financing: f64,
    pub net_change: f64,
    pub beginning_balance: f64,
    pub ending_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheetSnapshot {
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
    pub current_ratio: f64,
    pub quick_ratio: f64,
}

/// Financial statements for one date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSnapshot {
    pub revenue: RevenueSnapshot,
    pub expenses: ExpenseSnapshot,
    pub cash_flow: CashFlowSnapshot,
    pub balance_sheet: BalanceSheetSnapshot,
}

impl FinancialSnapshot {
    /// Snapshot used when no live data can be had
    pub fn fallback() -> Self {
        let breakdown = |pairs: &[(&str, f64)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            revenue: RevenueSnapshot {
                total_revenue: 2_400_000.0,
                breakdown: breakdown(&[("productSales", 1_680_000.0), ("serviceRevenue", 720_000.0)]),
                growth: 0.15,
            },
            expenses: ExpenseSnapshot {
                total_expenses: 1_968_000.0,
                breakdown: breakdown(&[
                    ("salesMarketing", 590_400.0),
                    ("rd", 393_600.0),
                    ("generalAdmin", 295_200.0),
                    ("other", 688_800.0),
                ]),
            },
            cash_flow: CashFlowSnapshot {
                operating: 456_000.0,
                investing: -120_000.0,
                financing: 0.0,
                net_change: 336_000.0,
                beginning_balance: 1_200_000.0,
                ending_balance: 1_536_000.0,
            },
            balance_sheet: BalanceSheetSnapshot {
                total_assets: 5_000_000.0,
                total_liabilities: 2_000_000.0,
                total_equity: 3_000_000.0,
                current_ratio: 2.1,
                quick_ratio: 1.8,
            },
        }
    }
}

/// Source of live financial statements
#[async_trait]
pub trait AccountingSource: Send + Sync {
    async fn fetch_financials(&self, range: &DateRange) -> Result<FinancialSnapshot>;

    fn name(&self) -> &str;
}

/// Accounting connector over HTTP
///
/// `GET {base}/companies/{company_id}/financials?start_date=..&end_date=..`
/// with a bearer token.
pub struct HttpAccountingSource {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    company_id: String,
    timeout: Duration,
}

impl HttpAccountingSource {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        company_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            company_id: company_id.into(),
            timeout,
        })
    }

    /// `None` when the connector is not configured.
    pub fn from_config(config: &AccountingConfig) -> Result<Option<Self>> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        match (
            present(&config.base_url),
            present(&config.access_token),
            present(&config.company_id),
        ) {
            (Some(base), Some(token), Some(company)) => Ok(Some(Self::new(
                base,
                token,
                company,
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    fn url(&self) -> String {
        format!("{}/companies/{}/financials", self.base_url, self.company_id)
    }
}

#[async_trait]
impl AccountingSource for HttpAccountingSource {
    async fn fetch_financials(&self, range: &DateRange) -> Result<FinancialSnapshot> {
        let start = range.start.format("%Y-%m-%d").to_string();
        let end = range.end.format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(self.url())
            .bearer_auth(&self.access_token)
            .query(&[("start_date", start.as_str()), ("end_date", end.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout {
                        service: "accounting".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::Accounting {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(AppError::Accounting {
                message: format!("Accounting API returned {}", response.status()),
            });
        }

        response.json().await.map_err(|e| AppError::Accounting {
            message: format!("Failed to parse financials: {}", e),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        ymd(2025, 8, 14)
    }

    #[test]
    fn test_fixed_quarters() {
        let q2 = period_to_range("Q2 2025", today());
        assert_eq!(q2, DateRange::new(ymd(2025, 4, 1), ymd(2025, 6, 30)));
        let q4 = period_to_range("Q4 2025", today());
        assert_eq!(q4.end, ymd(2025, 12, 31));
    }

    #[test]
    fn test_rolling_windows() {
        let last30 = period_to_range("last 30 days", today());
        assert_eq!(last30.start, ymd(2025, 7, 15));
        assert_eq!(last30.end, today());

        let ytd = period_to_range("YTD", today());
        assert_eq!(ytd.start, ymd(2025, 1, 1));
    }

    #[test]
    fn test_default_is_current_quarter() {
        let range = period_to_range("next fiscal year", today());
        assert_eq!(range.start, ymd(2025, 7, 1));
        assert_eq!(range.end, today());

        let range = period_to_range("", ymd(2026, 12, 31));
        assert_eq!(range.start, ymd(2026, 10, 1));
    }

    #[test]
    fn test_snapshot_wire_format() {
        let json = serde_json::to_value(FinancialSnapshot::fallback()).unwrap();
        assert_eq!(json["revenue"]["totalRevenue"], 2_400_000.0);
        assert_eq!(json["cashFlow"]["endingBalance"], 1_536_000.0);
        assert_eq!(json["balanceSheet"]["totalEquity"], 3_000_000.0);

        let back: FinancialSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, FinancialSnapshot::fallback());
    }

    #[test]
    fn test_unconfigured_connector() {
        let config = AccountingConfig::default();
        assert!(HttpAccountingSource::from_config(&config).unwrap().is_none());

        let config = AccountingConfig {
            base_url: Some("https://books.example.com/v3".into()),
            access_token: Some("token".into()),
            company_id: Some("9130".into()),
            ..AccountingConfig::default()
        };
        let source = HttpAccountingSource::from_config(&config).unwrap().unwrap();
        assert_eq!(source.url(), "https://books.example.com/v3/companies/9130/financials");
    }
}
