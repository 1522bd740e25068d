//! Live-data tool executor
//!
//! Answers the data tools (cash flow, revenue, expenses, KPIs) from an
//! [`AccountingSource`], falling back to [`FinancialSnapshot::fallback`] when
//! the source is missing or failing. Every other tool is delegated to the
//! fixture executor.

use super::accounting::{period_to_range, AccountingSource, FinancialSnapshot};
use super::executor::{
    expense_efficiency, expense_recommendations, expense_trends, kpi_group, prepare_call,
    revenue_recommendations, str_param, DataSource, FixtureToolExecutor, ToolCall, ToolExecutor,
    ToolResult,
};
use super::registry::{
    ToolRegistry, CASH_FLOW_ANALYSIS, DEFAULT_PERIOD, EXPENSE_ANALYSIS, KPIS, REVENUE_ANALYSIS,
};
use async_trait::async_trait;
use chrono::Utc;
use finsight_common::errors::{AppError, Result};
use finsight_common::metrics;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CachedSnapshot {
    period: String,
    snapshot: FinancialSnapshot,
    fetched_at: Instant,
}

/// Single-slot snapshot cache keyed by period
pub struct FreshnessCache {
    ttl: Duration,
    slot: RwLock<Option<CachedSnapshot>>,
}

impl FreshnessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot for `period` if it is still fresh.
    pub async fn get(&self, period: &str) -> Option<FinancialSnapshot> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|c| c.period == period && c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.snapshot.clone())
    }

    /// Replace the slot.
    pub async fn put(&self, period: &str, snapshot: FinancialSnapshot) {
        *self.slot.write().await = Some(CachedSnapshot {
            period: period.to_string(),
            snapshot,
            fetched_at: Instant::now(),
        });
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

/// Tool executor that prefers live accounting data
pub struct LiveDataToolExecutor {
    base: FixtureToolExecutor,
    source: Option<Arc<dyn AccountingSource>>,
    cache: FreshnessCache,
    fetch_timeout: Duration,
}

impl LiveDataToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        source: Option<Arc<dyn AccountingSource>>,
        cache_ttl: Duration,
    ) -> Self {
        if source.is_none() {
            tracing::info!("No accounting source configured, data tools will use fixture snapshot");
        }
        Self {
            base: FixtureToolExecutor::new(registry),
            source,
            cache: FreshnessCache::new(cache_ttl),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Deadline for one accounting fetch, on top of the client's own timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &FreshnessCache {
        &self.cache
    }

    fn is_data_tool(name: &str) -> bool {
        matches!(name, CASH_FLOW_ANALYSIS | REVENUE_ANALYSIS | EXPENSE_ANALYSIS | KPIS)
    }

    /// Snapshot for the period and whether it came from the live source.
    async fn snapshot(&self, period: &str) -> (FinancialSnapshot, bool) {
        let Some(source) = &self.source else {
            return (FinancialSnapshot::fallback(), false);
        };

        if let Some(snapshot) = self.cache.get(period).await {
            metrics::record_cache(true, "accounting");
            return (snapshot, true);
        }
        metrics::record_cache(false, "accounting");

        let range = period_to_range(period, Utc::now().date_naive());
        let fetched = tokio::time::timeout(self.fetch_timeout, source.fetch_financials(&range))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::UpstreamTimeout {
                    service: source.name().to_string(),
                    timeout_ms: self.fetch_timeout.as_millis() as u64,
                })
            });

        match fetched {
            Ok(snapshot) => {
                self.cache.put(period, snapshot.clone()).await;
                (snapshot, true)
            }
            Err(e) => {
                tracing::warn!(
                    source = source.name(),
                    period = %period,
                    error = %e,
                    "Accounting fetch failed, using fallback snapshot"
                );
                (FinancialSnapshot::fallback(), false)
            }
        }
    }

    async fn run_data_tool(&self, name: &str, params: &Map<String, Value>) -> (Result<Value>, DataSource) {
        let period = str_param(params, "period", DEFAULT_PERIOD);
        let (snapshot, live) = self.snapshot(period).await;
        let data_source = if live { "accounting" } else { "fixture" };

        let data = match name {
            CASH_FLOW_ANALYSIS => live_cash_flow(period, &snapshot, data_source),
            REVENUE_ANALYSIS => live_revenue(period, &snapshot, data_source),
            EXPENSE_ANALYSIS => live_expenses(period, &snapshot, params, data_source),
            _ => live_kpis(period, &snapshot, params, data_source),
        };

        let source = if live { DataSource::Live } else { DataSource::Fixture };
        (Ok(data), source)
    }
}

#[async_trait]
impl ToolExecutor for LiveDataToolExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let params = match prepare_call(self.base.registry(), call) {
            Ok(params) => params,
            Err(e) => return ToolResult::failed(&call.name, e, started),
        };

        let (outcome, source) = if Self::is_data_tool(&call.name) {
            self.run_data_tool(&call.name, &params).await
        } else {
            (self.base.run(&call.name, &params), DataSource::Fixture)
        };

        ToolResult::from_outcome(&call.name, outcome, source, started)
    }

    fn registry(&self) -> &ToolRegistry {
        self.base.registry()
    }
}

fn live_cash_flow(period: &str, s: &FinancialSnapshot, data_source: &str) -> Value {
    let cf = &s.cash_flow;
    let burn_rate = cf.operating.abs() / 30.0;
    let runway = if burn_rate > 0.0 {
        cf.ending_balance / burn_rate
    } else {
        0.0
    };
    let status = if cf.operating > 0.0 { "healthy" } else { "concerning" };

    json!({
        "period": period,
        "operatingCashFlow": cf.operating,
        "investingCashFlow": cf.investing,
        "financingCashFlow": cf.financing,
        "netChange": cf.net_change,
        "beginningBalance": cf.beginning_balance,
        "endingBalance": cf.ending_balance,
        "burnRate": burn_rate,
        "runway": runway,
        "runwayUnit": "days",
        "analysis": {
            "status": status,
            "dataSource": data_source,
        }
    })
}

fn live_revenue(period: &str, s: &FinancialSnapshot, data_source: &str) -> Value {
    let r = &s.revenue;
    let trend = if r.growth > 0.1 { "positive" } else { "stable" };

    json!({
        "period": period,
        "totalRevenue": r.total_revenue,
        "growthRate": r.growth,
        "mrr": r.total_revenue / 3.0,
        "breakdown": r.breakdown,
        "analysis": {
            "trend": trend,
            "drivers": [
                "Product sales growth",
                "Service revenue expansion",
                "Customer acquisition",
                "Price optimization",
            ],
            "recommendations": revenue_recommendations(),
            "dataSource": data_source,
        }
    })
}

fn live_expenses(
    period: &str,
    s: &FinancialSnapshot,
    params: &Map<String, Value>,
    data_source: &str,
) -> Value {
    let e = &s.expenses;
    let category = str_param(params, "category", "all");
    let breakdown = match category {
        "all" => json!(e.breakdown),
        other => {
            let key = match other {
                "sales_marketing" => "salesMarketing",
                "general_admin" => "generalAdmin",
                "operating" => "other",
                k => k,
            };
            json!({ key: e.line(key) })
        }
    };
    let sales_marketing = e.line("salesMarketing");

    json!({
        "period": period,
        "totalExpenses": e.total_expenses,
        "category": category,
        "breakdown": breakdown,
        "analysis": {
            "efficiency": expense_efficiency(sales_marketing, e.total_expenses),
            "trends": expense_trends(
                sales_marketing,
                e.line("rd"),
                e.line("generalAdmin"),
                e.total_expenses,
            ),
            "recommendations": expense_recommendations(),
            "dataSource": data_source,
        }
    })
}

fn live_kpis(
    period: &str,
    s: &FinancialSnapshot,
    params: &Map<String, Value>,
    data_source: &str,
) -> Value {
    let revenue = s.revenue.total_revenue;
    let expenses = s.expenses.total_expenses;
    let profit = revenue - expenses;
    let ratio = |num: f64, den: f64| if den != 0.0 { num / den } else { 0.0 };
    let group = str_param(params, "kpi_group", "all");

    let all = json!({
        "profitability": {
            "grossMargin": ratio(revenue - expenses * 0.6, revenue),
            "operatingMargin": ratio(profit, revenue),
            "netMargin": ratio(profit, revenue),
        },
        "liquidity": {
            "currentRatio": s.balance_sheet.current_ratio,
            "quickRatio": s.balance_sheet.quick_ratio,
        },
        "efficiency": {
            "roe": ratio(profit, s.balance_sheet.total_equity),
            "roa": ratio(profit, s.balance_sheet.total_assets),
        },
        "growth": {
            "revenueGrowthRate": s.revenue.growth,
        },
    });

    json!({
        "period": period,
        "kpiGroup": group,
        "kpis": kpi_group(all, group),
        "analysis": {
            "dataSource": data_source,
        }
    })
}
