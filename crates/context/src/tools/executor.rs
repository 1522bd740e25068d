//! Tool execution
//!
//! Provides:
//! - [`ToolCall`] / [`ToolResult`] wire types
//! - [`ToolExecutor`] trait: infallible, every failure becomes a failed result
//! - [`FixtureToolExecutor`]: answers all eight tools from the fixture book

use super::fixtures::{FixtureBook, PeriodFigures};
use super::registry::{
    ToolRegistry, CASH_FLOW_ANALYSIS, CUSTOMER_METRICS, EXPENSE_ANALYSIS, FINANCIAL_REPORT,
    FORECAST, KPIS, REVENUE_ANALYSIS, VARIANCE_ANALYSIS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finsight_common::errors::{AppError, Result};
use finsight_common::metrics;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// A request to run one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub id: String,
}

impl ToolCall {
    /// New call with a fresh `tool_<uuid>` id
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            parameters,
            id: format!("tool_{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

/// Where a result's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Fixture,
    Live,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMetadata {
    pub source: DataSource,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
}

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub metadata: ToolResultMetadata,
}

impl ToolResult {
    /// Wrap a handler outcome, recording metrics and logging failures.
    pub fn from_outcome(
        tool: &str,
        outcome: Result<Value>,
        source: DataSource,
        started: Instant,
    ) -> Self {
        let elapsed = started.elapsed();
        metrics::record_tool(elapsed.as_secs_f64(), tool, outcome.is_ok());

        let (success, data, error, source) = match outcome {
            Ok(data) => (true, Some(data), None, source),
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "Tool execution failed");
                (false, None, Some(e.to_string()), DataSource::Error)
            }
        };

        Self {
            success,
            data,
            error,
            execution_time_ms: elapsed.as_millis() as u64,
            metadata: ToolResultMetadata {
                source,
                timestamp: Utc::now(),
                tool: tool.to_string(),
            },
        }
    }

    pub fn failed(tool: &str, error: AppError, started: Instant) -> Self {
        Self::from_outcome(tool, Err(error), DataSource::Error, started)
    }
}

/// Runs tool calls. Never errors and never panics on bad input.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolResult;

    fn registry(&self) -> &ToolRegistry;
}

/// Resolve the call against the registry and validate its parameters.
pub fn prepare_call(registry: &ToolRegistry, call: &ToolCall) -> Result<Map<String, Value>> {
    registry
        .get(&call.name)
        .ok_or_else(|| AppError::UnknownTool {
            name: call.name.clone(),
        })?
        .prepare(&call.parameters)
}

pub(crate) fn str_param<'a>(params: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or(default)
}

/// Executor backed by the fixture book
pub struct FixtureToolExecutor {
    registry: Arc<ToolRegistry>,
    book: FixtureBook,
}

impl FixtureToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_book(registry, FixtureBook::standard())
    }

    pub fn with_book(registry: Arc<ToolRegistry>, book: FixtureBook) -> Self {
        Self { registry, book }
    }

    /// Dispatch validated parameters to the tool handler.
    pub fn run(&self, name: &str, params: &Map<String, Value>) -> Result<Value> {
        let period = str_param(params, "period", super::registry::DEFAULT_PERIOD);
        let figures = self.book.figures(period);

        match name {
            CASH_FLOW_ANALYSIS => Ok(cash_flow_analysis(period, figures, params)),
            REVENUE_ANALYSIS => Ok(revenue_analysis(period, figures, params)),
            EXPENSE_ANALYSIS => Ok(expense_analysis(period, figures, params)),
            FINANCIAL_REPORT => Ok(financial_report(params)),
            VARIANCE_ANALYSIS => Ok(variance_analysis(params)),
            FORECAST => Ok(forecast(params)),
            KPIS => Ok(kpi_analysis(period, figures, params)),
            CUSTOMER_METRICS => Ok(customer_analysis(period, figures, params)),
            other => Err(AppError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ToolExecutor for FixtureToolExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let outcome = prepare_call(&self.registry, call).and_then(|p| self.run(&call.name, &p));
        ToolResult::from_outcome(&call.name, outcome, DataSource::Fixture, started)
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn cash_flow_analysis(period: &str, figures: &PeriodFigures, params: &Map<String, Value>) -> Value {
    let cf = &figures.cash_flow;
    let status = if cf.runway > 12.0 {
        "healthy"
    } else if cf.runway > 6.0 {
        "monitor"
    } else {
        "critical"
    };

    let mut recommendations = Vec::new();
    if cf.runway < 6.0 {
        recommendations.push("Consider raising additional funding");
    }
    if cf.burn_rate > 200_000.0 {
        recommendations.push("Review and optimize operating expenses");
    }
    if cf.operating < 0.0 {
        recommendations.push("Focus on improving operating cash flow");
    }

    let mut result = json!({
        "period": period,
        "operatingCashFlow": cf.operating,
        "investingCashFlow": cf.investing,
        "financingCashFlow": cf.financing,
        "netChange": cf.net_change,
        "beginningBalance": cf.beginning_balance,
        "endingBalance": cf.ending_balance,
        "burnRate": cf.burn_rate,
        "runway": cf.runway,
        "analysis": {
            "status": status,
            "recommendations": recommendations,
        }
    });

    if params.get("include_forecast").and_then(Value::as_bool).unwrap_or(false) {
        let monthly_change = cf.net_change / 3.0;
        let projection: Vec<Value> = (1..=3)
            .map(|month| {
                json!({
                    "month": format!("Month {}", month),
                    "projectedBalance": cf.ending_balance + monthly_change * month as f64,
                })
            })
            .collect();
        result["forecast"] = Value::Array(projection);
    }

    result
}

fn revenue_analysis(period: &str, figures: &PeriodFigures, params: &Map<String, Value>) -> Value {
    let r = &figures.revenue;
    let breakdown = match str_param(params, "breakdown", "by_source") {
        "by_source" => json!({
            "newCustomers": r.new_customers,
            "expansion": r.expansion,
            "renewal": r.renewal,
        }),
        _ => json!({
            "total": r.total,
            "newCustomers": r.new_customers,
            "expansion": r.expansion,
            "renewal": r.renewal,
            "growthRate": r.growth_rate,
            "mrr": r.mrr,
        }),
    };
    let trend = if r.growth_rate > 0.1 { "positive" } else { "stable" };

    json!({
        "period": period,
        "totalRevenue": r.total,
        "growthRate": r.growth_rate,
        "mrr": r.mrr,
        "breakdown": breakdown,
        "analysis": {
            "trend": trend,
            "drivers": [
                "New customer acquisition (+20%)",
                "Expansion revenue (+12%)",
                "Price optimization (+5%)",
            ],
            "recommendations": revenue_recommendations(),
        }
    })
}

pub(crate) fn revenue_recommendations() -> Vec<&'static str> {
    vec![
        "Continue investing in sales and marketing",
        "Focus on customer expansion programs",
        "Consider pricing optimization",
    ]
}

pub(crate) fn expense_recommendations() -> Vec<&'static str> {
    vec![
        "Optimize sales and marketing spend",
        "Invest in R&D efficiency",
        "Streamline administrative processes",
    ]
}

/// `high` above 40% sales and marketing share, `moderate` above 30%.
pub(crate) fn expense_efficiency(sales_marketing: f64, total: f64) -> &'static str {
    let ratio = if total > 0.0 { sales_marketing / total } else { 0.0 };
    if ratio > 0.4 {
        "high"
    } else if ratio > 0.3 {
        "moderate"
    } else {
        "low"
    }
}

pub(crate) fn expense_trends(sales_marketing: f64, rd: f64, general_admin: f64, total: f64) -> Vec<String> {
    let share = |v: f64| if total > 0.0 { (v / total * 100.0).round() } else { 0.0 };
    vec![
        format!("Sales & Marketing: {}% of total expenses", share(sales_marketing)),
        format!("R&D: {}% of total expenses", share(rd)),
        format!("General & Admin: {}% of total expenses", share(general_admin)),
    ]
}

fn expense_analysis(period: &str, figures: &PeriodFigures, params: &Map<String, Value>) -> Value {
    let e = &figures.expenses;
    let category = str_param(params, "category", "all");
    let breakdown = match category {
        "operating" => json!({ "operating": e.total }),
        "sales_marketing" => json!({ "salesMarketing": e.sales_marketing }),
        "rd" => json!({ "rd": e.rd }),
        "general_admin" => json!({ "generalAdmin": e.general_admin }),
        _ => json!({
            "salesMarketing": e.sales_marketing,
            "rd": e.rd,
            "generalAdmin": e.general_admin,
            "customerSuccess": e.customer_success,
            "other": e.other,
        }),
    };

    json!({
        "period": period,
        "totalExpenses": e.total,
        "category": category,
        "breakdown": breakdown,
        "analysis": {
            "efficiency": expense_efficiency(e.sales_marketing, e.total),
            "trends": expense_trends(e.sales_marketing, e.rd, e.general_admin, e.total),
            "recommendations": expense_recommendations(),
        }
    })
}

fn report_sections(report_type: &str) -> Vec<&'static str> {
    let mut sections = vec!["Executive Summary", "Financial Highlights", "Key Metrics"];
    let extra: &[&'static str] = match report_type {
        "p_l" => &["Revenue Analysis", "Expense Breakdown", "Profitability"],
        "balance_sheet" => &["Assets", "Liabilities", "Equity"],
        "cash_flow" => &["Operating Cash Flow", "Investing Activities", "Financing Activities"],
        "board_pack" => &["Strategic Initiatives", "Risk Assessment", "Forward Outlook"],
        _ => &[],
    };
    sections.extend_from_slice(extra);
    sections
}

fn financial_report(params: &Map<String, Value>) -> Value {
    let report_type = str_param(params, "report_type", "p_l");
    let period = str_param(params, "period", super::registry::DEFAULT_PERIOD);
    let format = str_param(params, "format", "executive");

    json!({
        "reportType": report_type,
        "period": period,
        "format": format,
        "generatedAt": Utc::now().to_rfc3339(),
        "content": format!("Generated {} report for {} in {} format", report_type, period, format),
        "sections": report_sections(report_type),
    })
}

fn variance_analysis(params: &Map<String, Value>) -> Value {
    let period = str_param(params, "period", super::registry::DEFAULT_PERIOD);
    let metric = str_param(params, "metric", "all");
    let threshold = params.get("threshold").and_then(Value::as_f64).unwrap_or(5.0);

    let lines: [(&str, &str, f64, f64, f64); 3] = [
        ("revenue", "revenue", 2_400_000.0, 2_200_000.0, 9.1),
        ("expenses", "expenses", 1_968_000.0, 2_000_000.0, -1.6),
        ("cash_flow", "cashFlow", 456_000.0, 400_000.0, 14.0),
    ];

    let mut variances = Map::new();
    for (metric_name, key, actual, budget, variance) in lines {
        if metric != "all" && metric != metric_name {
            continue;
        }
        variances.insert(
            key.to_string(),
            json!({
                "actual": actual,
                "budget": budget,
                "variance": variance,
                "status": "favorable",
                "exceedsThreshold": variance.abs() >= threshold,
            }),
        );
    }

    json!({
        "period": period,
        "metric": metric,
        "threshold": threshold,
        "variances": variances,
        "analysis": {
            "summary": "Overall performance exceeds budget expectations",
            "keyInsights": [
                "Revenue 9.1% above budget",
                "Expenses 1.6% below budget",
                "Strong cash flow performance",
            ],
            "recommendations": [
                "Maintain current growth trajectory",
                "Continue cost optimization efforts",
                "Consider strategic investments",
            ],
        }
    })
}

fn horizon_months(horizon: &str) -> usize {
    match horizon {
        "3_months" => 3,
        "6_months" => 6,
        "24_months" => 24,
        _ => 12,
    }
}

fn forecast(params: &Map<String, Value>) -> Value {
    let forecast_type = str_param(params, "forecast_type", "revenue");
    let horizon = str_param(params, "horizon", "12_months");
    let scenario = str_param(params, "scenario", "realistic");

    let (multiplier, confidence) = match scenario {
        "conservative" => (0.8, 0.85),
        "optimistic" => (1.2, 0.65),
        _ => (1.0, 0.75),
    };

    let months = horizon_months(horizon);
    let monthly: Vec<Value> = (0..months)
        .map(|i| {
            json!({
                "month": format!("Month {}", i + 1),
                "value": 2_000_000.0 * multiplier * (1.0 + i as f64 * 0.05),
            })
        })
        .collect();
    let quarterly: Vec<Value> = (0..months.div_ceil(3))
        .map(|i| {
            json!({
                "quarter": format!("Q{}", i + 1),
                "value": 6_000_000.0 * multiplier * (1.0 + i as f64 * 0.15),
            })
        })
        .collect();

    json!({
        "forecastType": forecast_type,
        "horizon": horizon,
        "scenario": scenario,
        "projections": {
            "monthly": monthly,
            "quarterly": quarterly,
        },
        "assumptions": [
            "Current growth trends continue",
            "Market conditions remain stable",
            "No major economic disruptions",
            "Customer acquisition costs remain consistent",
        ],
        "confidence": confidence,
    })
}

/// Pick a KPI group out of a `{profitability, liquidity, efficiency, growth}` object.
pub(crate) fn kpi_group(all: Value, group: &str) -> Value {
    match group {
        "profitability" | "liquidity" | "efficiency" | "growth" => {
            all.get(group).cloned().unwrap_or(all)
        }
        _ => all,
    }
}

fn kpi_analysis(period: &str, figures: &PeriodFigures, params: &Map<String, Value>) -> Value {
    let k = &figures.kpis;
    let group = str_param(params, "kpi_group", "all");
    let all = json!({
        "profitability": {
            "grossMargin": k.gross_margin,
            "operatingMargin": k.operating_margin,
            "netMargin": k.net_margin,
        },
        "liquidity": {
            "currentRatio": k.current_ratio,
            "quickRatio": k.quick_ratio,
        },
        "efficiency": {
            "roe": k.roe,
            "roa": k.roa,
        },
        "growth": {
            "revenueGrowthRate": figures.revenue.growth_rate,
        },
    });

    json!({
        "period": period,
        "kpiGroup": group,
        "kpis": kpi_group(all, group),
        "analysis": {
            "performance": "Strong financial performance across key metrics",
            "trends": "Positive trends in profitability and efficiency",
            "benchmarks": "Above industry averages in most categories",
        }
    })
}

fn customer_analysis(period: &str, figures: &PeriodFigures, params: &Map<String, Value>) -> Value {
    let c = &figures.customers;
    let metric = str_param(params, "metric", "all");
    let metrics = match metric {
        "cac" => json!({ "cac": c.cac }),
        "ltv" => json!({ "ltv": c.ltv }),
        "churn" => json!({ "churnRate": c.churn_rate }),
        "retention" => json!({ "retentionRate": c.retention_rate }),
        _ => json!({
            "cac": c.cac,
            "ltv": c.ltv,
            "churnRate": c.churn_rate,
            "retentionRate": c.retention_rate,
            "totalCustomers": c.total_customers,
            "newCustomers": c.new_customers,
        }),
    };

    let ltv_to_cac = if c.cac > 0.0 { c.ltv / c.cac } else { 0.0 };

    json!({
        "period": period,
        "metric": metric,
        "metrics": metrics,
        "analysis": {
            "performance": "Healthy customer metrics with room for improvement",
            "trends": "Stable customer acquisition and retention",
            "ltvToCac": ltv_to_cac,
            "recommendations": [
                "Optimize customer acquisition cost",
                "Improve customer lifetime value",
                "Reduce churn rate",
            ],
        }
    })
}
