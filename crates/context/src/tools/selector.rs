//! Query-to-tool selection
//!
//! Two stages, both purely lexical:
//! - [`ToolSelector::should_use_tools`] gates on a keyword allow-list or a
//!   small set of intent patterns
//! - [`ToolSelector::select`] walks the registry in order and emits a call
//!   for every entry whose triggers appear in the query

use super::executor::ToolCall;
use super::registry::{ParamExtractor, ToolRegistry, DEFAULT_PERIOD};
use finsight_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Upper bound on calls per orchestration
pub const MAX_TOOL_CALLS: usize = 3;

const TOOL_KEYWORDS: &[&str] = &[
    "analyze",
    "calculate",
    "generate",
    "report",
    "forecast",
    "variance",
    "cash flow",
    "revenue",
    "expenses",
    "kpi",
    "metrics",
    "performance",
    "budget",
    "actual",
    "comparison",
    "trend",
    "projection",
];

const INTENT_PATTERNS: &[&str] = &[
    r"(?i)show me.*(?:revenue|cash|expense|kpi|metric)",
    r"(?i)analyze.*(?:performance|trend|variance)",
    r"(?i)generate.*(?:report|forecast|analysis)",
    r"(?i)calculate.*(?:runway|burn|margin|ratio)",
    r"(?i)what.*(?:our|the).*(?:revenue|cash|expense|performance)",
];

/// Checked in order; the first hit wins.
const PERIOD_PATTERNS: &[(&str, &str)] = &[
    ("q1 2025", "Q1 2025"),
    ("q2 2025", "Q2 2025"),
    ("q3 2025", "Q3 2025"),
    ("q4 2025", "Q4 2025"),
    ("last 30 days", "last 30 days"),
    ("last 90 days", "last 90 days"),
    ("ytd", "YTD"),
    ("this quarter", DEFAULT_PERIOD),
    ("current", DEFAULT_PERIOD),
];

const REPORT_TYPES: &[(&str, &str)] = &[
    ("p&l", "p_l"),
    ("profit", "p_l"),
    ("income", "p_l"),
    ("balance sheet", "balance_sheet"),
    ("cash flow", "cash_flow"),
    ("board", "board_pack"),
    ("kpi", "kpi_dashboard"),
    ("monthly", "monthly_summary"),
];

const FORECAST_TYPES: &[(&str, &str)] = &[
    ("revenue", "revenue"),
    ("cash", "cash_flow"),
    ("expense", "expenses"),
    ("comprehensive", "comprehensive"),
];

const HORIZONS: &[(&str, &str)] = &[
    ("3 months", "3_months"),
    ("6 months", "6_months"),
    ("12 months", "12_months"),
    ("2 years", "24_months"),
];

/// Reporting period named in the query, or the default period.
pub fn extract_period(query: &str) -> &'static str {
    first_match(&query.to_lowercase(), PERIOD_PATTERNS).unwrap_or(DEFAULT_PERIOD)
}

fn first_match(lowered: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    table
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, value)| *value)
}

fn extract_params(extractor: ParamExtractor, query: &str) -> Map<String, Value> {
    let lowered = query.to_lowercase();
    let mut params = Map::new();

    match extractor {
        ParamExtractor::Period => {
            params.insert("period".into(), extract_period(query).into());
        }
        ParamExtractor::Report => {
            let report_type = first_match(&lowered, REPORT_TYPES).unwrap_or("p_l");
            params.insert("report_type".into(), report_type.into());
            params.insert("period".into(), extract_period(query).into());
            params.insert("format".into(), "executive".into());
        }
        ParamExtractor::Forecast => {
            let forecast_type = first_match(&lowered, FORECAST_TYPES).unwrap_or("revenue");
            let horizon = first_match(&lowered, HORIZONS).unwrap_or("12_months");
            params.insert("forecast_type".into(), forecast_type.into());
            params.insert("horizon".into(), horizon.into());
            params.insert("scenario".into(), "realistic".into());
        }
    }

    params
}

/// Lexical tool selector over a registry
pub struct ToolSelector {
    registry: Arc<ToolRegistry>,
    intent_patterns: Vec<Regex>,
}

impl ToolSelector {
    pub fn new(registry: Arc<ToolRegistry>) -> Result<Self> {
        let intent_patterns = INTENT_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| AppError::Internal {
                    message: format!("Invalid intent pattern {}: {}", p, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            registry,
            intent_patterns,
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Stage A: does the query look like a request for computed data?
    pub fn should_use_tools(&self, query: &str) -> bool {
        let lowered = query.to_lowercase();
        TOOL_KEYWORDS.iter().any(|k| lowered.contains(k))
            || self.intent_patterns.iter().any(|p| p.is_match(query))
    }

    /// Stage B: calls in registry order, unique by name, at most
    /// [`MAX_TOOL_CALLS`].
    pub fn select(&self, query: &str) -> Vec<ToolCall> {
        let lowered = query.to_lowercase();
        let mut calls: Vec<ToolCall> = Vec::new();

        for entry in self.registry.entries() {
            if calls.len() == MAX_TOOL_CALLS {
                break;
            }
            let name = &entry.definition.name;
            if calls.iter().any(|c| &c.name == name) {
                continue;
            }
            if entry.rule.triggers.iter().any(|t| lowered.contains(t)) {
                calls.push(ToolCall::new(name.clone(), extract_params(entry.rule.extractor, query)));
            }
        }

        tracing::debug!(
            selected = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Tools selected"
        );
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{
        CASH_FLOW_ANALYSIS, EXPENSE_ANALYSIS, FINANCIAL_REPORT, FORECAST, KPIS, REVENUE_ANALYSIS,
    };

    fn selector() -> ToolSelector {
        ToolSelector::new(Arc::new(ToolRegistry::builtin())).unwrap()
    }

    #[test]
    fn test_gate_keywords_and_patterns() {
        let selector = selector();
        assert!(selector.should_use_tools("Please ANALYZE our spend"));
        assert!(selector.should_use_tools("What is our cash flow?"));
        assert!(selector.should_use_tools("show me the KPI dashboard"));
        assert!(selector.should_use_tools("what was the cash balance"));
        assert!(!selector.should_use_tools("Hello, how are you?"));
        assert!(!selector.should_use_tools("Who approves travel?"));
    }

    #[test]
    fn test_cash_flow_query() {
        let calls = selector().select("What's our cash flow for Q2 2025?");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, CASH_FLOW_ANALYSIS);
        assert_eq!(calls[0].parameters["period"], "Q2 2025");
        assert!(calls[0].id.starts_with("tool_"));
    }

    #[test]
    fn test_runway_and_burn_rate_query() {
        let selector = selector();
        let query = "What's our cash runway and burn rate?";
        assert!(selector.should_use_tools(query));

        let calls = selector.select(query);
        assert!(!calls.is_empty() && calls.len() <= MAX_TOOL_CALLS);
        assert_eq!(calls[0].name, CASH_FLOW_ANALYSIS);
        assert_eq!(calls[0].parameters["period"], "Q1 2025");

        let mut names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), calls.len());
    }

    #[test]
    fn test_cap_at_three_in_registry_order() {
        let calls = selector().select("revenue and expense and cash flow and kpi for YTD");
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![CASH_FLOW_ANALYSIS, REVENUE_ANALYSIS, EXPENSE_ANALYSIS]);
        assert!(calls.iter().all(|c| c.parameters["period"] == "YTD"));
    }

    #[test]
    fn test_unique_ids() {
        let calls = selector().select("revenue and expense");
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_report_params() {
        let calls = selector().select("generate a board pack for last 90 days");
        let report = calls.iter().find(|c| c.name == FINANCIAL_REPORT).unwrap();
        assert_eq!(report.parameters["report_type"], "board_pack");
        assert_eq!(report.parameters["period"], "last 90 days");
        assert_eq!(report.parameters["format"], "executive");
    }

    #[test]
    fn test_forecast_params() {
        let calls = selector().select("predict cash over 6 months");
        let forecast = calls.iter().find(|c| c.name == FORECAST).unwrap();
        assert_eq!(forecast.parameters["forecast_type"], "cash_flow");
        assert_eq!(forecast.parameters["horizon"], "6_months");
        assert_eq!(forecast.parameters["scenario"], "realistic");
    }

    #[test]
    fn test_period_extraction() {
        assert_eq!(extract_period("how did q3 2025 go"), "Q3 2025");
        assert_eq!(extract_period("ytd numbers"), "YTD");
        assert_eq!(extract_period("this quarter"), "Q1 2025");
        assert_eq!(extract_period("Current burn"), "Q1 2025");
        assert_eq!(extract_period("anything else"), "Q1 2025");
    }

    #[test]
    fn test_no_trigger_no_calls() {
        assert!(selector().select("hello there").is_empty());
        let calls = selector().select("show kpi ratios");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, KPIS);
    }
}
