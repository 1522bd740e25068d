//! Tool catalog
//!
//! Every tool is registered once with its parameter schema and the rule the
//! selector uses to pick it. Adding a tool means adding one entry here and a
//! handler in the executors.

use finsight_common::errors::{AppError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const CASH_FLOW_ANALYSIS: &str = "get_cash_flow_analysis";
pub const REVENUE_ANALYSIS: &str = "get_revenue_analysis";
pub const EXPENSE_ANALYSIS: &str = "get_expense_analysis";
pub const FINANCIAL_REPORT: &str = "generate_financial_report";
pub const VARIANCE_ANALYSIS: &str = "perform_variance_analysis";
pub const FORECAST: &str = "create_forecast";
pub const KPIS: &str = "calculate_kpis";
pub const CUSTOMER_METRICS: &str = "analyze_customer_metrics";

/// Reporting periods every period-scoped tool accepts
pub const PERIODS: [&str; 7] = [
    "Q1 2025",
    "Q2 2025",
    "Q3 2025",
    "Q4 2025",
    "last 30 days",
    "last 90 days",
    "YTD",
];

/// Period used when nothing more specific is known
pub const DEFAULT_PERIOD: &str = "Q1 2025";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    CashFlow,
    Revenue,
    Expenses,
    Reporting,
    Analysis,
    Forecasting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Boolean,
    Number,
}

impl ParameterKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Number => value.is_number(),
        }
    }
}

/// A single declared parameter
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    fn string(description: &str) -> Self {
        Self {
            kind: ParameterKind::String,
            description: description.to_string(),
            enum_values: None,
            default: None,
        }
    }

    fn one_of(description: &str, values: &[&str]) -> Self {
        Self {
            enum_values: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Self::string(description)
        }
    }

    /// Period enum defaulting to [`DEFAULT_PERIOD`]
    fn period(description: &str) -> Self {
        Self::one_of(description, &PERIODS).with_default(DEFAULT_PERIOD)
    }

    fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// JSON-schema style parameter object
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: &'static str,
    pub properties: BTreeMap<String, ParameterSpec>,
    pub required: Vec<String>,
}

impl ParameterSchema {
    fn new(properties: Vec<(&str, ParameterSpec)>, required: &[&str]) -> Self {
        Self {
            schema_type: "object",
            properties: properties
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
            required: required.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Public description of a callable tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
    pub category: ToolCategory,
}

impl ToolDefinition {
    /// Validate caller parameters and fill declared defaults.
    ///
    /// Missing required values, values of the wrong JSON type and values
    /// outside a declared enum are rejected. Undeclared keys pass through.
    pub fn prepare(&self, parameters: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut prepared = parameters.clone();

        for (name, spec) in &self.parameters.properties {
            let missing = prepared.get(name).map_or(true, Value::is_null);
            if missing {
                match &spec.default {
                    Some(default) => {
                        prepared.insert(name.clone(), default.clone());
                    }
                    None => {
                        prepared.remove(name);
                    }
                }
            }
        }

        for required in &self.parameters.required {
            if !prepared.contains_key(required) {
                return Err(self.invalid(format!("missing required parameter '{}'", required)));
            }
        }

        for (name, spec) in &self.parameters.properties {
            let Some(value) = prepared.get(name) else {
                continue;
            };
            if !spec.kind.accepts(value) {
                return Err(self.invalid(format!(
                    "parameter '{}' must be a {:?}",
                    name, spec.kind
                )));
            }
            if let (Some(allowed), Some(text)) = (&spec.enum_values, value.as_str()) {
                if !allowed.iter().any(|a| a == text) {
                    return Err(self.invalid(format!(
                        "parameter '{}' must be one of: {}",
                        name,
                        allowed.join(", ")
                    )));
                }
            }
        }

        Ok(prepared)
    }

    fn invalid(&self, message: String) -> AppError {
        AppError::InvalidToolParameters {
            tool: self.name.clone(),
            message,
        }
    }
}

/// How the selector derives parameters for a chosen tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamExtractor {
    /// `{ period }`
    Period,
    /// `{ report_type, period, format }`
    Report,
    /// `{ forecast_type, horizon, scenario }`
    Forecast,
}

/// Substring triggers and parameter extraction for one tool
#[derive(Debug, Clone)]
pub struct SelectionRule {
    pub triggers: &'static [&'static str],
    pub extractor: ParamExtractor,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub definition: ToolDefinition,
    pub rule: SelectionRule,
}

/// Ordered tool catalog. Selection follows registry order.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    entries: Vec<RegistryEntry>,
}

impl ToolRegistry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    /// The eight built-in financial analysis tools
    pub fn builtin() -> Self {
        let entry = |name: &str,
                     description: &str,
                     category: ToolCategory,
                     parameters: ParameterSchema,
                     triggers: &'static [&'static str],
                     extractor: ParamExtractor| RegistryEntry {
            definition: ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
                category,
            },
            rule: SelectionRule { triggers, extractor },
        };

        Self::new(vec![
            entry(
                CASH_FLOW_ANALYSIS,
                "Analyze current cash flow position, runway, and burn rate",
                ToolCategory::CashFlow,
                ParameterSchema::new(
                    vec![
                        (
                            "period",
                            ParameterSpec::period(
                                "Time period for analysis (e.g., 'Q1 2025', 'last 30 days')",
                            ),
                        ),
                        (
                            "include_forecast",
                            ParameterSpec {
                                kind: ParameterKind::Boolean,
                                description: "Include cash flow forecast".to_string(),
                                enum_values: None,
                                default: Some(Value::Bool(true)),
                            },
                        ),
                    ],
                    &["period"],
                ),
                &["cash flow", "runway", "burn rate", "cash position"],
                ParamExtractor::Period,
            ),
            entry(
                REVENUE_ANALYSIS,
                "Analyze revenue performance, trends, and drivers",
                ToolCategory::Revenue,
                ParameterSchema::new(
                    vec![
                        ("period", ParameterSpec::period("Time period for analysis")),
                        (
                            "breakdown",
                            ParameterSpec::one_of(
                                "Revenue breakdown type",
                                &["by_source", "by_customer", "by_product", "by_region"],
                            )
                            .with_default("by_source"),
                        ),
                    ],
                    &["period"],
                ),
                &["revenue", "sales", "mrr", "growth"],
                ParamExtractor::Period,
            ),
            entry(
                EXPENSE_ANALYSIS,
                "Analyze expense trends, categories, and optimization opportunities",
                ToolCategory::Expenses,
                ParameterSchema::new(
                    vec![
                        ("period", ParameterSpec::period("Time period for analysis")),
                        (
                            "category",
                            ParameterSpec::one_of(
                                "Expense category to focus on",
                                &["all", "operating", "sales_marketing", "rd", "general_admin"],
                            )
                            .with_default("all"),
                        ),
                    ],
                    &["period"],
                ),
                &["expense", "cost", "spending", "budget"],
                ParamExtractor::Period,
            ),
            entry(
                FINANCIAL_REPORT,
                "Generate comprehensive financial reports",
                ToolCategory::Reporting,
                ParameterSchema::new(
                    vec![
                        (
                            "report_type",
                            ParameterSpec::one_of(
                                "Type of financial report",
                                &[
                                    "p_l",
                                    "balance_sheet",
                                    "cash_flow",
                                    "kpi_dashboard",
                                    "board_pack",
                                    "monthly_summary",
                                ],
                            ),
                        ),
                        ("period", ParameterSpec::period("Reporting period")),
                        (
                            "format",
                            ParameterSpec::one_of(
                                "Output format",
                                &["summary", "detailed", "executive"],
                            )
                            .with_default("executive"),
                        ),
                    ],
                    &["report_type", "period"],
                ),
                &["report", "generate", "create", "board pack"],
                ParamExtractor::Report,
            ),
            entry(
                VARIANCE_ANALYSIS,
                "Compare actual vs budget/forecast performance",
                ToolCategory::Analysis,
                ParameterSchema::new(
                    vec![
                        ("period", ParameterSpec::period("Analysis period")),
                        (
                            "metric",
                            ParameterSpec::one_of(
                                "Metric to analyze",
                                &["revenue", "expenses", "cash_flow", "all"],
                            )
                            .with_default("all"),
                        ),
                        (
                            "threshold",
                            ParameterSpec {
                                kind: ParameterKind::Number,
                                description: "Variance threshold percentage".to_string(),
                                enum_values: None,
                                default: Some(Value::from(5)),
                            },
                        ),
                    ],
                    &["period"],
                ),
                &["variance", "compare", "actual vs", "budget vs"],
                ParamExtractor::Period,
            ),
            entry(
                FORECAST,
                "Generate financial forecasts and projections",
                ToolCategory::Forecasting,
                ParameterSchema::new(
                    vec![
                        (
                            "forecast_type",
                            ParameterSpec::one_of(
                                "Type of forecast",
                                &["revenue", "cash_flow", "expenses", "comprehensive"],
                            ),
                        ),
                        (
                            "horizon",
                            ParameterSpec::one_of(
                                "Forecast horizon",
                                &["3_months", "6_months", "12_months", "24_months"],
                            )
                            .with_default("12_months"),
                        ),
                        (
                            "scenario",
                            ParameterSpec::one_of(
                                "Forecast scenario",
                                &["conservative", "realistic", "optimistic"],
                            )
                            .with_default("realistic"),
                        ),
                    ],
                    &["forecast_type", "horizon"],
                ),
                &["forecast", "projection", "predict", "future"],
                ParamExtractor::Forecast,
            ),
            entry(
                KPIS,
                "Calculate key financial performance indicators",
                ToolCategory::Analysis,
                ParameterSchema::new(
                    vec![
                        ("period", ParameterSpec::period("Calculation period")),
                        (
                            "kpi_group",
                            ParameterSpec::one_of(
                                "KPI group to calculate",
                                &["profitability", "liquidity", "efficiency", "growth", "all"],
                            )
                            .with_default("all"),
                        ),
                    ],
                    &["period"],
                ),
                &["kpi", "metric", "ratio", "performance"],
                ParamExtractor::Period,
            ),
            entry(
                CUSTOMER_METRICS,
                "Analyze customer acquisition, retention, and lifetime value",
                ToolCategory::Analysis,
                ParameterSchema::new(
                    vec![
                        ("period", ParameterSpec::period("Analysis period")),
                        (
                            "metric",
                            ParameterSpec::one_of(
                                "Customer metric to analyze",
                                &["cac", "ltv", "churn", "retention", "all"],
                            )
                            .with_default("all"),
                        ),
                    ],
                    &["period"],
                ),
                &["customer", "cac", "ltv", "churn", "retention"],
                ParamExtractor::Period,
            ),
        ])
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.entries.iter().map(|e| &e.definition)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
