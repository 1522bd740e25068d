//! Financial tools
//!
//! Registry of tool definitions, lexical selection, and the fixture and
//! live-data executors.

pub mod accounting;
pub mod executor;
pub mod fixtures;
pub mod live;
pub mod registry;
pub mod selector;

pub use accounting::{period_to_range, AccountingSource, DateRange, FinancialSnapshot, HttpAccountingSource};
pub use executor::{
    prepare_call, DataSource, FixtureToolExecutor, ToolCall, ToolExecutor, ToolResult,
    ToolResultMetadata,
};
pub use fixtures::{FixtureBook, PeriodFigures};
pub use live::{FreshnessCache, LiveDataToolExecutor};
pub use registry::{
    ParameterKind, ParameterSchema, ParameterSpec, ToolCategory, ToolDefinition, ToolRegistry,
    DEFAULT_PERIOD, PERIODS,
};
pub use selector::{extract_period, ToolSelector, MAX_TOOL_CALLS};
