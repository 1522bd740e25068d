//! Fixture financial figures
//!
//! A small book of per-period figures the base executor answers from.
//! Periods without their own entry read the Q1 2025 figures.

use super::registry::DEFAULT_PERIOD;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CashFlowFigures {
    pub operating: f64,
    pub investing: f64,
    pub financing: f64,
    pub net_change: f64,
    pub beginning_balance: f64,
    pub ending_balance: f64,
    /// Monthly
    pub burn_rate: f64,
    /// Months
    pub runway: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueFigures {
    pub total: f64,
    pub new_customers: f64,
    pub expansion: f64,
    pub renewal: f64,
    pub growth_rate: f64,
    pub mrr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseFigures {
    pub total: f64,
    pub sales_marketing: f64,
    pub rd: f64,
    pub general_admin: f64,
    pub customer_success: f64,
    pub other: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiFigures {
    pub gross_margin: f64,
    pub operating_margin: f64,
    pub net_margin: f64,
    pub current_ratio: f64,
    pub quick_ratio: f64,
    pub roe: f64,
    pub roa: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFigures {
    pub cac: f64,
    pub ltv: f64,
    pub churn_rate: f64,
    pub retention_rate: f64,
    pub total_customers: u64,
    pub new_customers: u64,
}

/// Everything the base executor knows about one period
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodFigures {
    pub cash_flow: CashFlowFigures,
    pub revenue: RevenueFigures,
    pub expenses: ExpenseFigures,
    pub kpis: KpiFigures,
    pub customers: CustomerFigures,
}

impl PeriodFigures {
    pub fn q1_2025() -> Self {
        Self {
            cash_flow: CashFlowFigures {
                operating: 456_000.0,
                investing: -120_000.0,
                financing: 0.0,
                net_change: 336_000.0,
                beginning_balance: 1_200_000.0,
                ending_balance: 1_536_000.0,
                burn_rate: 150_000.0,
                runway: 10.2,
            },
            revenue: RevenueFigures {
                total: 2_400_000.0,
                new_customers: 1_200_000.0,
                expansion: 720_000.0,
                renewal: 480_000.0,
                growth_rate: 0.15,
                mrr: 800_000.0,
            },
            expenses: ExpenseFigures {
                total: 1_968_000.0,
                sales_marketing: 720_000.0,
                rd: 480_000.0,
                general_admin: 360_000.0,
                customer_success: 240_000.0,
                other: 168_000.0,
            },
            kpis: KpiFigures {
                gross_margin: 0.68,
                operating_margin: 0.18,
                net_margin: 0.15,
                current_ratio: 2.1,
                quick_ratio: 1.8,
                roe: 0.12,
                roa: 0.08,
            },
            customers: CustomerFigures {
                cac: 180.0,
                ltv: 2400.0,
                churn_rate: 0.032,
                retention_rate: 0.968,
                total_customers: 1250,
                new_customers: 125,
            },
        }
    }
}

/// Per-period fixture figures with a Q1 2025 fallback
#[derive(Debug, Clone)]
pub struct FixtureBook {
    periods: HashMap<String, PeriodFigures>,
    fallback: PeriodFigures,
}

impl FixtureBook {
    pub fn standard() -> Self {
        let q1 = PeriodFigures::q1_2025();
        let mut periods = HashMap::new();
        periods.insert(DEFAULT_PERIOD.to_string(), q1.clone());
        Self {
            periods,
            fallback: q1,
        }
    }

    pub fn with_period(mut self, period: impl Into<String>, figures: PeriodFigures) -> Self {
        self.periods.insert(period.into(), figures);
        self
    }

    pub fn figures(&self, period: &str) -> &PeriodFigures {
        self.periods.get(period).unwrap_or(&self.fallback)
    }
}

impl Default for FixtureBook {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_period_reads_q1() {
        let book = FixtureBook::standard();
        assert_eq!(book.figures("Q4 2025"), book.figures("Q1 2025"));
        assert_eq!(book.figures("Q1 2025").revenue.total, 2_400_000.0);
    }

    #[test]
    fn test_fixture_figures_are_consistent() {
        let q1 = PeriodFigures::q1_2025();
        let cf = &q1.cash_flow;
        assert_eq!(cf.operating + cf.investing + cf.financing, cf.net_change);
        assert_eq!(cf.beginning_balance + cf.net_change, cf.ending_balance);
        let r = &q1.revenue;
        assert_eq!(r.new_customers + r.expansion + r.renewal, r.total);
        let e = &q1.expenses;
        assert_eq!(
            e.sales_marketing + e.rd + e.general_admin + e.customer_success + e.other,
            e.total
        );
    }

    #[test]
    fn test_custom_period() {
        let mut q2 = PeriodFigures::q1_2025();
        q2.revenue.total = 2_800_000.0;
        let book = FixtureBook::standard().with_period("Q2 2025", q2);
        assert_eq!(book.figures("Q2 2025").revenue.total, 2_800_000.0);
        assert_eq!(book.figures("Q1 2025").revenue.total, 2_400_000.0);
    }
}
