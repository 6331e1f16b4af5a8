//! Catalogue of per-stock datasets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Price adjustment applied by the provider to daily history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjust {
    /// Forward-adjusted.
    #[default]
    Qfq,
    /// Backward-adjusted.
    Hfq,
    /// Unadjusted.
    None,
}

impl Adjust {
    /// Provider parameter value; unadjusted is the empty string.
    pub fn as_param(&self) -> &'static str {
        match self {
            Adjust::Qfq => "qfq",
            Adjust::Hfq => "hfq",
            Adjust::None => "",
        }
    }
}

/// The three statements published by listed companies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialReport {
    BalanceSheet,
    Income,
    CashFlow,
}

impl FinancialReport {
    /// Report name as the provider spells it.
    pub fn provider_name(&self) -> &'static str {
        match self {
            FinancialReport::BalanceSheet => "资产负债表",
            FinancialReport::Income => "利润表",
            FinancialReport::CashFlow => "现金流量表",
        }
    }
}

/// A category of data held per entity.
///
/// Ranged kinds are date-indexed series served through the coverage
/// cache. Everything else is a snapshot that is either absent or whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    /// Daily price history.
    History { adjust: Adjust },
    /// Basic company information, stored as a single record.
    Info,
    /// Dividend and bonus-share distributions.
    Dividends,
    /// Broker research reports with earnings forecasts.
    ResearchReports,
    /// Institutional ratings.
    InstituteRecommendations,
    /// Full history of one valuation indicator, e.g. `市盈率(TTM)`.
    Valuation { indicator: String },
    /// One financial statement.
    Financial { report: FinancialReport },
}

impl DatasetKind {
    /// Whether the dataset is served through the range-covered cache.
    pub fn is_ranged(&self) -> bool {
        matches!(self, DatasetKind::History { .. })
    }

    /// Column holding each row's date, if the dataset has one.
    pub fn date_column(&self) -> Option<&'static str> {
        match self {
            DatasetKind::History { .. } | DatasetKind::ResearchReports => Some("日期"),
            DatasetKind::Dividends => Some("除权除息日"),
            DatasetKind::Valuation { .. } => Some("date"),
            DatasetKind::Info
            | DatasetKind::InstituteRecommendations
            | DatasetKind::Financial { .. } => None,
        }
    }

    /// File stem inside the entity namespace.
    pub fn storage_name(&self) -> String {
        match self {
            DatasetKind::History { adjust } => match adjust {
                Adjust::None => "history_data".to_string(),
                a => format!("history_data_{}", a.as_param()),
            },
            DatasetKind::Info => "info".to_string(),
            DatasetKind::Dividends => "dividend_info".to_string(),
            DatasetKind::ResearchReports => "research_report".to_string(),
            DatasetKind::InstituteRecommendations => "institute_recommendations".to_string(),
            DatasetKind::Valuation { indicator } => {
                format!("valuation_{}", sanitize_file_component(indicator))
            }
            DatasetKind::Financial { report } => {
                format!("financial_{}", sanitize_file_component(report.provider_name()))
            }
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_name())
    }
}

/// Drop parentheses, turn spaces into underscores and neutralize path
/// separators so arbitrary indicator names map to a single file name.
fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .map(|c| match c {
            ' ' | '/' | '\\' | '.' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_names() {
        assert_eq!(
            DatasetKind::History { adjust: Adjust::Qfq }.storage_name(),
            "history_data_qfq"
        );
        assert_eq!(
            DatasetKind::History { adjust: Adjust::None }.storage_name(),
            "history_data"
        );
        assert_eq!(
            DatasetKind::Valuation { indicator: "市盈率(TTM)".into() }.storage_name(),
            "valuation_市盈率TTM"
        );
        assert_eq!(
            DatasetKind::Valuation { indicator: "P/E ratio".into() }.storage_name(),
            "valuation_P_E_ratio"
        );
        assert_eq!(
            DatasetKind::Financial { report: FinancialReport::Income }.storage_name(),
            "financial_利润表"
        );
    }

    #[test]
    fn adjustments_never_share_storage() {
        let names: std::collections::HashSet<_> = [Adjust::Qfq, Adjust::Hfq, Adjust::None]
            .into_iter()
            .map(|adjust| DatasetKind::History { adjust }.storage_name())
            .collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn only_history_is_ranged() {
        assert!(DatasetKind::History { adjust: Adjust::Hfq }.is_ranged());
        assert!(!DatasetKind::Dividends.is_ranged());
        assert!(!DatasetKind::Info.is_ranged());
    }
}
