//! Analytics module for flashcast
//!
//! Reports are computed on demand from stored records:
//! - Campaign analytics (overview, trends, question/student/group breakdowns, alerts)
//! - Cross-group analytics (per group, with a per-campaign breakdown)
//! - Dashboard statistics and chart data
//! - Per-student history within a campaign
//! - Student directory, cross-campaign profiles and activity figures
//!
//! Each report has a pure `build_*` function over already-loaded records and
//! a `Database` method that loads the records and calls it.

pub mod aggregate;
pub mod alerts;
pub mod campaign;
pub mod dashboard;
pub mod directory;
pub mod filters;
pub mod groups;
pub mod student;

use crate::config::AnalyticsConfig;
use crate::phone::DEFAULT_COUNTRY_CODE;

/// Tunables shared by the report builders.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSettings {
    /// Country code stripped before comparing phone numbers
    pub country_code: String,
    /// Days without activity before a student counts as inactive
    pub inactivity_days: i64,
    /// Length of ranked lists
    pub top_n: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            inactivity_days: 7,
            top_n: 5,
        }
    }
}

impl From<&AnalyticsConfig> for AnalyticsSettings {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            inactivity_days: config.inactivity_days,
            top_n: config.top_n,
        }
    }
}

pub use alerts::{Alert, AlertKind, AlertPriority, AlertSeverity};
pub use campaign::{build_campaign_report, CampaignReport};
pub use dashboard::{ChartPoint, DashboardStats};
pub use directory::{DirectoryEntry, StudentActivity, StudentProfile};
pub use filters::{AnalyticsFilters, Period, TimeWindow};
pub use groups::{build_group_reports, GroupReport};
pub use student::{HistoryStatus, StudentHistory};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_match_config_defaults() {
        assert_eq!(
            AnalyticsSettings::from(&AnalyticsConfig::default()),
            AnalyticsSettings::default()
        );
    }
}
