//! Report filters: explicit date bounds, relative periods, group restriction.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative reporting period.
///
/// Parsed leniently: `7d` and `15d` are recognized, every other token means
/// the 30-day default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Period {
    SevenDays,
    FifteenDays,
    #[default]
    ThirtyDays,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Period::SevenDays => 7,
            Period::FifteenDays => 15,
            Period::ThirtyDays => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::SevenDays => "7d",
            Period::FifteenDays => "15d",
            Period::ThirtyDays => "30d",
        }
    }

    /// Window `[now - days, now + 1 day]`; the day of slack absorbs clock
    /// skew between the sender and this host.
    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: Some(now - Duration::days(self.days())),
            end: Some(now + Duration::days(1)),
        }
    }
}

impl From<&str> for Period {
    fn from(token: &str) -> Self {
        match token.trim() {
            "7d" => Period::SevenDays,
            "15d" => Period::FifteenDays,
            _ => Period::ThirtyDays,
        }
    }
}

impl From<String> for Period {
    fn from(token: String) -> Self {
        Period::from(token.as_str())
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.as_str().to_string()
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive bounds on send time. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Filters accepted by both analytics engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsFilters {
    /// RFC 3339 timestamp or `YYYY-MM-DD` (start of day, UTC)
    #[serde(default)]
    pub start_date: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (end of day, UTC)
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub period: Option<Period>,
    /// Restrict group breakdowns to these ids; empty means all
    #[serde(default)]
    pub groups: Vec<String>,
}

impl AnalyticsFilters {
    pub fn with_period(period: Period) -> Self {
        Self {
            period: Some(period),
            ..Default::default()
        }
    }

    /// Fill in `period` when neither dates nor a period were given.
    pub fn or_default_period(mut self, default: Option<Period>) -> Self {
        if !self.has_dates() && self.period.is_none() {
            self.period = default;
        }
        self
    }

    fn has_dates(&self) -> bool {
        non_empty(&self.start_date).is_some() || non_empty(&self.end_date).is_some()
    }

    /// Resolve the send-time window these filters select.
    ///
    /// Explicit dates win over the period; with neither, there is no time
    /// filter at all.
    pub fn resolve_window(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        if self.has_dates() {
            let start = non_empty(&self.start_date)
                .map(|raw| parse_date(raw, false))
                .transpose()?;
            let end = non_empty(&self.end_date)
                .map(|raw| parse_date(raw, true))
                .transpose()?;
            return Ok(TimeWindow { start, end });
        }

        Ok(self
            .period
            .map(|p| p.window(now))
            .unwrap_or_default())
    }

    /// Whether a group breakdown should include `group_id`.
    pub fn includes_group(&self, group_id: &str) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| g == group_id)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a filter date. A bare calendar date covers the whole day: it maps
/// to midnight as a start bound and to the last microsecond as an end bound.
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_micro_opt(23, 59, 59, 999_999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(naive) = time {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::bad_request(format!("invalid date: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_period_tokens() {
        assert_eq!(Period::from("7d").days(), 7);
        assert_eq!(Period::from("15d").days(), 15);
        assert_eq!(Period::from("30d").days(), 30);
        assert_eq!(Period::from("90d").days(), 30);
        assert_eq!(Period::from("").days(), 30);
    }

    #[test]
    fn test_period_deserializes_leniently() {
        let filters: AnalyticsFilters =
            serde_json::from_str(r#"{"period": "yearly"}"#).unwrap();
        assert_eq!(filters.period, Some(Period::ThirtyDays));
    }

    #[test]
    fn test_no_filters_means_no_window() {
        let window = AnalyticsFilters::default()
            .resolve_window(Utc::now())
            .unwrap();
        assert!(window.is_unbounded());
    }

    #[test]
    fn test_period_window() {
        let now = at("2024-05-20T10:00:00Z");
        let window = AnalyticsFilters::with_period(Period::SevenDays)
            .resolve_window(now)
            .unwrap();
        assert_eq!(window.start, Some(at("2024-05-13T10:00:00Z")));
        assert_eq!(window.end, Some(at("2024-05-21T10:00:00Z")));
    }

    #[test]
    fn test_explicit_dates_win_over_period() {
        let filters = AnalyticsFilters {
            start_date: Some("2024-01-01".to_string()),
            period: Some(Period::SevenDays),
            ..Default::default()
        };
        let window = filters.resolve_window(Utc::now()).unwrap();
        assert_eq!(window.start, Some(at("2024-01-01T00:00:00Z")));
        assert_eq!(window.end, None);
    }

    #[test]
    fn test_date_only_end_covers_the_day() {
        let filters = AnalyticsFilters {
            end_date: Some("2024-01-31".to_string()),
            ..Default::default()
        };
        let end = filters.resolve_window(Utc::now()).unwrap().end.unwrap();
        assert!(end > at("2024-01-31T23:59:59Z"));
        assert!(end < at("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_rfc3339_dates() {
        let filters = AnalyticsFilters {
            start_date: Some("2024-01-01T12:00:00-03:00".to_string()),
            ..Default::default()
        };
        let window = filters.resolve_window(Utc::now()).unwrap();
        assert_eq!(window.start, Some(at("2024-01-01T15:00:00Z")));
    }

    #[test]
    fn test_invalid_date_is_bad_request() {
        let filters = AnalyticsFilters {
            start_date: Some("last tuesday".to_string()),
            ..Default::default()
        };
        let err = filters.resolve_window(Utc::now()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }

    #[test]
    fn test_blank_dates_fall_back_to_period() {
        let filters = AnalyticsFilters {
            start_date: Some("  ".to_string()),
            period: Some(Period::FifteenDays),
            ..Default::default()
        };
        let now = at("2024-05-20T00:00:00Z");
        let window = filters.resolve_window(now).unwrap();
        assert_eq!(window.start, Some(at("2024-05-05T00:00:00Z")));
    }

    #[test]
    fn test_default_period_only_fills_gaps() {
        let filled = AnalyticsFilters::default().or_default_period(Some(Period::SevenDays));
        assert_eq!(filled.period, Some(Period::SevenDays));

        let dated = AnalyticsFilters {
            start_date: Some("2024-01-01".to_string()),
            ..Default::default()
        }
        .or_default_period(Some(Period::SevenDays));
        assert_eq!(dated.period, None);
    }

    #[test]
    fn test_includes_group() {
        let all = AnalyticsFilters::default();
        assert!(all.includes_group("g1"));

        let some = AnalyticsFilters {
            groups: vec!["g2".to_string()],
            ..Default::default()
        };
        assert!(!some.includes_group("g1"));
        assert!(some.includes_group("g2"));
    }
}
