//! Alert rules attached to campaign reports.
//!
//! Rules are evaluated in a fixed order and each emits at most one alert.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Display severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Info,
    Error,
}

/// Triage priority of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Medium,
    High,
}

/// What triggered an alert, with the numbers it reports.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// Average score (0-100) below 50
    LowPerformance { average_score: f64 },
    /// Students in the lowest segment
    StudentsNeedHelp { count: usize },
    /// Nobody answered anything
    NoParticipation,
    /// Under half of the roster answered
    LowParticipationRate { participation_rate: f64 },
    /// Under half of the sent questions were answered
    LowResponseRate { completion_rate: f64 },
}

impl AlertKind {
    /// Stable identifier, safe for clients to key on.
    pub fn id(&self) -> &'static str {
        match self {
            AlertKind::LowPerformance { .. } => "low-performance",
            AlertKind::StudentsNeedHelp { .. } => "students-need-help",
            AlertKind::NoParticipation => "no-participation",
            AlertKind::LowParticipationRate { .. } => "low-participation-rate",
            AlertKind::LowResponseRate { .. } => "low-response-rate",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::LowPerformance { .. } | AlertKind::NoParticipation => AlertSeverity::Warning,
            AlertKind::StudentsNeedHelp { .. } => AlertSeverity::Error,
            AlertKind::LowParticipationRate { .. } | AlertKind::LowResponseRate { .. } => {
                AlertSeverity::Info
            }
        }
    }

    pub fn priority(&self) -> AlertPriority {
        match self {
            AlertKind::LowPerformance { .. }
            | AlertKind::StudentsNeedHelp { .. }
            | AlertKind::LowResponseRate { .. } => AlertPriority::High,
            AlertKind::NoParticipation | AlertKind::LowParticipationRate { .. } => {
                AlertPriority::Medium
            }
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::LowPerformance { .. } => "Below-Average Performance",
            AlertKind::StudentsNeedHelp { .. } => "Students Struggling",
            AlertKind::NoParticipation => "No Participation",
            AlertKind::LowParticipationRate { .. } => "Low Adhesion",
            AlertKind::LowResponseRate { .. } => "Low Response Rate",
        }
    }

    pub fn description(&self) -> String {
        match self {
            AlertKind::LowPerformance { average_score } => format!(
                "The overall average score ({}%) is below expectations. Consider reviewing the content.",
                average_score.round()
            ),
            AlertKind::StudentsNeedHelp { count } => format!(
                "{} student(s) with low grades need special attention.",
                count
            ),
            AlertKind::NoParticipation => {
                "This campaign has no participating students yet.".to_string()
            }
            AlertKind::LowParticipationRate { participation_rate } => format!(
                "Only {}% of the group participants have interacted.",
                participation_rate.round()
            ),
            AlertKind::LowResponseRate { completion_rate } => format!(
                "Only {}% of the questions sent were answered.",
                completion_rate.round()
            ),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            AlertKind::LowPerformance { .. } => "Review campaign content",
            AlertKind::StudentsNeedHelp { .. } => "Review struggling students",
            AlertKind::NoParticipation => "Check how the campaign is being promoted",
            AlertKind::LowParticipationRate { .. } => "Encourage more participation",
            AlertKind::LowResponseRate { .. } => "Check that questions are being delivered",
        }
    }
}

/// A generated alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn id(&self) -> &'static str {
        self.kind.id()
    }
}

#[derive(Serialize)]
struct AlertView<'a> {
    id: &'static str,
    #[serde(rename = "type")]
    severity: AlertSeverity,
    title: &'static str,
    description: String,
    action: &'static str,
    priority: AlertPriority,
    timestamp: &'a DateTime<Utc>,
}

impl Serialize for Alert {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AlertView {
            id: self.kind.id(),
            severity: self.kind.severity(),
            title: self.kind.title(),
            description: self.kind.description(),
            action: self.kind.action(),
            priority: self.kind.priority(),
            timestamp: &self.timestamp,
        }
        .serialize(serializer)
    }
}

/// Report figures the alert rules look at.
#[derive(Debug, Clone, Default)]
pub struct AlertInputs {
    /// 0-100
    pub average_score: f64,
    pub needs_help: usize,
    /// Distinct answering students
    pub total_students: usize,
    pub participation_rate: f64,
    pub total_group_participants: usize,
    pub completion_rate: f64,
    pub total_sent: usize,
}

/// Evaluate every rule in order.
pub fn evaluate_alerts(inputs: &AlertInputs, now: DateTime<Utc>) -> Vec<Alert> {
    let mut kinds = Vec::new();

    if inputs.average_score < 50.0 {
        kinds.push(AlertKind::LowPerformance {
            average_score: inputs.average_score,
        });
    }
    if inputs.needs_help > 0 {
        kinds.push(AlertKind::StudentsNeedHelp {
            count: inputs.needs_help,
        });
    }
    if inputs.total_students == 0 {
        kinds.push(AlertKind::NoParticipation);
    }
    if inputs.participation_rate < 50.0 && inputs.total_group_participants > 0 {
        kinds.push(AlertKind::LowParticipationRate {
            participation_rate: inputs.participation_rate,
        });
    }
    if inputs.completion_rate < 50.0 && inputs.total_sent > 0 {
        kinds.push(AlertKind::LowResponseRate {
            completion_rate: inputs.completion_rate,
        });
    }

    kinds
        .into_iter()
        .map(|kind| Alert {
            kind,
            timestamp: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(alerts: &[Alert]) -> Vec<&'static str> {
        alerts.iter().map(Alert::id).collect()
    }

    #[test]
    fn test_healthy_report_has_no_alerts() {
        let inputs = AlertInputs {
            average_score: 80.0,
            total_students: 5,
            participation_rate: 90.0,
            total_group_participants: 6,
            completion_rate: 70.0,
            total_sent: 10,
            ..Default::default()
        };
        assert!(evaluate_alerts(&inputs, Utc::now()).is_empty());
    }

    #[test]
    fn test_every_rule_fires_in_order() {
        let inputs = AlertInputs {
            average_score: 0.0,
            needs_help: 2,
            total_students: 0,
            participation_rate: 0.0,
            total_group_participants: 4,
            completion_rate: 0.0,
            total_sent: 3,
        };
        assert_eq!(
            ids(&evaluate_alerts(&inputs, Utc::now())),
            vec![
                "low-performance",
                "students-need-help",
                "no-participation",
                "low-participation-rate",
                "low-response-rate"
            ]
        );
    }

    #[test]
    fn test_empty_roster_suppresses_adhesion_alert() {
        let inputs = AlertInputs {
            average_score: 90.0,
            total_students: 1,
            participation_rate: 0.0,
            total_group_participants: 0,
            completion_rate: 100.0,
            total_sent: 1,
            ..Default::default()
        };
        assert!(evaluate_alerts(&inputs, Utc::now()).is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let alert = Alert {
            kind: AlertKind::LowResponseRate {
                completion_rate: 33.33,
            },
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["id"], "low-response-rate");
        assert_eq!(value["type"], "info");
        assert_eq!(value["priority"], "high");
        assert_eq!(
            value["description"],
            "Only 33% of the questions sent were answered."
        );
        assert!(value["timestamp"].is_string());
        assert!(value["action"].is_string());
    }

    #[test]
    fn test_priority_per_rule() {
        assert_eq!(AlertKind::NoParticipation.priority(), AlertPriority::Medium);
        assert_eq!(
            AlertKind::LowParticipationRate {
                participation_rate: 10.0
            }
            .priority(),
            AlertPriority::Medium
        );
        assert_eq!(
            AlertKind::LowPerformance { average_score: 1.0 }.priority(),
            AlertPriority::High
        );
        assert!(AlertPriority::High > AlertPriority::Medium);
        assert_eq!(
            serde_json::to_value(AlertPriority::Medium).unwrap(),
            serde_json::json!("medium")
        );
    }

    #[test]
    fn test_needs_help_description_interpolates_count() {
        let kind = AlertKind::StudentsNeedHelp { count: 3 };
        assert_eq!(kind.severity(), AlertSeverity::Error);
        assert!(kind.description().starts_with("3 student(s)"));
    }
}
