//! Dashboard analytics for the landing view.
//!
//! Headline totals across all of a user's campaigns, and per-campaign
//! send/answer volumes for the overview chart.

use super::aggregate::mean;
use super::campaign::student_key;
use super::AnalyticsSettings;
use crate::db::{Database, InstanceQuery};
use crate::error::Result;
use crate::types::{Campaign, Group, QuestionInstance};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Grades strictly above this count as good performance in the chart.
pub const GOOD_PERFORMANCE_THRESHOLD: f64 = 6.0;

/// Campaigns shown in the chart when no campaign is selected.
pub const CHART_TOP_CAMPAIGNS: usize = 5;

/// Headline statistics for a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    /// Distinct participants across the groups of active campaigns
    pub total_students: usize,
    pub total_sent: usize,
    /// Answered instances
    pub total_interactions: usize,
    /// Answered over sent, whole percent
    pub response_rate: i64,
    /// Mean raw grade (0-10), one decimal
    pub average_score: f64,
}

impl DashboardStats {
    /// Format the response rate for display (e.g., "62%").
    pub fn format_response_rate(&self) -> String {
        format!("{}%", self.response_rate)
    }
}

/// One bar group in the dashboard chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub campaign_id: String,
    pub campaign_name: String,
    pub sent: usize,
    pub answered: usize,
    /// Answered instances graded above [`GOOD_PERFORMANCE_THRESHOLD`]
    pub good_performance: usize,
}

/// Compute headline statistics.
///
/// `groups` are the user's groups; only those linked to an active campaign
/// contribute participants.
pub fn build_dashboard_stats(
    campaigns: &[Campaign],
    groups: &[Group],
    instances: &[QuestionInstance],
    country_code: &str,
) -> DashboardStats {
    let active: Vec<&Campaign> = campaigns.iter().filter(|c| c.is_active).collect();
    let active_group_ids: HashSet<&str> = active
        .iter()
        .flat_map(|c| c.groups.iter().map(String::as_str))
        .collect();

    let students: HashSet<String> = groups
        .iter()
        .filter(|g| active_group_ids.contains(g.id.as_str()))
        .flat_map(|g| g.participants.iter())
        .map(|p| student_key(p, country_code))
        .filter(|p| !p.is_empty())
        .collect();

    let answered: Vec<&QuestionInstance> = instances.iter().filter(|i| i.is_answered()).collect();
    let scores: Vec<f64> = answered.iter().filter_map(|i| i.score()).collect();

    let response_rate = if instances.is_empty() {
        0
    } else {
        (answered.len() as f64 / instances.len() as f64 * 100.0).round() as i64
    };
    let average_score = mean(scores.iter().sum(), scores.len())
        .map(|m| (m * 10.0).round() / 10.0)
        .unwrap_or(0.0);

    DashboardStats {
        total_campaigns: campaigns.len(),
        active_campaigns: active.len(),
        total_students: students.len(),
        total_sent: instances.len(),
        total_interactions: answered.len(),
        response_rate,
        average_score,
    }
}

/// Per-campaign chart data in campaign order, or the `limit` campaigns with
/// the most sends when a limit is given.
pub fn build_chart_data(
    campaigns: &[Campaign],
    instances: &[QuestionInstance],
    limit: Option<usize>,
) -> Vec<ChartPoint> {
    let mut by_campaign: HashMap<&str, Vec<&QuestionInstance>> = HashMap::new();
    for instance in instances {
        if let Some(id) = instance.campaign_id() {
            by_campaign.entry(id).or_default().push(instance);
        }
    }

    let mut points: Vec<ChartPoint> = campaigns
        .iter()
        .map(|c| {
            let sent = by_campaign.get(c.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let answered: Vec<&&QuestionInstance> = sent.iter().filter(|i| i.is_answered()).collect();
            ChartPoint {
                campaign_id: c.id.clone(),
                campaign_name: c.name.clone(),
                sent: sent.len(),
                answered: answered.len(),
                good_performance: answered
                    .iter()
                    .filter(|i| i.score().is_some_and(|s| s > GOOD_PERFORMANCE_THRESHOLD))
                    .count(),
            }
        })
        .collect();

    if let Some(limit) = limit {
        points.sort_by(|a, b| b.sent.cmp(&a.sent));
        points.truncate(limit);
    }
    points
}

impl Database {
    /// Headline statistics across all of a user's campaigns
    pub fn dashboard_stats(&self, user_id: &str, settings: &AnalyticsSettings) -> Result<DashboardStats> {
        let campaigns = self.list_campaigns(user_id)?;
        let group_ids: Vec<String> = campaigns
            .iter()
            .filter(|c| c.is_active)
            .flat_map(|c| c.groups.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let groups = self.list_groups_by_ids(user_id, &group_ids)?;
        let instances = self.list_question_instances(&InstanceQuery::for_user(user_id))?;

        Ok(build_dashboard_stats(
            &campaigns,
            &groups,
            &instances,
            &settings.country_code,
        ))
    }

    /// Chart data for one campaign, or for the busiest campaigns when
    /// `campaign_id` is `None`.
    pub fn chart_data(&self, user_id: &str, campaign_id: Option<&str>) -> Result<Vec<ChartPoint>> {
        let (campaigns, limit) = match campaign_id {
            Some(id) => (vec![self.get_campaign(id, user_id)?], None),
            None => (self.list_campaigns(user_id)?, Some(CHART_TOP_CAMPAIGNS)),
        };
        let campaign_ids = campaigns.iter().map(|c| c.id.clone()).collect();
        let instances = self
            .list_question_instances(&InstanceQuery::for_user(user_id).campaigns(campaign_ids))?;

        Ok(build_chart_data(&campaigns, &instances, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn campaign(id: &str, active: bool, groups: &[&str]) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: format!("Campaign {id}"),
            description: None,
            is_active: active,
            has_started: false,
            start_date: None,
            end_date: None,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            questions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn group(id: &str, participants: &[&str]) -> Group {
        let now = Utc::now();
        Group {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: id.to_string(),
            description: None,
            participants: participants.iter().map(|s| s.to_string()).collect(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn inst(campaign: &str, grade: Option<&str>) -> QuestionInstance {
        let now = Utc::now();
        QuestionInstance {
            id: crate::types::new_id(),
            user_id: "u1".to_string(),
            campaign: Some(campaign.into()),
            phone_number: "11999999999".to_string(),
            student_name: None,
            question: "Q".to_string(),
            answer: "A".to_string(),
            student_response: None,
            grade: grade.map(str::to_string),
            feedback: None,
            created_at: now,
            answered_at: grade.map(|_| now + Duration::minutes(1)),
            audio_url: None,
        }
    }

    #[test]
    fn test_dashboard_stats() {
        let campaigns = vec![
            campaign("c1", true, &["g1", "g2"]),
            campaign("c2", false, &["g3"]),
        ];
        let groups = vec![
            group("g1", &["5511999999999", "11988887777"]),
            group("g2", &["11999999999"]),
            group("g3", &["11900000000"]),
        ];
        let instances = vec![
            inst("c1", Some("7")),
            inst("c1", Some("8")),
            inst("c1", None),
            inst("c2", Some("oops")),
        ];

        let stats = build_dashboard_stats(&campaigns, &groups, &instances, "55");
        assert_eq!(stats.total_campaigns, 2);
        assert_eq!(stats.active_campaigns, 1);
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.total_sent, 4);
        assert_eq!(stats.total_interactions, 3);
        assert_eq!(stats.response_rate, 75);
        assert_eq!(stats.average_score, 7.5);
        assert_eq!(stats.format_response_rate(), "75%");
    }

    #[test]
    fn test_roster_entries_without_digits_keep_raw_identity() {
        let campaigns = vec![campaign("c1", true, &["g1"])];
        let groups = vec![group("g1", &["  guest ", "guest", "   ", "+55 (11) 99999-9999"])];

        let stats = build_dashboard_stats(&campaigns, &groups, &[], "55");
        assert_eq!(stats.total_students, 2);
    }

    #[test]
    fn test_empty_dashboard() {
        let stats = build_dashboard_stats(&[], &[], &[], "55");
        assert_eq!(stats, DashboardStats::default());
    }

    #[test]
    fn test_chart_data_top_campaigns() {
        let campaigns: Vec<Campaign> = (0..7).map(|i| campaign(&format!("c{i}"), true, &[])).collect();
        let mut instances = Vec::new();
        for i in 0..7 {
            for _ in 0..i {
                instances.push(inst(&format!("c{i}"), Some("7")));
            }
        }
        instances.push(inst("c6", Some("6")));

        let points = build_chart_data(&campaigns, &instances, Some(CHART_TOP_CAMPAIGNS));
        let ids: Vec<&str> = points.iter().map(|p| p.campaign_id.as_str()).collect();
        assert_eq!(ids, vec!["c6", "c5", "c4", "c3", "c2"]);
        assert_eq!(points[0].sent, 7);
        assert_eq!(points[0].good_performance, 6);
    }

    #[test]
    fn test_chart_data_single_campaign_keeps_zero_rows() {
        let campaigns = vec![campaign("c1", true, &[])];
        let points = build_chart_data(&campaigns, &[], None);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].sent, 0);
    }
}
