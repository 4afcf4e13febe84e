//! Cross-group analytics: the user's question instances bucketed by group.
//!
//! An instance counts toward a group when its campaign links the group and
//! its normalized phone number is on the group's normalized roster. An
//! instance can count toward several groups.

use super::aggregate::{Accumulator, AccumulatedOverview};
use super::filters::AnalyticsFilters;
use super::AnalyticsSettings;
use crate::db::{Database, InstanceQuery};
use crate::error::Result;
use crate::phone::normalize_phone_with;
use crate::types::{Campaign, Group, QuestionInstance};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Analytics for one group across the campaigns that target it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub group: GroupInfo,
    pub overview: AccumulatedOverview,
    /// Campaigns linking this group, sorted by name
    pub campaigns: Vec<GroupCampaignReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub total_participants: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCampaignReport {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub overview: AccumulatedOverview,
}

struct GroupBucket<'a> {
    group: &'a Group,
    roster: HashSet<String>,
    campaigns: Vec<&'a Campaign>,
    total: Accumulator,
    by_campaign: HashMap<&'a str, Accumulator>,
}

fn sort_key(name: &str, id: &str) -> (String, String) {
    (name.to_lowercase(), id.to_string())
}

/// Build one report per group linked to any of `campaigns`.
///
/// `groups` must already be restricted to the owning user; links to groups
/// not in `groups` are ignored.
pub fn build_group_reports(
    campaigns: &[Campaign],
    groups: &[Group],
    instances: &[QuestionInstance],
    filters: &AnalyticsFilters,
    settings: &AnalyticsSettings,
) -> Vec<GroupReport> {
    let country_code = settings.country_code.as_str();

    let mut buckets: HashMap<&str, GroupBucket<'_>> = groups
        .iter()
        .filter(|g| filters.includes_group(&g.id))
        .map(|g| {
            let roster = g
                .participants
                .iter()
                .map(|p| normalize_phone_with(p, country_code))
                .filter(|p| !p.is_empty())
                .collect();
            (
                g.id.as_str(),
                GroupBucket {
                    group: g,
                    roster,
                    campaigns: Vec::new(),
                    total: Accumulator::new(),
                    by_campaign: HashMap::new(),
                },
            )
        })
        .collect();

    // campaign -> linked groups that made it into a bucket
    let mut campaign_groups: HashMap<&str, Vec<&str>> = HashMap::new();
    for campaign in campaigns {
        let mut linked = Vec::new();
        for group_id in &campaign.groups {
            if let Some(bucket) = buckets.get_mut(group_id.as_str()) {
                if !bucket.campaigns.iter().any(|c| c.id == campaign.id) {
                    bucket.campaigns.push(campaign);
                }
                linked.push(group_id.as_str());
            }
        }
        campaign_groups.insert(campaign.id.as_str(), linked);
    }

    for instance in instances {
        let Some(campaign_id) = instance.campaign_id() else {
            continue;
        };
        let Some((campaign_key, group_ids)) = campaign_groups.get_key_value(campaign_id) else {
            continue;
        };
        let phone = normalize_phone_with(&instance.phone_number, country_code);
        if phone.is_empty() {
            continue;
        }

        for group_id in group_ids {
            let Some(bucket) = buckets.get_mut(group_id) else {
                continue;
            };
            if !bucket.roster.contains(&phone) {
                continue;
            }
            bucket.total.record(&phone, instance);
            bucket
                .by_campaign
                .entry(*campaign_key)
                .or_default()
                .record(&phone, instance);
        }
    }

    let mut reports: Vec<(String, String, GroupReport)> = buckets
        .into_values()
        .filter(|b| !b.campaigns.is_empty())
        .map(|b| {
            let roster_size = b.group.participants.len();

            let mut campaigns: Vec<&Campaign> = b.campaigns.clone();
            campaigns.sort_by_key(|c| sort_key(&c.name, &c.id));
            let campaigns = campaigns
                .into_iter()
                .map(|c| GroupCampaignReport {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    is_active: c.is_active,
                    start_date: c.start_date,
                    end_date: c.end_date,
                    overview: b
                        .by_campaign
                        .get(c.id.as_str())
                        .map(|acc| acc.overview(roster_size))
                        .unwrap_or_else(|| Accumulator::new().overview(roster_size)),
                })
                .collect();

            let (name_key, id_key) = sort_key(&b.group.name, &b.group.id);
            let report = GroupReport {
                group: GroupInfo {
                    id: b.group.id.clone(),
                    name: b.group.name.clone(),
                    is_active: b.group.is_active,
                    total_participants: roster_size,
                },
                overview: b.total.overview(roster_size),
                campaigns,
            };
            (name_key, id_key, report)
        })
        .collect();

    reports.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    reports.into_iter().map(|(_, _, r)| r).collect()
}

impl Database {
    /// Cross-group analytics for every group linked to the user's campaigns.
    ///
    /// Returns an empty list when the user has no campaigns.
    pub fn group_analytics(
        &self,
        user_id: &str,
        filters: &AnalyticsFilters,
        settings: &AnalyticsSettings,
        now: DateTime<Utc>,
    ) -> Result<Vec<GroupReport>> {
        let campaigns = self.list_campaigns(user_id)?;
        if campaigns.is_empty() {
            return Ok(Vec::new());
        }
        let window = filters.resolve_window(now)?;

        let group_ids: Vec<String> = campaigns
            .iter()
            .flat_map(|c| c.groups.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let groups = self.list_groups_by_ids(user_id, &group_ids)?;

        let campaign_ids = campaigns.iter().map(|c| c.id.clone()).collect();
        let instances = self.list_question_instances(
            &InstanceQuery::for_user(user_id)
                .campaigns(campaign_ids)
                .created_between(window.start, window.end),
        )?;

        tracing::debug!(
            user_id,
            campaigns = campaigns.len(),
            groups = groups.len(),
            instances = instances.len(),
            "Building group reports"
        );

        Ok(build_group_reports(
            &campaigns, &groups, &instances, filters, settings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign(id: &str, name: &str, groups: &[&str]) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            description: None,
            is_active: true,
            has_started: true,
            start_date: None,
            end_date: None,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            questions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn group(id: &str, name: &str, participants: &[&str]) -> Group {
        let now = Utc::now();
        Group {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            description: None,
            participants: participants.iter().map(|s| s.to_string()).collect(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn inst(campaign: &str, phone: &str, grade: Option<&str>) -> QuestionInstance {
        let now = Utc::now();
        QuestionInstance {
            id: crate::types::new_id(),
            user_id: "u1".to_string(),
            campaign: Some(campaign.into()),
            phone_number: phone.to_string(),
            student_name: None,
            question: "Q".to_string(),
            answer: "A".to_string(),
            student_response: None,
            grade: grade.map(str::to_string),
            feedback: None,
            created_at: now,
            answered_at: grade.map(|_| now + Duration::minutes(3)),
            audio_url: None,
        }
    }

    fn build(
        campaigns: &[Campaign],
        groups: &[Group],
        instances: &[QuestionInstance],
    ) -> Vec<GroupReport> {
        build_group_reports(
            campaigns,
            groups,
            instances,
            &AnalyticsFilters::default(),
            &AnalyticsSettings::default(),
        )
    }

    #[test]
    fn test_roster_normalization_scenario() {
        let campaigns = vec![campaign("c1", "Spring", &["g1"])];
        let groups = vec![group("g1", "Class", &["5511988887777", "11977776666"])];
        let instances = vec![inst("c1", "11988887777", Some("8"))];

        let reports = build(&campaigns, &groups, &instances);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].overview.total_students, 1);
        assert_eq!(reports[0].overview.participation_rate, 50.0);
        assert_eq!(reports[0].overview.average_score, 80.0);
        assert_eq!(reports[0].group.total_participants, 2);
    }

    #[test]
    fn test_non_members_and_unlinked_campaigns_are_skipped() {
        let campaigns = vec![
            campaign("c1", "Spring", &["g1"]),
            campaign("c2", "Orphan", &[]),
        ];
        let groups = vec![group("g1", "Class", &["11988887777"])];
        let instances = vec![
            inst("c1", "11900000000", Some("5")),
            inst("c2", "11988887777", Some("5")),
            inst("c1", "no digits", None),
        ];

        let reports = build(&campaigns, &groups, &instances);
        assert_eq!(reports[0].overview.sent_questions, 0);
        assert_eq!(reports[0].overview.completion_rate, 0.0);
    }

    #[test]
    fn test_instance_counts_toward_every_linked_group() {
        let campaigns = vec![campaign("c1", "Spring", &["g1", "g2"])];
        let groups = vec![
            group("g1", "beta", &["11988887777"]),
            group("g2", "Alpha", &["+55 (11) 98888-7777", "11977776666"]),
        ];
        let instances = vec![inst("c1", "11988887777", Some("10"))];

        let reports = build(&campaigns, &groups, &instances);
        let names: Vec<&str> = reports.iter().map(|r| r.group.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta"]);
        assert_eq!(reports[0].overview.participation_rate, 50.0);
        assert_eq!(reports[1].overview.participation_rate, 100.0);
    }

    #[test]
    fn test_per_campaign_breakdown() {
        let campaigns = vec![
            campaign("c2", "zeta", &["g1"]),
            campaign("c1", "Alpha", &["g1"]),
        ];
        let groups = vec![group("g1", "Class", &["1111111111", "2222222222"])];
        let instances = vec![
            inst("c1", "1111111111", Some("6")),
            inst("c1", "2222222222", None),
            inst("c2", "2222222222", Some("9")),
        ];

        let reports = build(&campaigns, &groups, &instances);
        let report = &reports[0];
        assert_eq!(report.overview.sent_questions, 3);
        assert_eq!(report.overview.answered_questions, 2);
        assert_eq!(report.overview.total_students, 2);
        assert_eq!(report.overview.average_score, 75.0);

        let names: Vec<&str> = report.campaigns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
        assert_eq!(report.campaigns[0].overview.completion_rate, 50.0);
        assert_eq!(report.campaigns[0].overview.total_students_received, 2);
        assert_eq!(report.campaigns[1].overview.average_score, 90.0);
        assert_eq!(report.campaigns[1].overview.average_response_time, "3min");
    }

    #[test]
    fn test_groups_without_campaign_links_are_omitted() {
        let campaigns = vec![campaign("c1", "Spring", &["g1", "missing"])];
        let groups = vec![group("g1", "Linked", &[]), group("g2", "Unlinked", &["1"])];
        let reports = build(&campaigns, &groups, &[]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].group.id, "g1");
        assert_eq!(reports[0].overview.participation_rate, 0.0);
        assert_eq!(reports[0].campaigns.len(), 1);
    }

    #[test]
    fn test_group_filter() {
        let campaigns = vec![campaign("c1", "Spring", &["g1", "g2"])];
        let groups = vec![group("g1", "A", &[]), group("g2", "B", &[])];
        let filters = AnalyticsFilters {
            groups: vec!["g2".to_string()],
            ..Default::default()
        };
        let reports = build_group_reports(
            &campaigns,
            &groups,
            &[],
            &filters,
            &AnalyticsSettings::default(),
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].group.id, "g2");
    }
}
