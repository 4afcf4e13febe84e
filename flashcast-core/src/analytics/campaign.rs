//! Campaign analytics report.
//!
//! [`build_campaign_report`] is a pure function of the campaign, its linked
//! groups and the loaded question instances; [`Database::campaign_analytics`]
//! does the loading.

use super::aggregate::{format_response_time, mean, round2, Accumulator, AccumulatedOverview};
use super::alerts::{evaluate_alerts, Alert, AlertInputs};
use super::filters::AnalyticsFilters;
use super::AnalyticsSettings;
use crate::db::{Database, InstanceQuery};
use crate::error::Result;
use crate::phone::normalize_phone_with;
use crate::types::{Campaign, Group, QuestionInstance};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const CAMPAIGN_CATEGORY: &str = "Campaign";
const CAMPAIGN_CATEGORY_LABEL: &str = "Campaign questions";

// ============================================
// Report schema
// ============================================

/// Full analytics report for one campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    pub overview: CampaignOverview,
    pub campaign_details: CampaignDetails,
    /// Reserved; always empty
    pub trends: Trends,
    pub question_analysis: QuestionAnalysis,
    pub student_analysis: StudentAnalysis,
    /// Reserved; always empty
    pub temporal_analysis: TemporalAnalysis,
    pub group_comparison: Vec<GroupComparison>,
    pub group_analysis: Vec<GroupAnalysis>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignOverview {
    /// Distinct students who answered at least once
    pub total_students: usize,
    /// Same as `total_students`
    pub active_students: usize,
    /// Distinct students who received at least one question
    pub students_reached: usize,
    /// Templates in the campaign
    pub total_questions: usize,
    pub active_questions: usize,
    pub total_sent: usize,
    pub answered_questions: usize,
    /// Mean grade on a 0-100 scale
    pub average_score: f64,
    pub completion_rate: f64,
    pub participation_rate: f64,
    pub average_response_time: String,
    /// Linked groups
    pub total_groups: usize,
    /// Summed roster length of the linked groups
    pub total_group_participants: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetails {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub has_started: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub questions_in_campaign: usize,
    pub active_questions_in_campaign: usize,
    pub groups: Vec<LinkedGroup>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedGroup {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub participants: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub participation_trend: Vec<TrendPoint>,
    pub performance_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub students: usize,
    pub questions: usize,
    pub performance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalAnalysis {
    pub hourly_activity: Vec<ActivityPoint>,
    pub weekly_activity: Vec<ActivityPoint>,
    pub response_time_analysis: ResponseTimeAnalysis,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPoint {
    pub hour: u8,
    pub day: Option<String>,
    pub activity_count: usize,
    pub avg_performance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeAnalysis {
    pub by_category: Vec<LabeledMinutes>,
    pub by_difficulty: Vec<LabeledMinutes>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledMinutes {
    pub label: String,
    pub avg_time: f64,
}

/// Difficulty derived from a template's success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    /// No graded responses yet
    Unrated,
}

impl Difficulty {
    pub fn from_success_rate(success_rate: f64, responses: usize) -> Self {
        if responses == 0 {
            Difficulty::Unrated
        } else if success_rate < 50.0 {
            Difficulty::Hard
        } else if success_rate >= 80.0 {
            Difficulty::Easy
        } else {
            Difficulty::Medium
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnalysis {
    pub top_difficult: Vec<QuestionStats>,
    pub top_easy: Vec<QuestionStats>,
    pub by_category: Vec<CategoryStats>,
    pub by_type: Vec<TypeStats>,
    /// One entry per template, in campaign order
    pub campaign_questions: Vec<QuestionStats>,
}

/// Per-template statistics. Instances are matched to a template by
/// question text, since instances carry their own copy of the text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub question_id: String,
    pub text: String,
    pub category: &'static str,
    pub difficulty: Difficulty,
    /// Mean grade on a 0-100 scale
    pub success_rate: f64,
    pub total_attempts: usize,
    pub responses: usize,
    pub sent_count: usize,
    pub response_rate: f64,
    /// Mean grade on the raw 0-10 scale
    pub avg_score: f64,
    pub avg_time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: &'static str,
    pub total_questions: usize,
    pub avg_score: f64,
    pub avg_time: String,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub avg_score: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnalysis {
    pub student_segments: StudentSegments,
    pub top_performers: Vec<StudentPerformer>,
    pub inactive: Vec<StudentPerformer>,
    pub all_students: Vec<StudentSummary>,
}

/// Answering students bucketed by raw average grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSegments {
    pub excellent: Segment,
    pub good: Segment,
    pub developing: Segment,
    pub needs_help: Segment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub count: usize,
    /// Share of answering students, whole percent
    pub percentage: i64,
    pub criteria: &'static str,
    /// Member phone numbers
    pub students: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPerformer {
    pub student_id: String,
    pub name: String,
    pub phone_number: String,
    /// Mean grade on a 0-100 scale
    pub score: f64,
    pub questions_answered: usize,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub phone_number: String,
    pub name: String,
    /// Mean grade on the raw 0-10 scale
    pub avg_score: f64,
    pub questions_sent: usize,
    pub questions_answered: usize,
    pub response_rate: f64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupComparison {
    pub group_id: String,
    pub group_name: String,
    pub total_participants: usize,
    pub total_responses: usize,
    /// Distinct answering members
    pub students: usize,
    pub average_score: f64,
    pub completion_rate: f64,
    /// Distinct answering members over roster size
    pub active_rate: f64,
    pub average_response_time: String,
    /// 1 = highest average score
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAnalysis {
    pub group_id: String,
    pub group_name: String,
    pub is_active: bool,
    pub overview: AccumulatedOverview,
}

// ============================================
// Computation
// ============================================

/// Per-student running totals, keyed by resolved phone identity.
#[derive(Debug, Clone)]
struct StudentStats {
    phone_number: String,
    name: Option<String>,
    sent: usize,
    answered: usize,
    score_sum: f64,
    score_count: usize,
    last_sent: DateTime<Utc>,
    last_answered: Option<DateTime<Utc>>,
}

impl StudentStats {
    fn new(instance: &QuestionInstance) -> Self {
        Self {
            phone_number: instance.phone_number.clone(),
            name: None,
            sent: 0,
            answered: 0,
            score_sum: 0.0,
            score_count: 0,
            last_sent: instance.created_at,
            last_answered: None,
        }
    }

    fn record(&mut self, instance: &QuestionInstance) {
        self.sent += 1;
        self.last_sent = self.last_sent.max(instance.created_at);
        if self.name.is_none() {
            self.name = instance
                .student_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }

        if let Some(answered_at) = instance.answered_at {
            self.answered += 1;
            self.last_answered = Some(self.last_answered.map_or(answered_at, |t| t.max(answered_at)));
            if let Some(score) = instance.score() {
                self.score_sum += score;
                self.score_count += 1;
            }
        }
    }

    /// Raw mean grade; students without a numeric grade average 0.
    fn mean_score(&self) -> f64 {
        mean(self.score_sum, self.score_count).unwrap_or(0.0)
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.last_answered.unwrap_or(self.last_sent)
    }

    fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| crate::types::UNKNOWN_STUDENT_NAME.to_string())
    }

    fn performer(&self) -> StudentPerformer {
        StudentPerformer {
            student_id: self.phone_number.clone(),
            name: self.display_name(),
            phone_number: self.phone_number.clone(),
            score: round2(self.mean_score() * 10.0),
            questions_answered: self.answered,
            last_activity: self.last_activity(),
        }
    }

    fn summary(&self) -> StudentSummary {
        StudentSummary {
            phone_number: self.phone_number.clone(),
            name: self.display_name(),
            avg_score: round2(self.mean_score()),
            questions_sent: self.sent,
            questions_answered: self.answered,
            response_rate: super::aggregate::rate(self.answered, self.sent),
            last_activity: self.last_activity(),
        }
    }
}

/// Identity key for a student: the normalized phone number, or the trimmed
/// raw value when it has no digits.
pub(crate) fn student_key(phone_number: &str, country_code: &str) -> String {
    let normalized = normalize_phone_with(phone_number, country_code);
    if normalized.is_empty() {
        phone_number.trim().to_string()
    } else {
        normalized
    }
}

/// Build the campaign report from already-loaded records.
///
/// `groups` are the linked groups owned by the campaign's user; `instances`
/// are the campaign's question instances within the selected window.
pub fn build_campaign_report(
    campaign: &Campaign,
    groups: &[Group],
    instances: &[QuestionInstance],
    filters: &AnalyticsFilters,
    settings: &AnalyticsSettings,
    now: DateTime<Utc>,
) -> CampaignReport {
    let country_code = settings.country_code.as_str();

    // Overall totals and per-student stats, students in first-seen order
    let mut totals = Accumulator::new();
    let mut order: Vec<String> = Vec::new();
    let mut students: HashMap<String, StudentStats> = HashMap::new();
    for instance in instances {
        let key = student_key(&instance.phone_number, country_code);
        totals.record(&key, instance);
        students
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key.clone());
                StudentStats::new(instance)
            })
            .record(instance);
    }

    let total_group_participants: usize = groups.iter().map(|g| g.participants.len()).sum();
    let total_students = totals.students_answered.len();
    let average_score = totals.average_score();
    let completion_rate = totals.completion_rate();
    let participation_rate = totals.participation_rate(total_group_participants);
    let average_response_time = totals.average_response_time();

    let overview = CampaignOverview {
        total_students,
        active_students: total_students,
        students_reached: totals.students_received.len(),
        total_questions: campaign.questions.len(),
        active_questions: campaign.active_question_count(),
        total_sent: totals.sent,
        answered_questions: totals.answered,
        average_score,
        completion_rate,
        participation_rate,
        average_response_time: average_response_time.clone(),
        total_groups: campaign.groups.len(),
        total_group_participants,
    };

    let question_analysis = analyze_questions(campaign, instances, &totals, settings.top_n);

    let ordered: Vec<&StudentStats> = order.iter().filter_map(|k| students.get(k)).collect();
    let answering: Vec<&StudentStats> = ordered.iter().copied().filter(|s| s.answered > 0).collect();
    let student_segments = segment_students(&answering);

    let mut ranked = answering.clone();
    ranked.sort_by(|a, b| b.mean_score().total_cmp(&a.mean_score()));
    let top_performers = ranked
        .iter()
        .take(settings.top_n)
        .map(|s| s.performer())
        .collect();

    // An unrepresentable window means nobody has been idle long enough
    let inactivity = Duration::try_days(settings.inactivity_days);
    let inactive = ordered
        .iter()
        .filter(|s| {
            inactivity
                .is_some_and(|window| now.signed_duration_since(s.last_activity()) > window)
        })
        .map(|s| s.performer())
        .collect();

    let student_analysis = StudentAnalysis {
        student_segments,
        top_performers,
        inactive,
        all_students: ordered.iter().map(|s| s.summary()).collect(),
    };

    let (group_comparison, group_analysis) =
        analyze_groups(groups, instances, filters, country_code);

    let alerts = evaluate_alerts(
        &AlertInputs {
            average_score,
            needs_help: student_analysis.student_segments.needs_help.count,
            total_students,
            participation_rate,
            total_group_participants,
            completion_rate,
            total_sent: totals.sent,
        },
        now,
    );

    let campaign_details = CampaignDetails {
        id: campaign.id.clone(),
        name: campaign.name.clone(),
        description: campaign.description.clone(),
        is_active: campaign.is_active,
        has_started: campaign.has_started,
        start_date: campaign.start_date,
        end_date: campaign.end_date,
        questions_in_campaign: campaign.questions.len(),
        active_questions_in_campaign: campaign.active_question_count(),
        groups: groups
            .iter()
            .map(|g| LinkedGroup {
                id: g.id.clone(),
                name: g.name.clone(),
                is_active: g.is_active,
                participants: g.participants.len(),
            })
            .collect(),
    };

    CampaignReport {
        overview,
        campaign_details,
        trends: Trends::default(),
        question_analysis,
        student_analysis,
        temporal_analysis: TemporalAnalysis::default(),
        group_comparison,
        group_analysis,
        alerts,
    }
}

fn analyze_questions(
    campaign: &Campaign,
    instances: &[QuestionInstance],
    totals: &Accumulator,
    top_n: usize,
) -> QuestionAnalysis {
    let campaign_questions: Vec<QuestionStats> = campaign
        .questions
        .iter()
        .map(|template| {
            let mut acc = Accumulator::new();
            for instance in instances.iter().filter(|i| i.question == template.question) {
                acc.record(&instance.phone_number, instance);
            }
            let raw_mean = acc.mean_score().unwrap_or(0.0);
            let success_rate = round2(raw_mean * 10.0);

            QuestionStats {
                question_id: template.id.clone(),
                text: template.question.clone(),
                category: CAMPAIGN_CATEGORY,
                difficulty: Difficulty::from_success_rate(success_rate, acc.answered),
                success_rate,
                total_attempts: acc.answered,
                responses: acc.answered,
                sent_count: acc.sent,
                response_rate: acc.completion_rate(),
                avg_score: round2(raw_mean),
                avg_time: acc.average_response_time(),
            }
        })
        .collect();

    let mut top_difficult: Vec<QuestionStats> = campaign_questions
        .iter()
        .filter(|q| q.success_rate < 50.0 && q.responses > 0)
        .cloned()
        .collect();
    top_difficult.sort_by(|a, b| a.success_rate.total_cmp(&b.success_rate));
    top_difficult.truncate(top_n);

    let mut top_easy: Vec<QuestionStats> = campaign_questions
        .iter()
        .filter(|q| q.success_rate >= 80.0 && q.responses > 0)
        .cloned()
        .collect();
    top_easy.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
    top_easy.truncate(top_n);

    let template_mean = mean(
        campaign_questions.iter().map(|q| q.avg_score).sum(),
        campaign_questions.len(),
    )
    .unwrap_or(0.0);

    let by_category = vec![CategoryStats {
        category: CAMPAIGN_CATEGORY_LABEL,
        total_questions: campaign.questions.len(),
        avg_score: round2(template_mean * 10.0),
        avg_time: format_response_time(totals.mean_response_minutes()),
        completion_rate: totals.completion_rate(),
    }];

    let by_type = vec![
        TypeStats {
            kind: "answered",
            avg_score: totals.average_score(),
            count: totals.answered,
        },
        TypeStats {
            kind: "available",
            avg_score: 0.0,
            count: campaign.questions.len(),
        },
    ];

    QuestionAnalysis {
        top_difficult,
        top_easy,
        by_category,
        by_type,
        campaign_questions,
    }
}

fn segment_students(answering: &[&StudentStats]) -> StudentSegments {
    let denominator = answering.len().max(1);
    let segment = |criteria: &'static str, pred: &dyn Fn(f64) -> bool| {
        let students: Vec<String> = answering
            .iter()
            .filter(|s| pred(s.mean_score()))
            .map(|s| s.phone_number.clone())
            .collect();
        Segment {
            count: students.len(),
            percentage: (students.len() as f64 / denominator as f64 * 100.0).round() as i64,
            criteria,
            students,
        }
    };

    StudentSegments {
        excellent: segment("Grade 9.0-10.0", &|s: f64| s >= 9.0),
        good: segment("Grade 7.0-8.9", &|s: f64| (7.0..9.0).contains(&s)),
        developing: segment("Grade 5.0-6.9", &|s: f64| (5.0..7.0).contains(&s)),
        needs_help: segment("Grade < 5.0", &|s: f64| s < 5.0),
    }
}

/// Per-group breakdown restricted to instances sent to group members.
fn analyze_groups(
    groups: &[Group],
    instances: &[QuestionInstance],
    filters: &AnalyticsFilters,
    country_code: &str,
) -> (Vec<GroupComparison>, Vec<GroupAnalysis>) {
    let mut comparison = Vec::new();
    let mut analysis = Vec::new();

    for group in groups.iter().filter(|g| filters.includes_group(&g.id)) {
        let roster: HashSet<String> = group
            .participants
            .iter()
            .map(|p| normalize_phone_with(p, country_code))
            .filter(|p| !p.is_empty())
            .collect();

        let mut acc = Accumulator::new();
        for instance in instances {
            let key = normalize_phone_with(&instance.phone_number, country_code);
            if roster.contains(&key) {
                acc.record(&key, instance);
            }
        }

        let roster_size = group.participants.len();
        comparison.push(GroupComparison {
            group_id: group.id.clone(),
            group_name: group.name.clone(),
            total_participants: roster_size,
            total_responses: acc.answered,
            students: acc.students_answered.len(),
            average_score: acc.average_score(),
            completion_rate: acc.completion_rate(),
            active_rate: acc.participation_rate(roster_size),
            average_response_time: acc.average_response_time(),
            rank: 0,
        });
        analysis.push(GroupAnalysis {
            group_id: group.id.clone(),
            group_name: group.name.clone(),
            is_active: group.is_active,
            overview: acc.overview(roster_size),
        });
    }

    let mut by_score: Vec<usize> = (0..comparison.len()).collect();
    by_score.sort_by(|&a, &b| {
        comparison[b]
            .average_score
            .total_cmp(&comparison[a].average_score)
    });
    for (position, index) in by_score.into_iter().enumerate() {
        comparison[index].rank = position + 1;
    }

    (comparison, analysis)
}

// ============================================
// Loading
// ============================================

impl Database {
    /// Campaign analytics for `campaign_id` owned by `user_id`.
    ///
    /// Fails with NotFound when the campaign does not exist for this user and
    /// with BadRequest when a filter date does not parse.
    pub fn campaign_analytics(
        &self,
        campaign_id: &str,
        user_id: &str,
        filters: &AnalyticsFilters,
        settings: &AnalyticsSettings,
        now: DateTime<Utc>,
    ) -> Result<CampaignReport> {
        let campaign = self.get_campaign(campaign_id, user_id)?;
        let window = filters.resolve_window(now)?;

        let instances = self.list_question_instances(
            &InstanceQuery::for_user(user_id)
                .campaign(&campaign.id)
                .created_between(window.start, window.end),
        )?;
        let groups = self.list_groups_by_ids(user_id, &campaign.groups)?;

        tracing::debug!(
            campaign_id,
            instances = instances.len(),
            groups = groups.len(),
            "Building campaign report"
        );

        Ok(build_campaign_report(
            &campaign, &groups, &instances, filters, settings, now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CampaignQuestion, ResponseMode};

    fn campaign(questions: &[&str], groups: &[&str]) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            name: "Spring".to_string(),
            description: None,
            is_active: true,
            has_started: true,
            start_date: None,
            end_date: None,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            questions: questions
                .iter()
                .enumerate()
                .map(|(i, q)| CampaignQuestion {
                    id: format!("q{i}"),
                    question: q.to_string(),
                    answer: "x".to_string(),
                    response_mode: ResponseMode::Audio,
                    options: Vec::new(),
                    explanation: None,
                    is_active: i == 0,
                    created_at: now,
                })
                .collect(),
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

    fn inst(
        phone: &str,
        question: &str,
        sent: DateTime<Utc>,
        answer: Option<(i64, &str)>,
    ) -> QuestionInstance {
        QuestionInstance {
            id: crate::types::new_id(),
            user_id: "u1".to_string(),
            campaign: Some("c1".into()),
            phone_number: phone.to_string(),
            student_name: None,
            question: question.to_string(),
            answer: "x".to_string(),
            student_response: None,
            grade: answer.map(|(_, g)| g.to_string()),
            feedback: None,
            created_at: sent,
            answered_at: answer.map(|(m, _)| sent + Duration::minutes(m)),
            audio_url: None,
        }
    }

    fn report(c: &Campaign, groups: &[Group], instances: &[QuestionInstance]) -> CampaignReport {
        build_campaign_report(
            c,
            groups,
            instances,
            &AnalyticsFilters::default(),
            &AnalyticsSettings::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_per_template_stats_and_rankings() {
        let now = Utc::now();
        let c = campaign(&["hard one", "easy one", "unsent"], &[]);
        let instances = vec![
            inst("1", "hard one", now, Some((10, "2"))),
            inst("2", "hard one", now, Some((20, "4"))),
            inst("3", "hard one", now, None),
            inst("1", "easy one", now, Some((90, "9"))),
            inst("2", "easy one", now, Some((30, "10"))),
        ];
        let r = report(&c, &[], &instances);
        let qa = &r.question_analysis;

        assert_eq!(qa.campaign_questions.len(), 3);
        let hard = &qa.campaign_questions[0];
        assert_eq!(hard.responses, 2);
        assert_eq!(hard.sent_count, 3);
        assert_eq!(hard.success_rate, 30.0);
        assert_eq!(hard.response_rate, 66.67);
        assert_eq!(hard.difficulty, Difficulty::Hard);
        assert_eq!(hard.avg_time, "15min");

        let easy = &qa.campaign_questions[1];
        assert_eq!(easy.success_rate, 95.0);
        assert_eq!(easy.difficulty, Difficulty::Easy);
        assert_eq!(easy.avg_time, "1h 0m");

        assert_eq!(qa.campaign_questions[2].difficulty, Difficulty::Unrated);
        assert_eq!(qa.top_difficult.len(), 1);
        assert_eq!(qa.top_difficult[0].question_id, "q0");
        assert_eq!(qa.top_easy.len(), 1);
        assert_eq!(qa.top_easy[0].question_id, "q1");

        assert_eq!(r.overview.total_questions, 3);
        assert_eq!(r.overview.active_questions, 1);
        assert_eq!(qa.by_type[0].count, 4);
        assert_eq!(qa.by_type[1].count, 3);
    }

    #[test]
    fn test_segments_partition_answering_students() {
        let now = Utc::now();
        let c = campaign(&["q"], &[]);
        let instances = vec![
            inst("1", "q", now, Some((1, "9"))),
            inst("2", "q", now, Some((1, "7"))),
            inst("3", "q", now, Some((1, "5"))),
            inst("4", "q", now, Some((1, "4.99"))),
            inst("5", "q", now, Some((1, ""))),
            inst("6", "q", now, None),
        ];
        let r = report(&c, &[], &instances);
        let seg = &r.student_analysis.student_segments;

        assert_eq!(seg.excellent.students, vec!["1"]);
        assert_eq!(seg.good.students, vec!["2"]);
        assert_eq!(seg.developing.students, vec!["3"]);
        assert_eq!(seg.needs_help.students, vec!["4", "5"]);
        assert_eq!(
            seg.excellent.count + seg.good.count + seg.developing.count + seg.needs_help.count,
            r.overview.total_students
        );
        assert_eq!(seg.needs_help.percentage, 40);
        assert_eq!(seg.excellent.percentage, 20);
        assert_eq!(r.student_analysis.all_students.len(), 6);
    }

    #[test]
    fn test_top_performers_and_inactive() {
        let now = Utc::now();
        let old = now - Duration::days(10);
        let c = campaign(&["q"], &[]);
        let instances = vec![
            inst("1", "q", old, Some((5, "6"))),
            inst("2", "q", now, Some((5, "10"))),
            inst("3", "q", old, None),
            inst("4", "q", now, None),
        ];
        let r = report(&c, &[], &instances);
        let sa = &r.student_analysis;

        let top: Vec<&str> = sa.top_performers.iter().map(|p| p.phone_number.as_str()).collect();
        assert_eq!(top, vec!["2", "1"]);
        assert_eq!(sa.top_performers[0].score, 100.0);

        let inactive: Vec<&str> = sa.inactive.iter().map(|p| p.phone_number.as_str()).collect();
        assert_eq!(inactive, vec!["1", "3"]);
        assert_eq!(sa.inactive[1].name, crate::types::UNKNOWN_STUDENT_NAME);
    }

    #[test]
    fn test_oversized_inactivity_window_lists_nobody() {
        let now = Utc::now();
        let c = campaign(&["q"], &[]);
        let instances = vec![inst("1", "q", now - Duration::days(400), Some((5, "6")))];
        let settings = AnalyticsSettings {
            inactivity_days: 200_000_000_000,
            ..Default::default()
        };
        let r = build_campaign_report(
            &c,
            &[],
            &instances,
            &AnalyticsFilters::default(),
            &settings,
            now,
        );
        assert!(r.student_analysis.inactive.is_empty());
        assert_eq!(r.student_analysis.all_students.len(), 1);
    }

    #[test]
    fn test_ranked_question_lists_follow_top_n() {
        let now = Utc::now();
        let c = campaign(&["a", "b", "c", "d"], &[]);
        let instances = vec![
            inst("1", "a", now, Some((1, "1"))),
            inst("1", "b", now, Some((1, "2"))),
            inst("1", "c", now, Some((1, "9"))),
            inst("1", "d", now, Some((1, "10"))),
        ];
        let settings = AnalyticsSettings {
            top_n: 1,
            ..Default::default()
        };
        let r = build_campaign_report(
            &c,
            &[],
            &instances,
            &AnalyticsFilters::default(),
            &settings,
            now,
        );
        let qa = &r.question_analysis;
        assert_eq!(qa.top_difficult.len(), 1);
        assert_eq!(qa.top_difficult[0].question_id, "q0");
        assert_eq!(qa.top_easy.len(), 1);
        assert_eq!(qa.top_easy[0].question_id, "q3");
        assert_eq!(r.student_analysis.top_performers.len(), 1);
    }

    #[test]
    fn test_hand_typed_grades_count_by_leading_number() {
        let now = Utc::now();
        let c = campaign(&["q"], &[]);
        let instances = vec![
            inst("1", "q", now, Some((1, "8,5"))),
            inst("2", "q", now, Some((1, "8/10"))),
        ];
        let r = report(&c, &[], &instances);

        assert_eq!(r.overview.average_score, 82.5);
        let seg = &r.student_analysis.student_segments;
        assert_eq!(seg.good.students, vec!["1", "2"]);
        assert_eq!(seg.needs_help.count, 0);
        assert!(r.alerts.is_empty(), "unexpected alerts: {:?}", r.alerts);
    }

    #[test]
    fn test_group_breakdown_filters_by_membership() {
        let now = Utc::now();
        let c = campaign(&["q"], &["g1", "g2"]);
        let groups = vec![
            group("g1", "Morning", &["5511988887777", "11977776666"]),
            group("g2", "Evening", &["11900000000"]),
        ];
        let instances = vec![
            inst("11988887777", "q", now, Some((5, "6"))),
            inst("+55 11 90000-0000", "q", now, Some((5, "10"))),
            inst("11911111111", "q", now, Some((5, "1"))),
        ];
        let r = report(&c, &groups, &instances);

        assert_eq!(r.overview.total_group_participants, 3);
        assert_eq!(r.overview.total_students, 3);
        assert_eq!(r.overview.participation_rate, 100.0);

        let morning = &r.group_comparison[0];
        assert_eq!(morning.students, 1);
        assert_eq!(morning.active_rate, 50.0);
        assert_eq!(morning.average_score, 60.0);
        assert_eq!(morning.rank, 2);

        let evening = &r.group_comparison[1];
        assert_eq!(evening.average_score, 100.0);
        assert_eq!(evening.rank, 1);

        assert_eq!(r.group_analysis[0].overview.total_students, 1);
        assert_eq!(r.group_analysis[0].overview.participation_rate, 50.0);
    }

    #[test]
    fn test_group_filter_restricts_breakdown_only() {
        let c = campaign(&["q"], &["g1", "g2"]);
        let groups = vec![group("g1", "A", &["1"]), group("g2", "B", &["2", "3"])];
        let filters = AnalyticsFilters {
            groups: vec!["g2".to_string()],
            ..Default::default()
        };
        let r = build_campaign_report(
            &c,
            &groups,
            &[],
            &filters,
            &AnalyticsSettings::default(),
            Utc::now(),
        );
        assert_eq!(r.group_comparison.len(), 1);
        assert_eq!(r.group_comparison[0].group_id, "g2");
        assert_eq!(r.overview.total_group_participants, 3);
    }

    #[test]
    fn test_student_identity_uses_normalized_phone() {
        let now = Utc::now();
        let c = campaign(&["q"], &[]);
        let instances = vec![
            inst("5511999999999", "q", now, Some((1, "8"))),
            inst("11999999999", "q", now, None),
        ];
        let r = report(&c, &[], &instances);
        assert_eq!(r.overview.students_reached, 1);
        assert_eq!(r.student_analysis.all_students[0].questions_sent, 2);
        assert_eq!(r.student_analysis.all_students[0].response_rate, 50.0);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let c = campaign(&[], &[]);
        let r = report(&c, &[], &[]);
        let value = serde_json::to_value(&r).unwrap();

        for key in [
            "overview",
            "campaignDetails",
            "trends",
            "questionAnalysis",
            "studentAnalysis",
            "temporalAnalysis",
            "groupComparison",
            "groupAnalysis",
            "alerts",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["trends"]["participationTrend"], serde_json::json!([]));
        assert_eq!(
            value["temporalAnalysis"]["responseTimeAnalysis"]["byDifficulty"],
            serde_json::json!([])
        );
        assert_eq!(value["studentAnalysis"]["studentSegments"]["needsHelp"]["count"], 0);
    }
}
