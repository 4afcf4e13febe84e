//! Cross-campaign student views: the student directory, one student's
//! profile grouped by campaign, and per-student activity figures.
//!
//! Students are identified the same way as in campaign reports, by
//! normalized phone number, so a number stored with and without the country
//! code is one student.

use super::aggregate::{mean, rate, round2};
use super::campaign::student_key;
use super::student::HistoryEntry;
use super::AnalyticsSettings;
use crate::db::{Database, InstanceQuery};
use crate::error::{Error, Result};
use crate::types::{Campaign, QuestionInstance, UNKNOWN_STUDENT_NAME};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Shown for campaigns that no longer exist.
pub const UNTITLED_CAMPAIGN: &str = "Untitled campaign";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignLabel {
    pub id: String,
    pub name: String,
}

/// One row of the student directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Phone number as first seen
    pub phone_number: String,
    pub name: String,
    pub total_questions: usize,
    pub total_campaigns: usize,
    /// Campaigns the student received questions from, first-seen order
    pub campaigns: Vec<CampaignLabel>,
    /// Latest response; `None` if the student never answered
    pub last_active: Option<DateTime<Utc>>,
}

/// A student's questions within one campaign.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignTrack {
    /// `None` for instances whose campaign reference could not be read
    pub campaign_id: Option<String>,
    pub campaign_name: String,
    pub student_name: String,
    pub total_questions: usize,
    /// Mean 0-10 grade over every question sent; ungraded ones count as 0
    pub average_score: f64,
    /// Newest first
    pub questions: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileTotals {
    pub total_questions: usize,
    pub total_tracks: usize,
    /// Mean of the track averages
    pub average_score: f64,
}

/// Everything sent to one student, grouped by campaign.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub phone_number: String,
    pub name: String,
    pub tracks: Vec<CampaignTrack>,
    pub global_stats: ProfileTotals,
}

/// Answer and grading figures for one student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentActivity {
    pub phone_number: String,
    pub name: String,
    pub total_questions: usize,
    pub answered_questions: usize,
    /// Instances carrying a non-blank grade, numeric or not
    pub evaluated_questions: usize,
    /// Mean numeric grade (0-10), `None` when no grade parses
    pub avg_score: Option<f64>,
    /// Answered over sent, as a percentage
    pub response_rate: f64,
}

fn campaign_names(campaigns: &[Campaign]) -> HashMap<&str, &str> {
    campaigns
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect()
}

fn campaign_name(names: &HashMap<&str, &str>, id: &str) -> String {
    names
        .get(id)
        .copied()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(UNTITLED_CAMPAIGN)
        .to_string()
}

/// First captured name, in the order given.
fn known_name<'a>(instances: impl IntoIterator<Item = &'a QuestionInstance>) -> String {
    instances
        .into_iter()
        .find(|i| i.student_name.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .map(QuestionInstance::display_name)
        .unwrap_or(UNKNOWN_STUDENT_NAME)
        .to_string()
}

/// Instances bucketed per student, students in first-seen order. Instances
/// without a usable phone number are skipped.
fn group_by_student<'a>(
    instances: &'a [QuestionInstance],
    country_code: &str,
) -> Vec<Vec<&'a QuestionInstance>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut students: Vec<Vec<&QuestionInstance>> = Vec::new();
    for instance in instances {
        let key = student_key(&instance.phone_number, country_code);
        if key.is_empty() {
            continue;
        }
        let slot = *slots.entry(key).or_insert_with(|| {
            students.push(Vec::new());
            students.len() - 1
        });
        students[slot].push(instance);
    }
    students
}

/// Build the directory, most recently active students first. Students who
/// never answered come last.
pub fn build_student_directory(
    campaigns: &[Campaign],
    instances: &[QuestionInstance],
    country_code: &str,
) -> Vec<DirectoryEntry> {
    let names = campaign_names(campaigns);

    let mut directory: Vec<DirectoryEntry> = group_by_student(instances, country_code)
        .into_iter()
        .map(|sent| {
            let mut labels: Vec<CampaignLabel> = Vec::new();
            for id in sent.iter().filter_map(|i| i.campaign_id()) {
                if !labels.iter().any(|l| l.id == id) {
                    labels.push(CampaignLabel {
                        id: id.to_string(),
                        name: campaign_name(&names, id),
                    });
                }
            }

            DirectoryEntry {
                phone_number: sent[0].phone_number.clone(),
                name: known_name(sent.iter().copied()),
                total_questions: sent.len(),
                total_campaigns: labels.len(),
                campaigns: labels,
                last_active: sent.iter().filter_map(|i| i.answered_at).max(),
            }
        })
        .collect();

    directory.sort_by(|a, b| b.last_active.cmp(&a.last_active));
    directory
}

/// Build one student's profile from their instances, given newest first.
pub fn build_student_profile(
    phone_number: &str,
    campaigns: &[Campaign],
    instances: &[QuestionInstance],
) -> StudentProfile {
    let names = campaign_names(campaigns);

    let mut tracks: Vec<CampaignTrack> = Vec::new();
    let mut score_sums: Vec<f64> = Vec::new();
    for instance in instances {
        let campaign_id = instance.campaign_id();
        let slot = match tracks
            .iter()
            .position(|t| t.campaign_id.as_deref() == campaign_id)
        {
            Some(slot) => slot,
            None => {
                tracks.push(CampaignTrack {
                    campaign_id: campaign_id.map(str::to_string),
                    campaign_name: campaign_id
                        .map(|id| campaign_name(&names, id))
                        .unwrap_or_else(|| UNTITLED_CAMPAIGN.to_string()),
                    student_name: instance.display_name().to_string(),
                    total_questions: 0,
                    average_score: 0.0,
                    questions: Vec::new(),
                });
                score_sums.push(0.0);
                tracks.len() - 1
            }
        };

        let track = &mut tracks[slot];
        track.total_questions += 1;
        track.questions.push(HistoryEntry::from(instance));
        if instance.is_answered() {
            score_sums[slot] += instance.score().unwrap_or(0.0);
        }
    }

    for (track, sum) in tracks.iter_mut().zip(&score_sums) {
        track.average_score = round2(mean(*sum, track.total_questions).unwrap_or(0.0));
    }

    let track_mean = mean(
        tracks.iter().map(|t| t.average_score).sum(),
        tracks.len(),
    )
    .unwrap_or(0.0);

    StudentProfile {
        phone_number: phone_number.to_string(),
        name: known_name(instances),
        global_stats: ProfileTotals {
            total_questions: instances.len(),
            total_tracks: tracks.len(),
            average_score: round2(track_mean),
        },
        tracks,
    }
}

/// Per-student answer and grading figures, busiest students first.
pub fn build_student_activity(
    instances: &[QuestionInstance],
    country_code: &str,
) -> Vec<StudentActivity> {
    let mut activity: Vec<StudentActivity> = group_by_student(instances, country_code)
        .into_iter()
        .map(|sent| {
            let answered = sent.iter().filter(|i| i.is_answered()).count();
            let evaluated = sent
                .iter()
                .filter(|i| i.grade.as_deref().is_some_and(|g| !g.trim().is_empty()))
                .count();
            let scores: Vec<f64> = sent.iter().filter_map(|i| i.score()).collect();

            StudentActivity {
                phone_number: sent[0].phone_number.clone(),
                name: known_name(sent.iter().copied()),
                total_questions: sent.len(),
                answered_questions: answered,
                evaluated_questions: evaluated,
                avg_score: mean(scores.iter().sum(), scores.len()).map(round2),
                response_rate: rate(answered, sent.len()),
            }
        })
        .collect();

    activity.sort_by(|a, b| b.total_questions.cmp(&a.total_questions));
    activity
}

impl Database {
    /// Every student the user has sent questions to, across campaigns.
    pub fn list_students(
        &self,
        user_id: &str,
        settings: &AnalyticsSettings,
    ) -> Result<Vec<DirectoryEntry>> {
        let campaigns = self.list_campaigns(user_id)?;
        let instances = self.list_question_instances(&InstanceQuery::for_user(user_id))?;
        let directory = build_student_directory(&campaigns, &instances, &settings.country_code);

        tracing::debug!(user_id = %user_id, students = directory.len(), "Built student directory");
        Ok(directory)
    }

    /// One student's questions across all campaigns, grouped per campaign.
    ///
    /// Fails with not-found when nothing was ever sent to the number.
    pub fn student_profile(
        &self,
        user_id: &str,
        phone_number: &str,
        settings: &AnalyticsSettings,
    ) -> Result<StudentProfile> {
        let wanted = student_key(phone_number, &settings.country_code);
        let mut instances: Vec<QuestionInstance> = self
            .list_question_instances(&InstanceQuery::for_user(user_id))?
            .into_iter()
            .filter(|i| student_key(&i.phone_number, &settings.country_code) == wanted)
            .collect();
        if wanted.is_empty() || instances.is_empty() {
            return Err(Error::not_found("student", phone_number));
        }
        instances.reverse();

        let campaigns = self.list_campaigns(user_id)?;
        Ok(build_student_profile(phone_number, &campaigns, &instances))
    }

    /// Answer and grading figures for every student of the user.
    pub fn student_activity(
        &self,
        user_id: &str,
        settings: &AnalyticsSettings,
    ) -> Result<Vec<StudentActivity>> {
        let instances = self.list_question_instances(&InstanceQuery::for_user(user_id))?;
        Ok(build_student_activity(&instances, &settings.country_code))
    }
}
