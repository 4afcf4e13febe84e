//! Per-student question history within a campaign.

use super::aggregate::mean;
use super::campaign::student_key;
use super::AnalyticsSettings;
use crate::db::{Database, InstanceQuery};
use crate::error::Result;
use crate::types::{QuestionInstance, UNKNOWN_STUDENT_NAME};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Answered,
    Pending,
}

/// Totals for one student in one campaign.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCard {
    pub phone_number: String,
    pub name: String,
    pub total_sent: usize,
    pub total_answered: usize,
    /// Raw 0-10 mean of numeric grades, 0 when there are none
    pub average_score: f64,
}

/// One question sent to the student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub question: String,
    pub correct_answer: String,
    pub student_answer: Option<String>,
    pub score: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub feedback: Option<String>,
    pub audio_url: Option<String>,
}

impl From<&QuestionInstance> for HistoryEntry {
    fn from(instance: &QuestionInstance) -> Self {
        Self {
            id: instance.id.clone(),
            question: instance.question.clone(),
            correct_answer: instance.answer.clone(),
            student_answer: instance.student_response.clone(),
            score: instance.grade.clone(),
            sent_at: instance.created_at,
            answered_at: instance.answered_at,
            status: if instance.is_answered() {
                HistoryStatus::Answered
            } else {
                HistoryStatus::Pending
            },
            feedback: instance.feedback.clone(),
            audio_url: instance.audio_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentHistory {
    pub student: StudentCard,
    /// Newest first
    pub history: Vec<HistoryEntry>,
}

/// Build a student's history from their instances, given newest first.
pub fn build_student_history(phone_number: &str, instances: &[QuestionInstance]) -> StudentHistory {
    let name = instances
        .first()
        .map(QuestionInstance::display_name)
        .unwrap_or(UNKNOWN_STUDENT_NAME)
        .to_string();
    let scores: Vec<f64> = instances
        .iter()
        .filter(|i| i.is_answered())
        .filter_map(QuestionInstance::score)
        .collect();

    StudentHistory {
        student: StudentCard {
            phone_number: phone_number.to_string(),
            name,
            total_sent: instances.len(),
            total_answered: instances.iter().filter(|i| i.is_answered()).count(),
            average_score: mean(scores.iter().sum(), scores.len()).unwrap_or(0.0),
        },
        history: instances.iter().map(HistoryEntry::from).collect(),
    }
}

impl Database {
    /// Every question sent to `phone_number` in a campaign.
    ///
    /// Phone numbers are matched after normalization, so a roster entry with
    /// or without the country code finds the same student.
    pub fn student_history(
        &self,
        campaign_id: &str,
        phone_number: &str,
        user_id: &str,
        settings: &AnalyticsSettings,
    ) -> Result<StudentHistory> {
        let campaign = self.get_campaign(campaign_id, user_id)?;
        let wanted = student_key(phone_number, &settings.country_code);

        let mut instances: Vec<QuestionInstance> = self
            .list_question_instances(&InstanceQuery::for_user(user_id).campaign(&campaign.id))?
            .into_iter()
            .filter(|i| student_key(&i.phone_number, &settings.country_code) == wanted)
            .collect();
        instances.reverse();

        tracing::debug!(
            campaign_id = %campaign.id,
            count = instances.len(),
            "Loaded student history"
        );
        Ok(build_student_history(phone_number, &instances))
    }
}
