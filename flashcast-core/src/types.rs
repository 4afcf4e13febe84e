//! Core domain types for flashcast
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **User** | A teacher account; owns campaigns, groups and question instances |
//! | **Campaign** | A named initiative bundling question templates and target groups |
//! | **Campaign Question** | A template embedded in a campaign; no lifecycle of its own |
//! | **Group** | A named roster of participant phone numbers |
//! | **Question Instance** | One send-event of a template to one student, with response/grade state |
//! | **Student** | A participant, identified only by phone number |
//!
//! Every entity carries the owning user id and every read path filters on it
//! first, so no query can join records across tenants.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of options a button-mode template may offer.
pub const MAX_BUTTON_OPTIONS: usize = 10;
/// Minimum number of options a button-mode template must offer.
pub const MIN_BUTTON_OPTIONS: usize = 2;

/// Generate a fresh entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================
// User
// ============================================

/// Onboarding progress shown by the front end on first login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Onboarding {
    pub version: u32,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for Onboarding {
    fn default() -> Self {
        Self {
            version: 1,
            completed: false,
            completed_at: None,
        }
    }
}

/// A teacher account, federated from an external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Subject id issued by the identity provider
    #[serde(default)]
    pub identity_subject: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub onboarding: Onboarding,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Campaign questions (embedded templates)
// ============================================

/// How a student answers a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Free spoken answer, graded by the teacher
    #[default]
    Audio,
    /// Multiple choice rendered as message buttons
    Buttons,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Audio => "audio",
            ResponseMode::Buttons => "buttons",
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "audio" => Ok(ResponseMode::Audio),
            "buttons" => Ok(ResponseMode::Buttons),
            _ => Err(format!("unknown response mode: {}", s)),
        }
    }
}

/// A question template embedded in a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignQuestion {
    #[serde(default = "new_id")]
    pub id: String,
    pub question: String,
    /// Canonical answer; for button mode it must be one of `options`
    pub answer: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl CampaignQuestion {
    /// Check the template configuration.
    ///
    /// Button-mode templates need between 2 and 10 options and an answer
    /// equal to one of them. Audio-mode templates never need options.
    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::bad_request("question is required"));
        }

        match self.response_mode {
            ResponseMode::Audio => {
                if self.answer.trim().is_empty() {
                    return Err(Error::bad_request("answer is required"));
                }
            }
            ResponseMode::Buttons => {
                if self.options.len() < MIN_BUTTON_OPTIONS {
                    return Err(Error::bad_request(format!(
                        "options must have at least {} items",
                        MIN_BUTTON_OPTIONS
                    )));
                }
                if self.options.len() > MAX_BUTTON_OPTIONS {
                    return Err(Error::bad_request(format!(
                        "options must have at most {} items",
                        MAX_BUTTON_OPTIONS
                    )));
                }
                let answer = self.answer.trim();
                if answer.is_empty() {
                    return Err(Error::bad_request("answer is required"));
                }
                if !self.options.iter().any(|o| o == answer) {
                    return Err(Error::bad_request("answer must be one of the options"));
                }
            }
        }

        Ok(())
    }
}

/// Normalize a loosely-typed options payload into a clean list.
///
/// - an array keeps its non-empty trimmed entries (non-strings are stringified)
/// - a string holding a JSON array is treated as that array
/// - any other non-empty string becomes a single option
/// - everything else yields no options
pub fn normalize_options(value: &serde_json::Value) -> Vec<String> {
    use serde_json::Value;

    fn entry(v: &Value) -> String {
        match v {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    match value {
        Value::Array(items) => items
            .iter()
            .map(entry)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Vec::new();
            }
            if raw.starts_with('[') {
                return match serde_json::from_str::<Value>(raw) {
                    Ok(parsed @ Value::Array(_)) => normalize_options(&parsed),
                    _ => Vec::new(),
                };
            }
            vec![raw.to_string()]
        }
        _ => Vec::new(),
    }
}

/// Input for creating a campaign question.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaignQuestion {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl NewCampaignQuestion {
    /// Build and validate a template from this input.
    pub fn into_question(self, now: DateTime<Utc>) -> Result<CampaignQuestion> {
        let response_mode = parse_response_mode(self.response_mode.as_deref())?;
        let question = CampaignQuestion {
            id: new_id(),
            question: self.question.trim().to_string(),
            answer: self.answer.trim().to_string(),
            response_mode,
            options: normalize_options(&self.options),
            explanation: trim_optional(self.explanation),
            is_active: self.is_active.unwrap_or(true),
            created_at: now,
        };
        question.validate()?;
        Ok(question)
    }
}

/// Partial update of a campaign question.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignQuestionPatch {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl CampaignQuestionPatch {
    /// Apply the patch to a copy of `question` and validate the result.
    ///
    /// The original is left untouched when validation fails.
    pub fn apply(&self, question: &CampaignQuestion) -> Result<CampaignQuestion> {
        let mut updated = question.clone();
        if let Some(text) = &self.question {
            updated.question = text.trim().to_string();
        }
        if let Some(answer) = &self.answer {
            updated.answer = answer.trim().to_string();
        }
        if self.response_mode.is_some() {
            updated.response_mode = parse_response_mode(self.response_mode.as_deref())?;
        }
        if let Some(options) = &self.options {
            updated.options = normalize_options(options);
        }
        if self.explanation.is_some() {
            updated.explanation = trim_optional(self.explanation.clone());
        }
        if let Some(active) = self.is_active {
            updated.is_active = active;
        }
        updated.validate()?;
        Ok(updated)
    }
}

fn parse_response_mode(raw: Option<&str>) -> Result<ResponseMode> {
    match raw {
        None => Ok(ResponseMode::Audio),
        Some(mode) => mode
            .parse()
            .map_err(|_| Error::bad_request(format!("invalid response mode: {}", mode))),
    }
}

fn trim_optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================
// Campaign
// ============================================

/// A named initiative: templates to send and the groups to send them to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    #[serde(default = "new_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub has_started: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Linked group ids, in insertion order; the campaign does not own them
    #[serde(default)]
    pub groups: Vec<String>,
    /// Embedded templates, in insertion order
    #[serde(default)]
    pub questions: Vec<CampaignQuestion>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Number of templates currently marked active.
    pub fn active_question_count(&self) -> usize {
        self.questions.iter().filter(|q| q.is_active).count()
    }
}

/// Input for creating a campaign.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub questions: Vec<NewCampaignQuestion>,
}

impl NewCampaign {
    /// Build a campaign owned by `user_id`, validating every template.
    pub fn into_campaign(self, user_id: &str, now: DateTime<Utc>) -> Result<Campaign> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::bad_request("campaign name is required"));
        }

        let questions = self
            .questions
            .into_iter()
            .map(|q| q.into_question(now))
            .collect::<Result<Vec<_>>>()?;

        Ok(Campaign {
            id: new_id(),
            user_id: user_id.to_string(),
            name,
            description: trim_optional(self.description),
            is_active: self.is_active.unwrap_or(true),
            has_started: false,
            start_date: self.start_date,
            end_date: self.end_date,
            groups: dedup_preserving_order(self.groups),
            questions,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a campaign's own fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub has_started: Option<bool>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

impl CampaignPatch {
    pub fn apply(&self, campaign: &mut Campaign) -> Result<()> {
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::bad_request("campaign name is required"));
            }
            campaign.name = name.to_string();
        }
        if self.description.is_some() {
            campaign.description = trim_optional(self.description.clone());
        }
        if let Some(active) = self.is_active {
            campaign.is_active = active;
        }
        if let Some(started) = self.has_started {
            campaign.has_started = started;
        }
        if self.start_date.is_some() {
            campaign.start_date = self.start_date;
        }
        if self.end_date.is_some() {
            campaign.end_date = self.end_date;
        }
        if let Some(groups) = &self.groups {
            campaign.groups = dedup_preserving_order(groups.clone());
        }
        Ok(())
    }
}

pub(crate) fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

// ============================================
// Group
// ============================================

/// A named roster of participant phone numbers.
///
/// Phone numbers are stored exactly as entered; they are neither normalized
/// nor deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default = "new_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl NewGroup {
    pub fn into_group(self, user_id: &str, now: DateTime<Utc>) -> Result<Group> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::bad_request("group name is required"));
        }
        Ok(Group {
            id: new_id(),
            user_id: user_id.to_string(),
            name,
            description: trim_optional(self.description),
            participants: self.participants,
            is_active: self.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl GroupPatch {
    pub fn apply(&self, group: &mut Group) -> Result<()> {
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::bad_request("group name is required"));
            }
            group.name = name.to_string();
        }
        if self.description.is_some() {
            group.description = trim_optional(self.description.clone());
        }
        if let Some(participants) = &self.participants {
            group.participants = participants.clone();
        }
        if let Some(active) = self.is_active {
            group.is_active = active;
        }
        Ok(())
    }
}

/// Roster totals across a user's groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    /// Sum of roster lengths (not deduplicated across groups)
    pub total_participants: i64,
}

// ============================================
// Question instances
// ============================================

/// The campaign reference stored on a question instance.
///
/// Different write paths stored the reference in different shapes. All of
/// them decode here, once, and every consumer works with [`CampaignRef::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CampaignRef {
    /// Bare identifier: `"abc"`
    Id(String),
    /// Native reference: `{"$oid": "abc"}`
    ObjectId {
        #[serde(rename = "$oid")]
        oid: String,
    },
    /// Embedded (populated) document: `{"_id": ..., "name": ...}`
    Embedded {
        #[serde(rename = "_id")]
        id: Box<CampaignRef>,
    },
}

impl CampaignRef {
    /// Canonical campaign id, whatever the stored encoding.
    pub fn id(&self) -> &str {
        match self {
            CampaignRef::Id(id) => id,
            CampaignRef::ObjectId { oid } => oid,
            CampaignRef::Embedded { id } => id.id(),
        }
    }

    /// Decode a stored JSON value, returning `None` for shapes that carry no id.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value::<CampaignRef>(value.clone())
            .ok()
            .filter(|r| !r.id().is_empty())
    }
}

impl From<&str> for CampaignRef {
    fn from(id: &str) -> Self {
        CampaignRef::Id(id.to_string())
    }
}

/// One send-event of a question to one student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInstance {
    #[serde(default = "new_id")]
    pub id: String,
    pub user_id: String,
    /// Campaign this send belongs to; `None` when the stored reference is unusable
    #[serde(default)]
    pub campaign: Option<CampaignRef>,
    /// Raw phone number as written by the sender
    pub phone_number: String,
    #[serde(default)]
    pub student_name: Option<String>,
    /// Copy of the template's question text at send time
    pub question: String,
    /// Copy of the template's canonical answer at send time
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub student_response: Option<String>,
    /// Teacher grade on a 0-10 scale, as entered (may be empty or malformed)
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Send time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Response time; `None` means unanswered
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl QuestionInstance {
    /// Answered means a response timestamp exists, graded or not.
    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some()
    }

    /// Canonical id of the owning campaign.
    pub fn campaign_id(&self) -> Option<&str> {
        self.campaign.as_ref().map(CampaignRef::id)
    }

    /// Numeric grade on the 0-10 scale, if the stored grade parses.
    pub fn score(&self) -> Option<f64> {
        self.grade.as_deref().and_then(parse_score)
    }

    /// Minutes between send and response, for answered instances.
    pub fn response_minutes(&self) -> Option<f64> {
        let answered = self.answered_at?;
        let millis = answered.signed_duration_since(self.created_at).num_milliseconds();
        let minutes = millis as f64 / 60_000.0;
        minutes.is_finite().then_some(minutes)
    }

    /// Display name, falling back to a placeholder.
    pub fn display_name(&self) -> &str {
        self.student_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(UNKNOWN_STUDENT_NAME)
    }
}

/// Placeholder shown for students whose name was never captured.
pub const UNKNOWN_STUDENT_NAME: &str = "Name not provided";

/// Parse a stored grade by its leading number.
///
/// Grades are typed by hand, so `"8,5"` (comma decimal), `"8/10"` and
/// `"7 pontos"` all parse; anything after the leading number is ignored.
/// Values without a leading digit, and non-finite values, are rejected.
pub fn parse_score(raw: &str) -> Option<f64> {
    let bytes = raw.trim().as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let whole = digits_from(end);
    end += whole;

    let mut fraction = 0;
    if matches!(bytes.get(end), Some(b'.' | b',')) {
        fraction = digits_from(end + 1);
        if whole + fraction > 0 {
            end += 1 + fraction;
        }
    }
    if whole + fraction == 0 {
        return None;
    }

    // Exponent only counts when digits follow it
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent = digits_from(end + 1 + sign);
        if exponent > 0 {
            end += 1 + sign + exponent;
        }
    }

    let number: String = bytes[..end]
        .iter()
        .map(|&b| if b == b',' { '.' } else { char::from(b) })
        .collect();
    number.parse::<f64>().ok().filter(|s| s.is_finite())
}

/// Input for dispatching a question to a student.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestionInstance {
    pub campaign: CampaignRef,
    pub phone_number: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

impl NewQuestionInstance {
    pub fn into_instance(self, user_id: &str, now: DateTime<Utc>) -> QuestionInstance {
        QuestionInstance {
            id: new_id(),
            user_id: user_id.to_string(),
            campaign: Some(self.campaign),
            phone_number: self.phone_number,
            student_name: trim_optional(self.student_name),
            question: self.question,
            answer: self.answer,
            student_response: None,
            grade: None,
            feedback: None,
            created_at: now,
            answered_at: None,
            audio_url: None,
        }
    }
}
