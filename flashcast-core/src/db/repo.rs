//! Database repository layer
//!
//! Provides query and mutation operations for all entity types. Every
//! operation takes the owning user id and filters on it; a record owned by
//! someone else is indistinguishable from a missing one.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Filter for loading question instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    /// Owning user; always applied
    pub user_id: String,
    /// Restrict to these campaign ids; `None` means any campaign
    pub campaign_ids: Option<Vec<String>>,
    /// Inclusive lower bound on send time
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on send time
    pub created_before: Option<DateTime<Utc>>,
    /// Exact raw phone number
    pub phone_number: Option<String>,
}

impl InstanceQuery {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn campaigns(mut self, ids: Vec<String>) -> Self {
        self.campaign_ids = Some(ids);
        self
    }

    pub fn campaign(self, id: &str) -> Self {
        self.campaigns(vec![id.to_string()])
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn phone(mut self, phone_number: &str) -> Self {
        self.phone_number = Some(phone_number.to_string());
        self
    }
}

/// Page size used when a search does not set one.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Filtered, paginated search over a user's question instances.
#[derive(Debug, Clone)]
pub struct InstanceSearch {
    pub user_id: String,
    /// Canonical campaign id, matched across reference encodings
    pub campaign_id: Option<String>,
    /// Case-insensitive substring of the question text
    pub question: Option<String>,
    /// Case-insensitive substring of the student name
    pub student_name: Option<String>,
    /// Substring of the phone number as stored
    pub student_phone: Option<String>,
    /// Require a non-blank student response, or its absence
    pub has_response: Option<bool>,
    /// Require a non-blank grade, or its absence
    pub is_evaluated: Option<bool>,
    pub limit: usize,
    pub offset: usize,
    /// Sort by send time ascending instead of newest first
    pub oldest_first: bool,
}

impl InstanceSearch {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            campaign_id: None,
            question: None,
            student_name: None,
            student_phone: None,
            has_response: None,
            is_evaluated: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            oldest_first: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub pages: usize,
    /// 1-based
    pub current_page: usize,
}

impl Pagination {
    fn new(total: usize, limit: usize, offset: usize) -> Self {
        Self {
            total,
            limit,
            offset,
            pages: (total + limit - 1) / limit,
            current_page: offset / limit + 1,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct InstancePage {
    pub data: Vec<QuestionInstance>,
    pub pagination: Pagination,
}

/// Append a case-insensitive substring filter on `column`.
fn push_contains(sql: &mut String, args: &mut Vec<String>, column: &str, needle: Option<&str>) {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return;
    };
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    sql.push_str(&format!(" AND {column} LIKE ? ESCAPE '\\'"));
    args.push(format!("%{escaped}%"));
}

/// Append a filter on whether `column` holds a non-blank value.
fn push_presence(sql: &mut String, column: &str, present: Option<bool>) {
    match present {
        Some(true) => sql.push_str(&format!(" AND TRIM(COALESCE({column}, '')) <> ''")),
        Some(false) => sql.push_str(&format!(" AND TRIM(COALESCE({column}, '')) = ''")),
        None => {}
    }
}

/// Timestamps are stored with a fixed width so text comparison in SQL
/// matches chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// A panic while holding the lock cannot leave SQLite half-written, so a
    /// poisoned mutex is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ============================================
    // User operations
    // ============================================

    /// Find a user by email or create one; backfills identity subject and
    /// avatar on an existing user that lacks them.
    pub fn upsert_identity_user(
        &self,
        email: &str,
        identity_subject: Option<&str>,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::bad_request("email is required"));
        }

        let now = Utc::now();
        if let Some(mut user) = self.get_user_by_email(email)? {
            let mut changed = false;
            if user.identity_subject.is_none() && identity_subject.is_some() {
                user.identity_subject = identity_subject.map(str::to_string);
                changed = true;
            }
            if user.avatar.is_none() && avatar.is_some() {
                user.avatar = avatar.map(str::to_string);
                changed = true;
            }
            if changed {
                user.updated_at = now;
                let conn = self.lock();
                conn.execute(
                    "UPDATE users SET identity_subject = ?1, avatar = ?2, updated_at = ?3 WHERE id = ?4",
                    params![user.identity_subject, user.avatar, ts(&now), user.id],
                )?;
                tracing::debug!(user_id = %user.id, "Backfilled identity fields");
            }
            return Ok(user);
        }

        let user = User {
            id: new_id(),
            email: email.to_string(),
            name: name.map(str::to_string),
            identity_subject: identity_subject.map(str::to_string),
            avatar: avatar.map(str::to_string),
            onboarding: Onboarding::default(),
            created_at: now,
            updated_at: now,
        };
        self.insert_user(&user)?;
        tracing::info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Insert a fully-formed user record
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO users (id, email, name, identity_subject, avatar,
                               onboarding_version, onboarding_completed, onboarding_completed_at,
                               created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                user.id,
                user.email,
                user.name,
                user.identity_subject,
                user.avatar,
                user.onboarding.version,
                user.onboarding.completed,
                user.onboarding.completed_at.as_ref().map(ts),
                ts(&user.created_at),
                ts(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM users WHERE id = ?", [id], Self::row_to_user)
            .optional()?
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM users WHERE email = ?",
            [email.trim()],
            Self::row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Mark onboarding complete at `version`.
    pub fn complete_onboarding(&self, user_id: &str, version: u32) -> Result<User> {
        let now = Utc::now();
        let updated = {
            let conn = self.lock();
            conn.execute(
                r#"
                UPDATE users SET onboarding_version = ?1, onboarding_completed = 1,
                                 onboarding_completed_at = ?2, updated_at = ?2
                WHERE id = ?3
                "#,
                params![version, ts(&now), user_id],
            )?
        };
        if updated == 0 {
            return Err(Error::not_found("user", user_id));
        }
        self.get_user(user_id)
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let completed_at: Option<String> = row.get("onboarding_completed_at")?;

        Ok(User {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            identity_subject: row.get("identity_subject")?,
            avatar: row.get("avatar")?,
            onboarding: Onboarding {
                version: row.get("onboarding_version")?,
                completed: row.get("onboarding_completed")?,
                completed_at: completed_at.as_deref().and_then(parse_ts),
            },
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Campaign operations
    // ============================================

    /// Create a campaign from user input. Every template is normalized and
    /// validated before anything is written.
    pub fn insert_campaign(&self, user_id: &str, input: NewCampaign) -> Result<Campaign> {
        let campaign = input.into_campaign(user_id, Utc::now())?;
        self.save_campaign(&campaign)?;
        tracing::info!(
            campaign_id = %campaign.id,
            user_id,
            questions = campaign.questions.len(),
            groups = campaign.groups.len(),
            "Created campaign"
        );
        Ok(campaign)
    }

    /// Insert a fully-formed campaign with its templates and group links.
    ///
    /// Templates are validated; an invalid one aborts the whole insert.
    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        for question in &campaign.questions {
            question.validate()?;
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO campaigns (id, user_id, name, description, is_active, has_started,
                                   start_date, end_date, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                campaign.id,
                campaign.user_id,
                campaign.name,
                campaign.description,
                campaign.is_active,
                campaign.has_started,
                campaign.start_date.as_ref().map(ts),
                campaign.end_date.as_ref().map(ts),
                ts(&campaign.created_at),
                ts(&campaign.updated_at),
            ],
        )?;
        for (position, question) in campaign.questions.iter().enumerate() {
            Self::insert_question_tx(&tx, &campaign.id, position as i64, question)?;
        }
        Self::replace_group_links_tx(&tx, &campaign.id, &campaign.groups)?;
        tx.commit()?;
        Ok(())
    }

    /// Get a campaign owned by `user_id`
    pub fn get_campaign(&self, id: &str, user_id: &str) -> Result<Campaign> {
        let conn = self.lock();
        let campaign = conn
            .query_row(
                "SELECT * FROM campaigns WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                Self::row_to_campaign,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("campaign", id))?;
        Self::hydrate_campaign(&conn, campaign)
    }

    /// All campaigns of a user, newest first
    pub fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>> {
        self.query_campaigns(
            "SELECT * FROM campaigns WHERE user_id = ?1 ORDER BY created_at DESC, id",
            user_id,
        )
    }

    /// Active campaigns of a user, newest first
    pub fn list_active_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>> {
        self.query_campaigns(
            "SELECT * FROM campaigns WHERE user_id = ?1 AND is_active = 1 ORDER BY created_at DESC, id",
            user_id,
        )
    }

    /// Campaigns whose name contains `needle`, ignoring case
    pub fn find_campaigns_by_name(&self, user_id: &str, needle: &str) -> Result<Vec<Campaign>> {
        let needle = needle.trim().to_lowercase();
        Ok(self
            .list_campaigns(user_id)?
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect())
    }

    fn query_campaigns(&self, sql: &str, user_id: &str) -> Result<Vec<Campaign>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let campaigns = stmt
            .query_map([user_id], Self::row_to_campaign)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        campaigns
            .into_iter()
            .map(|c| Self::hydrate_campaign(&conn, c))
            .collect()
    }

    /// Apply a partial update to a campaign's own fields (and group links).
    pub fn update_campaign(
        &self,
        id: &str,
        user_id: &str,
        patch: &CampaignPatch,
    ) -> Result<Campaign> {
        let mut campaign = self.get_campaign(id, user_id)?;
        patch.apply(&mut campaign)?;
        campaign.updated_at = Utc::now();

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            UPDATE campaigns SET name = ?1, description = ?2, is_active = ?3, has_started = ?4,
                                 start_date = ?5, end_date = ?6, updated_at = ?7
            WHERE id = ?8 AND user_id = ?9
            "#,
            params![
                campaign.name,
                campaign.description,
                campaign.is_active,
                campaign.has_started,
                campaign.start_date.as_ref().map(ts),
                campaign.end_date.as_ref().map(ts),
                ts(&campaign.updated_at),
                id,
                user_id,
            ],
        )?;
        if patch.groups.is_some() {
            Self::replace_group_links_tx(&tx, id, &campaign.groups)?;
        }
        tx.commit()?;

        tracing::debug!(campaign_id = id, "Updated campaign");
        Ok(campaign)
    }

    pub fn set_campaign_active(&self, id: &str, user_id: &str, active: bool) -> Result<Campaign> {
        self.update_campaign(
            id,
            user_id,
            &CampaignPatch {
                is_active: Some(active),
                ..Default::default()
            },
        )
    }

    /// Flag a campaign as started (first dispatch happened)
    pub fn mark_campaign_started(&self, id: &str, user_id: &str) -> Result<Campaign> {
        self.update_campaign(
            id,
            user_id,
            &CampaignPatch {
                has_started: Some(true),
                ..Default::default()
            },
        )
    }

    /// Delete a campaign with its templates and group links.
    ///
    /// Question instances keep their copy of the question and are left alone.
    pub fn delete_campaign(&self, id: &str, user_id: &str) -> Result<()> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM campaigns WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(Error::not_found("campaign", id));
        }
        tracing::info!(campaign_id = id, "Deleted campaign");
        Ok(())
    }

    /// Link groups to a campaign; already-linked ids are ignored.
    pub fn add_campaign_groups(
        &self,
        id: &str,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(id, user_id)?;
        let mut groups = campaign.groups.clone();
        groups.extend(group_ids.iter().cloned());
        self.update_campaign(
            id,
            user_id,
            &CampaignPatch {
                groups: Some(groups),
                ..Default::default()
            },
        )
    }

    /// Unlink groups from a campaign; unknown ids are ignored.
    pub fn remove_campaign_groups(
        &self,
        id: &str,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Campaign> {
        let campaign = self.get_campaign(id, user_id)?;
        let remove: HashSet<&String> = group_ids.iter().collect();
        let groups = campaign
            .groups
            .into_iter()
            .filter(|g| !remove.contains(g))
            .collect();
        self.update_campaign(
            id,
            user_id,
            &CampaignPatch {
                groups: Some(groups),
                ..Default::default()
            },
        )
    }

    fn replace_group_links_tx(tx: &Transaction, campaign_id: &str, groups: &[String]) -> Result<()> {
        tx.execute(
            "DELETE FROM campaign_groups WHERE campaign_id = ?",
            [campaign_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO campaign_groups (campaign_id, group_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (position, group_id) in groups.iter().enumerate() {
            stmt.execute(params![campaign_id, group_id, position as i64])?;
        }
        Ok(())
    }

    fn touch_campaign(conn: &Connection, campaign_id: &str) -> Result<()> {
        conn.execute(
            "UPDATE campaigns SET updated_at = ?1 WHERE id = ?2",
            params![ts(&Utc::now()), campaign_id],
        )?;
        Ok(())
    }

    /// Attach templates (insertion order) and group links (link order).
    fn hydrate_campaign(conn: &Connection, mut campaign: Campaign) -> Result<Campaign> {
        let mut stmt = conn.prepare(
            "SELECT * FROM campaign_questions WHERE campaign_id = ? ORDER BY position, created_at",
        )?;
        campaign.questions = stmt
            .query_map([&campaign.id], Self::row_to_question)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT group_id FROM campaign_groups WHERE campaign_id = ? ORDER BY position",
        )?;
        campaign.groups = stmt
            .query_map([&campaign.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(campaign)
    }

    fn row_to_campaign(row: &Row) -> rusqlite::Result<Campaign> {
        let start_date: Option<String> = row.get("start_date")?;
        let end_date: Option<String> = row.get("end_date")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Campaign {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            is_active: row.get("is_active")?,
            has_started: row.get("has_started")?,
            start_date: start_date.as_deref().and_then(parse_ts),
            end_date: end_date.as_deref().and_then(parse_ts),
            groups: Vec::new(),
            questions: Vec::new(),
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Campaign question (template) operations
    // ============================================

    /// Templates of a campaign, newest first, optionally filtered by the
    /// active flag.
    pub fn list_campaign_questions(
        &self,
        campaign_id: &str,
        user_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<CampaignQuestion>> {
        let campaign = self.get_campaign(campaign_id, user_id)?;
        let mut questions: Vec<CampaignQuestion> = campaign
            .questions
            .into_iter()
            .filter(|q| active.map_or(true, |a| q.is_active == a))
            .collect();
        questions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(questions)
    }

    /// Append a template to a campaign
    pub fn add_campaign_question(
        &self,
        campaign_id: &str,
        user_id: &str,
        input: NewCampaignQuestion,
    ) -> Result<CampaignQuestion> {
        let question = input.into_question(Utc::now())?;

        let mut conn = self.lock();
        Self::require_campaign(&conn, campaign_id, user_id)?;
        let tx = conn.transaction()?;
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM campaign_questions WHERE campaign_id = ?",
            [campaign_id],
            |r| r.get(0),
        )?;
        Self::insert_question_tx(&tx, campaign_id, position, &question)?;
        Self::touch_campaign(&tx, campaign_id)?;
        tx.commit()?;

        tracing::debug!(campaign_id, question_id = %question.id, "Added campaign question");
        Ok(question)
    }

    /// Patch a template; the result is re-normalized and re-validated.
    pub fn update_campaign_question(
        &self,
        campaign_id: &str,
        question_id: &str,
        user_id: &str,
        patch: &CampaignQuestionPatch,
    ) -> Result<CampaignQuestion> {
        let conn = self.lock();
        Self::require_campaign(&conn, campaign_id, user_id)?;
        let current = conn
            .query_row(
                "SELECT * FROM campaign_questions WHERE id = ?1 AND campaign_id = ?2",
                params![question_id, campaign_id],
                Self::row_to_question,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("question", question_id))?;

        let updated = patch.apply(&current)?;
        conn.execute(
            r#"
            UPDATE campaign_questions SET question = ?1, answer = ?2, response_mode = ?3,
                                          options = ?4, explanation = ?5, is_active = ?6
            WHERE id = ?7 AND campaign_id = ?8
            "#,
            params![
                updated.question,
                updated.answer,
                updated.response_mode.as_str(),
                serde_json::to_string(&updated.options)?,
                updated.explanation,
                updated.is_active,
                question_id,
                campaign_id,
            ],
        )?;
        Self::touch_campaign(&conn, campaign_id)?;
        Ok(updated)
    }

    /// Remove a template. Instances already sent from it are untouched.
    pub fn delete_campaign_question(
        &self,
        campaign_id: &str,
        question_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let conn = self.lock();
        Self::require_campaign(&conn, campaign_id, user_id)?;
        let deleted = conn.execute(
            "DELETE FROM campaign_questions WHERE id = ?1 AND campaign_id = ?2",
            params![question_id, campaign_id],
        )?;
        if deleted == 0 {
            return Err(Error::not_found("question", question_id));
        }
        Self::touch_campaign(&conn, campaign_id)?;
        Ok(())
    }

    fn require_campaign(conn: &Connection, campaign_id: &str, user_id: &str) -> Result<()> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM campaigns WHERE id = ?1 AND user_id = ?2)",
            params![campaign_id, user_id],
            |r| r.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(Error::not_found("campaign", campaign_id))
        }
    }

    fn insert_question_tx(
        conn: &Connection,
        campaign_id: &str,
        position: i64,
        question: &CampaignQuestion,
    ) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO campaign_questions (id, campaign_id, position, question, answer,
                                            response_mode, options, explanation, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                question.id,
                campaign_id,
                position,
                question.question,
                question.answer,
                question.response_mode.as_str(),
                serde_json::to_string(&question.options)?,
                question.explanation,
                question.is_active,
                ts(&question.created_at),
            ],
        )?;
        Ok(())
    }

    fn row_to_question(row: &Row) -> rusqlite::Result<CampaignQuestion> {
        let mode: String = row.get("response_mode")?;
        let options: String = row.get("options")?;
        let created_at: String = row.get("created_at")?;

        Ok(CampaignQuestion {
            id: row.get("id")?,
            question: row.get("question")?,
            answer: row.get("answer")?,
            response_mode: mode.parse().unwrap_or_default(),
            options: serde_json::from_str(&options).unwrap_or_default(),
            explanation: row.get("explanation")?,
            is_active: row.get("is_active")?,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Group operations
    // ============================================

    pub fn insert_group(&self, user_id: &str, input: NewGroup) -> Result<Group> {
        let group = input.into_group(user_id, Utc::now())?;
        self.save_group(&group)?;
        tracing::info!(group_id = %group.id, user_id, participants = group.participants.len(), "Created group");
        Ok(group)
    }

    /// Insert a fully-formed group record
    pub fn save_group(&self, group: &Group) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO groups (id, user_id, name, description, participants, is_active,
                                created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                group.id,
                group.user_id,
                group.name,
                group.description,
                serde_json::to_string(&group.participants)?,
                group.is_active,
                ts(&group.created_at),
                ts(&group.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_group(&self, id: &str, user_id: &str) -> Result<Group> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM groups WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::row_to_group,
        )
        .optional()?
        .ok_or_else(|| Error::not_found("group", id))
    }

    /// All groups of a user, newest first
    pub fn list_groups(&self, user_id: &str) -> Result<Vec<Group>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM groups WHERE user_id = ? ORDER BY created_at DESC, id")?;
        let groups = stmt
            .query_map([user_id], Self::row_to_group)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Groups owned by `user_id` among `ids`, in the order of `ids`.
    ///
    /// Unknown ids and ids owned by another user are skipped.
    pub fn list_groups_by_ids(&self, user_id: &str, ids: &[String]) -> Result<Vec<Group>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut by_id: std::collections::HashMap<String, Group> = self
            .list_groups(user_id)?
            .into_iter()
            .filter(|g| wanted.contains(g.id.as_str()))
            .map(|g| (g.id.clone(), g))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub fn update_group(&self, id: &str, user_id: &str, patch: &GroupPatch) -> Result<Group> {
        let mut group = self.get_group(id, user_id)?;
        patch.apply(&mut group)?;
        group.updated_at = Utc::now();
        self.write_group(&group)?;
        Ok(group)
    }

    pub fn set_group_active(&self, id: &str, user_id: &str, active: bool) -> Result<Group> {
        self.update_group(
            id,
            user_id,
            &GroupPatch {
                is_active: Some(active),
                ..Default::default()
            },
        )
    }

    /// Delete a group and unlink it from the owner's campaigns
    pub fn delete_group(&self, id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM groups WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(Error::not_found("group", id));
        }
        tx.execute(
            r#"
            DELETE FROM campaign_groups
            WHERE group_id = ?1
              AND campaign_id IN (SELECT id FROM campaigns WHERE user_id = ?2)
            "#,
            params![id, user_id],
        )?;
        tx.commit()?;
        tracing::info!(group_id = id, "Deleted group");
        Ok(())
    }

    /// Append a phone number to a group's roster.
    ///
    /// The number is stored as given (trimmed); an exact duplicate is rejected.
    pub fn add_participant(&self, id: &str, user_id: &str, phone_number: &str) -> Result<Group> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(Error::bad_request("phone number is required"));
        }
        let mut group = self.get_group(id, user_id)?;
        if group.participants.iter().any(|p| p == phone_number) {
            return Err(Error::bad_request(format!(
                "participant already in group: {}",
                phone_number
            )));
        }
        group.participants.push(phone_number.to_string());
        group.updated_at = Utc::now();
        self.write_group(&group)?;
        Ok(group)
    }

    /// Remove a phone number from a group's roster
    pub fn remove_participant(&self, id: &str, user_id: &str, phone_number: &str) -> Result<Group> {
        let phone_number = phone_number.trim();
        let mut group = self.get_group(id, user_id)?;
        let before = group.participants.len();
        group.participants.retain(|p| p != phone_number);
        if group.participants.len() == before {
            return Err(Error::not_found("participant", phone_number));
        }
        group.updated_at = Utc::now();
        self.write_group(&group)?;
        Ok(group)
    }

    /// Roster totals across a user's groups
    pub fn group_stats(&self, user_id: &str) -> Result<GroupStats> {
        let groups = self.list_groups(user_id)?;
        let active = groups.iter().filter(|g| g.is_active).count() as i64;
        Ok(GroupStats {
            total: groups.len() as i64,
            active,
            inactive: groups.len() as i64 - active,
            total_participants: groups.iter().map(|g| g.participants.len() as i64).sum(),
        })
    }

    fn write_group(&self, group: &Group) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE groups SET name = ?1, description = ?2, participants = ?3, is_active = ?4,
                              updated_at = ?5
            WHERE id = ?6 AND user_id = ?7
            "#,
            params![
                group.name,
                group.description,
                serde_json::to_string(&group.participants)?,
                group.is_active,
                ts(&group.updated_at),
                group.id,
                group.user_id,
            ],
        )?;
        Ok(())
    }

    fn row_to_group(row: &Row) -> rusqlite::Result<Group> {
        let participants: String = row.get("participants")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Group {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            participants: serde_json::from_str(&participants).unwrap_or_default(),
            is_active: row.get("is_active")?,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Question instance operations
    // ============================================

    /// Insert a question instance as-is
    pub fn insert_question_instance(&self, instance: &QuestionInstance) -> Result<()> {
        let campaign_ref = instance
            .campaign
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.insert_instance_row(instance, campaign_ref)
    }

    /// Insert a question instance whose campaign reference is kept exactly as
    /// received, in whatever encoding the writer used.
    pub fn insert_question_instance_raw(
        &self,
        instance: &QuestionInstance,
        campaign_ref: &serde_json::Value,
    ) -> Result<()> {
        self.insert_instance_row(instance, Some(campaign_ref.to_string()))
    }

    fn insert_instance_row(
        &self,
        instance: &QuestionInstance,
        campaign_ref: Option<String>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO question_instances (id, user_id, campaign_ref, phone_number, student_name,
                                            question, answer, student_response, grade, feedback,
                                            audio_url, created_at, answered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                instance.id,
                instance.user_id,
                campaign_ref,
                instance.phone_number,
                instance.student_name,
                instance.question,
                instance.answer,
                instance.student_response,
                instance.grade,
                instance.feedback,
                instance.audio_url,
                ts(&instance.created_at),
                instance.answered_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_question_instance(&self, id: &str, user_id: &str) -> Result<QuestionInstance> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM question_instances WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::row_to_instance,
        )
        .optional()?
        .ok_or_else(|| Error::not_found("question instance", id))
    }

    /// Record a student's answer. Setting `answered_at` is what makes the
    /// instance count as answered.
    pub fn record_response(
        &self,
        id: &str,
        user_id: &str,
        response: Option<&str>,
        audio_url: Option<&str>,
        answered_at: DateTime<Utc>,
    ) -> Result<QuestionInstance> {
        let updated = {
            let conn = self.lock();
            conn.execute(
                r#"
                UPDATE question_instances
                SET student_response = COALESCE(?1, student_response),
                    audio_url = COALESCE(?2, audio_url),
                    answered_at = ?3
                WHERE id = ?4 AND user_id = ?5
                "#,
                params![response, audio_url, ts(&answered_at), id, user_id],
            )?
        };
        if updated == 0 {
            return Err(Error::not_found("question instance", id));
        }
        self.get_question_instance(id, user_id)
    }

    /// Record a teacher grade (0-10, stored as entered) and feedback
    pub fn record_grade(
        &self,
        id: &str,
        user_id: &str,
        grade: &str,
        feedback: Option<&str>,
    ) -> Result<QuestionInstance> {
        let updated = {
            let conn = self.lock();
            conn.execute(
                r#"
                UPDATE question_instances
                SET grade = ?1, feedback = COALESCE(?2, feedback)
                WHERE id = ?3 AND user_id = ?4
                "#,
                params![grade.trim(), feedback, id, user_id],
            )?
        };
        if updated == 0 {
            return Err(Error::not_found("question instance", id));
        }
        self.get_question_instance(id, user_id)
    }

    /// Load question instances, oldest first.
    ///
    /// Owner, send-time bounds and phone are applied in SQL. Campaign
    /// references are decoded per row and matched on their canonical id, so
    /// every stored encoding of the same campaign matches.
    pub fn list_question_instances(&self, query: &InstanceQuery) -> Result<Vec<QuestionInstance>> {
        let mut sql = String::from("SELECT * FROM question_instances WHERE user_id = ?");
        let mut args: Vec<String> = vec![query.user_id.clone()];

        if let Some(after) = &query.created_after {
            sql.push_str(" AND created_at >= ?");
            args.push(ts(after));
        }
        if let Some(before) = &query.created_before {
            sql.push_str(" AND created_at <= ?");
            args.push(ts(before));
        }
        if let Some(phone) = &query.phone_number {
            sql.push_str(" AND phone_number = ?");
            args.push(phone.clone());
        }
        sql.push_str(" ORDER BY created_at, id");

        let wanted: Option<HashSet<&str>> = query
            .campaign_ids
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());
        if wanted.as_ref().is_some_and(|w| w.is_empty()) {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_instance)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let instances: Vec<QuestionInstance> = match &wanted {
            None => rows,
            Some(ids) => rows
                .into_iter()
                .filter(|i| i.campaign_id().is_some_and(|c| ids.contains(c)))
                .collect(),
        };

        tracing::debug!(
            user_id = %query.user_id,
            count = instances.len(),
            "Loaded question instances"
        );
        Ok(instances)
    }

    /// Search question instances and return one page of matches.
    ///
    /// Text filters, presence filters and ordering run in SQL; the campaign
    /// filter runs on decoded references like [`Self::list_question_instances`].
    pub fn search_question_instances(&self, search: &InstanceSearch) -> Result<InstancePage> {
        if search.limit == 0 {
            return Err(Error::bad_request("page limit must be at least 1"));
        }

        let mut sql = String::from("SELECT * FROM question_instances WHERE user_id = ?");
        let mut args: Vec<String> = vec![search.user_id.clone()];
        push_contains(&mut sql, &mut args, "question", search.question.as_deref());
        push_contains(&mut sql, &mut args, "student_name", search.student_name.as_deref());
        push_contains(&mut sql, &mut args, "phone_number", search.student_phone.as_deref());
        push_presence(&mut sql, "student_response", search.has_response);
        push_presence(&mut sql, "grade", search.is_evaluated);
        sql.push_str(if search.oldest_first {
            " ORDER BY created_at, id"
        } else {
            " ORDER BY created_at DESC, id DESC"
        });

        let rows = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_instance)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let matches: Vec<QuestionInstance> = match &search.campaign_id {
            None => rows,
            Some(id) => rows
                .into_iter()
                .filter(|i| i.campaign_id() == Some(id.as_str()))
                .collect(),
        };

        let pagination = Pagination::new(matches.len(), search.limit, search.offset);
        let data: Vec<QuestionInstance> = matches
            .into_iter()
            .skip(search.offset)
            .take(search.limit)
            .collect();

        tracing::debug!(
            user_id = %search.user_id,
            total = pagination.total,
            returned = data.len(),
            "Searched question instances"
        );
        Ok(InstancePage { data, pagination })
    }

    fn row_to_instance(row: &Row) -> rusqlite::Result<QuestionInstance> {
        let campaign_ref: Option<String> = row.get("campaign_ref")?;
        let created_at: String = row.get("created_at")?;
        let answered_at: Option<String> = row.get("answered_at")?;

        let campaign = campaign_ref
            .as_deref()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|value| CampaignRef::from_json(&value));

        Ok(QuestionInstance {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            campaign,
            phone_number: row.get("phone_number")?,
            student_name: row.get("student_name")?,
            question: row.get("question")?,
            answer: row.get("answer")?,
            student_response: row.get("student_response")?,
            grade: row.get("grade")?,
            feedback: row.get("feedback")?,
            audio_url: row.get("audio_url")?,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            answered_at: answered_at.as_deref().and_then(parse_ts),
        })
    }
}
