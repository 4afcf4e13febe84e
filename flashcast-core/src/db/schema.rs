//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Accounts
    -- ============================================

    CREATE TABLE IF NOT EXISTS users (
        id                   TEXT PRIMARY KEY,
        email                TEXT NOT NULL UNIQUE,
        name                 TEXT,
        identity_subject     TEXT,
        avatar               TEXT,
        onboarding_version   INTEGER NOT NULL DEFAULT 1,
        onboarding_completed INTEGER NOT NULL DEFAULT 0,
        onboarding_completed_at DATETIME,
        created_at           DATETIME NOT NULL,
        updated_at           DATETIME NOT NULL
    );

    -- ============================================
    -- Campaigns and their embedded templates
    -- ============================================

    CREATE TABLE IF NOT EXISTS campaigns (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL,
        name             TEXT NOT NULL,
        description      TEXT,
        is_active        INTEGER NOT NULL DEFAULT 1,
        has_started      INTEGER NOT NULL DEFAULT 0,
        start_date       DATETIME,
        end_date         DATETIME,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- Templates have no lifecycle outside their campaign
    CREATE TABLE IF NOT EXISTS campaign_questions (
        id               TEXT PRIMARY KEY,
        campaign_id      TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        position         INTEGER NOT NULL,
        question         TEXT NOT NULL,
        answer           TEXT NOT NULL,
        response_mode    TEXT NOT NULL DEFAULT 'audio',
        options          JSON NOT NULL DEFAULT '[]',
        explanation      TEXT,
        is_active        INTEGER NOT NULL DEFAULT 1,
        created_at       DATETIME NOT NULL
    );

    -- Campaign -> group links; groups are not owned by the campaign
    CREATE TABLE IF NOT EXISTS campaign_groups (
        campaign_id      TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        group_id         TEXT NOT NULL,
        position         INTEGER NOT NULL,
        PRIMARY KEY (campaign_id, group_id)
    );

    -- ============================================
    -- Groups
    -- ============================================

    CREATE TABLE IF NOT EXISTS groups (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL,
        name             TEXT NOT NULL,
        description      TEXT,
        participants     JSON NOT NULL DEFAULT '[]',
        is_active        INTEGER NOT NULL DEFAULT 1,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- ============================================
    -- Question instances (send events)
    -- ============================================

    CREATE TABLE IF NOT EXISTS question_instances (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL,

        -- Stored as written: bare id, {"_id": ...} or {"$oid": ...}
        campaign_ref     JSON,

        phone_number     TEXT NOT NULL,
        student_name     TEXT,
        question         TEXT NOT NULL,
        answer           TEXT NOT NULL DEFAULT '',
        student_response TEXT,
        grade            TEXT,
        feedback         TEXT,
        audio_url        TEXT,
        created_at       DATETIME NOT NULL,
        answered_at      DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_campaigns_user ON campaigns(user_id);
    CREATE INDEX IF NOT EXISTS idx_groups_user ON groups(user_id);
    CREATE INDEX IF NOT EXISTS idx_campaign_questions_campaign
        ON campaign_questions(campaign_id, position);
    "#,
    // Version 2: Instance lookups by owner + send time and by student
    r#"
    CREATE INDEX IF NOT EXISTS idx_instances_user_created
        ON question_instances(user_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_instances_user_phone
        ON question_instances(user_id, phone_number);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
