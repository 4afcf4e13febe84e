//! flashcast-import - load records from a JSON bundle into the database
//!
//! A bundle holds users, groups, campaigns and question instances. Owners are
//! referenced by email. Group and campaign ids from the bundle are kept so
//! that campaign group lists and instance campaign references resolve.
//! Campaign references on instances are stored exactly as given.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use flashcast_core::{CampaignRef, Config, Database, NewCampaign, NewGroup, QuestionInstance};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flashcast-import")]
#[command(about = "Import users, campaigns, groups and question instances from JSON")]
#[command(version)]
struct Args {
    /// Path to the JSON bundle
    bundle: PathBuf,

    /// Validate the bundle without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    #[serde(default)]
    users: Vec<BundleUser>,
    #[serde(default)]
    groups: Vec<BundleGroup>,
    #[serde(default)]
    campaigns: Vec<BundleCampaign>,
    #[serde(default)]
    question_instances: Vec<BundleInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleUser {
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    identity_subject: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleGroup {
    #[serde(default)]
    id: Option<String>,
    owner: String,
    #[serde(flatten)]
    group: NewGroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleCampaign {
    #[serde(default)]
    id: Option<String>,
    owner: String,
    #[serde(default)]
    has_started: bool,
    #[serde(flatten)]
    campaign: NewCampaign,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleInstance {
    #[serde(default)]
    id: Option<String>,
    owner: String,
    /// Raw campaign reference in any supported encoding
    campaign: serde_json::Value,
    phone_number: String,
    #[serde(default)]
    student_name: Option<String>,
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    student_response: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Default)]
struct ImportResult {
    users: usize,
    groups: usize,
    campaigns: usize,
    instances: usize,
    unresolved_refs: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        flashcast_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let content = std::fs::read_to_string(&args.bundle)
        .with_context(|| format!("failed to read bundle {}", args.bundle.display()))?;
    let bundle: Bundle = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse bundle {}", args.bundle.display()))?;

    let (db, target) = if args.dry_run {
        (Database::open_in_memory()?, "in-memory database (dry run)".to_string())
    } else {
        let path = config.resolved_database_path();
        let target = path.display().to_string();
        (Database::open(&path).context("failed to open database")?, target)
    };
    db.migrate().context("failed to run database migrations")?;

    println!("Importing {} into {}", args.bundle.display(), target);
    let result = import_bundle(&db, bundle)?;

    println!("Import complete:");
    println!("  Users:              {}", result.users);
    println!("  Groups:             {}", result.groups);
    println!("  Campaigns:          {}", result.campaigns);
    println!("  Question instances: {}", result.instances);
    if result.unresolved_refs > 0 {
        println!(
            "  Warning: {} instance(s) carry a campaign reference without an id",
            result.unresolved_refs
        );
    }

    Ok(())
}

fn import_bundle(db: &Database, bundle: Bundle) -> Result<ImportResult> {
    let mut result = ImportResult::default();
    let mut owners: HashMap<String, String> = HashMap::new();
    let now = Utc::now();

    for u in &bundle.users {
        let user = db
            .upsert_identity_user(
                &u.email,
                u.identity_subject.as_deref(),
                u.name.as_deref(),
                u.avatar.as_deref(),
            )
            .with_context(|| format!("failed to import user {}", u.email))?;
        owners.insert(user.email.clone(), user.id);
        result.users += 1;
    }

    let owner_id = |email: &str| -> Result<String> {
        owners
            .get(email.trim())
            .cloned()
            .with_context(|| format!("owner '{}' is not listed in the bundle's users", email))
    };

    for g in bundle.groups {
        let user_id = owner_id(&g.owner)?;
        let mut group = g.group.into_group(&user_id, now)?;
        if let Some(id) = g.id {
            group.id = id;
        }
        db.save_group(&group)
            .with_context(|| format!("failed to import group '{}'", group.name))?;
        result.groups += 1;
    }

    for c in bundle.campaigns {
        let user_id = owner_id(&c.owner)?;
        let name = c.campaign.name.clone();
        let mut campaign = c
            .campaign
            .into_campaign(&user_id, now)
            .with_context(|| format!("invalid campaign '{}'", name))?;
        if let Some(id) = c.id {
            campaign.id = id;
        }
        campaign.has_started = c.has_started;
        db.save_campaign(&campaign)
            .with_context(|| format!("failed to import campaign '{}'", campaign.name))?;
        result.campaigns += 1;
    }

    for i in bundle.question_instances {
        let user_id = owner_id(&i.owner)?;
        let campaign = CampaignRef::from_json(&i.campaign);
        if campaign.is_none() {
            tracing::warn!(campaign_ref = %i.campaign, "Campaign reference has no usable id");
            result.unresolved_refs += 1;
        }

        let instance = QuestionInstance {
            id: i.id.unwrap_or_else(flashcast_core::new_id),
            user_id,
            campaign,
            phone_number: i.phone_number,
            student_name: i.student_name,
            question: i.question,
            answer: i.answer,
            student_response: i.student_response,
            grade: i.grade,
            feedback: i.feedback,
            created_at: i.created_at.unwrap_or(now),
            answered_at: i.answered_at,
            audio_url: i.audio_url,
        };
        db.insert_question_instance_raw(&instance, &i.campaign)
            .with_context(|| format!("failed to import question instance {}", instance.id))?;
        result.instances += 1;
    }

    tracing::info!(
        users = result.users,
        groups = result.groups,
        campaigns = result.campaigns,
        instances = result.instances,
        "Bundle imported"
    );
    Ok(result)
}
