//! flashcast-analyze - CLI tool to render campaign analytics
//!
//! Builds campaign, cross-group, dashboard and student reports from the local
//! database and prints them as text or JSON. Question instances can also be
//! searched page by page.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use flashcast_core::analytics::campaign::Segment;
use flashcast_core::analytics::{
    AnalyticsFilters, AnalyticsSettings, CampaignReport, ChartPoint, DashboardStats,
    DirectoryEntry, GroupReport, HistoryStatus, Period, StudentActivity, StudentHistory,
    StudentProfile,
};
use flashcast_core::{Campaign, Config, Database, ErrorKind, InstancePage, InstanceSearch, User};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "flashcast-analyze")]
#[command(about = "Render analytics for flashcard campaigns")]
#[command(version)]
struct Args {
    /// Owning user, by email or id
    #[arg(short, long)]
    user: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Full report for one campaign (id or unique name fragment)
    Campaign {
        campaign: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Per-group report across all campaigns
    Groups {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Headline totals and per-campaign chart data
    Dashboard {
        /// Restrict chart data to one campaign
        #[arg(short, long)]
        campaign: Option<String>,
    },
    /// Question history of one student in a campaign
    Student { campaign: String, phone: String },
    /// Every student, most recently active first
    Students,
    /// One student's questions across campaigns
    Profile { phone: String },
    /// Answered, graded and response-rate figures per student
    Activity,
    /// Search question instances
    Search(SearchArgs),
}

#[derive(ClapArgs)]
struct SearchArgs {
    /// Restrict to one campaign (id or unique name fragment)
    #[arg(short, long)]
    campaign: Option<String>,

    /// Question text contains
    #[arg(short, long)]
    question: Option<String>,

    /// Student name contains
    #[arg(short, long)]
    name: Option<String>,

    /// Phone number contains
    #[arg(long)]
    phone: Option<String>,

    /// Only instances with (true) or without (false) a student response
    #[arg(long)]
    has_response: Option<bool>,

    /// Only instances with (true) or without (false) a grade
    #[arg(long)]
    is_evaluated: Option<bool>,

    #[arg(short, long, default_value_t = flashcast_core::db::repo::DEFAULT_PAGE_LIMIT)]
    limit: usize,

    #[arg(short, long, default_value_t = 0)]
    offset: usize,

    /// Oldest first instead of newest first
    #[arg(long)]
    oldest_first: bool,
}

#[derive(ClapArgs)]
struct FilterArgs {
    /// Relative window: 7d, 15d or 30d
    #[arg(short, long)]
    period: Option<String>,

    /// Inclusive start date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    start_date: Option<String>,

    /// Inclusive end date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    end_date: Option<String>,

    /// Restrict group breakdowns to these group ids
    #[arg(short, long = "group")]
    groups: Vec<String>,
}

impl FilterArgs {
    fn into_filters(self, default_period: Option<Period>) -> AnalyticsFilters {
        AnalyticsFilters {
            start_date: self.start_date,
            end_date: self.end_date,
            period: self.period.map(Period::from),
            groups: self.groups,
        }
        .or_default_period(default_period)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        flashcast_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = config.resolved_database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let settings = AnalyticsSettings::from(&config.analytics);
    let user = resolve_user(&db, &args.user)?;
    let now = Utc::now();

    tracing::info!(user_id = %user.id, "Running analytics");

    match args.command {
        Command::Campaign { campaign, filters } => {
            let campaign = resolve_campaign(&db, &user, &campaign)?;
            let filters = filters.into_filters(config.analytics.default_period);
            let report = db
                .campaign_analytics(&campaign.id, &user.id, &filters, &settings, now)
                .context("failed to build campaign report")?;
            emit(args.format, &report, print_campaign_report)
        }
        Command::Groups { filters } => {
            let filters = filters.into_filters(config.analytics.default_period);
            let reports = db
                .group_analytics(&user.id, &filters, &settings, now)
                .context("failed to build group report")?;
            emit(args.format, &reports, |r| print_group_reports(r))
        }
        Command::Dashboard { campaign } => {
            let campaign_id = campaign
                .as_deref()
                .map(|c| resolve_campaign(&db, &user, c))
                .transpose()?
                .map(|c| c.id);
            let stats = db
                .dashboard_stats(&user.id, &settings)
                .context("failed to compute dashboard statistics")?;
            let chart = db
                .chart_data(&user.id, campaign_id.as_deref())
                .context("failed to compute chart data")?;
            let output = DashboardOutput { stats, chart };
            emit(args.format, &output, print_dashboard)
        }
        Command::Student { campaign, phone } => {
            let campaign = resolve_campaign(&db, &user, &campaign)?;
            let history = db
                .student_history(&campaign.id, &phone, &user.id, &settings)
                .context("failed to load student history")?;
            emit(args.format, &history, print_student_history)
        }
        Command::Students => {
            let students = db
                .list_students(&user.id, &settings)
                .context("failed to list students")?;
            emit(args.format, &students, |s| print_directory(s))
        }
        Command::Profile { phone } => {
            let profile = db
                .student_profile(&user.id, &phone, &settings)
                .context("failed to load student profile")?;
            emit(args.format, &profile, print_profile)
        }
        Command::Activity => {
            let activity = db
                .student_activity(&user.id, &settings)
                .context("failed to compute student activity")?;
            emit(args.format, &activity, |a| print_activity(a))
        }
        Command::Search(search) => {
            let campaign_id = search
                .campaign
                .as_deref()
                .map(|c| resolve_campaign(&db, &user, c))
                .transpose()?
                .map(|c| c.id);
            let query = InstanceSearch {
                campaign_id,
                question: search.question,
                student_name: search.name,
                student_phone: search.phone,
                has_response: search.has_response,
                is_evaluated: search.is_evaluated,
                limit: search.limit,
                offset: search.offset,
                oldest_first: search.oldest_first,
                ..InstanceSearch::for_user(&user.id)
            };
            let page = db
                .search_question_instances(&query)
                .context("failed to search question instances")?;
            emit(args.format, &page, print_search_page)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardOutput {
    stats: DashboardStats,
    chart: Vec<ChartPoint>,
}

fn emit<T: Serialize>(format: Format, value: &T, print_text: impl Fn(&T)) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => print_text(value),
    }
    Ok(())
}

/// Find the user by email when the argument looks like one, otherwise by id.
fn resolve_user(db: &Database, user: &str) -> Result<User> {
    if user.contains('@') {
        return db
            .get_user_by_email(user)?
            .with_context(|| format!("No user found with email '{}'", user));
    }
    db.get_user(user)
        .with_context(|| format!("No user found with id '{}'", user))
}

/// Exact id first, then a unique case-insensitive name match.
fn resolve_campaign(db: &Database, user: &User, campaign: &str) -> Result<Campaign> {
    match db.get_campaign(campaign, &user.id) {
        Ok(found) => return Ok(found),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut matches = db.find_campaigns_by_name(&user.id, campaign)?;
    match matches.len() {
        0 => anyhow::bail!("No campaign found matching '{}'", campaign),
        1 => Ok(matches.remove(0)),
        n => {
            let names: Vec<String> = matches
                .iter()
                .map(|c| format!("{} ({})", c.name, c.id))
                .collect();
            anyhow::bail!(
                "'{}' matches {} campaigns: {}",
                campaign,
                n,
                names.join(", ")
            )
        }
    }
}

fn print_campaign_report(report: &CampaignReport) {
    let details = &report.campaign_details;
    let overview = &report.overview;

    let status = if details.is_active { "active" } else { "inactive" };
    println!("Campaign: {} ({})", details.name, status);
    println!(
        "  Questions: {} ({} active)",
        details.questions_in_campaign, details.active_questions_in_campaign
    );
    println!(
        "  Sent: {}  Answered: {}  Completion: {:.2}%",
        overview.total_sent, overview.answered_questions, overview.completion_rate
    );
    println!(
        "  Students: {} answering, {} reached, {} on rosters ({:.2}% participation)",
        overview.total_students,
        overview.students_reached,
        overview.total_group_participants,
        overview.participation_rate
    );
    println!(
        "  Average score: {:.2}  Avg response time: {}",
        overview.average_score, overview.average_response_time
    );

    let questions = &report.question_analysis.campaign_questions;
    if !questions.is_empty() {
        println!("\nQuestions:");
        for q in questions {
            println!(
                "  [{:?}] {} - {}/{} answered, success {:.2}%",
                q.difficulty, q.text, q.responses, q.sent_count, q.success_rate
            );
        }
    }

    let segments = &report.student_analysis.student_segments;
    println!("\nStudent segments:");
    print_segment("Excellent", &segments.excellent);
    print_segment("Good", &segments.good);
    print_segment("Developing", &segments.developing);
    print_segment("Needs help", &segments.needs_help);

    if !report.student_analysis.top_performers.is_empty() {
        println!("\nTop performers:");
        for p in &report.student_analysis.top_performers {
            println!(
                "  {} ({}) - {:.2} over {} answer(s)",
                p.name, p.phone_number, p.score, p.questions_answered
            );
        }
    }

    if !report.group_comparison.is_empty() {
        println!("\nGroups:");
        for g in &report.group_comparison {
            println!(
                "  #{} {} - {}/{} active, score {:.2}, completion {:.2}%",
                g.rank,
                g.group_name,
                g.students,
                g.total_participants,
                g.average_score,
                g.completion_rate
            );
        }
    }

    if !report.alerts.is_empty() {
        println!("\nAlerts:");
        for alert in &report.alerts {
            println!(
                "  [{:?}] {}: {}",
                alert.kind.priority(),
                alert.kind.title(),
                alert.kind.description()
            );
        }
    }
}

fn print_segment(label: &str, segment: &Segment) {
    println!(
        "  {:<11} {:>3} ({}%)  {}",
        label, segment.count, segment.percentage, segment.criteria
    );
}

fn print_group_reports(reports: &[GroupReport]) {
    if reports.is_empty() {
        println!("No groups are linked to any campaign.");
        return;
    }

    for report in reports {
        let o = &report.overview;
        println!(
            "Group: {} ({} participants)",
            report.group.name, report.group.total_participants
        );
        println!(
            "  Sent: {}  Answered: {}  Completion: {:.2}%  Participation: {:.2}%",
            o.sent_questions, o.answered_questions, o.completion_rate, o.participation_rate
        );
        println!(
            "  Average score: {:.2}  Avg response time: {}",
            o.average_score, o.average_response_time
        );
        for c in &report.campaigns {
            println!(
                "    - {}: {}/{} answered, score {:.2}",
                c.name, c.overview.answered_questions, c.overview.sent_questions, c.overview.average_score
            );
        }
        println!();
    }
    println!("{} group(s)", reports.len());
}

fn print_dashboard(output: &DashboardOutput) {
    let s = &output.stats;
    println!(
        "Campaigns: {} ({} active)",
        s.total_campaigns, s.active_campaigns
    );
    println!("Students: {}", s.total_students);
    println!(
        "Interactions: {} of {} sent ({})",
        s.total_interactions,
        s.total_sent,
        s.format_response_rate()
    );
    println!("Average score: {:.1}", s.average_score);

    if !output.chart.is_empty() {
        println!("\nBy campaign:");
        for point in &output.chart {
            println!(
                "  {} - sent {}, answered {}, good {}",
                point.campaign_name, point.sent, point.answered, point.good_performance
            );
        }
    }
}

fn print_student_history(history: &StudentHistory) {
    let s = &history.student;
    println!("Student: {} ({})", s.name, s.phone_number);
    println!(
        "  Answered {} of {}, average score {:.2}",
        s.total_answered, s.total_sent, s.average_score
    );

    for entry in &history.history {
        let status = match entry.status {
            HistoryStatus::Answered => "+",
            HistoryStatus::Pending => " ",
        };
        println!(
            "  [{}] {} {}",
            status,
            entry.sent_at.format("%Y-%m-%d %H:%M"),
            entry.question
        );
        if let Some(ref grade) = entry.score {
            println!("      grade: {}", grade);
        }
    }
}

fn print_directory(students: &[DirectoryEntry]) {
    if students.is_empty() {
        println!("No students yet.");
        return;
    }

    for s in students {
        let last_active = s
            .last_active
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let campaigns: Vec<&str> = s.campaigns.iter().map(|c| c.name.as_str()).collect();
        println!(
            "{} ({}) - {} question(s), last active {}",
            s.name, s.phone_number, s.total_questions, last_active
        );
        println!("    campaigns: {}", campaigns.join(", "));
    }
    println!("{} student(s)", students.len());
}

fn print_profile(profile: &StudentProfile) {
    let g = &profile.global_stats;
    println!("Student: {} ({})", profile.name, profile.phone_number);
    println!(
        "  {} question(s) in {} campaign(s), average score {:.2}",
        g.total_questions, g.total_tracks, g.average_score
    );

    for track in &profile.tracks {
        println!(
            "\n{} - {} question(s), average {:.2}",
            track.campaign_name, track.total_questions, track.average_score
        );
        for q in &track.questions {
            let grade = q.score.as_deref().unwrap_or("-");
            println!("  [{:>5}] {}", grade, q.question);
        }
    }
}

fn print_activity(activity: &[StudentActivity]) {
    for a in activity {
        let avg = a
            .avg_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} ({}) - {}/{} answered ({:.2}%), {} graded, average {}",
            a.name,
            a.phone_number,
            a.answered_questions,
            a.total_questions,
            a.response_rate,
            a.evaluated_questions,
            avg
        );
    }
}

fn print_search_page(page: &InstancePage) {
    for i in &page.data {
        let status = if i.is_answered() { "+" } else { " " };
        println!(
            "  [{}] {} {} ({}) {}",
            status,
            i.created_at.format("%Y-%m-%d %H:%M"),
            i.display_name(),
            i.phone_number,
            i.question
        );
    }
    let p = &page.pagination;
    println!(
        "Page {} of {} ({} match(es))",
        p.current_page, p.pages, p.total
    );
}
