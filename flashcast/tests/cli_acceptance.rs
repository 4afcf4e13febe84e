use flashcast_core::Database;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const OWNER: &str = "teacher@example.com";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    /// Environment with the fixture bundle already imported
    fn imported() -> Self {
        let env = Self::new();
        let bundle = fixture_bundle().to_string_lossy().into_owned();
        let output = run_bin(&env, "flashcast-import", &[bundle.as_str()]);
        assert_success("flashcast-import", &[bundle.as_str()], &output);
        env
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("flashcast/data.db")
    }
}

fn fixture_bundle() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/bundle.json")
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "flashcast-import" => PathBuf::from(assert_cmd::cargo::cargo_bin!("flashcast-import")),
        "flashcast-analyze" => PathBuf::from(assert_cmd::cargo::cargo_bin!("flashcast-analyze")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    let mut command = Command::new(bin_path);

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn analyze_json(env: &CliTestEnv, args: &[&str]) -> Value {
    let mut full = vec!["--user", OWNER, "--format", "json"];
    full.extend_from_slice(args);
    let output = run_bin(env, "flashcast-analyze", &full);
    assert_success("flashcast-analyze", &full, &output);
    serde_json::from_slice(&output.stdout).expect("analyze output should be JSON")
}

#[test]
fn import_loads_bundle_into_db() {
    let env = CliTestEnv::new();
    let bundle = fixture_bundle().to_string_lossy().into_owned();

    let output = run_bin(&env, "flashcast-import", &[bundle.as_str()]);
    assert_success("flashcast-import", &[bundle.as_str()], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Import complete:"));
    assert!(
        stdout.contains("Question instances: 3"),
        "expected import summary in stdout, got:\n{stdout}"
    );

    let db_path = env.db_path();
    assert!(
        db_path.exists(),
        "database file should exist at {}",
        db_path.display()
    );

    let db = Database::open(&db_path).expect("failed to open db");
    db.migrate().expect("failed to migrate db");

    let user = db
        .get_user_by_email(OWNER)
        .expect("failed to query user")
        .expect("user should be imported");
    let campaign = db
        .get_campaign("cmp-geo", &user.id)
        .expect("campaign should be imported");
    assert_eq!(campaign.questions.len(), 2);
    assert_eq!(campaign.groups, vec!["grp-morning".to_string()]);
    assert!(campaign.has_started);
}

#[test]
fn import_dry_run_writes_nothing() {
    let env = CliTestEnv::new();
    let bundle = fixture_bundle().to_string_lossy().into_owned();
    let args = [bundle.as_str(), "--dry-run"];

    let output = run_bin(&env, "flashcast-import", &args);
    assert_success("flashcast-import", &args, &output);
    assert!(!env.db_path().exists());
}

#[test]
fn campaign_report_matches_imported_data() {
    let env = CliTestEnv::imported();

    let report = analyze_json(&env, &["campaign", "cmp-geo"]);
    let overview = &report["overview"];

    assert_eq!(overview["totalSent"], 3);
    assert_eq!(overview["answeredQuestions"], 2);
    assert_eq!(overview["studentsReached"], 2);
    assert_eq!(overview["totalStudents"], 1);
    assert_eq!(overview["totalGroupParticipants"], 2);
    assert_eq!(overview["completionRate"].as_f64(), Some(66.67));
    assert_eq!(overview["averageScore"].as_f64(), Some(70.0));
    assert_eq!(overview["participationRate"].as_f64(), Some(50.0));
    assert_eq!(overview["averageResponseTime"], "30min");

    let groups = report["groupComparison"].as_array().expect("groupComparison");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["rank"], 1);
    assert!(report["alerts"].is_array());
}

#[test]
fn campaign_resolves_by_name_fragment() {
    let env = CliTestEnv::imported();

    let args = ["--user", OWNER, "campaign", "geography"];
    let output = run_bin(&env, "flashcast-analyze", &args);
    assert_success("flashcast-analyze", &args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Campaign: Geography review (active)"));
    assert!(stdout.contains("Student segments:"));
}

#[test]
fn unknown_campaign_fails() {
    let env = CliTestEnv::imported();

    let output = run_bin(
        &env,
        "flashcast-analyze",
        &["--user", OWNER, "campaign", "history"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No campaign found matching 'history'"));
}

#[test]
fn group_report_normalizes_roster_phones() {
    let env = CliTestEnv::imported();

    let reports = analyze_json(&env, &["groups"]);
    let reports = reports.as_array().expect("group reports array");
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report["group"]["name"], "Morning class");
    assert_eq!(report["overview"]["totalStudents"], 1);
    assert_eq!(report["overview"]["participationRate"].as_f64(), Some(50.0));
    assert_eq!(report["campaigns"][0]["id"], "cmp-geo");
}

#[test]
fn dashboard_and_student_history() {
    let env = CliTestEnv::imported();

    let dashboard = analyze_json(&env, &["dashboard"]);
    assert_eq!(dashboard["stats"]["totalCampaigns"], 1);
    assert_eq!(dashboard["stats"]["totalStudents"], 2);
    assert_eq!(dashboard["stats"]["responseRate"], 67);
    assert_eq!(dashboard["chart"][0]["goodPerformance"], 1);

    let history = analyze_json(&env, &["student", "cmp-geo", "5511988887777"]);
    assert_eq!(history["student"]["totalSent"], 2);
    assert_eq!(history["student"]["totalAnswered"], 2);
    assert_eq!(history["student"]["averageScore"].as_f64(), Some(7.0));
    assert_eq!(history["history"][0]["status"], "answered");
}

#[test]
fn student_directory_profile_and_activity() {
    let env = CliTestEnv::imported();

    let students = analyze_json(&env, &["students"]);
    let students = students.as_array().expect("students array");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["phoneNumber"], "11988887777");
    assert_eq!(students[0]["totalQuestions"], 2);
    assert_eq!(students[0]["totalCampaigns"], 1);
    assert_eq!(students[0]["campaigns"][0]["name"], "Geography review");
    assert!(students[1]["lastActive"].is_null());

    let profile = analyze_json(&env, &["profile", "5511988887777"]);
    assert_eq!(profile["globalStats"]["totalTracks"], 1);
    assert_eq!(profile["tracks"][0]["campaignId"], "cmp-geo");
    assert_eq!(profile["tracks"][0]["averageScore"].as_f64(), Some(7.0));

    let activity = analyze_json(&env, &["activity"]);
    assert_eq!(activity[0]["answeredQuestions"], 2);
    assert_eq!(activity[0]["responseRate"].as_f64(), Some(100.0));
    assert!(activity[1]["avgScore"].is_null());
}

#[test]
fn search_filters_and_paginates() {
    let env = CliTestEnv::imported();

    let unanswered = analyze_json(&env, &["search", "--has-response", "false"]);
    assert_eq!(unanswered["pagination"]["total"], 1);
    assert_eq!(unanswered["data"][0]["phoneNumber"], "+55 11 97777-6666");

    let page = analyze_json(&env, &["search", "--campaign", "cmp-geo", "--limit", "1"]);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["pages"], 3);
    assert_eq!(page["pagination"]["currentPage"], 1);
    assert_eq!(page["data"].as_array().map(Vec::len), Some(1));

    let output = run_bin(
        &env,
        "flashcast-analyze",
        &["--user", OWNER, "profile", "11900000000"],
    );
    assert!(!output.status.success());
}
