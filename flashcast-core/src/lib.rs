//! # flashcast-core
//!
//! Core library for flashcast - campaign analytics for flashcard outreach.
//!
//! This library provides:
//! - Domain types for users, campaigns, groups and question instances
//! - Database storage layer with SQLite
//! - Campaign, cross-group, dashboard and per-student analytics
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use flashcast_core::analytics::{AnalyticsFilters, AnalyticsSettings, Period};
//! use flashcast_core::{Config, Database};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let filters = AnalyticsFilters::with_period(Period::SevenDays);
//! let settings = AnalyticsSettings::from(&config.analytics);
//! let report = db
//!     .campaign_analytics("campaign-id", "user-id", &filters, &settings, Utc::now())
//!     .expect("failed to build report");
//! println!("{}", report.overview.completion_rate);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, InstancePage, InstanceQuery, InstanceSearch, Pagination};
pub use error::{Error, ErrorKind, Result};
pub use phone::normalize_phone;
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod phone;
pub mod types;
