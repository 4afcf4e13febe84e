//! Database layer for flashcast
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries, scoped by owning user

pub mod repo;
pub mod schema;

pub use repo::{Database, InstancePage, InstanceQuery, InstanceSearch, Pagination};
