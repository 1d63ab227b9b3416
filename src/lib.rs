//! Non-destructive CSV cleaning on DuckDB.
//!
//! A [`session::Session`] loads one file through the dialect prober, detects
//! and repairs column overflow, and runs cleaning plans through a staging
//! table that can never lose rows.

pub mod config;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod guard;
pub mod json_schema;
pub mod naming;
pub mod overflow;
pub mod plan;
pub mod profile;
pub mod session;
pub mod staging;
