//! Business logic services

pub mod coercion;
pub mod distribution;
pub mod error_report;
pub mod field_catalog;
pub mod ingestion;
pub mod job_history;
pub mod mapping;
pub mod progress;
pub mod spreadsheet;
pub mod store;
pub mod validator;
