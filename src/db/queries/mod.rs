//! Database queries

pub mod debtor;
pub mod field_catalog;
pub mod mapping_template;
pub mod user;
