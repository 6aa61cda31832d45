//! Utility modules for siteplan-expansion

pub mod db_retry;
pub mod geo;

pub use db_retry::retry_on_lock;
