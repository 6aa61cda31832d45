//! Test Helper Utilities
//!
//! Shared fixtures, scripted collaborators and harness setup for the
//! siteplan-expansion integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;
pub mod fixtures;

// Re-export commonly used items
pub use db_utils::{
    build_harness, orchestrator_on, submit_request, test_config, wait_for_stage,
    wait_for_terminal, TestHarness,
};
pub use fakes::{ScriptedRationaleProvider, StaticRegionProvider};
pub use fixtures::{small_country, SMALL_COUNTRY};
