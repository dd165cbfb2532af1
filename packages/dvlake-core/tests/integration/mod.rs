//! Integration test suite for tables with deletion vectors.
//!
//! Tests are organized by area:
//! 1. Delete scenarios
//! 2. Concurrent writers
//! 3. Compaction
//! 4. Persistence and recovery

pub mod compaction_tests;
pub mod concurrency_tests;
pub mod delete_scenarios;
pub mod helpers;
pub mod persistence_tests;
