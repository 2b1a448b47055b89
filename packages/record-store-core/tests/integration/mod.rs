//! Integration test suite.
//!
//! 1. Scenarios driving every index kind through the public API
//! 2. Randomized consistency between storage and indices
//! 3. Configuration and shared readers

pub mod consistency_tests;
pub mod helpers;
pub mod scenario_tests;
