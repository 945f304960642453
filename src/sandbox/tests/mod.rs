//! Tests for the sandbox
//!
//! Organized by feature area

mod helpers;

mod registry_tests;
