//! Integration tests for the resilience facade
//!
//! Each test builds its own registry so no state leaks between tests.

pub mod pipeline_test;
