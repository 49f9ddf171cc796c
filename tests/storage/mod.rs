//! Shared storage integration tests.
//!
//! Tests the UserStore interface against all implementations.
//! Each implementation's test binary runs them through `run_user_store_tests!`.

pub mod user_store_tests;
