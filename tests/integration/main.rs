//! Integration tests for the harvester
//!
//! These tests use wiremock to create mock HTTP servers and drive the real
//! `reqwest` transport end-to-end.

mod fetch_tests;
mod harvest_tests;
