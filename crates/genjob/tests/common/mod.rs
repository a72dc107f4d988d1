//! Shared test utilities for genjob integration tests.
//!
//! This module provides:
//! - `FakeProvider`, a scripted in-memory generation provider
//! - Builders for tracker configuration and status payloads

pub mod builders;
pub mod fake_provider;

pub use builders::*;
pub use fake_provider::FakeProvider;
