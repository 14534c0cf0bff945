//! Shared test utilities for picorg integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated libraries in temp directories
//! - `StubClassifier`, a model client scripted by file content

pub mod harness;

pub use harness::{StubClassifier, TestHarness};
