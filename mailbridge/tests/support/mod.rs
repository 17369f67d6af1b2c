//! Test support utilities for driving a complete bridge
//!
//! The bridge runs with real TCP endpoints and a real filesystem under a
//! temporary directory; only the collaborators' bookkeeping is mocked.

#![allow(dead_code)]

pub mod harness;
pub mod mocks;

pub use harness::{Harness, SEEDED_MESSAGE};
