//! Deterministic, pure logic shared by the stagehand pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod argv;
pub mod matcher;
pub mod path;
pub mod planner;
pub mod scope;
pub mod template;
pub mod types;
