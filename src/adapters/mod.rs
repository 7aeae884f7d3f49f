//! Infrastructure adapters. Implement outbound ports.
//!
//! FinMind, Perplexity, SQLite cache, filesystem, child processes, terminal UI.
//! Map errors to DomainError.

pub mod ai;
pub mod finmind;
pub mod persistence;
pub mod process;
pub mod ui;
