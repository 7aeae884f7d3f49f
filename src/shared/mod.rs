//! Cross-cutting helpers shared by the binaries.

pub mod config;
