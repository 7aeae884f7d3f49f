//! tw-daytrade: Taiwan equities day-trading assistant with Hexagonal Architecture.
//!
//! Two entry points share this library: the analysis TUI (`tw-daytrade`) and
//! the environment launcher (`launcher`).

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
