pub mod client;
pub mod mapper;

pub use client::{DEFAULT_BASE_URL, FinMindClient};
