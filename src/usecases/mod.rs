//! Application use cases. Orchestrate domain logic via ports.

pub mod advisor_service;
pub mod analysis_service;
pub mod cache_service;
pub mod launcher_service;
pub mod market_data_service;
pub mod prompts;

pub use advisor_service::{AdvisorService, AnalysisMode, TradeParams};
pub use analysis_service::{AnalysisOutcome, AnalysisRequest, AnalysisService};
pub use cache_service::CacheService;
pub use launcher_service::{LaunchReport, LauncherConfig, LauncherService};
pub use market_data_service::MarketDataService;
