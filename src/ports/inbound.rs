//! Inbound port. UI (adapter) calls into the application.

use crate::domain::DomainError;

/// Input port: the terminal UI drives the application through it.
#[async_trait::async_trait]
pub trait InputPort: Send + Sync {
    /// Run the interactive menu loop until the user exits.
    async fn run(&self) -> Result<(), DomainError>;
}
