//! Spinners for long-running steps (API calls, LLM reports).

use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(TICK);
    pb
}

/// Await `fut` behind a spinner; the spinner is cleared when it resolves.
pub async fn with_spinner<F, T>(message: impl Into<String>, fut: F) -> T
where
    F: Future<Output = T>,
{
    let pb = spinner(message);
    let out = fut.await;
    pb.finish_and_clear();
    out
}
