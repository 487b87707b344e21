pub mod prompt;
pub mod stats;
pub mod user;
pub mod worker;

pub use prompt::{ProcessingGeneration, WaitingPrompt};
pub use stats::Stats;
pub use user::User;
pub use worker::Worker;

/// Rounds to two decimal places, the discipline kudos values are held to
/// everywhere they're stored so serialized output is stable across reimplementations.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
