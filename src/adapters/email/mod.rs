//! Email notification adapters.
//!
//! - `resend` - Resend API over reqwest
//! - `logging` - log-only fallback when no API key is configured
//! - `templates` - per-stage subject and body

mod logging;
mod resend;
pub mod templates;

pub use logging::LoggingNotificationGateway;
pub use resend::{ResendNotificationGateway, ResendSettings, DEFAULT_API_BASE_URL};
