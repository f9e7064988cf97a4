//! Payment-gateway integration: webhook envelope, signature checks, errors.

mod event;
mod webhook_errors;
mod webhook_verifier;

pub use event::{GatewayCommand, GatewayEvent, GatewayEventType};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{SignatureHeader, WebhookVerifier, DEFAULT_TOLERANCE_SECS};
