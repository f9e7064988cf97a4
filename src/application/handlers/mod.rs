//! Application handlers.
//!
//! Command and query handlers that sit between the HTTP layer and the engine.

pub mod dunning;

pub use dunning::*;
