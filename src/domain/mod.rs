//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `dunning` - Recovery records, stages, stage policy, audit entries
//! - `gateway` - Payment-gateway webhook envelope and signature verification

pub mod dunning;
pub mod foundation;
pub mod gateway;
