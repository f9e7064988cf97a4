//! Dunning - Failed-Payment Recovery Service
//!
//! Reacts to payment-gateway webhooks, walks each failed subscription
//! through a fixed, time-indexed reminder sequence, and cancels and
//! downgrades accounts that never recover.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
