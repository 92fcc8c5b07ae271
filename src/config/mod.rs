//! Configuration and invocation model
//!
//! Launch request validation, well-known host paths and the launch strategy.

pub mod settings;
pub mod strategy;
pub mod types;
pub mod validation;
