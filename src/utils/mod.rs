//! Utilities
//!
//! Cross-cutting helpers for the application environment.

pub mod env_finalize;
pub mod secure_env;
