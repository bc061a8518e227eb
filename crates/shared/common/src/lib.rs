//! Common utilities shared by every collection-bound service.
//!
//! This crate provides:
//! - Unified error handling
//! - Store client configuration
//! - Message translation

pub mod config;
pub mod error;
pub mod i18n;

pub use config::*;
pub use error::{AppError, AppResult, OptionExt};
pub use i18n::{DefaultTranslator, Translator, Vars};

#[cfg(any(test, feature = "test-utils"))]
pub use i18n::MockTranslator;
