//! Domain layer - document shapes, acting identities and shared rules.
//!
//! This crate has no store or transport dependencies. It is shared by the
//! error/config crate and by the data-access services.

pub mod actor;
pub mod constants;
pub mod error;
pub mod model;

pub use actor::{Actor, Role};
pub use constants::*;
pub use error::{DomainError, DomainResult};
pub use model::Model;
