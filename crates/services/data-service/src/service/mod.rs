//! Collection-bound services.

mod populate;

pub mod base_service;
pub mod mutate_service;
pub mod query_service;
pub mod validation_service;

pub use base_service::BaseService;
pub use mutate_service::MutateService;
pub use query_service::QueryService;
pub use validation_service::{OwnershipTarget, ValidationService};
