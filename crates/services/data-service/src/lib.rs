//! Generic data-access layer over a document store.
//!
//! A [`BaseService`] bound to a [`Model`](domain::Model) gives typed reads,
//! writes, ownership checks and transactions over one collection:
//!
//! - [`QueryService`]: existence checks, lookups, paginated listings,
//!   aggregation and related counts
//! - [`MutateService`]: create, update, delete, batch delete and array pulls
//! - [`ValidationService`]: ownership and reference checks
//!
//! Filters are built with [`field`] or compiled from request parameters by a
//! [`RuleSet`]. Storage is behind [`DocumentStore`], implemented for MongoDB
//! by [`MongoStore`] and in memory by [`MemoryStore`].

pub mod context;
pub mod filter;
pub mod options;
pub mod pagination;
pub mod record;
pub mod service;
pub mod store;

pub use context::RequestContext;
pub use filter::{
    compile_to_document, field, ArrayBy, ArrayOperator, CompareOp, ExistsBy, FilterBy,
    FilterCompiler, FilterOperator, Logic, MatchMode, Predicate, QueryParams, RangeBy, RuleSet,
    SearchBy, SearchOptions, Transform,
};
pub use options::{MutateOptions, Populate, QueryOptions, RelatedCount, SortDirection};
pub use pagination::{PageRequest, PaginationMeta, PaginationResult};
pub use record::{BatchItem, BatchResult, Listing, Record, UpdateSummary};
pub use service::{BaseService, MutateService, OwnershipTarget, QueryService, ValidationService};
pub use store::{DocumentStore, MemoryStore, MongoStore, Transaction, TransactionState};
