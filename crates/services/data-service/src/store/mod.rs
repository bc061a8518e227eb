//! Store driver seam.
//!
//! [`DocumentStore`] is the only way the services reach persisted data. It
//! speaks plain BSON documents and names the collection on every call, so a
//! single store instance serves every collection-bound service.
//!
//! Two backends ship with the crate:
//! - [`MongoStore`] wraps the official MongoDB driver
//! - [`MemoryStore`] evaluates filters, updates and pipelines in-process

use async_trait::async_trait;
use bson::{Bson, Document};

use common::AppResult;

pub mod memory;
pub mod mongo;
mod transaction;

pub use memory::{MemorySession, MemoryStore};
pub use mongo::{MongoSession, MongoStore};
pub use transaction::{Transaction, TransactionState};
pub(crate) use transaction::session_of;

/// Cursor shape for a find: projection, ordering and window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindSpec {
    /// Same cursor restricted to one page
    pub fn window(mut self, skip: u64, limit: u64) -> Self {
        self.skip = Some(skip);
        self.limit = Some(limit);
        self
    }
}

/// Result of an update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Result of a delete operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// Document store driver.
///
/// Every operation optionally runs inside a session. Operations given no
/// session are not part of any transaction, even when issued from inside a
/// transaction callback.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Backend transaction session
    type Session: Send + Sync + 'static;

    /// Find documents matching a filter
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
        session: Option<&Self::Session>,
    ) -> AppResult<Vec<Document>>;

    /// Count documents matching a filter
    async fn count(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<u64>;

    /// Insert one document, returning its identity
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<Bson>;

    /// Update every document matching a filter
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<UpdateOutcome>;

    /// Update the first match and return its post-update state
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<Option<Document>>;

    /// Delete the first document matching a filter
    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<DeleteOutcome>;

    /// Delete every document matching a filter
    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&Self::Session>,
    ) -> AppResult<DeleteOutcome>;

    /// Run an aggregation pipeline
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<&Self::Session>,
    ) -> AppResult<Vec<Document>>;

    /// Open a session with a started transaction
    async fn start_transaction(&self) -> AppResult<Self::Session>;

    /// Commit the session's transaction
    async fn commit_transaction(&self, session: &Self::Session) -> AppResult<()>;

    /// Abort the session's transaction
    async fn abort_transaction(&self, session: &Self::Session) -> AppResult<()>;

    /// Release the session
    async fn end_session(&self, session: &Self::Session);
}
