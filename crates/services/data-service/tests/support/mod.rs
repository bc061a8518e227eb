//! Shared fixtures for the data-service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};

use common::{AppError, AppResult};
use data_service::store::{DeleteOutcome, FindSpec, MemorySession, UpdateOutcome};
use data_service::{DocumentStore, MemoryStore};
use domain::Model;

/// Install a test subscriber once; honors `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub views: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ObjectId>,
    #[serde(default)]
    pub tags: Vec<ObjectId>,
}

impl Article {
    pub fn new(title: &str, status: &str, views: i64) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            slug: title.to_lowercase().replace(' ', "-"),
            status: status.to_string(),
            views,
            user: None,
            tags: Vec::new(),
        }
    }

    pub fn tagged(mut self, tags: &[ObjectId]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    pub fn owned_by(mut self, user: ObjectId) -> Self {
        self.user = Some(user);
        self
    }
}

impl Model for Article {
    const COLLECTION: &'static str = "articles";
    const LABEL: &'static str = "Article";
    const OWNER_FIELD: Option<&'static str> = Some("user");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
}

impl Model for Tag {
    const COLLECTION: &'static str = "tags";
    const LABEL: &'static str = "Tag";
    const TIMESTAMPS: bool = false;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub article: ObjectId,
    pub body: String,
}

impl Model for Comment {
    const COLLECTION: &'static str = "comments";
    const LABEL: &'static str = "Comment";
}

/// Memory store whose writes can be reported unacknowledged and whose
/// commits can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub unacknowledged: AtomicBool,
    pub fail_commit: AtomicBool,
    pub aborts: AtomicUsize,
    pub ended: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn acknowledged(&self) -> bool {
        !self.unacknowledged.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    type Session = MemorySession;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
        session: Option<&MemorySession>,
    ) -> AppResult<Vec<Document>> {
        self.inner.find(collection, filter, spec, session).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<u64> {
        self.inner.count(collection, filter, session).await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<Bson> {
        self.inner.insert_one(collection, document, session).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<UpdateOutcome> {
        let outcome = self.inner.update_many(collection, filter, update, session).await?;
        Ok(UpdateOutcome {
            acknowledged: self.acknowledged(),
            ..outcome
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<Option<Document>> {
        self.inner
            .find_one_and_update(collection, filter, update, session)
            .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<DeleteOutcome> {
        let outcome = self.inner.delete_one(collection, filter, session).await?;
        Ok(DeleteOutcome {
            acknowledged: self.acknowledged(),
            ..outcome
        })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<DeleteOutcome> {
        let outcome = self.inner.delete_many(collection, filter, session).await?;
        Ok(DeleteOutcome {
            acknowledged: self.acknowledged(),
            ..outcome
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<&MemorySession>,
    ) -> AppResult<Vec<Document>> {
        self.inner.aggregate(collection, pipeline, session).await
    }

    async fn start_transaction(&self) -> AppResult<MemorySession> {
        self.inner.start_transaction().await
    }

    async fn commit_transaction(&self, session: &MemorySession) -> AppResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(AppError::internal("commit rejected"));
        }
        self.inner.commit_transaction(session).await
    }

    async fn abort_transaction(&self, session: &MemorySession) -> AppResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_transaction(session).await
    }

    async fn end_session(&self, session: &MemorySession) {
        self.ended.fetch_add(1, Ordering::SeqCst);
        self.inner.end_session(session).await
    }
}
