//! MongoDB store backend.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, Database};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use common::{AppError, AppResult, DatabaseConfig};

use super::{DeleteOutcome, DocumentStore, FindSpec, UpdateOutcome};

/// Client session shared by the clones of one transaction handle.
///
/// Ending the session releases the driver session immediately; later use
/// fails instead of keeping it alive.
pub struct MongoSession {
    inner: Mutex<Option<ClientSession>>,
}

impl MongoSession {
    fn new(session: ClientSession) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }

    async fn acquire(&self) -> AppResult<MappedMutexGuard<'_, ClientSession>> {
        MutexGuard::try_map(self.inner.lock().await, Option::as_mut)
            .map_err(|_| AppError::internal("MongoDB session already ended"))
    }

    /// Whether the driver session has been released
    pub async fn is_ended(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

/// Store wrapper over a MongoDB database handle
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Build a client from configuration and bind the configured database.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = config.app_name.clone();
        options.max_pool_size = Some(config.max_connections);
        options.min_pool_size = Some(config.min_connections);
        options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));

        let client = Client::with_options(options)?;
        let database = client.database(&config.name);
        tracing::info!(database = %config.name, "MongoDB client configured");

        Ok(Self { client, database })
    }

    /// Wrap an existing client (shares its connection pool).
    pub fn from_client(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self { client, database }
    }

    /// Get a reference to the database handle.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Check connectivity with a ping command.
    pub async fn ping(&self) -> AppResult<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn find_options(spec: FindSpec) -> FindOptions {
    let mut options = FindOptions::default();
    options.projection = spec.projection;
    options.sort = spec.sort;
    options.skip = spec.skip;
    options.limit = spec.limit.map(|l| l as i64);
    options
}

#[async_trait]
impl DocumentStore for MongoStore {
    type Session = MongoSession;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
        session: Option<&MongoSession>,
    ) -> AppResult<Vec<Document>> {
        let coll = self.collection(collection);
        let action = coll.find(filter).with_options(find_options(spec));

        match session {
            Some(session) => {
                let mut guard = session.acquire().await?;
                let mut cursor = action.session(&mut *guard).await?;
                let mut docs = Vec::new();
                while let Some(doc) = cursor.next(&mut *guard).await {
                    docs.push(doc?);
                }
                Ok(docs)
            }
            None => Ok(action.await?.try_collect().await?),
        }
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<u64> {
        let coll = self.collection(collection);
        let action = coll.count_documents(filter);
        let total = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        Ok(total)
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<Bson> {
        let coll = self.collection(collection);
        let action = coll.insert_one(document);
        let result = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        Ok(result.inserted_id)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<UpdateOutcome> {
        let coll = self.collection(collection);
        let action = coll.update_many(filter, update);
        let result = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        // Unacknowledged writes surface as driver errors, never as results.
        Ok(UpdateOutcome {
            acknowledged: true,
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<Option<Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.return_document = Some(ReturnDocument::After);

        let coll = self.collection(collection);
        let action = coll.find_one_and_update(filter, update).with_options(options);
        let updated = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        Ok(updated)
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<DeleteOutcome> {
        let coll = self.collection(collection);
        let action = coll.delete_one(filter);
        let result = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        Ok(DeleteOutcome {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MongoSession>,
    ) -> AppResult<DeleteOutcome> {
        let coll = self.collection(collection);
        let action = coll.delete_many(filter);
        let result = match session {
            Some(session) => action.session(&mut *session.acquire().await?).await?,
            None => action.await?,
        };
        Ok(DeleteOutcome {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<&MongoSession>,
    ) -> AppResult<Vec<Document>> {
        let coll = self.collection(collection);
        let action = coll.aggregate(pipeline);

        match session {
            Some(session) => {
                let mut guard = session.acquire().await?;
                let mut cursor = action.session(&mut *guard).await?;
                let mut docs = Vec::new();
                while let Some(doc) = cursor.next(&mut *guard).await {
                    docs.push(doc?);
                }
                Ok(docs)
            }
            None => Ok(action.await?.try_collect().await?),
        }
    }

    async fn start_transaction(&self) -> AppResult<MongoSession> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        Ok(MongoSession::new(session))
    }

    async fn commit_transaction(&self, session: &MongoSession) -> AppResult<()> {
        session.acquire().await?.commit_transaction().await?;
        Ok(())
    }

    async fn abort_transaction(&self, session: &MongoSession) -> AppResult<()> {
        session.acquire().await?.abort_transaction().await?;
        Ok(())
    }

    async fn end_session(&self, session: &MongoSession) {
        if let Some(released) = session.inner.lock().await.take() {
            drop(released);
            tracing::trace!("MongoDB session released");
        }
    }
}
