//! In-process document store.
//!
//! Collections live in a shared map guarded by a read-write lock. A session
//! stages a private copy of every collection it touches and remembers the
//! state it started from. Commit replays only the documents the session
//! inserted, changed or deleted (keyed by `_id`), so writes made outside the
//! session meanwhile survive. Abort discards the staged copies. Reads inside
//! a session see its own writes, reads outside it see only committed data.

mod evaluator;
mod pipeline;
mod update;

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use common::{AppError, AppResult};

use super::{DeleteOutcome, DocumentStore, FindSpec, UpdateOutcome};

use evaluator::matches;

type Collections = HashMap<String, Vec<Document>>;

/// One collection as a session sees it
struct Staged {
    /// Committed contents when the session first wrote to the collection
    base: Vec<Document>,
    /// Contents including the session's own writes
    working: Vec<Document>,
}

impl Staged {
    /// Apply the session's changes relative to `base` onto `live`
    fn replay(self, live: &mut Vec<Document>) {
        let base: HashMap<String, Document> = self
            .base
            .into_iter()
            .filter_map(|d| Some((id_key(d.get("_id")?), d)))
            .collect();

        let mut present = HashSet::new();
        for doc in self.working {
            let Some(key) = doc.get("_id").map(id_key) else {
                continue;
            };
            present.insert(key.clone());
            if base.get(&key) == Some(&doc) {
                continue;
            }
            match live.iter().position(|d| d.get("_id").map(id_key).as_ref() == Some(&key)) {
                Some(index) => live[index] = doc,
                None => live.push(doc),
            }
        }

        live.retain(|d| match d.get("_id").map(id_key) {
            Some(key) => present.contains(&key) || !base.contains_key(&key),
            None => true,
        });
    }
}

fn id_key(id: &Bson) -> String {
    id.to_string()
}

/// Session with a staged view of the collections it has written.
pub struct MemorySession {
    id: Uuid,
    staged: Mutex<HashMap<String, Staged>>,
}

impl MemorySession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// In-memory [`DocumentStore`] backend.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed contents of a collection
    pub async fn collection(&self, name: &str) -> Vec<Document> {
        self.data.read().await.get(name).cloned().unwrap_or_default()
    }

    /// Committed document count across a collection
    pub async fn len(&self, name: &str) -> usize {
        self.data.read().await.get(name).map(Vec::len).unwrap_or(0)
    }

    /// Read view of one collection, honoring staged writes
    async fn view(&self, collection: &str, session: Option<&MemorySession>) -> Vec<Document> {
        if let Some(session) = session {
            if let Some(staged) = session.staged.lock().await.get(collection) {
                return staged.working.clone();
            }
        }
        self.collection(collection).await
    }

    /// Every collection, overlaid with the session's staged copies
    async fn snapshot(&self, session: Option<&MemorySession>) -> Collections {
        let mut all = self.data.read().await.clone();
        if let Some(session) = session {
            for (name, staged) in session.staged.lock().await.iter() {
                all.insert(name.clone(), staged.working.clone());
            }
        }
        all
    }

    /// Run a mutation against a working copy and publish it on success
    async fn write<R>(
        &self,
        collection: &str,
        session: Option<&MemorySession>,
        f: impl FnOnce(&mut Vec<Document>) -> AppResult<R>,
    ) -> AppResult<R> {
        match session {
            Some(session) => {
                let mut staged = session.staged.lock().await;
                let entry = match staged.entry(collection.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let base = self.collection(collection).await;
                        entry.insert(Staged {
                            working: base.clone(),
                            base,
                        })
                    }
                };
                let mut working = entry.working.clone();
                let out = f(&mut working)?;
                entry.working = working;
                Ok(out)
            }
            None => {
                let mut data = self.data.write().await;
                let mut working = data.get(collection).cloned().unwrap_or_default();
                let out = f(&mut working)?;
                data.insert(collection.to_string(), working);
                Ok(out)
            }
        }
    }
}

fn position(docs: &[Document], filter: &Document) -> AppResult<Option<usize>> {
    for (i, doc) in docs.iter().enumerate() {
        if matches(doc, filter)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn strip_id_change(before: &Document, after: &mut Document) -> AppResult<()> {
    match (before.get("_id"), after.get("_id")) {
        (Some(old), Some(new)) if old != new => {
            Err(AppError::bad_request("the _id field is immutable"))
        }
        (Some(old), None) => {
            after.insert("_id", old.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

fn update_at(docs: &mut [Document], index: usize, update: &Document) -> AppResult<bool> {
    let before = docs[index].clone();
    let mut doc = before.clone();
    let modified = update::apply(&mut doc, update)?;
    strip_id_change(&before, &mut doc)?;
    docs[index] = doc;
    Ok(modified)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Session = MemorySession;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
        session: Option<&MemorySession>,
    ) -> AppResult<Vec<Document>> {
        let mut docs = Vec::new();
        for doc in self.view(collection, session).await {
            if matches(&doc, &filter)? {
                docs.push(doc);
            }
        }

        if let Some(sort) = &spec.sort {
            pipeline::sort_documents(&mut docs, sort);
        }

        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = spec.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(usize::MAX);
        let window = docs.into_iter().skip(skip).take(limit);

        match &spec.projection {
            Some(projection) => window.map(|d| pipeline::project(&d, projection)).collect(),
            None => Ok(window.collect()),
        }
    }

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<u64> {
        let mut total = 0;
        for doc in self.view(collection, session).await {
            if matches(&doc, &filter)? {
                total += 1;
            }
        }
        Ok(total)
    }

    async fn insert_one(
        &self,
        collection: &str,
        mut document: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<Bson> {
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let key = id.clone();
        self.write(collection, session, move |docs| {
            if docs.iter().any(|d| d.get("_id") == Some(&key)) {
                return Err(AppError::internal(format!(
                    "duplicate key in collection '{}': {}",
                    collection, key
                )));
            }
            docs.push(document);
            Ok(())
        })
        .await?;

        tracing::debug!(collection, id = %id, "memory store insert");
        Ok(id)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<UpdateOutcome> {
        self.write(collection, session, |docs| {
            let mut matched = 0;
            let mut modified = 0;
            for index in 0..docs.len() {
                if matches(&docs[index], &filter)? {
                    matched += 1;
                    if update_at(docs, index, &update)? {
                        modified += 1;
                    }
                }
            }
            Ok(UpdateOutcome {
                acknowledged: true,
                matched_count: matched,
                modified_count: modified,
            })
        })
        .await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<Option<Document>> {
        self.write(collection, session, |docs| {
            let Some(index) = position(docs, &filter)? else {
                return Ok(None);
            };
            update_at(docs, index, &update)?;
            Ok(Some(docs[index].clone()))
        })
        .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<DeleteOutcome> {
        self.write(collection, session, |docs| {
            let deleted = match position(docs, &filter)? {
                Some(index) => {
                    docs.remove(index);
                    1
                }
                None => 0,
            };
            Ok(DeleteOutcome {
                acknowledged: true,
                deleted_count: deleted,
            })
        })
        .await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> AppResult<DeleteOutcome> {
        self.write(collection, session, |docs| {
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs.iter() {
                if !matches(doc, &filter)? {
                    kept.push(doc.clone());
                }
            }
            let deleted = (docs.len() - kept.len()) as u64;
            *docs = kept;
            Ok(DeleteOutcome {
                acknowledged: true,
                deleted_count: deleted,
            })
        })
        .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<&MemorySession>,
    ) -> AppResult<Vec<Document>> {
        let snapshot = self.snapshot(session).await;
        pipeline::run(&snapshot, collection, &pipeline)
    }

    async fn start_transaction(&self) -> AppResult<MemorySession> {
        let session = MemorySession::new();
        tracing::debug!(session = %session.id, "memory transaction started");
        Ok(session)
    }

    async fn commit_transaction(&self, session: &MemorySession) -> AppResult<()> {
        let staged = std::mem::take(&mut *session.staged.lock().await);
        let mut data = self.data.write().await;
        for (name, changes) in staged {
            changes.replay(data.entry(name).or_default());
        }
        tracing::debug!(session = %session.id, "memory transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self, session: &MemorySession) -> AppResult<()> {
        session.staged.lock().await.clear();
        tracing::debug!(session = %session.id, "memory transaction aborted");
        Ok(())
    }

    async fn end_session(&self, session: &MemorySession) {
        session.staged.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_staged_writes_are_private_until_commit() {
        let store = MemoryStore::new();
        store
            .insert_one("tags", doc! { "name": "rust" }, None)
            .await
            .unwrap();

        let session = store.start_transaction().await.unwrap();
        store
            .insert_one("tags", doc! { "name": "tokio" }, Some(&session))
            .await
            .unwrap();

        assert_eq!(store.count("tags", doc! {}, Some(&session)).await.unwrap(), 2);
        assert_eq!(store.count("tags", doc! {}, None).await.unwrap(), 1);

        store.commit_transaction(&session).await.unwrap();
        assert_eq!(store.len("tags").await, 2);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_writes() {
        let store = MemoryStore::new();
        let session = store.start_transaction().await.unwrap();
        store
            .insert_one("tags", doc! { "name": "serde" }, Some(&session))
            .await
            .unwrap();

        store.abort_transaction(&session).await.unwrap();
        store.end_session(&session).await;
        assert_eq!(store.len("tags").await, 0);
    }

    #[tokio::test]
    async fn test_commit_keeps_writes_made_outside_the_session() {
        let store = MemoryStore::new();
        let kept = ObjectId::new();
        let dropped = ObjectId::new();
        let edited = ObjectId::new();
        for id in [kept, dropped, edited] {
            store.insert_one("tags", doc! { "_id": id, "n": 0 }, None).await.unwrap();
        }

        let session = store.start_transaction().await.unwrap();
        store
            .insert_one("tags", doc! { "name": "staged" }, Some(&session))
            .await
            .unwrap();
        store.delete_one("tags", doc! { "_id": dropped }, Some(&session)).await.unwrap();
        store
            .update_many("tags", doc! { "_id": edited }, doc! { "$set": { "n": 1 } }, Some(&session))
            .await
            .unwrap();

        // Committed directly while the transaction is open.
        store.insert_one("tags", doc! { "name": "outside" }, None).await.unwrap();
        store
            .update_many("tags", doc! { "_id": kept }, doc! { "$set": { "n": 5 } }, None)
            .await
            .unwrap();

        store.commit_transaction(&session).await.unwrap();

        let docs = store.collection("tags").await;
        assert_eq!(docs.len(), 4);
        let n_of = |id: ObjectId| {
            docs.iter()
                .find(|d| d.get_object_id("_id").ok() == Some(id))
                .and_then(|d| d.get_i32("n").ok())
        };
        assert_eq!(n_of(kept), Some(5));
        assert_eq!(n_of(edited), Some(1));
        assert_eq!(n_of(dropped), None);
        assert!(docs.iter().any(|d| d.get_str("name").ok() == Some("outside")));
        assert!(docs.iter().any(|d| d.get_str("name").ok() == Some("staged")));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryStore::new();
        let id = ObjectId::new();
        store.insert_one("tags", doc! { "_id": id }, None).await.unwrap();

        let err = store
            .insert_one("tags", doc! { "_id": id }, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_find_window_and_projection() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store
                .insert_one("nums", doc! { "n": n, "label": format!("#{}", n) }, None)
                .await
                .unwrap();
        }

        let spec = FindSpec {
            projection: Some(doc! { "n": 1, "_id": 0 }),
            sort: Some(doc! { "n": -1 }),
            ..Default::default()
        }
        .window(1, 2);

        let docs = store.find("nums", doc! {}, spec, None).await.unwrap();
        assert_eq!(docs, vec![doc! { "n": 3 }, doc! { "n": 2 }]);
    }

    #[tokio::test]
    async fn test_update_many_counts_unmodified_matches() {
        let store = MemoryStore::new();
        store.insert_one("posts", doc! { "status": "draft" }, None).await.unwrap();
        store.insert_one("posts", doc! { "status": "live" }, None).await.unwrap();

        let outcome = store
            .update_many("posts", doc! {}, doc! { "$set": { "status": "live" } }, None)
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 2);
        assert_eq!(outcome.modified_count, 1);
    }
}
