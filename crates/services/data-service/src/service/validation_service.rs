//! Ownership and existence checks.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};

use common::i18n::{
    vars, MSG_FORBIDDEN, MSG_MISSING_REFERENCES, MSG_NOT_FOUND, MSG_NO_OWNER_FIELD,
    MSG_UNAUTHENTICATED,
};
use common::{AppError, AppResult};
use domain::{Model, ID_FIELD};

use crate::context::{translate, RequestContext};
use crate::filter::Predicate;
use crate::store::{session_of, DocumentStore, FindSpec, Transaction};

/// What an ownership check is run against
#[derive(Debug, Clone, PartialEq)]
pub enum OwnershipTarget {
    /// Fetch the document by id first
    Id(ObjectId),
    /// An already fetched document
    Document(Document),
}

impl From<ObjectId> for OwnershipTarget {
    fn from(id: ObjectId) -> Self {
        OwnershipTarget::Id(id)
    }
}

impl From<Document> for OwnershipTarget {
    fn from(doc: Document) -> Self {
        OwnershipTarget::Document(doc)
    }
}

/// Validation service bound to the collection of `T`.
pub struct ValidationService<T, S> {
    store: Arc<S>,
    _model: PhantomData<fn() -> T>,
}

impl<T, S> Clone for ValidationService<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _model: PhantomData,
        }
    }
}

impl<T: Model, S: DocumentStore> ValidationService<T, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    fn not_found(&self, ctx: Option<&RequestContext>) -> AppError {
        AppError::not_found(translate(
            ctx,
            MSG_NOT_FOUND,
            &vars([("entity", T::LABEL.to_string())]),
        ))
    }

    /// Require that the acting identity owns `target`.
    ///
    /// Elevated roles pass without comparing owners.
    pub async fn assert_ownership(
        &self,
        ctx: Option<&RequestContext>,
        target: impl Into<OwnershipTarget>,
        session: Option<&Transaction<S::Session>>,
    ) -> AppResult<()> {
        let Some(owner_field) = T::OWNER_FIELD else {
            return Err(AppError::validation(translate(
                ctx,
                MSG_NO_OWNER_FIELD,
                &vars([("entity", T::LABEL.to_string())]),
            )));
        };

        let Some(actor) = ctx.and_then(RequestContext::actor) else {
            return Err(AppError::forbidden(translate(
                ctx,
                MSG_UNAUTHENTICATED,
                &Default::default(),
            )));
        };

        let doc = match target.into() {
            OwnershipTarget::Document(doc) => doc,
            OwnershipTarget::Id(id) => {
                let spec = FindSpec {
                    projection: Some(doc! { owner_field: 1 }),
                    limit: Some(1),
                    ..Default::default()
                };
                self.store
                    .find(T::COLLECTION, doc! { ID_FIELD: id }, spec, session_of(session)?)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.not_found(ctx))?
            }
        };

        if actor.role.is_elevated() {
            return Ok(());
        }

        let owner = match doc.get(owner_field) {
            Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
            Some(Bson::String(s)) => Some(s.clone()),
            Some(Bson::Document(populated)) => match populated.get(ID_FIELD) {
                Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
                Some(Bson::String(s)) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        };

        if owner.as_deref() == Some(actor.id.as_str()) {
            Ok(())
        } else {
            tracing::warn!(
                collection = T::COLLECTION,
                actor = %actor.id,
                owner = ?owner,
                "ownership check failed"
            );
            Err(AppError::forbidden(translate(
                ctx,
                MSG_FORBIDDEN,
                &vars([("entity", T::LABEL.to_string())]),
            )))
        }
    }

    /// Require at least one document matching `condition`
    pub async fn assert_exists(
        &self,
        condition: Predicate,
        ctx: Option<&RequestContext>,
        session: Option<&Transaction<S::Session>>,
    ) -> AppResult<()> {
        let spec = FindSpec {
            projection: Some(doc! { ID_FIELD: 1 }),
            limit: Some(1),
            ..Default::default()
        };
        let found = self
            .store
            .find(T::COLLECTION, condition.to_document(), spec, session_of(session)?)
            .await?;

        if found.is_empty() {
            Err(self.not_found(ctx))
        } else {
            Ok(())
        }
    }

    /// Require every id in `ids` to exist in `collection`.
    ///
    /// The error lists the missing ids in input order.
    pub async fn assert_references_exist(
        &self,
        collection: &str,
        label: &str,
        ids: &[ObjectId],
        ctx: Option<&RequestContext>,
        session: Option<&Transaction<S::Session>>,
    ) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let spec = FindSpec {
            projection: Some(doc! { ID_FIELD: 1 }),
            ..Default::default()
        };
        let found: HashSet<ObjectId> = self
            .store
            .find(collection, Predicate::ids(ids).to_document(), spec, session_of(session)?)
            .await?
            .iter()
            .filter_map(|d| d.get_object_id(ID_FIELD).ok())
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.contains(id) && seen.insert(**id))
            .map(|id| id.to_hex())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(AppError::validation(translate(
            ctx,
            MSG_MISSING_REFERENCES,
            &vars([("entity", label.to_string()), ("ids", missing.join(", "))]),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use domain::Actor;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Post {
        title: String,
    }

    impl Model for Post {
        const COLLECTION: &'static str = "posts";
        const OWNER_FIELD: Option<&'static str> = Some("user");
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Setting {
        key: String,
    }

    impl Model for Setting {
        const COLLECTION: &'static str = "settings";
    }

    async fn seeded() -> (Arc<MemoryStore>, ObjectId, ObjectId) {
        let store = Arc::new(MemoryStore::new());
        let owner = ObjectId::new();
        let post = ObjectId::new();
        store
            .insert_one("posts", doc! { "_id": post, "title": "t", "user": owner }, None)
            .await
            .unwrap();
        (store, owner, post)
    }

    #[tokio::test]
    async fn test_owner_passes_and_stranger_fails() {
        let (store, owner, post) = seeded().await;
        let service = ValidationService::<Post, _>::new(store);

        let ctx = RequestContext::for_actor(Actor::new(owner.to_hex()));
        service.assert_ownership(Some(&ctx), post, None).await.unwrap();

        let stranger = RequestContext::for_actor(Actor::new(ObjectId::new().to_hex()));
        let err = service
            .assert_ownership(Some(&stranger), post, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_admin_bypasses_and_anonymous_fails() {
        let (store, _, post) = seeded().await;
        let service = ValidationService::<Post, _>::new(store);

        let admin = RequestContext::for_actor(Actor::admin(ObjectId::new().to_hex()));
        service.assert_ownership(Some(&admin), post, None).await.unwrap();

        let err = service.assert_ownership(None, post, None).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let anonymous = RequestContext::anonymous();
        let err = service
            .assert_ownership(Some(&anonymous), post, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_missing_document_and_owner_field() {
        let (store, owner, _) = seeded().await;
        let ctx = RequestContext::for_actor(Actor::new(owner.to_hex()));

        let posts = ValidationService::<Post, _>::new(store.clone());
        let err = posts
            .assert_ownership(Some(&ctx), ObjectId::new(), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let settings = ValidationService::<Setting, _>::new(store);
        let err = settings
            .assert_ownership(Some(&ctx), doc! { "key": "k" }, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_references_lists_missing_ids() {
        let (store, _, post) = seeded().await;
        let service = ValidationService::<Setting, _>::new(store);
        let ghost = ObjectId::new();

        service
            .assert_references_exist("posts", "Post", &[post], None, None)
            .await
            .unwrap();

        let err = service
            .assert_references_exist("posts", "Post", &[post, ghost], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains(&ghost.to_hex()));
    }

    #[tokio::test]
    async fn test_assert_exists() {
        let (store, _, post) = seeded().await;
        let service = ValidationService::<Post, _>::new(store);

        service.assert_exists(Predicate::id(post), None, None).await.unwrap();
        let err = service
            .assert_exists(Predicate::id(ObjectId::new()), None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
