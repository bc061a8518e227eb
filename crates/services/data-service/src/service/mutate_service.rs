//! Write operations over one collection.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};

use common::i18n::{
    vars, MSG_BATCH_DELETED, MSG_BATCH_EMPTY, MSG_BATCH_NOT_DELETED, MSG_BATCH_TOO_LARGE,
    MSG_NOT_ACKNOWLEDGED, MSG_NOT_FOUND, MSG_NOT_MODIFIED,
};
use common::{AppError, AppResult, Vars};
use domain::{Model, CREATED_AT_FIELD, ID_FIELD, MAX_BATCH_SIZE, UPDATED_AT_FIELD};

use crate::context::translate;
use crate::filter::{field, Predicate};
use crate::options::MutateOptions;
use crate::record::{BatchResult, Record, UpdateSummary};
use crate::store::{session_of, DocumentStore, UpdateOutcome};

use super::populate::populate;

/// Mutation service bound to the collection of `T`.
pub struct MutateService<T, S> {
    store: Arc<S>,
    _model: PhantomData<fn() -> T>,
}

impl<T, S> Clone for MutateService<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _model: PhantomData,
        }
    }
}

impl<T: Model, S: DocumentStore> MutateService<T, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    fn message(&self, opts: &MutateOptions<S::Session>, key: &str, vars: &Vars) -> String {
        translate(opts.context.as_ref(), key, vars)
    }

    fn entity_vars() -> Vars {
        vars([("entity", T::LABEL.to_string())])
    }

    fn not_found(&self, opts: &MutateOptions<S::Session>) -> AppError {
        AppError::not_found(self.message(opts, MSG_NOT_FOUND, &Self::entity_vars()))
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Insert a new document.
    ///
    /// Assigns `_id` when absent, stamps timestamps, and fills the owner
    /// field from the acting identity when the model has one and it is unset.
    pub async fn create(&self, entity: &T, opts: &MutateOptions<S::Session>) -> AppResult<Record<T>> {
        let mut doc = bson::to_document(entity)?;
        self.prepare_insert(&mut doc, opts);

        let session = session_of(opts.session.as_ref())?;
        self.store
            .insert_one(T::COLLECTION, doc.clone(), session)
            .await?;
        tracing::debug!(collection = T::COLLECTION, id = ?doc.get(ID_FIELD), "document created");

        let mut docs = vec![doc];
        populate(self.store.as_ref(), &mut docs, &opts.populate, session).await?;

        let doc = docs
            .pop()
            .ok_or_else(|| AppError::internal("created document vanished"))?;
        Record::from_document(doc, opts.lean, opts.reshapes())
    }

    /// Insert a new document, resolving to `None` on any failure
    pub async fn create_or_none(&self, entity: &T, opts: &MutateOptions<S::Session>) -> Option<Record<T>> {
        match self.create(entity, opts).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection = T::COLLECTION, error = %e, "create failed, resolving to none");
                None
            }
        }
    }

    fn prepare_insert(&self, doc: &mut Document, opts: &MutateOptions<S::Session>) {
        if matches!(doc.get(ID_FIELD), None | Some(Bson::Null)) {
            doc.insert(ID_FIELD, ObjectId::new());
        }

        if T::TIMESTAMPS {
            let now = DateTime::now();
            doc.insert(CREATED_AT_FIELD, now);
            doc.insert(UPDATED_AT_FIELD, now);
        }

        let actor = opts.context.as_ref().and_then(|ctx| ctx.actor());
        if let (Some(owner), Some(actor)) = (T::OWNER_FIELD, actor) {
            if matches!(doc.get(owner), None | Some(Bson::Null)) {
                let id = match ObjectId::parse_str(&actor.id) {
                    Ok(oid) => Bson::ObjectId(oid),
                    Err(_) => Bson::String(actor.id.clone()),
                };
                doc.insert(owner, id);
            }
        }
    }

    /// Normalize an update: plain fields are wrapped in `$set`, `_id` is
    /// stripped and `updatedAt` is stamped.
    fn prepare_update(&self, update: Document) -> AppResult<Document> {
        if update.is_empty() {
            return Err(AppError::bad_request("update has no fields to change"));
        }

        let operators = update.keys().filter(|k| k.starts_with('$')).count();
        let mut update = match operators {
            0 => doc! { "$set": update },
            n if n == update.len() => update,
            _ => {
                return Err(AppError::bad_request(
                    "update mixes operators and plain fields",
                ))
            }
        };

        for op in ["$set", "$unset"] {
            if let Some(Bson::Document(fields)) = update.get_mut(op) {
                fields.remove(ID_FIELD);
                if fields.is_empty() {
                    update.remove(op);
                }
            }
        }

        if T::TIMESTAMPS {
            match update.get_mut("$set") {
                Some(Bson::Document(set)) => {
                    set.insert(UPDATED_AT_FIELD, DateTime::now());
                }
                _ => {
                    update.insert("$set", doc! { UPDATED_AT_FIELD: DateTime::now() });
                }
            }
        }

        if update.is_empty() {
            return Err(AppError::bad_request("update has no fields to change"));
        }
        Ok(update)
    }

    // =========================================================================
    // Update one
    // =========================================================================

    pub async fn update_one_by_id(
        &self,
        id: ObjectId,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<Record<T>> {
        self.update_one_by_condition(Predicate::id(id), update, opts).await
    }

    pub async fn update_one_by_id_or_none(
        &self,
        id: ObjectId,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> Option<Record<T>> {
        self.update_one_by_condition_or_none(Predicate::id(id), update, opts)
            .await
    }

    /// Update the first match and return its post-update state
    pub async fn update_one_by_condition(
        &self,
        condition: Predicate,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<Record<T>> {
        self.update_one(condition, update, opts)
            .await?
            .ok_or_else(|| self.not_found(opts))
    }

    /// Like [`update_one_by_condition`](Self::update_one_by_condition), but
    /// resolves to `None` on a miss or any failure
    pub async fn update_one_by_condition_or_none(
        &self,
        condition: Predicate,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> Option<Record<T>> {
        match self.update_one(condition, update, opts).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(collection = T::COLLECTION, error = %e, "update failed, resolving to none");
                None
            }
        }
    }

    async fn update_one(
        &self,
        condition: Predicate,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<Option<Record<T>>> {
        let filter = opts.restrict(condition).to_document();
        let update = self.prepare_update(update)?;
        let session = session_of(opts.session.as_ref())?;

        let Some(doc) = self
            .store
            .find_one_and_update(T::COLLECTION, filter, update, session)
            .await?
        else {
            return Ok(None);
        };

        let mut docs = vec![doc];
        populate(self.store.as_ref(), &mut docs, &opts.populate, session).await?;
        docs.pop()
            .map(|doc| Record::from_document(doc, opts.lean, opts.reshapes()))
            .transpose()
    }

    // =========================================================================
    // Update many
    // =========================================================================

    pub async fn update_many_by_key(
        &self,
        key: &str,
        value: impl Into<Bson>,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        self.update_many_with_conditions(field(key).eq(value), update, opts)
            .await
    }

    /// Update every document whose `field_name` references `id`
    pub async fn update_many_by_reference(
        &self,
        field_name: &str,
        id: ObjectId,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        self.update_many_by_key(field_name, id, update, opts).await
    }

    /// Update every document whose `field_name` references any of `ids`
    pub async fn update_many_by_references(
        &self,
        field_name: &str,
        ids: &[ObjectId],
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        let ids: Vec<Bson> = ids.iter().copied().map(Bson::ObjectId).collect();
        self.update_many_with_conditions(field(field_name).is_in(ids), update, opts)
            .await
    }

    /// Bulk update.
    ///
    /// With `throw_error` set, zero matches raise NotFound, and zero
    /// modifications or an unacknowledged write raise Internal.
    pub async fn update_many_with_conditions(
        &self,
        condition: Predicate,
        update: Document,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        let filter = opts.restrict(condition).to_document();
        let update = self.prepare_update(update)?;

        let outcome = self
            .store
            .update_many(T::COLLECTION, filter, update, session_of(opts.session.as_ref())?)
            .await?;

        self.check_bulk_update(outcome, opts)?;
        Ok(UpdateSummary {
            matched_count: outcome.matched_count,
            modified_count: outcome.modified_count,
        })
    }

    fn check_bulk_update(&self, outcome: UpdateOutcome, opts: &MutateOptions<S::Session>) -> AppResult<()> {
        let failure = if !outcome.acknowledged {
            Some(AppError::internal(self.message(opts, MSG_NOT_ACKNOWLEDGED, &Vars::new())))
        } else if outcome.matched_count == 0 {
            Some(self.not_found(opts))
        } else if outcome.modified_count == 0 {
            Some(AppError::internal(self.message(
                opts,
                MSG_NOT_MODIFIED,
                &Self::entity_vars(),
            )))
        } else {
            None
        };

        match failure {
            Some(e) if opts.throw_error => Err(e),
            Some(e) => {
                tracing::warn!(collection = T::COLLECTION, error = %e, "bulk update had no effect");
                Ok(())
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete by id; NotFound when nothing was deleted
    pub async fn delete_one_by_id(&self, id: ObjectId, opts: &MutateOptions<S::Session>) -> AppResult<()> {
        self.delete_one_by_condition(Predicate::id(id), opts).await
    }

    /// Delete by id; `false` when nothing was deleted or on any failure
    pub async fn delete_one_by_id_if_exists(&self, id: ObjectId, opts: &MutateOptions<S::Session>) -> bool {
        self.delete_one_by_condition_if_exists(Predicate::id(id), opts)
            .await
    }

    pub async fn delete_one_by_condition(
        &self,
        condition: Predicate,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<()> {
        if self.delete_one(condition, opts).await? {
            Ok(())
        } else {
            Err(self.not_found(opts))
        }
    }

    pub async fn delete_one_by_condition_if_exists(
        &self,
        condition: Predicate,
        opts: &MutateOptions<S::Session>,
    ) -> bool {
        match self.delete_one(condition, opts).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(collection = T::COLLECTION, error = %e, "delete failed, resolving to false");
                false
            }
        }
    }

    async fn delete_one(&self, condition: Predicate, opts: &MutateOptions<S::Session>) -> AppResult<bool> {
        let filter = opts.restrict(condition).to_document();
        let outcome = self
            .store
            .delete_one(T::COLLECTION, filter, session_of(opts.session.as_ref())?)
            .await?;
        Ok(outcome.deleted_count > 0)
    }

    /// Delete every document where `key` equals `value`; returns the count
    pub async fn delete_many_by_key(
        &self,
        key: &str,
        value: impl Into<Bson>,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<u64> {
        self.delete_many_with_conditions(field(key).eq(value), opts)
            .await
    }

    pub async fn delete_many_with_conditions(
        &self,
        condition: Predicate,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<u64> {
        let filter = opts.restrict(condition).to_document();
        let outcome = self
            .store
            .delete_many(T::COLLECTION, filter, session_of(opts.session.as_ref())?)
            .await?;
        Ok(outcome.deleted_count)
    }

    /// Delete up to [`MAX_BATCH_SIZE`] documents in one store call.
    ///
    /// Outcomes are attributed by position: the first `deleted_count` input
    /// ids are reported as deleted and the rest as failed, whichever ids the
    /// store actually removed.
    pub async fn batch_delete(
        &self,
        ids: &[ObjectId],
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<BatchResult> {
        if ids.is_empty() {
            return Err(AppError::validation(self.message(opts, MSG_BATCH_EMPTY, &Vars::new())));
        }
        if ids.len() > MAX_BATCH_SIZE {
            return Err(AppError::validation(self.message(
                opts,
                MSG_BATCH_TOO_LARGE,
                &vars([("max", MAX_BATCH_SIZE.to_string())]),
            )));
        }

        let filter = opts.restrict(Predicate::ids(ids)).to_document();
        let outcome = self
            .store
            .delete_many(T::COLLECTION, filter, session_of(opts.session.as_ref())?)
            .await?;
        if !outcome.acknowledged {
            return Err(AppError::internal(self.message(
                opts,
                MSG_NOT_ACKNOWLEDGED,
                &Vars::new(),
            )));
        }

        let hex: Vec<String> = ids.iter().map(|id| id.to_hex()).collect();
        let result = BatchResult::positional(
            &hex,
            outcome.deleted_count as usize,
            &self.message(opts, MSG_BATCH_DELETED, &Self::entity_vars()),
            &self.message(opts, MSG_BATCH_NOT_DELETED, &Self::entity_vars()),
        );

        tracing::info!(
            collection = T::COLLECTION,
            requested = result.total_count,
            deleted = result.success_count,
            "batch delete finished"
        );
        Ok(result)
    }

    // =========================================================================
    // Array fields
    // =========================================================================

    /// Pull `id` from `field_name` in every document holding it
    pub async fn remove_id_from_array_field(
        &self,
        field_name: &str,
        id: ObjectId,
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        self.remove_ids_from_array_field(field_name, &[id], opts)
            .await
    }

    /// Pull every id in `ids` from `field_name`; zero matches is success
    pub async fn remove_ids_from_array_field(
        &self,
        field_name: &str,
        ids: &[ObjectId],
        opts: &MutateOptions<S::Session>,
    ) -> AppResult<UpdateSummary> {
        let ids: Vec<Bson> = ids.iter().copied().map(Bson::ObjectId).collect();
        let filter = opts
            .restrict(field(field_name).is_in(ids.clone()))
            .to_document();
        let update = self.prepare_update(doc! { "$pull": { field_name: { "$in": ids } } })?;

        let outcome = self
            .store
            .update_many(T::COLLECTION, filter, update, session_of(opts.session.as_ref())?)
            .await?;
        Ok(UpdateSummary {
            matched_count: outcome.matched_count,
            modified_count: outcome.modified_count,
        })
    }
}
