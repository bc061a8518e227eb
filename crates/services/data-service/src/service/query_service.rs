//! Read-only operations over one collection.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};

use common::i18n::{vars, MSG_NOT_FOUND};
use common::{AppError, AppResult};
use domain::Model;

use crate::context::{translate, RequestContext};
use crate::filter::{field, Predicate};
use crate::options::{QueryOptions, RelatedCount};
use crate::pagination::{paginate_aggregate, paginate_find};
use crate::record::{Listing, Record};
use crate::store::{session_of, DocumentStore, FindSpec};

use super::populate::populate;

/// How a single-document lookup treats a miss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Missing {
    /// Raise NotFound
    Raise,
    /// Resolve to `None` and swallow errors
    Null,
}

fn not_found<T: Model>(ctx: Option<&RequestContext>) -> AppError {
    AppError::not_found(translate(
        ctx,
        MSG_NOT_FOUND,
        &vars([("entity", T::LABEL.to_string())]),
    ))
}

/// Query service bound to the collection of `T`.
pub struct QueryService<T, S> {
    store: Arc<S>,
    _model: PhantomData<fn() -> T>,
}

impl<T, S> Clone for QueryService<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _model: PhantomData,
        }
    }
}

impl<T: Model, S: DocumentStore> QueryService<T, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    // =========================================================================
    // Existence
    // =========================================================================

    pub async fn exists_by_id(&self, id: ObjectId, opts: &QueryOptions<S::Session>) -> AppResult<bool> {
        self.exists_by_condition(Predicate::id(id), opts).await
    }

    pub async fn exists_by_slug(&self, slug: &str, opts: &QueryOptions<S::Session>) -> AppResult<bool> {
        self.exists_by_condition(field(T::SLUG_FIELD).eq(slug), opts).await
    }

    pub async fn exists_by_key(
        &self,
        key: &str,
        value: impl Into<Bson>,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<bool> {
        self.exists_by_condition(field(key).eq(value), opts).await
    }

    /// Whether any document matches `condition` and the options filter
    pub async fn exists_by_condition(
        &self,
        condition: Predicate,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<bool> {
        let filter = condition.and(opts.predicate()?).to_document();
        let spec = FindSpec {
            projection: Some(doc! { "_id": 1 }),
            limit: Some(1),
            ..Default::default()
        };

        let found = self
            .store
            .find(T::COLLECTION, filter, spec, session_of(opts.session.as_ref())?)
            .await?;
        Ok(!found.is_empty())
    }

    // =========================================================================
    // Single document
    // =========================================================================

    pub async fn get_one_by_id(&self, id: ObjectId, opts: &QueryOptions<S::Session>) -> AppResult<Record<T>> {
        self.get_one_by_condition(Predicate::id(id), opts).await
    }

    pub async fn get_one_by_id_or_none(
        &self,
        id: ObjectId,
        opts: &QueryOptions<S::Session>,
    ) -> Option<Record<T>> {
        self.get_one_by_condition_or_none(Predicate::id(id), opts).await
    }

    pub async fn get_one_by_slug(&self, slug: &str, opts: &QueryOptions<S::Session>) -> AppResult<Record<T>> {
        self.get_one_by_condition(field(T::SLUG_FIELD).eq(slug), opts).await
    }

    pub async fn get_one_by_slug_or_none(
        &self,
        slug: &str,
        opts: &QueryOptions<S::Session>,
    ) -> Option<Record<T>> {
        self.get_one_by_condition_or_none(field(T::SLUG_FIELD).eq(slug), opts)
            .await
    }

    pub async fn get_one_by_key(
        &self,
        key: &str,
        value: impl Into<Bson>,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<Record<T>> {
        self.get_one_by_condition(field(key).eq(value), opts).await
    }

    pub async fn get_one_by_key_or_none(
        &self,
        key: &str,
        value: impl Into<Bson>,
        opts: &QueryOptions<S::Session>,
    ) -> Option<Record<T>> {
        self.get_one_by_condition_or_none(field(key).eq(value), opts)
            .await
    }

    /// First document matching `condition`; NotFound when there is none
    pub async fn get_one_by_condition(
        &self,
        condition: Predicate,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<Record<T>> {
        match self.get_one(condition, opts, Missing::Raise).await? {
            Some(record) => Ok(record),
            None => Err(not_found::<T>(opts.context.as_ref())),
        }
    }

    /// First document matching `condition`, or `None`; never raises
    pub async fn get_one_by_condition_or_none(
        &self,
        condition: Predicate,
        opts: &QueryOptions<S::Session>,
    ) -> Option<Record<T>> {
        self.get_one(condition, opts, Missing::Null)
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn get_one(
        &self,
        condition: Predicate,
        opts: &QueryOptions<S::Session>,
        missing: Missing,
    ) -> AppResult<Option<Record<T>>> {
        let result = self.fetch_one(condition, opts).await;

        match (result, missing) {
            (Ok(Some(record)), _) => Ok(Some(record)),
            (Ok(None), Missing::Raise) => Err(not_found::<T>(opts.context.as_ref())),
            (Ok(None), Missing::Null) => Ok(None),
            (Err(e), Missing::Raise) => Err(e),
            (Err(e), Missing::Null) => {
                tracing::warn!(collection = T::COLLECTION, error = %e, "lookup failed, resolving to none");
                Ok(None)
            }
        }
    }

    async fn fetch_one(
        &self,
        condition: Predicate,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<Option<Record<T>>> {
        let filter = condition.and(opts.predicate()?).to_document();
        let session = session_of(opts.session.as_ref())?;
        let spec = FindSpec {
            projection: opts.select.clone(),
            sort: opts.sort.clone(),
            skip: None,
            limit: Some(1),
        };

        let mut docs = self.store.find(T::COLLECTION, filter, spec, session).await?;
        docs.truncate(1);
        populate(self.store.as_ref(), &mut docs, &opts.populate, session).await?;

        docs.pop()
            .map(|doc| Record::from_document(doc, opts.lean, opts.reshapes()))
            .transpose()
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Documents matching the options; paginated unless `paginate` is off
    pub async fn find(&self, opts: &QueryOptions<S::Session>) -> AppResult<Listing<Record<T>>> {
        let filter = opts.predicate()?.to_document();
        let session = session_of(opts.session.as_ref())?;

        let (mut docs, pagination) = if opts.paginate {
            let page = paginate_find(
                self.store.as_ref(),
                T::COLLECTION,
                filter,
                opts.find_spec(),
                opts.page,
                session,
            )
            .await?;
            (page.docs, Some(page.pagination))
        } else {
            let docs = self
                .store
                .find(T::COLLECTION, filter, opts.find_spec(), session)
                .await?;
            (docs, None)
        };

        populate(self.store.as_ref(), &mut docs, &opts.populate, session).await?;

        let docs = docs
            .into_iter()
            .map(|doc| Record::from_document(doc, opts.lean, opts.reshapes()))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Listing { docs, pagination })
    }

    /// Number of documents matching the options filter
    pub async fn count(&self, opts: &QueryOptions<S::Session>) -> AppResult<u64> {
        let filter = opts.predicate()?.to_document();
        self.store
            .count(T::COLLECTION, filter, session_of(opts.session.as_ref())?)
            .await
    }

    /// Run `pipeline` after a `$match` on the options filter.
    ///
    /// The options sort is appended as a final `$sort`. Results are always
    /// plain documents.
    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<Listing<Document>> {
        let filter = opts.predicate()?.to_document();
        let session = session_of(opts.session.as_ref())?;

        let mut stages = Vec::with_capacity(pipeline.len() + 4);
        if !filter.is_empty() {
            stages.push(doc! { "$match": filter });
        }
        stages.extend(pipeline);
        if let Some(sort) = &opts.sort {
            stages.push(doc! { "$sort": sort.clone() });
        }
        if let Some(select) = &opts.select {
            stages.push(doc! { "$project": select.clone() });
        }

        if opts.paginate {
            let page =
                paginate_aggregate(self.store.as_ref(), T::COLLECTION, stages, opts.page, session)
                    .await?;
            return Ok(page.into());
        }

        if let Some(skip) = opts.skip {
            stages.push(doc! { "$skip": skip as i64 });
        }
        if let Some(limit) = opts.limit {
            stages.push(doc! { "$limit": limit as i64 });
        }

        let docs = self.store.aggregate(T::COLLECTION, stages, session).await?;
        Ok(Listing::unpaged(docs))
    }

    /// Attach, per relation, the number of documents in a sibling collection
    /// that reference each result
    pub async fn find_with_related_counts(
        &self,
        relations: &[RelatedCount],
        opts: &QueryOptions<S::Session>,
    ) -> AppResult<Listing<Document>> {
        let mut pipeline = Vec::with_capacity(relations.len() * 3);

        for relation in relations {
            let joined = format!("__{}", relation.as_field);
            pipeline.push(doc! {
                "$lookup": {
                    "from": relation.from.as_str(),
                    "localField": "_id",
                    "foreignField": relation.foreign_field.as_str(),
                    "as": joined.as_str(),
                }
            });
            pipeline.push(doc! {
                "$addFields": { relation.as_field.as_str(): { "$size": format!("${}", joined) } }
            });
            pipeline.push(doc! { "$project": { joined.as_str(): 0 } });
        }

        self.aggregate(pipeline, opts).await
    }
}
