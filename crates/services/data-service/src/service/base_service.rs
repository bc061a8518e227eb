//! Service facade bound to one collection.
//!
//! Bundles the query, mutate and validation services over a shared store
//! and runs multi-step work inside a store transaction.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use common::i18n::{vars, MSG_FORBIDDEN, MSG_NOT_FOUND};
use common::{AppError, AppResult, Vars};
use domain::Model;

use crate::context::{translate, RequestContext};
use crate::store::{DocumentStore, Transaction, TransactionState};

use super::mutate_service::MutateService;
use super::query_service::QueryService;
use super::validation_service::ValidationService;

/// Facade over the services of model `T`.
pub struct BaseService<T, S> {
    store: Arc<S>,
    query: QueryService<T, S>,
    mutate: MutateService<T, S>,
    validation: ValidationService<T, S>,
    _model: PhantomData<fn() -> T>,
}

impl<T, S> Clone for BaseService<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            query: self.query.clone(),
            mutate: self.mutate.clone(),
            validation: self.validation.clone(),
            _model: PhantomData,
        }
    }
}

impl<T: Model, S: DocumentStore> BaseService<T, S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            query: QueryService::new(Arc::clone(&store)),
            mutate: MutateService::new(Arc::clone(&store)),
            validation: ValidationService::new(Arc::clone(&store)),
            store,
            _model: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    pub fn query(&self) -> &QueryService<T, S> {
        &self.query
    }

    pub fn mutate(&self) -> &MutateService<T, S> {
        &self.mutate
    }

    pub fn validation(&self) -> &ValidationService<T, S> {
        &self.validation
    }

    /// Run `f` inside a store transaction.
    ///
    /// Commits when `f` succeeds and aborts when it fails, then ends the
    /// session either way. `f` receives a handle to pass to every operation
    /// that must join the transaction; the handle is refused once the
    /// transaction has finished.
    pub async fn with_transaction<F, Fut, R>(&self, f: F) -> AppResult<R>
    where
        F: FnOnce(Transaction<S::Session>) -> Fut,
        Fut: Future<Output = AppResult<R>>,
    {
        let tx = Transaction::new(self.store.start_transaction().await?);
        tracing::debug!(transaction = %tx.id(), collection = T::COLLECTION, "transaction started");

        let result = match f(tx.clone()).await {
            Ok(value) => match self.store.commit_transaction(tx.raw_session()).await {
                Ok(()) => {
                    tx.finish(TransactionState::Committed);
                    tracing::debug!(transaction = %tx.id(), "transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    tracing::error!(transaction = %tx.id(), error = %e, "commit failed");
                    self.abort(&tx).await;
                    Err(e)
                }
            },
            Err(e) => {
                tracing::debug!(transaction = %tx.id(), error = %e, "transaction aborted");
                self.abort(&tx).await;
                Err(e)
            }
        };

        self.store.end_session(tx.raw_session()).await;
        result
    }

    async fn abort(&self, tx: &Transaction<S::Session>) {
        if let Err(e) = self.store.abort_transaction(tx.raw_session()).await {
            tracing::error!(transaction = %tx.id(), error = %e, "transaction abort failed");
        }
        tx.finish(TransactionState::Aborted);
    }

    // =========================================================================
    // Localized errors
    // =========================================================================

    /// NotFound naming this model
    pub fn not_found(&self, ctx: Option<&RequestContext>) -> AppError {
        AppError::not_found(translate(ctx, MSG_NOT_FOUND, &Self::entity_vars()))
    }

    /// Forbidden naming this model
    pub fn forbidden(&self, ctx: Option<&RequestContext>) -> AppError {
        AppError::forbidden(translate(ctx, MSG_FORBIDDEN, &Self::entity_vars()))
    }

    /// Validation error with a translated message
    pub fn validation_error(&self, ctx: Option<&RequestContext>, key: &str, vars: &Vars) -> AppError {
        AppError::validation(translate(ctx, key, vars))
    }

    fn entity_vars() -> Vars {
        vars([("entity", T::LABEL.to_string())])
    }
}
