//! Transaction facade integration tests.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bson::oid::ObjectId;

use common::AppError;
use data_service::{BaseService, MemoryStore, MutateOptions, QueryOptions, TransactionState};
use domain::Actor;

use support::{init_tracing, Article, FlakyStore, Tag};

#[tokio::test]
async fn test_failure_after_writes_leaves_nothing_visible() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let articles = BaseService::<Article, _>::new(store.clone());
    let tags = BaseService::<Tag, _>::new(store.clone());

    let err = articles
        .with_transaction(|tx| {
            let (articles, tags) = (articles.clone(), tags.clone());
            async move {
                let opts = MutateOptions::new().with_session(tx.clone());
                tags.mutate()
                    .create(&Tag { id: None, name: "rust".into() }, &opts)
                    .await?;
                articles
                    .mutate()
                    .create(&Article::new("Draft", "draft", 0), &opts)
                    .await?;

                // Visible inside the transaction only.
                let inside = articles
                    .query()
                    .count(&QueryOptions::new().with_session(tx))
                    .await?;
                assert_eq!(inside, 1);
                assert_eq!(store_len_outside(&articles).await, 0);

                Err::<(), _>(AppError::bad_request("abort"))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "BAD_REQUEST");
    assert_eq!(store.len("articles").await, 0);
    assert_eq!(store.len("tags").await, 0);
}

async fn store_len_outside(articles: &BaseService<Article, MemoryStore>) -> u64 {
    articles.query().count(&QueryOptions::new()).await.unwrap()
}

#[tokio::test]
async fn test_commit_keeps_concurrent_writes_outside_the_transaction() {
    let store = Arc::new(MemoryStore::new());
    let articles = BaseService::<Article, _>::new(store.clone());

    articles
        .with_transaction(|tx| {
            let articles = articles.clone();
            async move {
                articles
                    .mutate()
                    .create(
                        &Article::new("InSession", "draft", 0),
                        &MutateOptions::new().with_session(tx),
                    )
                    .await?;
                articles
                    .mutate()
                    .create(&Article::new("Outside", "draft", 0), &MutateOptions::new())
                    .await?;
                Ok::<_, AppError>(())
            }
        })
        .await
        .unwrap();

    let mut titles: Vec<String> = store
        .collection("articles")
        .await
        .iter()
        .filter_map(|d| d.get_str("title").ok().map(str::to_string))
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["InSession".to_string(), "Outside".to_string()]);
}

#[tokio::test]
async fn test_success_commits_across_collections() {
    let store = Arc::new(MemoryStore::new());
    let articles = BaseService::<Article, _>::new(store.clone());
    let tags = BaseService::<Tag, _>::new(store.clone());

    let tag_id = articles
        .with_transaction(|tx| {
            let (articles, tags) = (articles.clone(), tags.clone());
            async move {
                let opts = MutateOptions::new().with_session(tx);
                let tag = tags
                    .mutate()
                    .create(&Tag { id: None, name: "rust".into() }, &opts)
                    .await?
                    .into_entity()?;
                let tag_id = tag.id.unwrap_or_else(ObjectId::new);
                articles
                    .mutate()
                    .create(&Article::new("Tagged", "live", 0).tagged(&[tag_id]), &opts)
                    .await?;
                Ok(tag_id)
            }
        })
        .await
        .unwrap();

    assert_eq!(store.len("articles").await, 1);
    assert_eq!(store.collection("tags").await[0].get_object_id("_id").unwrap(), tag_id);
}

#[tokio::test]
async fn test_commit_failure_aborts_and_ends_session() {
    let store = FlakyStore::new();
    store.fail_commit.store(true, Ordering::SeqCst);
    let articles = BaseService::<Article, _>::new(store.clone());

    let leaked = Arc::new(std::sync::Mutex::new(None));
    let err = articles
        .with_transaction(|tx| {
            let articles = articles.clone();
            let leaked = leaked.clone();
            async move {
                *leaked.lock().unwrap() = Some(tx.clone());
                articles
                    .mutate()
                    .create(&Article::new("Lost", "draft", 0), &MutateOptions::new().with_session(tx))
                    .await
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert_eq!(store.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(store.ended.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.len("articles").await, 0);

    let tx = leaked.lock().unwrap().take().unwrap();
    assert_eq!(tx.state(), TransactionState::Aborted);
}

#[tokio::test]
async fn test_finished_handle_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let articles = BaseService::<Article, _>::new(store.clone());

    let tx = articles.with_transaction(|tx| async move { Ok(tx) }).await.unwrap();
    assert!(!tx.is_active());

    let err = articles
        .mutate()
        .create(&Article::new("Late", "draft", 0), &MutateOptions::new().with_session(tx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert_eq!(store.len("articles").await, 0);
}

#[tokio::test]
async fn test_ownership_inside_transaction() {
    let store = Arc::new(MemoryStore::new());
    let articles = BaseService::<Article, _>::new(store);
    let owner = ObjectId::new();
    let ctx = data_service::RequestContext::for_actor(Actor::new(owner.to_hex()));

    let outcome = articles
        .with_transaction(|tx| {
            let articles = articles.clone();
            let ctx = ctx.clone();
            async move {
                let opts = MutateOptions::new().with_session(tx.clone()).with_context(ctx.clone());
                let id = articles
                    .mutate()
                    .create(&Article::new("Owned", "draft", 0), &opts)
                    .await?
                    .into_entity()?
                    .id
                    .ok_or_else(|| AppError::internal("no id"))?;

                articles
                    .validation()
                    .assert_ownership(Some(&ctx), id, Some(&tx))
                    .await?;

                let stranger = data_service::RequestContext::for_actor(Actor::new(ObjectId::new().to_hex()));
                let denied = articles
                    .validation()
                    .assert_ownership(Some(&stranger), id, Some(&tx))
                    .await;
                Ok(denied.map_err(|e| e.code()))
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome, Err("FORBIDDEN"));
}
