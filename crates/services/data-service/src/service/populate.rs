//! Reference population.
//!
//! Each path is resolved with one `$in` query against its source collection.
//! Paths are fetched concurrently and applied in declaration order.

use std::collections::HashMap;

use bson::{doc, Bson, Document};
use futures::future::try_join_all;

use common::AppResult;

use crate::options::Populate;
use crate::store::{DocumentStore, FindSpec};

/// Replace referenced ids with their documents, in place.
///
/// A single reference with no match becomes null; unmatched entries of an
/// array reference are dropped.
pub(crate) async fn populate<S: DocumentStore>(
    store: &S,
    docs: &mut [Document],
    specs: &[Populate],
    session: Option<&S::Session>,
) -> AppResult<()> {
    if docs.is_empty() || specs.is_empty() {
        return Ok(());
    }

    let view: &[Document] = docs;
    let fetches = specs
        .iter()
        .map(|spec| fetch(store, spec, referenced_ids(view, &spec.path), session));
    let resolved = try_join_all(fetches).await?;

    for (spec, by_id) in specs.iter().zip(resolved) {
        for doc in docs.iter_mut() {
            let replacement = match doc.get(&spec.path) {
                Some(Bson::Array(items)) => Bson::Array(
                    items
                        .iter()
                        .filter_map(|id| by_id.get(&id_key(id)).cloned().map(Bson::Document))
                        .collect(),
                ),
                Some(id) if !matches!(id, Bson::Null | Bson::Document(_)) => by_id
                    .get(&id_key(id))
                    .cloned()
                    .map(Bson::Document)
                    .unwrap_or(Bson::Null),
                _ => continue,
            };
            doc.insert(spec.path.as_str(), replacement);
        }
    }

    Ok(())
}

/// Referenced documents of one path keyed by id
async fn fetch<S: DocumentStore>(
    store: &S,
    spec: &Populate,
    ids: Vec<Bson>,
    session: Option<&S::Session>,
) -> AppResult<HashMap<String, Document>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let spec_find = FindSpec {
        projection: spec.select.clone(),
        ..Default::default()
    };
    let found = store
        .find(&spec.from, doc! { "_id": { "$in": ids } }, spec_find, session)
        .await?;

    Ok(found
        .into_iter()
        .filter_map(|d| {
            let key = id_key(d.get("_id")?);
            Some((key, d))
        })
        .collect())
}

fn id_key(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Distinct referenced ids at `path`, in first-seen order
fn referenced_ids(docs: &[Document], path: &str) -> Vec<Bson> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();

    let mut push = |id: &Bson| {
        if !matches!(id, Bson::Null | Bson::Document(_)) && seen.insert(id_key(id)) {
            ids.push(id.clone());
        }
    };

    for doc in docs {
        match doc.get(path) {
            Some(Bson::Array(items)) => items.iter().for_each(&mut push),
            Some(id) => push(id),
            None => {}
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bson::oid::ObjectId;

    #[tokio::test]
    async fn test_populates_single_and_array_refs() {
        let store = MemoryStore::new();
        let ada = ObjectId::new();
        let bob = ObjectId::new();
        store.insert_one("users", doc! { "_id": ada, "name": "ada", "email": "a@x" }, None).await.unwrap();
        store.insert_one("users", doc! { "_id": bob, "name": "bob", "email": "b@x" }, None).await.unwrap();

        let ghost = ObjectId::new();
        let mut docs = vec![
            doc! { "title": "one", "user": ada, "likes": [bob, ghost] },
            doc! { "title": "two", "user": ghost, "likes": [] },
        ];
        let specs = vec![
            Populate::new("user", "users").select(doc! { "name": 1 }),
            Populate::new("likes", "users").select(doc! { "name": 1 }),
        ];

        populate(&store, &mut docs, &specs, None).await.unwrap();

        assert_eq!(docs[0].get_document("user").unwrap(), &doc! { "_id": ada, "name": "ada" });
        assert_eq!(docs[0].get_array("likes").unwrap().len(), 1);
        assert_eq!(docs[1].get("user"), Some(&Bson::Null));
    }
}
