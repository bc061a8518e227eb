//! Page windows and metadata for list-scan and aggregation queries.
//!
//! Both modes issue two independent reads, one for the total and one for
//! the page. They are not snapshot-isolated: under concurrent writes the
//! total and the page may disagree.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use common::AppResult;
use domain::{is_allowed_page_size, DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE};

use crate::store::{DocumentStore, FindSpec};

/// Requested page, 1-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE_NUMBER,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u64, limit: u64) -> Self {
        Self { page, limit }
    }

    /// Normalized window. Page 0 becomes 1; a limit outside the allow-list
    /// silently becomes the default. The page is never clamped to the total.
    pub fn window(&self) -> PageWindow {
        let page = self.page.max(1);
        let limit = if is_allowed_page_size(self.limit) {
            self.limit
        } else {
            DEFAULT_PAGE_SIZE
        };

        PageWindow {
            page,
            limit,
            skip: (page - 1).saturating_mul(limit),
        }
    }
}

/// Normalized page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u64,
    pub limit: u64,
    pub skip: u64,
}

/// Pagination metadata returned alongside a page of documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total_docs: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub limit: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
}

impl PaginationMeta {
    pub fn new(total_docs: u64, window: PageWindow) -> Self {
        let total_pages = total_docs.div_ceil(window.limit);

        Self {
            total_docs,
            total_pages,
            current_page: window.page,
            limit: window.limit,
            has_prev_page: window.page > 1,
            has_next_page: window.page < total_pages,
        }
    }
}

/// One page of documents with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationResult<T> {
    pub docs: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginationResult<T> {
    /// Convert every document, keeping the metadata
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<PaginationResult<U>, E> {
        Ok(PaginationResult {
            docs: self.docs.into_iter().map(f).collect::<Result<_, _>>()?,
            pagination: self.pagination,
        })
    }
}

/// List-scan pagination: count and page fetch under the same filter, concurrently.
pub async fn paginate_find<S: DocumentStore>(
    store: &S,
    collection: &str,
    filter: Document,
    spec: FindSpec,
    page: PageRequest,
    session: Option<&S::Session>,
) -> AppResult<PaginationResult<Document>> {
    let window = page.window();

    let (total_docs, docs) = tokio::try_join!(
        store.count(collection, filter.clone(), session),
        store.find(collection, filter, spec.window(window.skip, window.limit), session),
    )?;

    tracing::debug!(
        collection,
        total_docs,
        page = window.page,
        limit = window.limit,
        "paginated find"
    );

    Ok(PaginationResult {
        docs,
        pagination: PaginationMeta::new(total_docs, window),
    })
}

/// Aggregation pagination: a `$count` pass and a `$skip`/`$limit` pass
/// derived from the same pipeline prefix.
pub async fn paginate_aggregate<S: DocumentStore>(
    store: &S,
    collection: &str,
    pipeline: Vec<Document>,
    page: PageRequest,
    session: Option<&S::Session>,
) -> AppResult<PaginationResult<Document>> {
    let window = page.window();
    let (count_pipeline, page_pipeline) = split_pipeline(pipeline, window);

    let (counted, docs) = tokio::try_join!(
        store.aggregate(collection, count_pipeline, session),
        store.aggregate(collection, page_pipeline, session),
    )?;

    // `$count` emits no document at all when nothing matched.
    let total_docs = counted
        .first()
        .and_then(|d| d.get("total"))
        .and_then(count_value)
        .unwrap_or(0);

    Ok(PaginationResult {
        docs,
        pagination: PaginationMeta::new(total_docs, window),
    })
}

/// Derive the count pipeline and the page pipeline from a prefix
fn split_pipeline(prefix: Vec<Document>, window: PageWindow) -> (Vec<Document>, Vec<Document>) {
    let mut count = prefix.clone();
    count.push(doc! { "$count": "total" });

    let mut page = prefix;
    page.push(doc! { "$skip": window.skip as i64 });
    page.push(doc! { "$limit": window.limit as i64 });

    (count, page)
}

fn count_value(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(n) if *n >= 0.0 => Some(*n as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_normalizes_limit_and_page() {
        let w = PageRequest::new(0, 7).window();
        assert_eq!(w, PageWindow { page: 1, limit: 20, skip: 0 });

        let w = PageRequest::new(3, 40).window();
        assert_eq!(w, PageWindow { page: 3, limit: 40, skip: 80 });
    }

    #[test]
    fn test_meta_math() {
        for total in [0_u64, 1, 19, 20, 21, 100, 101] {
            for limit in [10_u64, 20, 100] {
                for page in 1..=4_u64 {
                    let meta = PaginationMeta::new(total, PageRequest::new(page, limit).window());
                    assert_eq!(meta.total_pages, total.div_ceil(limit));
                    assert_eq!(meta.has_next_page, page < meta.total_pages);
                    assert_eq!(meta.has_prev_page, page > 1);
                    assert_eq!(meta.current_page, page);
                }
            }
        }
    }

    #[test]
    fn test_empty_collection_meta() {
        let meta = PaginationMeta::new(0, PageRequest::default().window());
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
        assert!(!meta.has_prev_page);
    }

    #[test]
    fn test_split_pipeline() {
        let prefix = vec![doc! { "$match": { "published": true } }];
        let window = PageRequest::new(2, 10).window();
        let (count, page) = split_pipeline(prefix, window);

        assert_eq!(count.last(), Some(&doc! { "$count": "total" }));
        assert_eq!(&page[1..], &[doc! { "$skip": 10_i64 }, doc! { "$limit": 10_i64 }]);
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let meta = PaginationMeta::new(5, PageRequest::default().window());
        let doc = bson::to_document(&meta).unwrap();
        assert!(doc.contains_key("totalDocs"));
        assert!(doc.contains_key("hasNextPage"));
    }
}
