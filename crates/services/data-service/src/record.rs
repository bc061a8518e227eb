//! Result shapes returned by the services.

use bson::Document;
use serde::{Deserialize, Serialize};

use common::AppResult;
use domain::Model;

use crate::pagination::{PaginationMeta, PaginationResult};

/// A fetched document, either as plain data or with the typed entity.
///
/// Which variant is returned depends only on the `lean` option. A hydrated
/// record keeps the stored document next to the entity, so fields `T` does
/// not declare (timestamps, for one) survive and both variants expose the
/// same content.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<T> {
    Lean(Document),
    Hydrated {
        document: Document,
        /// `None` only when a projection or population reshaped the document
        /// so that it no longer deserializes as `T`
        entity: Option<T>,
    },
}

impl<T: Model> Record<T> {
    /// Wrap a fetched document.
    ///
    /// `reshaped` marks reads with a projection or population; for those a
    /// document that does not fit `T` is kept without an entity instead of
    /// failing the read.
    pub(crate) fn from_document(doc: Document, lean: bool, reshaped: bool) -> AppResult<Self> {
        if lean {
            return Ok(Record::Lean(doc));
        }

        let entity = match bson::from_document::<T>(doc.clone()) {
            Ok(entity) => Some(entity),
            Err(e) if reshaped => {
                tracing::trace!(collection = T::COLLECTION, error = %e, "reshaped document kept without entity");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Record::Hydrated {
            document: doc,
            entity,
        })
    }

    pub fn is_lean(&self) -> bool {
        matches!(self, Record::Lean(_))
    }

    /// The stored document, whatever the variant
    pub fn as_document(&self) -> &Document {
        match self {
            Record::Lean(doc) | Record::Hydrated { document: doc, .. } => doc,
        }
    }

    pub fn as_entity(&self) -> Option<&T> {
        match self {
            Record::Lean(_) => None,
            Record::Hydrated { entity, .. } => entity.as_ref(),
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            Record::Lean(doc) | Record::Hydrated { document: doc, .. } => doc,
        }
    }

    /// Typed form, deserializing when no entity is held
    pub fn into_entity(self) -> AppResult<T> {
        match self {
            Record::Hydrated {
                entity: Some(entity),
                ..
            } => Ok(entity),
            Record::Lean(doc)
            | Record::Hydrated {
                document: doc,
                entity: None,
            } => Ok(bson::from_document(doc)?),
        }
    }
}

/// Result of a list query: the documents, plus metadata when paginated
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub docs: Vec<T>,
    pub pagination: Option<PaginationMeta>,
}

impl<T> Listing<T> {
    pub fn unpaged(docs: Vec<T>) -> Self {
        Self {
            docs,
            pagination: None,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// The page form, if the query was paginated
    pub fn into_page(self) -> Option<PaginationResult<T>> {
        let pagination = self.pagination?;
        Some(PaginationResult {
            docs: self.docs,
            pagination,
        })
    }
}

impl<T> From<PaginationResult<T>> for Listing<T> {
    fn from(page: PaginationResult<T>) -> Self {
        Self {
            docs: page.docs,
            pagination: Some(page.pagination),
        }
    }
}

/// Matched and modified counts of a bulk update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome for one id of a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub success: bool,
    pub message: String,
}

/// Per-item accounting of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub results: Vec<BatchItem>,
    pub errors: Vec<String>,
    pub failed_ids: Vec<String>,
    pub success_ids: Vec<String>,
    pub total_count: usize,
    pub success_count: usize,
    pub is_all_succeed: bool,
}

impl BatchResult {
    /// Attribute outcomes by position: the first `succeeded` ids are
    /// reported as successes and the rest as failures.
    pub fn positional(
        ids: &[String],
        succeeded: usize,
        success_message: &str,
        failure_message: &str,
    ) -> Self {
        let succeeded = succeeded.min(ids.len());
        let mut result = BatchResult {
            total_count: ids.len(),
            success_count: succeeded,
            is_all_succeed: succeeded == ids.len(),
            ..Default::default()
        };

        for (index, id) in ids.iter().enumerate() {
            let success = index < succeeded;
            let message = if success {
                success_message
            } else {
                failure_message
            };

            if success {
                result.success_ids.push(id.clone());
            } else {
                result.failed_ids.push(id.clone());
                result.errors.push(format!("{}: {}", id, message));
            }
            result.results.push(BatchItem {
                id: id.clone(),
                success,
                message: message.to_string(),
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        pinned: bool,
    }

    impl Model for Note {
        const COLLECTION: &'static str = "notes";
    }

    fn stored() -> Document {
        doc! { "title": "a", "pinned": true, "createdAt": bson::DateTime::from_millis(1) }
    }

    #[test]
    fn test_hydrated_keeps_undeclared_fields() {
        let lean = Record::<Note>::from_document(stored(), true, false).unwrap();
        let hydrated = Record::<Note>::from_document(stored(), false, false).unwrap();

        assert!(!hydrated.is_lean());
        assert_eq!(lean.as_document(), hydrated.as_document());
        assert!(hydrated.as_document().contains_key("createdAt"));
        assert_eq!(
            hydrated.into_entity().unwrap(),
            Note {
                title: "a".into(),
                pinned: true
            }
        );
    }

    #[test]
    fn test_projected_document_hydrates_without_entity() {
        let projected = doc! { "title": "a" };

        let record = Record::<Note>::from_document(projected.clone(), false, true).unwrap();
        assert!(record.as_entity().is_none());
        assert_eq!(record.as_document(), &projected);
        assert!(record.into_entity().is_err());

        assert!(Record::<Note>::from_document(projected, false, false).is_err());
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_positional_attribution() {
        let result = BatchResult::positional(&ids(&["a", "b", "c"]), 2, "ok", "failed");

        assert_eq!(result.success_ids, ids(&["a", "b"]));
        assert_eq!(result.failed_ids, ids(&["c"]));
        assert_eq!(result.errors, vec!["c: failed".to_string()]);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.total_count, 3);
        assert!(!result.is_all_succeed);
        assert!(result.results[0].success && !result.results[2].success);
    }

    #[test]
    fn test_positional_caps_success_count() {
        let result = BatchResult::positional(&ids(&["a"]), 5, "ok", "failed");
        assert_eq!(result.success_count, 1);
        assert!(result.is_all_succeed);
    }

    #[test]
    fn test_listing_page_round_trip() {
        let listing = Listing::unpaged(vec![1, 2]);
        assert!(listing.clone().into_page().is_none());
        assert_eq!(listing.len(), 2);
    }
}
