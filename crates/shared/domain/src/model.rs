//! Document shape bound to a collection.

use serde::{de::DeserializeOwned, Serialize};

use crate::constants::SLUG_FIELD;

/// A typed document shape stored in one collection.
///
/// Implementors describe where their documents live and which fields the
/// generic services treat specially. Everything else about the shape is
/// plain serde.
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Article {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     id: Option<ObjectId>,
///     title: String,
///     user: Option<ObjectId>,
/// }
///
/// impl Model for Article {
///     const COLLECTION: &'static str = "articles";
///     const LABEL: &'static str = "Article";
///     const OWNER_FIELD: Option<&'static str> = Some("user");
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Collection the documents are stored in
    const COLLECTION: &'static str;

    /// Human-readable entity label used in error messages
    const LABEL: &'static str = "Document";

    /// Field holding the owning identity, if the shape has an owner
    const OWNER_FIELD: Option<&'static str> = None;

    /// Field holding the unique slug
    const SLUG_FIELD: &'static str = SLUG_FIELD;

    /// Whether create/update stamp `createdAt`/`updatedAt`
    const TIMESTAMPS: bool = true;
}
