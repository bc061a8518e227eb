//! Layer-wide constants.
//!
//! These constants define the paging, batching and naming rules every
//! collection-bound service shares.

// =============================================================================
// Pagination
// =============================================================================

/// Page sizes a caller may request; anything else falls back to the default
pub const ALLOWED_PAGE_SIZES: &[u64] = &[10, 20, 40, 60, 80, 100];

/// Default number of items per page
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Default starting page number (1-indexed)
pub const DEFAULT_PAGE_NUMBER: u64 = 1;

/// Check if a page size is in the allow-list
pub fn is_allowed_page_size(limit: u64) -> bool {
    ALLOWED_PAGE_SIZES.contains(&limit)
}

// =============================================================================
// Batch operations
// =============================================================================

/// Maximum number of ids accepted by a single batch delete
pub const MAX_BATCH_SIZE: usize = 100;

// =============================================================================
// Document fields
// =============================================================================

/// Identity field of every document
pub const ID_FIELD: &str = "_id";

/// Creation timestamp field
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Modification timestamp field
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Default slug field
pub const SLUG_FIELD: &str = "slug";

// =============================================================================
// Roles
// =============================================================================

/// Default role for acting identities
pub const ROLE_USER: &str = "user";

/// Role allowed to bypass ownership checks
pub const ROLE_ADMIN: &str = "admin";

/// All valid role values
pub const VALID_ROLES: &[&str] = &[ROLE_USER, ROLE_ADMIN];

/// Check if a role value is valid
pub fn is_valid_role(role: &str) -> bool {
    VALID_ROLES.contains(&role)
}
