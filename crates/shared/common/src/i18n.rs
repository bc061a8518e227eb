//! Message translation seam.
//!
//! Error and batch messages are looked up by key and interpolated with
//! `{{name}}` placeholders. The request context supplies the translator;
//! [`DefaultTranslator`] carries the English catalog used when none is given.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Interpolation variables for a message
pub type Vars = BTreeMap<String, String>;

/// Build interpolation variables from pairs
pub fn vars<const N: usize>(pairs: [(&str, String); N]) -> Vars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// =============================================================================
// Message keys
// =============================================================================

pub const MSG_NOT_FOUND: &str = "errors.not_found";
pub const MSG_FORBIDDEN: &str = "errors.forbidden";
pub const MSG_UNAUTHENTICATED: &str = "errors.unauthenticated";
pub const MSG_NO_OWNER_FIELD: &str = "errors.no_owner_field";
pub const MSG_BATCH_EMPTY: &str = "errors.batch_empty";
pub const MSG_BATCH_TOO_LARGE: &str = "errors.batch_too_large";
pub const MSG_NOT_MODIFIED: &str = "errors.not_modified";
pub const MSG_NOT_ACKNOWLEDGED: &str = "errors.not_acknowledged";
pub const MSG_MISSING_REFERENCES: &str = "errors.missing_references";
pub const MSG_BATCH_DELETED: &str = "batch.deleted";
pub const MSG_BATCH_NOT_DELETED: &str = "batch.not_deleted";

static CATALOG: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (MSG_NOT_FOUND, "{{entity}} not found"),
        (MSG_FORBIDDEN, "You are not allowed to modify this {{entity}}"),
        (MSG_UNAUTHENTICATED, "An acting identity is required"),
        (MSG_NO_OWNER_FIELD, "{{entity}} has no owner field"),
        (MSG_BATCH_EMPTY, "At least one id is required"),
        (MSG_BATCH_TOO_LARGE, "A batch may contain at most {{max}} ids"),
        (MSG_NOT_MODIFIED, "No {{entity}} was modified"),
        (MSG_NOT_ACKNOWLEDGED, "The store did not acknowledge the write"),
        (MSG_MISSING_REFERENCES, "Referenced {{entity}} not found: {{ids}}"),
        (MSG_BATCH_DELETED, "Deleted successfully"),
        (MSG_BATCH_NOT_DELETED, "Could not be deleted"),
    ])
});

/// Translation function `t(key, vars) -> string`.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait Translator: Send + Sync {
    fn t(&self, key: &str, vars: &Vars) -> String;
}

/// English catalog; unknown keys translate to themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTranslator;

impl Translator for DefaultTranslator {
    fn t(&self, key: &str, vars: &Vars) -> String {
        match CATALOG.get(key) {
            Some(template) => interpolate(template, vars),
            None => key.to_string(),
        }
    }
}

/// Replace `{{name}}` placeholders with their values
pub fn interpolate(template: &str, vars: &Vars) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{{{}}}}}", name), value)
    })
}
