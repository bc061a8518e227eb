//! Update operators applied in place.

use bson::{Bson, Document};

use common::{AppError, AppResult};

use super::evaluator::{as_f64, match_condition, matches, operator_doc, values_equal};

/// Apply an operator update document to a document.
///
/// Returns whether the document changed. Replacement documents are rejected.
pub fn apply(doc: &mut Document, update: &Document) -> AppResult<bool> {
    if update.is_empty() {
        return Err(AppError::bad_request("update document must not be empty"));
    }

    let before = doc.clone();

    for (op, arg) in update {
        let Bson::Document(fields) = arg else {
            return Err(AppError::bad_request(format!(
                "update operator '{}' expects a document",
                op
            )));
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let current = get_path(doc, path).cloned();
                    set_path(doc, path, increment(path, current.as_ref(), delta)?)?;
                }
            }
            "$push" => {
                for (path, value) in fields {
                    let items = each_or_single(value);
                    let arr = array_at(doc, path)?;
                    arr.extend(items);
                }
            }
            "$addToSet" => {
                for (path, value) in fields {
                    let items = each_or_single(value);
                    let arr = array_at(doc, path)?;
                    for item in items {
                        if !arr.iter().any(|existing| values_equal(existing, &item)) {
                            arr.push(item);
                        }
                    }
                }
            }
            "$pull" => {
                for (path, condition) in fields {
                    pull(doc, path, condition)?;
                }
            }
            other if other.starts_with('$') => {
                return Err(AppError::bad_request(format!(
                    "unsupported update operator '{}'",
                    other
                )))
            }
            _ => {
                return Err(AppError::bad_request(
                    "replacement documents are not supported; use update operators",
                ))
            }
        }
    }

    Ok(*doc != before)
}

fn each_or_single(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(d) if d.contains_key("$each") => match d.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        },
        other => vec![other.clone()],
    }
}

fn increment(path: &str, current: Option<&Bson>, delta: &Bson) -> AppResult<Bson> {
    let invalid = || AppError::bad_request(format!("cannot $inc non-numeric field '{}'", path));

    match (current, delta) {
        (None, d) => as_f64(d).map(|_| d.clone()).ok_or_else(invalid),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Ok(Bson::Int32(a + b)),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Ok(Bson::Int64(*a as i64 + b)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Ok(Bson::Int64(a + *b as i64)),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Ok(Bson::Int64(a + b)),
        (Some(a), b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Bson::Double(x + y)),
            _ => Err(invalid()),
        },
    }
}

fn pull(doc: &mut Document, path: &str, condition: &Bson) -> AppResult<()> {
    let Some(Bson::Array(items)) = get_path_mut(doc, path) else {
        return Ok(());
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let remove = if operator_doc(condition).is_some() {
            match_condition(Some(&item), condition)?
        } else {
            match (&item, condition) {
                (Bson::Document(inner), Bson::Document(criteria)) => matches(inner, criteria)?,
                _ => values_equal(&item, condition),
            }
        };
        if !remove {
            kept.push(item);
        }
    }
    *items = kept;

    Ok(())
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    super::evaluator::lookup_path(doc, path)
}

fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let container = match parent {
        None => doc,
        Some(parent) => {
            let mut current = doc;
            for segment in parent.split('.') {
                current = match current.get_mut(segment)? {
                    Bson::Document(inner) => inner,
                    _ => return None,
                };
            }
            current
        }
    };

    container.get_mut(leaf)
}

fn array_at<'a>(doc: &'a mut Document, path: &str) -> AppResult<&'a mut Vec<Bson>> {
    if get_path(doc, path).is_none() {
        set_path(doc, path, Bson::Array(Vec::new()))?;
    }

    match get_path_mut(doc, path) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(AppError::bad_request(format!(
            "field '{}' is not an array",
            path
        ))),
    }
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> AppResult<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);

    let mut current = doc;
    for segment in segments {
        if !matches!(current.get(segment), Some(Bson::Document(_))) {
            if current.contains_key(segment) {
                return Err(AppError::bad_request(format!(
                    "cannot create field '{}' inside a non-document value",
                    path
                )));
            }
            current.insert(segment, Document::new());
        }
        current = match current.get_mut(segment) {
            Some(Bson::Document(inner)) => inner,
            _ => return Err(AppError::internal("path traversal failed")),
        };
    }

    current.insert(leaf, value);
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            doc.remove(path);
        }
        Some((parent, leaf)) => {
            if let Some(Bson::Document(inner)) = get_path_mut(doc, parent) {
                inner.remove(leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_set_and_unset_nested() {
        let mut d = doc! { "title": "draft" };
        assert!(apply(&mut d, &doc! { "$set": { "meta.status": "published" } }).unwrap());
        assert_eq!(d.get_document("meta").unwrap().get_str("status").unwrap(), "published");

        assert!(apply(&mut d, &doc! { "$unset": { "meta.status": "" } }).unwrap());
        assert!(d.get_document("meta").unwrap().is_empty());
    }

    #[test]
    fn test_unchanged_set_is_not_modified() {
        let mut d = doc! { "title": "same" };
        assert!(!apply(&mut d, &doc! { "$set": { "title": "same" } }).unwrap());
    }

    #[test]
    fn test_inc_creates_and_adds() {
        let mut d = doc! { "views": 1 };
        apply(&mut d, &doc! { "$inc": { "views": 2, "likes": 1 } }).unwrap();
        assert_eq!(d.get_i32("views").unwrap(), 3);
        assert_eq!(d.get_i32("likes").unwrap(), 1);
    }

    #[test]
    fn test_push_add_to_set_and_pull() {
        let mut d = doc! { "tags": ["a"] };
        apply(&mut d, &doc! { "$push": { "tags": { "$each": ["b", "c"] } } }).unwrap();
        apply(&mut d, &doc! { "$addToSet": { "tags": "a" } }).unwrap();
        assert_eq!(d.get_array("tags").unwrap().len(), 3);

        apply(&mut d, &doc! { "$pull": { "tags": { "$in": ["a", "c"] } } }).unwrap();
        assert_eq!(d.get_array("tags").unwrap(), &vec![Bson::String("b".into())]);
    }

    #[test]
    fn test_pull_on_missing_field_is_noop() {
        let mut d = doc! { "title": "x" };
        assert!(!apply(&mut d, &doc! { "$pull": { "tags": "a" } }).unwrap());
    }

    #[test]
    fn test_replacement_rejected() {
        let mut d = doc! { "title": "x" };
        let err = apply(&mut d, &doc! { "title": "y" }).unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
