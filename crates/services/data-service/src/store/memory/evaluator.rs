//! Filter evaluation over BSON documents.
//!
//! Implements the query-operator subset the services emit: logical
//! `$and`/`$or`/`$nor`, comparison, `$in`/`$nin`, `$exists`, `$regex`,
//! `$all`, `$size`, `$elemMatch` and `$not`. Array-valued fields match when
//! any element matches, as in the server.

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::RegexBuilder;

use common::{AppError, AppResult};

/// Check whether a document matches a filter
pub fn matches(doc: &Document, filter: &Document) -> AppResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(AppError::bad_request(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            path => match_condition(lookup_path(doc, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> AppResult<Vec<&'a Document>> {
    let Bson::Array(items) = condition else {
        return Err(AppError::bad_request(format!("{} expects an array", op)));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(AppError::bad_request(format!("{} expects documents", op))),
        })
        .collect()
}

/// Resolve a dotted path; numeric segments index into arrays
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Operator documents have only `$`-prefixed keys
pub fn operator_doc(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

/// Evaluate a field condition against the value at its path
pub fn match_condition(value: Option<&Bson>, condition: &Bson) -> AppResult<bool> {
    let Some(ops) = operator_doc(condition) else {
        return Ok(equals_or_contains(value, condition));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_or_contains(value, arg),
            "$ne" => !equals_or_contains(value, arg),
            "$gt" => any_compares(value, arg, |o| o == Ordering::Greater),
            "$gte" => any_compares(value, arg, |o| o != Ordering::Less),
            "$lt" => any_compares(value, arg, |o| o == Ordering::Less),
            "$lte" => any_compares(value, arg, |o| o != Ordering::Greater),
            "$in" => in_list(value, arg)?,
            "$nin" => !in_list(value, arg)?,
            "$exists" => truthy(arg) == value.is_some(),
            "$regex" => regex_matches(value, arg, ops.get_str("$options").ok())?,
            "$options" => true,
            "$all" => all_present(value, arg)?,
            "$size" => size_matches(value, arg)?,
            "$elemMatch" => elem_match(value, arg)?,
            "$not" => !match_condition(value, arg)?,
            other => {
                return Err(AppError::bad_request(format!(
                    "unsupported query operator '{}'",
                    other
                )))
            }
        };

        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            if values_equal(actual, expected) {
                return true;
            }
            match actual {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

fn any_compares(value: Option<&Bson>, arg: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, arg).map(&accept).unwrap_or(false)),
        Some(actual) => compare(actual, arg).map(accept).unwrap_or(false),
    }
}

fn in_list(value: Option<&Bson>, arg: &Bson) -> AppResult<bool> {
    let Bson::Array(candidates) = arg else {
        return Err(AppError::bad_request("$in/$nin expect an array"));
    };
    Ok(candidates
        .iter()
        .any(|candidate| equals_or_contains(value, candidate)))
}

fn all_present(value: Option<&Bson>, arg: &Bson) -> AppResult<bool> {
    let Bson::Array(required) = arg else {
        return Err(AppError::bad_request("$all expects an array"));
    };
    Ok(match value {
        Some(Bson::Array(items)) => required
            .iter()
            .all(|r| items.iter().any(|item| values_equal(item, r))),
        Some(single) => required.iter().all(|r| values_equal(single, r)),
        None => false,
    })
}

fn size_matches(value: Option<&Bson>, arg: &Bson) -> AppResult<bool> {
    let expected = as_i64(arg).ok_or_else(|| AppError::bad_request("$size expects a number"))?;
    Ok(matches!(value, Some(Bson::Array(items)) if items.len() as i64 == expected))
}

fn elem_match(value: Option<&Bson>, arg: &Bson) -> AppResult<bool> {
    let Bson::Document(criteria) = arg else {
        return Err(AppError::bad_request("$elemMatch expects a document"));
    };
    let Some(Bson::Array(items)) = value else {
        return Ok(false);
    };

    let is_operator = operator_doc(arg).is_some();
    for item in items {
        let hit = if is_operator {
            match_condition(Some(item), arg)?
        } else {
            match item {
                Bson::Document(inner) => matches(inner, criteria)?,
                _ => false,
            }
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn regex_matches(value: Option<&Bson>, arg: &Bson, options: Option<&str>) -> AppResult<bool> {
    let (pattern, flags) = match arg {
        Bson::String(p) => (p.as_str(), options.unwrap_or("")),
        Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
        _ => return Err(AppError::bad_request("$regex expects a string pattern")),
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| AppError::bad_request(format!("invalid regex: {}", e)))?;

    Ok(match value {
        Some(Bson::String(s)) => regex.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}

/// Truthiness of a BSON value as used by `$exists` and projections
pub fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

pub fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

/// Equality with numeric types compared by value
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Ordering between comparable values of the same kind
pub fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

/// Total ordering used for sorting; missing values sort first
pub fn sort_cmp(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
