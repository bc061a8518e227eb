//! Aggregation pipeline stages evaluated over an in-memory snapshot.

use std::collections::HashMap;

use bson::{Bson, Document};

use common::{AppError, AppResult};

use super::evaluator::{lookup_path, matches, sort_cmp, truthy, values_equal};

/// Run a pipeline against one collection of a snapshot
pub fn run(
    snapshot: &HashMap<String, Vec<Document>>,
    collection: &str,
    pipeline: &[Document],
) -> AppResult<Vec<Document>> {
    let mut docs = snapshot.get(collection).cloned().unwrap_or_default();

    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
            return Err(AppError::bad_request(
                "each pipeline stage must have exactly one operator",
            ));
        };

        docs = match name.as_str() {
            "$match" => {
                let filter = stage_doc(name, arg)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                sort_documents(&mut docs, stage_doc(name, arg)?);
                docs
            }
            "$skip" => {
                let n = stage_count(name, arg)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = stage_count(name, arg)?;
                docs.into_iter().take(n).collect()
            }
            "$count" => {
                let Bson::String(field) = arg else {
                    return Err(AppError::bad_request("$count expects a field name"));
                };
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field.as_str(), docs.len() as i64);
                    vec![out]
                }
            }
            "$project" => {
                let spec = stage_doc(name, arg)?;
                docs.iter()
                    .map(|doc| project(doc, spec))
                    .collect::<AppResult<_>>()?
            }
            "$addFields" | "$set" => {
                let spec = stage_doc(name, arg)?;
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    for (field, expr) in spec {
                        let value = eval_expr(&doc, expr)?;
                        doc.insert(field.as_str(), value);
                    }
                    out.push(doc);
                }
                out
            }
            "$lookup" => lookup(snapshot, docs, stage_doc(name, arg)?)?,
            "$unwind" => unwind(docs, arg)?,
            other => {
                return Err(AppError::bad_request(format!(
                    "unsupported pipeline stage '{}'",
                    other
                )))
            }
        };
    }

    Ok(docs)
}

fn stage_doc<'a>(name: &str, arg: &'a Bson) -> AppResult<&'a Document> {
    match arg {
        Bson::Document(d) => Ok(d),
        _ => Err(AppError::bad_request(format!("{} expects a document", name))),
    }
}

fn stage_count(name: &str, arg: &Bson) -> AppResult<usize> {
    super::evaluator::as_i64(arg)
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| AppError::bad_request(format!("{} expects a non-negative number", name)))
}

/// Stable multi-key sort; `-1` descends
pub fn sort_documents(docs: &mut [Document], spec: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in spec {
            let descending = super::evaluator::as_i64(direction) == Some(-1);
            let ord = sort_cmp(lookup_path(a, field), lookup_path(b, field));
            let ord = if descending { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Apply an inclusion or exclusion projection.
///
/// Inclusion keeps `_id` unless it is excluded explicitly. Non-boolean
/// values in an inclusion projection are evaluated as expressions.
pub fn project(doc: &Document, spec: &Document) -> AppResult<Document> {
    let is_flag = |v: &Bson| {
        matches!(
            v,
            Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)
        )
    };
    let inclusion = spec
        .iter()
        .any(|(k, v)| k != "_id" && (!is_flag(v) || truthy(v)));

    if !inclusion {
        let mut out = doc.clone();
        for (field, _) in spec.iter().filter(|(_, v)| !truthy(v)) {
            out.remove(field);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = spec.get("_id").map(truthy).unwrap_or(true);
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }

    for (field, value) in spec {
        if field == "_id" {
            continue;
        }
        if is_flag(value) {
            if truthy(value) {
                if let Some(found) = lookup_path(doc, field) {
                    out.insert(field.as_str(), found.clone());
                }
            }
        } else {
            out.insert(field.as_str(), eval_expr(doc, value)?);
        }
    }

    Ok(out)
}

/// Evaluate the expression subset: field paths, `$size`, `$literal`, `$ifNull`
fn eval_expr(doc: &Document, expr: &Bson) -> AppResult<Bson> {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            Ok(lookup_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Document(d) if d.len() == 1 => {
            let (op, arg) = d.iter().next().ok_or_else(|| AppError::internal("empty expression"))?;
            match op.as_str() {
                "$size" => match eval_expr(doc, arg)? {
                    Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
                    _ => Err(AppError::bad_request("$size requires an array")),
                },
                "$literal" => Ok(arg.clone()),
                "$ifNull" => {
                    let Bson::Array(options) = arg else {
                        return Err(AppError::bad_request("$ifNull expects an array"));
                    };
                    for option in options {
                        let value = eval_expr(doc, option)?;
                        if !matches!(value, Bson::Null) {
                            return Ok(value);
                        }
                    }
                    Ok(Bson::Null)
                }
                other if other.starts_with('$') => Err(AppError::bad_request(format!(
                    "unsupported expression operator '{}'",
                    other
                ))),
                _ => Ok(expr.clone()),
            }
        }
        other => Ok(other.clone()),
    }
}

fn lookup(
    snapshot: &HashMap<String, Vec<Document>>,
    docs: Vec<Document>,
    spec: &Document,
) -> AppResult<Vec<Document>> {
    let field = |name: &str| {
        spec.get_str(name)
            .map_err(|_| AppError::bad_request(format!("$lookup requires '{}'", name)))
    };
    let from = field("from")?;
    let local_field = field("localField")?;
    let foreign_field = field("foreignField")?;
    let as_field = field("as")?;

    let foreign = snapshot.get(from).map(Vec::as_slice).unwrap_or(&[]);

    Ok(docs
        .into_iter()
        .map(|mut doc| {
            let local = lookup_path(&doc, local_field).cloned().unwrap_or(Bson::Null);
            let joined: Vec<Bson> = foreign
                .iter()
                .filter(|candidate| joins(&local, lookup_path(candidate, foreign_field)))
                .cloned()
                .map(Bson::Document)
                .collect();
            doc.insert(as_field, joined);
            doc
        })
        .collect())
}

fn joins(local: &Bson, foreign: Option<&Bson>) -> bool {
    let foreign = foreign.unwrap_or(&Bson::Null);
    let contains = |items: &[Bson], value: &Bson| items.iter().any(|i| values_equal(i, value));

    match (local, foreign) {
        (Bson::Array(l), Bson::Array(f)) => l.iter().any(|v| contains(f, v)),
        (Bson::Array(l), f) => contains(l, f),
        (l, Bson::Array(f)) => contains(f, l),
        (l, f) => values_equal(l, f),
    }
}

fn unwind(docs: Vec<Document>, arg: &Bson) -> AppResult<Vec<Document>> {
    let (path, preserve) = match arg {
        Bson::String(p) => (p.as_str(), false),
        Bson::Document(d) => (
            d.get_str("path")
                .map_err(|_| AppError::bad_request("$unwind requires 'path'"))?,
            d.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(AppError::bad_request("$unwind expects a path")),
    };
    let field = path.strip_prefix('$').unwrap_or(path);

    let mut out = Vec::new();
    for doc in docs {
        match doc.get(field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    copy.insert(field, item);
                    out.push(copy);
                }
            }
            Some(Bson::Array(_)) | None | Some(Bson::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}
