//! Rule set compilation.

use bson::{Bson, Document};

use common::{AppError, AppResult};

use super::predicate::{field, ArrayOperator, Predicate};
use super::rules::{
    ArrayBy, ExistsBy, FilterBy, Logic, QueryParams, RangeBy, RuleSet, SearchBy, Transform,
};

/// Compiles a [`RuleSet`] against query parameters into one predicate.
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compile every active rule.
    ///
    /// Rule kinds are applied in a fixed order: filter, search, range,
    /// exists, array. Within a kind, `Or` rules collapse into one
    /// disjunction; everything else is a conjunct of the root. A rule whose
    /// parameter is absent contributes nothing.
    pub fn compile(params: &QueryParams, rules: &RuleSet) -> AppResult<Predicate> {
        let mut root = Vec::new();

        compile_group(&mut root, &rules.filter_by, |rule| {
            Ok(filter_rule(rule, params)?.map(|p| (p, rule.logic)))
        })?;
        compile_group(&mut root, &rules.search_by, |rule| {
            Ok(search_rule(rule, params)?.map(|p| (p, rule.logic)))
        })?;
        compile_group(&mut root, &rules.range_by, |rule| {
            Ok(range_rule(rule, params)?.map(|p| (p, Logic::And)))
        })?;
        compile_group(&mut root, &rules.exists_by, |rule| {
            Ok(exists_rule(rule, params).map(|p| (p, Logic::And)))
        })?;
        compile_group(&mut root, &rules.array_by, |rule| {
            Ok(array_rule(rule, params)?.map(|p| (p, Logic::And)))
        })?;

        Ok(Predicate::And(root))
    }
}

fn compile_group<R>(
    root: &mut Vec<Predicate>,
    rules: &[R],
    mut compile: impl FnMut(&R) -> AppResult<Option<(Predicate, Logic)>>,
) -> AppResult<()> {
    let mut any_of = Vec::new();

    for rule in rules {
        match compile(rule)? {
            Some((predicate, Logic::And)) => root.push(predicate),
            Some((predicate, Logic::Or)) => any_of.push(predicate),
            None => {}
        }
    }

    if !any_of.is_empty() {
        root.push(Predicate::Or(any_of));
    }
    Ok(())
}

/// Parameter value, treating null and empty strings as absent
fn param<'a>(params: &'a QueryParams, key: &str) -> Option<&'a Bson> {
    match params.get(key) {
        None | Some(Bson::Null) => None,
        Some(Bson::String(s)) if s.trim().is_empty() => None,
        Some(value) => Some(value),
    }
}

/// Split comma-separated strings into an array; wrap scalars
fn as_list(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        Bson::String(s) => Bson::Array(
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Bson::String(part.to_string()))
                .collect(),
        ),
        other => Bson::Array(vec![other.clone()]),
    }
}

fn transformed(value: Bson, transform: Option<Transform>) -> AppResult<Bson> {
    match transform {
        Some(t) => t.apply(value),
        None => Ok(value),
    }
}

fn filter_rule(rule: &FilterBy, params: &QueryParams) -> AppResult<Option<Predicate>> {
    let Some(value) = param(params, &rule.query_key) else {
        return Ok(None);
    };

    let value = if rule.operator.takes_list() {
        as_list(value)
    } else {
        value.clone()
    };
    let value = transformed(value, rule.transform)?;

    let predicate = match rule.operator.compare_op() {
        None => field(&rule.model_key).eq(value),
        Some(op) => field(&rule.model_key).compare(op, value),
    };
    Ok(Some(predicate))
}

fn search_rule(rule: &SearchBy, params: &QueryParams) -> AppResult<Option<Predicate>> {
    let Some(value) = param(params, &rule.query_key) else {
        return Ok(None);
    };

    let term = match value {
        Bson::String(s) => s.trim().to_string(),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_) => value.to_string(),
        other => {
            return Err(AppError::bad_request(format!(
                "search term for '{}' must be a string, got {}",
                rule.query_key, other
            )))
        }
    };

    let pattern = rule.mode.pattern(&regex::escape(&term));
    let options = if rule.options.case_insensitive { "i" } else { "" };

    let per_field: Vec<Predicate> = rule
        .model_keys
        .iter()
        .map(|key| field(key).regex(pattern.clone(), options))
        .collect();

    Ok(Some(match rule.options.join {
        Logic::Or => Predicate::Or(per_field),
        Logic::And => Predicate::And(per_field),
    }))
}

fn range_rule(rule: &RangeBy, params: &QueryParams) -> AppResult<Option<Predicate>> {
    let start = param(params, &rule.start_key).cloned();
    let end = param(params, &rule.end_key).cloned();
    if start.is_none() && end.is_none() {
        return Ok(None);
    }

    let start = start.map(|v| transformed(v, rule.transform)).transpose()?;
    let end = end.map(|v| transformed(v, rule.transform)).transpose()?;
    Ok(Some(field(&rule.model_key).between(start, end)))
}

fn exists_rule(rule: &ExistsBy, params: &QueryParams) -> Option<Predicate> {
    param(params, &rule.query_key)?;
    Some(field(&rule.model_key).exists(rule.check_exists))
}

fn array_rule(rule: &ArrayBy, params: &QueryParams) -> AppResult<Option<Predicate>> {
    let Some(value) = param(params, &rule.query_key) else {
        return Ok(None);
    };

    let operand = match &rule.condition {
        Some(condition) => condition.clone(),
        None => value.clone(),
    };

    let operand = match rule.operator {
        op if op.takes_list() => as_list(&operand),
        ArrayOperator::Size => size_operand(&rule.query_key, &operand)?,
        ArrayOperator::ElemMatch => match operand {
            Bson::Document(_) => operand,
            other => {
                return Err(AppError::bad_request(format!(
                    "$elemMatch for '{}' needs a document condition, got {}",
                    rule.query_key, other
                )))
            }
        },
        _ => operand,
    };

    Ok(Some(field(&rule.model_key).array(rule.operator, operand)))
}

fn size_operand(query_key: &str, value: &Bson) -> AppResult<Bson> {
    let size = match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        Bson::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match size {
        Some(n) if n >= 0 => Ok(Bson::Int64(n)),
        _ => Err(AppError::bad_request(format!(
            "$size for '{}' needs a non-negative integer, got {}",
            query_key, value
        ))),
    }
}

/// Compile and lower in one step
pub fn compile_to_document(params: &QueryParams, rules: &RuleSet) -> AppResult<Document> {
    Ok(FilterCompiler::compile(params, rules)?.to_document())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::rules::{FilterOperator, MatchMode, SearchOptions};
    use bson::doc;

    fn article_rules() -> RuleSet {
        RuleSet::new()
            .rule(FilterBy::new("status", "status"))
            .rule(FilterBy::new("minViews", "views").operator(FilterOperator::Gte).transform(Transform::Integer))
            .rule(SearchBy::new("q", ["title", "body"]))
            .rule(RangeBy::new("from", "to", "price").transform(Transform::Float))
            .rule(ExistsBy::new("hasCover", "cover", true))
            .rule(ArrayBy::new("tags", "tags", ArrayOperator::All))
    }

    #[test]
    fn test_compile_full_rule_set_in_fixed_order() {
        let params = doc! {
            "tags": "rust,async",
            "hasCover": "1",
            "to": "9.5",
            "q": "a.b",
            "minViews": "10",
            "status": "live",
        };

        let filter = compile_to_document(&params, &article_rules()).unwrap();
        assert_eq!(
            filter,
            doc! { "$and": [
                { "status": "live" },
                { "views": { "$gte": 10_i64 } },
                { "$or": [
                    { "title": { "$regex": "a\\.b", "$options": "i" } },
                    { "body": { "$regex": "a\\.b", "$options": "i" } },
                ] },
                { "price": { "$lte": 9.5 } },
                { "cover": { "$exists": true } },
                { "tags": { "$all": ["rust", "async"] } },
            ] }
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let params = doc! { "status": "live", "q": "rust" };
        let rules = article_rules();
        assert_eq!(
            FilterCompiler::compile(&params, &rules).unwrap(),
            FilterCompiler::compile(&params, &rules).unwrap()
        );
    }

    #[test]
    fn test_absent_keys_are_inactive() {
        let filter = compile_to_document(&doc! { "unrelated": 1, "status": "" }, &article_rules()).unwrap();
        assert_eq!(filter, Document::new());
    }

    #[test]
    fn test_or_rules_group_within_kind() {
        let rules = RuleSet::new()
            .rule(FilterBy::new("author", "user").logic(Logic::Or))
            .rule(FilterBy::new("editor", "editor").logic(Logic::Or))
            .rule(FilterBy::new("status", "status"));

        let filter = compile_to_document(
            &doc! { "author": "ada", "editor": "bob", "status": "live" },
            &rules,
        )
        .unwrap();

        assert_eq!(
            filter,
            doc! { "$and": [
                { "status": "live" },
                { "$or": [ { "user": "ada" }, { "editor": "bob" } ] },
            ] }
        );
    }

    #[test]
    fn test_search_modes_and_case() {
        let rules = RuleSet::new().rule(
            SearchBy::new("q", ["slug"])
                .mode(MatchMode::StartsWith)
                .options(SearchOptions {
                    case_insensitive: false,
                    join: Logic::Or,
                }),
        );
        let filter = compile_to_document(&doc! { "q": "rust*" }, &rules).unwrap();
        assert_eq!(filter, doc! { "slug": { "$regex": "^rust\\*" } });
    }

    #[test]
    fn test_in_operator_splits_and_transforms() {
        let a = bson::oid::ObjectId::new();
        let b = bson::oid::ObjectId::new();
        let rules = RuleSet::new().rule(
            FilterBy::new("authors", "user")
                .operator(FilterOperator::In)
                .transform(Transform::ObjectId),
        );
        let params = doc! { "authors": format!("{}, {}", a.to_hex(), b.to_hex()) };

        let filter = compile_to_document(&params, &rules).unwrap();
        assert_eq!(filter, doc! { "user": { "$in": [a, b] } });
    }

    #[test]
    fn test_array_rule_uses_configured_condition() {
        let rules = RuleSet::new().rule(
            ArrayBy::new("reported", "reports", ArrayOperator::ElemMatch)
                .condition(doc! { "resolved": false }),
        );
        let filter = compile_to_document(&doc! { "reported": true }, &rules).unwrap();
        assert_eq!(filter, doc! { "reports": { "$elemMatch": { "resolved": false } } });
    }

    #[test]
    fn test_size_requires_integer() {
        let rules = RuleSet::new().rule(ArrayBy::new("count", "tags", ArrayOperator::Size));

        let ok = compile_to_document(&doc! { "count": "2" }, &rules).unwrap();
        assert_eq!(ok, doc! { "tags": { "$size": 2_i64 } });

        let err = compile_to_document(&doc! { "count": "two" }, &rules).unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[test]
    fn test_bad_transform_input_is_bad_request() {
        let err = compile_to_document(&doc! { "minViews": "lots" }, &article_rules()).unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
