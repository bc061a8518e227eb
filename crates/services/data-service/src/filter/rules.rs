//! Declarative filter rules.
//!
//! A [`RuleSet`] maps caller query parameters onto model fields. Operators
//! and match modes parse from strings and reject unknown values.

use std::str::FromStr;

use bson::{oid::ObjectId, Bson, Document};

use common::{AppError, AppResult};

use super::predicate::{ArrayOperator, CompareOp};

/// Caller-supplied query parameters keyed by query key
pub type QueryParams = Document;

/// How a rule joins the root predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl FromStr for Logic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(Logic::And),
            "or" => Ok(Logic::Or),
            other => Err(AppError::bad_request(format!("unknown logic '{}'", other))),
        }
    }
}

/// Operator of a filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOperator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl FilterOperator {
    /// Comparison operator, `None` for equality
    pub fn compare_op(&self) -> Option<CompareOp> {
        match self {
            FilterOperator::Eq => None,
            FilterOperator::Ne => Some(CompareOp::Ne),
            FilterOperator::Gt => Some(CompareOp::Gt),
            FilterOperator::Gte => Some(CompareOp::Gte),
            FilterOperator::Lt => Some(CompareOp::Lt),
            FilterOperator::Lte => Some(CompareOp::Lte),
            FilterOperator::In => Some(CompareOp::In),
            FilterOperator::Nin => Some(CompareOp::Nin),
        }
    }

    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::Nin)
    }
}

impl FromStr for FilterOperator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('$') {
            "eq" => Ok(FilterOperator::Eq),
            "ne" => Ok(FilterOperator::Ne),
            "gt" => Ok(FilterOperator::Gt),
            "gte" => Ok(FilterOperator::Gte),
            "lt" => Ok(FilterOperator::Lt),
            "lte" => Ok(FilterOperator::Lte),
            "in" => Ok(FilterOperator::In),
            "nin" => Ok(FilterOperator::Nin),
            _ => Err(AppError::bad_request(format!("unknown filter operator '{}'", s))),
        }
    }
}

impl FromStr for ArrayOperator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('$') {
            "all" => Ok(ArrayOperator::All),
            "in" => Ok(ArrayOperator::In),
            "nin" => Ok(ArrayOperator::Nin),
            "elemMatch" => Ok(ArrayOperator::ElemMatch),
            "size" => Ok(ArrayOperator::Size),
            _ => Err(AppError::bad_request(format!("unknown array operator '{}'", s))),
        }
    }
}

/// Where the search term must occur in the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Exact,
}

impl MatchMode {
    /// Anchor an already escaped term
    pub fn pattern(&self, escaped: &str) -> String {
        match self {
            MatchMode::Contains => escaped.to_string(),
            MatchMode::StartsWith => format!("^{}", escaped),
            MatchMode::EndsWith => format!("{}$", escaped),
            MatchMode::Exact => format!("^{}$", escaped),
        }
    }
}

impl FromStr for MatchMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(MatchMode::Contains),
            "startsWith" | "starts_with" => Ok(MatchMode::StartsWith),
            "endsWith" | "ends_with" => Ok(MatchMode::EndsWith),
            "exact" => Ok(MatchMode::Exact),
            other => Err(AppError::bad_request(format!("unknown match mode '{}'", other))),
        }
    }
}

/// Search rule options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_insensitive: bool,
    /// How per-field matches combine
    pub join: Logic,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            join: Logic::Or,
        }
    }
}

/// Value conversion applied to a parameter before it reaches the predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    ObjectId,
    Integer,
    Float,
    Boolean,
    Lowercase,
    Custom(fn(Bson) -> AppResult<Bson>),
}

impl Transform {
    /// Convert a value; arrays are converted element-wise
    pub fn apply(&self, value: Bson) -> AppResult<Bson> {
        if let Bson::Array(items) = value {
            return items
                .into_iter()
                .map(|item| self.apply(item))
                .collect::<AppResult<Vec<_>>>()
                .map(Bson::Array);
        }

        match self {
            Transform::ObjectId => match value {
                Bson::ObjectId(_) => Ok(value),
                Bson::String(s) => ObjectId::parse_str(s.trim())
                    .map(Bson::ObjectId)
                    .map_err(|_| AppError::bad_request(format!("'{}' is not a valid id", s))),
                other => Err(invalid("an id", &other)),
            },
            Transform::Integer => match value {
                Bson::Int32(_) | Bson::Int64(_) => Ok(value),
                Bson::Double(n) if n.fract() == 0.0 => Ok(Bson::Int64(n as i64)),
                Bson::String(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Bson::Int64)
                    .map_err(|_| invalid("an integer", &value)),
                other => Err(invalid("an integer", &other)),
            },
            Transform::Float => match value {
                Bson::Double(_) => Ok(value),
                Bson::Int32(n) => Ok(Bson::Double(n as f64)),
                Bson::Int64(n) => Ok(Bson::Double(n as f64)),
                Bson::String(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Bson::Double)
                    .map_err(|_| invalid("a number", &value)),
                other => Err(invalid("a number", &other)),
            },
            Transform::Boolean => match value {
                Bson::Boolean(_) => Ok(value),
                Bson::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Bson::Boolean(true)),
                    "false" | "0" | "no" => Ok(Bson::Boolean(false)),
                    _ => Err(invalid("a boolean", &value)),
                },
                Bson::Int32(n) => Ok(Bson::Boolean(n != 0)),
                Bson::Int64(n) => Ok(Bson::Boolean(n != 0)),
                other => Err(invalid("a boolean", &other)),
            },
            Transform::Lowercase => match value {
                Bson::String(s) => Ok(Bson::String(s.to_lowercase())),
                other => Ok(other),
            },
            Transform::Custom(f) => f(value),
        }
    }
}

fn invalid(expected: &str, value: &Bson) -> AppError {
    AppError::bad_request(format!("expected {}, got {}", expected, value))
}

/// `model_key <operator> param[query_key]`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBy {
    pub query_key: String,
    pub model_key: String,
    pub operator: FilterOperator,
    pub logic: Logic,
    pub transform: Option<Transform>,
}

impl FilterBy {
    pub fn new(query_key: impl Into<String>, model_key: impl Into<String>) -> Self {
        Self {
            query_key: query_key.into(),
            model_key: model_key.into(),
            operator: FilterOperator::Eq,
            logic: Logic::And,
            transform: None,
        }
    }

    pub fn operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Regex search of one term across several model fields
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBy {
    pub query_key: String,
    pub model_keys: Vec<String>,
    pub mode: MatchMode,
    pub options: SearchOptions,
    pub logic: Logic,
}

impl SearchBy {
    pub fn new<I, K>(query_key: impl Into<String>, model_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            query_key: query_key.into(),
            model_keys: model_keys.into_iter().map(Into::into).collect(),
            mode: MatchMode::Contains,
            options: SearchOptions::default(),
            logic: Logic::And,
        }
    }

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }
}

/// Inclusive range from two parameters onto one field
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBy {
    pub start_key: String,
    pub end_key: String,
    pub model_key: String,
    pub transform: Option<Transform>,
}

impl RangeBy {
    pub fn new(
        start_key: impl Into<String>,
        end_key: impl Into<String>,
        model_key: impl Into<String>,
    ) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            model_key: model_key.into(),
            transform: None,
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Field presence check switched on by a parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsBy {
    pub query_key: String,
    pub model_key: String,
    pub check_exists: bool,
}

impl ExistsBy {
    pub fn new(query_key: impl Into<String>, model_key: impl Into<String>, check_exists: bool) -> Self {
        Self {
            query_key: query_key.into(),
            model_key: model_key.into(),
            check_exists,
        }
    }
}

/// Array operator on one field; the condition defaults to the parameter value
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBy {
    pub query_key: String,
    pub model_key: String,
    pub operator: ArrayOperator,
    pub condition: Option<Bson>,
}

impl ArrayBy {
    pub fn new(
        query_key: impl Into<String>,
        model_key: impl Into<String>,
        operator: ArrayOperator,
    ) -> Self {
        Self {
            query_key: query_key.into(),
            model_key: model_key.into(),
            operator,
            condition: None,
        }
    }

    pub fn condition(mut self, condition: impl Into<Bson>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// One declarative rule
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRule {
    Filter(FilterBy),
    Search(SearchBy),
    Range(RangeBy),
    Exists(ExistsBy),
    Array(ArrayBy),
}

impl From<FilterBy> for FilterRule {
    fn from(rule: FilterBy) -> Self {
        FilterRule::Filter(rule)
    }
}

impl From<SearchBy> for FilterRule {
    fn from(rule: SearchBy) -> Self {
        FilterRule::Search(rule)
    }
}

impl From<RangeBy> for FilterRule {
    fn from(rule: RangeBy) -> Self {
        FilterRule::Range(rule)
    }
}

impl From<ExistsBy> for FilterRule {
    fn from(rule: ExistsBy) -> Self {
        FilterRule::Exists(rule)
    }
}

impl From<ArrayBy> for FilterRule {
    fn from(rule: ArrayBy) -> Self {
        FilterRule::Array(rule)
    }
}

/// Rules grouped by kind; compiled filter, search, range, exists, array
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub filter_by: Vec<FilterBy>,
    pub search_by: Vec<SearchBy>,
    pub range_by: Vec<RangeBy>,
    pub exists_by: Vec<ExistsBy>,
    pub array_by: Vec<ArrayBy>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to the list of its kind
    pub fn rule(mut self, rule: impl Into<FilterRule>) -> Self {
        match rule.into() {
            FilterRule::Filter(r) => self.filter_by.push(r),
            FilterRule::Search(r) => self.search_by.push(r),
            FilterRule::Range(r) => self.range_by.push(r),
            FilterRule::Exists(r) => self.exists_by.push(r),
            FilterRule::Array(r) => self.array_by.push(r),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter_by.is_empty()
            && self.search_by.is_empty()
            && self.range_by.is_empty()
            && self.exists_by.is_empty()
            && self.array_by.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strings_fail_fast() {
        assert_eq!("$gte".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert_eq!("startsWith".parse::<MatchMode>().unwrap(), MatchMode::StartsWith);
        assert_eq!("elemMatch".parse::<ArrayOperator>().unwrap(), ArrayOperator::ElemMatch);

        assert_eq!("like".parse::<FilterOperator>().unwrap_err().code(), "BAD_REQUEST");
        assert!("fuzzy".parse::<MatchMode>().is_err());
        assert!("xor".parse::<Logic>().is_err());
        assert!("any".parse::<ArrayOperator>().is_err());
    }

    #[test]
    fn test_transforms() {
        let id = ObjectId::new();
        assert_eq!(
            Transform::ObjectId.apply(Bson::String(id.to_hex())).unwrap(),
            Bson::ObjectId(id)
        );
        assert_eq!(Transform::Integer.apply("42".into()).unwrap(), Bson::Int64(42));
        assert_eq!(Transform::Boolean.apply("false".into()).unwrap(), Bson::Boolean(false));
        assert_eq!(Transform::Lowercase.apply("RuSt".into()).unwrap(), Bson::String("rust".into()));
        assert!(Transform::Integer.apply("forty".into()).is_err());
        assert!(Transform::ObjectId.apply("nope".into()).is_err());
    }

    #[test]
    fn test_transform_maps_arrays() {
        let out = Transform::Float
            .apply(Bson::Array(vec!["1.5".into(), Bson::Int32(2)]))
            .unwrap();
        assert_eq!(out, Bson::Array(vec![Bson::Double(1.5), Bson::Double(2.0)]));
    }

    #[test]
    fn test_custom_transform() {
        fn cents(value: Bson) -> AppResult<Bson> {
            Transform::Float
                .apply(value)
                .map(|v| Bson::Int64((v.as_f64().unwrap_or_default() * 100.0) as i64))
        }
        assert_eq!(Transform::Custom(cents).apply("1.25".into()).unwrap(), Bson::Int64(125));
    }

    #[test]
    fn test_rule_set_groups_by_kind() {
        let rules = RuleSet::new()
            .rule(FilterBy::new("status", "status"))
            .rule(ExistsBy::new("hasCover", "cover", true))
            .rule(FilterBy::new("author", "user").transform(Transform::ObjectId));

        assert_eq!(rules.filter_by.len(), 2);
        assert_eq!(rules.exists_by.len(), 1);
        assert!(!rules.is_empty());
    }
}
