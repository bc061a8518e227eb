//! Per-call option values for queries and mutations.
//!
//! Options are composed with consuming `with_*` methods and never mutated
//! by the services that receive them.

use std::fmt;

use bson::Document;

use common::AppResult;

use crate::context::RequestContext;
use crate::filter::{FilterCompiler, Predicate, QueryParams, RuleSet};
use crate::pagination::PageRequest;
use crate::store::{FindSpec, Transaction};

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// Replace referenced ids at `path` with documents from `from`
#[derive(Debug, Clone, PartialEq)]
pub struct Populate {
    pub path: String,
    pub from: String,
    pub select: Option<Document>,
}

impl Populate {
    pub fn new(path: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            from: from.into(),
            select: None,
        }
    }

    pub fn select(mut self, projection: Document) -> Self {
        self.select = Some(projection);
        self
    }
}

/// Count of documents in `from` whose `foreign_field` references each result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedCount {
    pub from: String,
    pub foreign_field: String,
    pub as_field: String,
}

impl RelatedCount {
    pub fn new(
        from: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }
}

/// Options for read operations.
pub struct QueryOptions<Sess> {
    pub filter: Predicate,
    pub rules: Option<(QueryParams, RuleSet)>,
    pub select: Option<Document>,
    pub populate: Vec<Populate>,
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub lean: bool,
    pub paginate: bool,
    pub page: PageRequest,
    pub session: Option<Transaction<Sess>>,
    pub context: Option<RequestContext>,
}

impl<Sess> Default for QueryOptions<Sess> {
    fn default() -> Self {
        Self {
            filter: Predicate::all(),
            rules: None,
            select: None,
            populate: Vec::new(),
            sort: None,
            limit: None,
            skip: None,
            lean: false,
            paginate: true,
            page: PageRequest::default(),
            session: None,
            context: None,
        }
    }
}

impl<Sess> Clone for QueryOptions<Sess> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            rules: self.rules.clone(),
            select: self.select.clone(),
            populate: self.populate.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
            lean: self.lean,
            paginate: self.paginate,
            page: self.page,
            session: self.session.clone(),
            context: self.context.clone(),
        }
    }
}

impl<Sess> fmt::Debug for QueryOptions<Sess> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("filter", &self.filter)
            .field("rules", &self.rules)
            .field("select", &self.select)
            .field("populate", &self.populate)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("lean", &self.lean)
            .field("paginate", &self.paginate)
            .field("page", &self.page)
            .field("session", &self.session)
            .field("context", &self.context)
            .finish()
    }
}

impl<Sess> QueryOptions<Sess> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether results may not match the model shape
    pub(crate) fn reshapes(&self) -> bool {
        self.select.is_some() || !self.populate.is_empty()
    }

    /// AND a predicate into the filter
    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filter = self.filter.and(predicate);
        self
    }

    /// Compile `rules` against `params` when the query runs
    pub fn with_rules(mut self, params: QueryParams, rules: RuleSet) -> Self {
        self.rules = Some((params, rules));
        self
    }

    pub fn with_select(mut self, projection: Document) -> Self {
        self.select = Some(projection);
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }

    /// Append a sort key; earlier keys take precedence
    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort
            .get_or_insert_with(Document::new)
            .insert(field.into(), direction.as_i32());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_lean(mut self, lean: bool) -> Self {
        self.lean = lean;
        self
    }

    pub fn with_paginate(mut self, paginate: bool) -> Self {
        self.paginate = paginate;
        self
    }

    pub fn with_page(mut self, page: u64, limit: u64) -> Self {
        self.page = PageRequest::new(page, limit);
        self
    }

    pub fn with_session(mut self, session: Transaction<Sess>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Filter predicate with the compiled rule set ANDed in
    pub fn predicate(&self) -> AppResult<Predicate> {
        match &self.rules {
            Some((params, rules)) => {
                let compiled = FilterCompiler::compile(params, rules)?;
                Ok(self.filter.clone().and(compiled))
            }
            None => Ok(self.filter.clone()),
        }
    }

    /// Cursor shape without a page window
    pub(crate) fn find_spec(&self) -> FindSpec {
        FindSpec {
            projection: self.select.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        }
    }
}

/// Options for write operations.
pub struct MutateOptions<Sess> {
    pub session: Option<Transaction<Sess>>,
    pub lean: bool,
    pub populate: Vec<Populate>,
    /// Raise on zero-match, zero-modify or unacknowledged bulk updates
    pub throw_error: bool,
    /// ANDed into the filter of every operation
    pub additional_filter: Predicate,
    pub context: Option<RequestContext>,
}

impl<Sess> Default for MutateOptions<Sess> {
    fn default() -> Self {
        Self {
            session: None,
            lean: false,
            populate: Vec::new(),
            throw_error: true,
            additional_filter: Predicate::all(),
            context: None,
        }
    }
}

impl<Sess> Clone for MutateOptions<Sess> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            lean: self.lean,
            populate: self.populate.clone(),
            throw_error: self.throw_error,
            additional_filter: self.additional_filter.clone(),
            context: self.context.clone(),
        }
    }
}

impl<Sess> fmt::Debug for MutateOptions<Sess> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutateOptions")
            .field("session", &self.session)
            .field("lean", &self.lean)
            .field("populate", &self.populate)
            .field("throw_error", &self.throw_error)
            .field("additional_filter", &self.additional_filter)
            .field("context", &self.context)
            .finish()
    }
}

impl<Sess> MutateOptions<Sess> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reshapes(&self) -> bool {
        !self.populate.is_empty()
    }

    pub fn with_session(mut self, session: Transaction<Sess>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_lean(mut self, lean: bool) -> Self {
        self.lean = lean;
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate.push(populate);
        self
    }

    pub fn with_throw_error(mut self, throw_error: bool) -> Self {
        self.throw_error = throw_error;
        self
    }

    pub fn with_additional_filter(mut self, predicate: Predicate) -> Self {
        self.additional_filter = self.additional_filter.and(predicate);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// `condition` restricted by the additional filter
    pub(crate) fn restrict(&self, condition: Predicate) -> Predicate {
        condition.and(self.additional_filter.clone())
    }
}
