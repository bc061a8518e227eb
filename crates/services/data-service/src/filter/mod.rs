//! Filter predicates and the declarative rule compiler.

mod compiler;
mod predicate;
mod rules;

pub use compiler::{compile_to_document, FilterCompiler};
pub use predicate::{field, ArrayOperator, CompareOp, FieldPredicate, Predicate};
pub use rules::{
    ArrayBy, ExistsBy, FilterBy, FilterOperator, FilterRule, Logic, MatchMode, QueryParams,
    RangeBy, RuleSet, SearchBy, SearchOptions, Transform,
};
