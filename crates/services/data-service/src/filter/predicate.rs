//! Predicate tree and its fluent builder.

use bson::{doc, oid::ObjectId, Bson, Document};

use domain::ID_FIELD;

/// Comparison operators other than equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::In => "$in",
            CompareOp::Nin => "$nin",
        }
    }
}

/// Operators over array-valued fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayOperator {
    All,
    In,
    Nin,
    ElemMatch,
    Size,
}

impl ArrayOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrayOperator::All => "$all",
            ArrayOperator::In => "$in",
            ArrayOperator::Nin => "$nin",
            ArrayOperator::ElemMatch => "$elemMatch",
            ArrayOperator::Size => "$size",
        }
    }

    /// Whether the operator takes a list of values
    pub fn takes_list(&self) -> bool {
        matches!(self, ArrayOperator::All | ArrayOperator::In | ArrayOperator::Nin)
    }
}

/// Filter predicate tree.
///
/// Lowering to a store filter is deterministic: the same tree always
/// produces the same document, with children kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals {
        field: String,
        value: Bson,
    },
    Compare {
        field: String,
        op: CompareOp,
        value: Bson,
    },
    Range {
        field: String,
        start: Option<Bson>,
        end: Option<Bson>,
    },
    Regex {
        field: String,
        pattern: String,
        options: String,
    },
    Exists {
        field: String,
        exists: bool,
    },
    ArrayOp {
        field: String,
        op: ArrayOperator,
        value: Bson,
    },
    /// Store filter passed through untouched
    Raw(Document),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::all()
    }
}

impl Predicate {
    /// The empty conjunction; matches every document
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    /// Identity match
    pub fn id(id: ObjectId) -> Self {
        field(ID_FIELD).eq(id)
    }

    /// Identity is one of `ids`
    pub fn ids(ids: &[ObjectId]) -> Self {
        field(ID_FIELD).is_in(ids.iter().copied().map(Bson::ObjectId).collect::<Vec<_>>())
    }

    /// Whether the predicate imposes no constraint
    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(Predicate::is_empty),
            Predicate::Or(children) => {
                children.is_empty() || children.iter().any(Predicate::is_empty)
            }
            Predicate::Raw(doc) => doc.is_empty(),
            Predicate::Range { start, end, .. } => start.is_none() && end.is_none(),
            _ => false,
        }
    }

    /// Conjunction with another predicate; nested conjunctions are flattened
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (a, b) if b.is_empty() => a,
            (a, b) if a.is_empty() => b,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), b) => {
                left.push(b);
                Predicate::And(left)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Disjunction with another predicate; nested disjunctions are flattened
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), b) => {
                left.push(b);
                Predicate::Or(left)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    /// Lower to a store filter document
    pub fn to_document(&self) -> Document {
        match self {
            Predicate::Equals { field, value } => doc! { field.as_str(): value.clone() },
            Predicate::Compare { field, op, value } => {
                doc! { field.as_str(): { op.as_str(): value.clone() } }
            }
            Predicate::Range { field, start, end } => {
                let mut bounds = Document::new();
                if let Some(start) = start {
                    bounds.insert("$gte", start.clone());
                }
                if let Some(end) = end {
                    bounds.insert("$lte", end.clone());
                }
                if bounds.is_empty() {
                    Document::new()
                } else {
                    doc! { field.as_str(): bounds }
                }
            }
            Predicate::Regex {
                field,
                pattern,
                options,
            } => {
                let mut condition = doc! { "$regex": pattern.as_str() };
                if !options.is_empty() {
                    condition.insert("$options", options.as_str());
                }
                doc! { field.as_str(): condition }
            }
            Predicate::Exists { field, exists } => doc! { field.as_str(): { "$exists": *exists } },
            Predicate::ArrayOp { field, op, value } => {
                doc! { field.as_str(): { op.as_str(): value.clone() } }
            }
            Predicate::Raw(doc) => doc.clone(),
            Predicate::And(children) => combine("$and", children),
            Predicate::Or(children) => combine("$or", children),
        }
    }
}

/// Lower a group; a single child stands alone.
///
/// An empty child matches everything: it is dropped from `$and` and makes the
/// whole `$or` match everything.
fn combine(op: &str, children: &[Predicate]) -> Document {
    let mut lowered = Vec::with_capacity(children.len());
    for child in children {
        let doc = child.to_document();
        if !doc.is_empty() {
            lowered.push(doc);
        } else if op == "$or" {
            return Document::new();
        }
    }

    match lowered.len() {
        0 => Document::new(),
        1 => lowered.remove(0),
        _ => {
            let clauses: Vec<Bson> = lowered.into_iter().map(Bson::Document).collect();
            doc! { op: clauses }
        }
    }
}

impl From<Document> for Predicate {
    fn from(doc: Document) -> Self {
        Predicate::Raw(doc)
    }
}

/// Start a predicate on one field.
///
/// ```ignore
/// let published = field("status").eq("published").and(field("views").gte(100));
/// ```
pub fn field(name: impl Into<String>) -> FieldPredicate {
    FieldPredicate { field: name.into() }
}

/// Builder for predicates on a single field
#[derive(Debug, Clone)]
pub struct FieldPredicate {
    field: String,
}

impl FieldPredicate {
    pub fn eq(self, value: impl Into<Bson>) -> Predicate {
        Predicate::Equals {
            field: self.field,
            value: value.into(),
        }
    }

    pub fn compare(self, op: CompareOp, value: impl Into<Bson>) -> Predicate {
        Predicate::Compare {
            field: self.field,
            op,
            value: value.into(),
        }
    }

    pub fn ne(self, value: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn gte(self, value: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Gte, value)
    }

    pub fn lt(self, value: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn lte(self, value: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Lte, value)
    }

    pub fn is_in(self, values: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::In, values)
    }

    pub fn not_in(self, values: impl Into<Bson>) -> Predicate {
        self.compare(CompareOp::Nin, values)
    }

    /// Inclusive range; either bound may be open
    pub fn between(self, start: Option<Bson>, end: Option<Bson>) -> Predicate {
        Predicate::Range {
            field: self.field,
            start,
            end,
        }
    }

    pub fn regex(self, pattern: impl Into<String>, options: impl Into<String>) -> Predicate {
        Predicate::Regex {
            field: self.field,
            pattern: pattern.into(),
            options: options.into(),
        }
    }

    pub fn exists(self, exists: bool) -> Predicate {
        Predicate::Exists {
            field: self.field,
            exists,
        }
    }

    pub fn array(self, op: ArrayOperator, value: impl Into<Bson>) -> Predicate {
        Predicate::ArrayOp {
            field: self.field,
            op,
            value: value.into(),
        }
    }

    pub fn contains_all(self, values: impl Into<Bson>) -> Predicate {
        self.array(ArrayOperator::All, values)
    }

    pub fn elem_match(self, condition: Document) -> Predicate {
        self.array(ArrayOperator::ElemMatch, condition)
    }

    pub fn size(self, len: i64) -> Predicate {
        self.array(ArrayOperator::Size, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_lowers_to_empty_filter() {
        assert_eq!(Predicate::all().to_document(), Document::new());
        assert!(Predicate::all().is_empty());
    }

    #[test]
    fn test_match_all_branch_widens_or() {
        let either = Predicate::all().or(field("a").eq(1));
        assert_eq!(either.to_document(), Document::new());
        assert!(either.is_empty());

        let narrowed = field("b").eq(2).and(either);
        assert_eq!(narrowed.to_document(), doc! { "b": 2 });

        let both = Predicate::And(vec![Predicate::all(), field("a").eq(1)]);
        assert_eq!(both.to_document(), doc! { "a": 1 });
    }

    #[test]
    fn test_single_child_stands_alone() {
        let p = Predicate::And(vec![field("status").eq("live")]);
        assert_eq!(p.to_document(), doc! { "status": "live" });
    }

    #[test]
    fn test_and_flattens() {
        let p = field("a").eq(1).and(field("b").gt(2)).and(field("c").exists(true));
        assert_eq!(
            p.to_document(),
            doc! { "$and": [ { "a": 1 }, { "b": { "$gt": 2 } }, { "c": { "$exists": true } } ] }
        );
    }

    #[test]
    fn test_and_with_empty_is_identity() {
        let p = Predicate::all().and(field("a").eq(1));
        assert_eq!(p, field("a").eq(1));
    }

    #[test]
    fn test_or_lowering() {
        let p = field("a").eq(1).or(field("b").eq(2));
        assert_eq!(p.to_document(), doc! { "$or": [ { "a": 1 }, { "b": 2 } ] });
    }

    #[test]
    fn test_range_with_open_bound() {
        let p = field("price").between(Some(Bson::Int32(5)), None);
        assert_eq!(p.to_document(), doc! { "price": { "$gte": 5 } });
    }

    #[test]
    fn test_regex_options_omitted_when_empty() {
        let p = field("title").regex("^rust", "");
        assert_eq!(p.to_document(), doc! { "title": { "$regex": "^rust" } });
    }

    #[test]
    fn test_array_operators() {
        assert_eq!(field("tags").size(2).to_document(), doc! { "tags": { "$size": 2_i64 } });
        assert_eq!(
            field("tags").contains_all(vec!["a", "b"]).to_document(),
            doc! { "tags": { "$all": ["a", "b"] } }
        );
    }

    #[test]
    fn test_ids() {
        let id = ObjectId::new();
        assert_eq!(Predicate::ids(&[id]).to_document(), doc! { "_id": { "$in": [id] } });
    }
}
