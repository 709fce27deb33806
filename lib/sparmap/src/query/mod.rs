//! Translation of object queries into SPARQL.
//!
//! A [`QueryModel`] is compiled by a [`SparqlQueryCompiler`] into a [`SparqlQueryContext`].
//! The compiler relies on a [`PropertyHintResolver`] for everything related to the RDF mapping
//! and keeps its per-query state in a [`SparqlQueryBuilder`].

mod builder;
mod hints;
mod model;
mod visitor;

pub use crate::query::builder::{
    FilterExpression, GroupElement, GroupPattern, PatternTerm, SelectItem, SourceBinding,
    SparqlQueryBuilder, TriplePattern,
};
pub use crate::query::hints::{
    EntityMapping, MappingTable, PropertyHint, PropertyHintResolver, PropertyMappingType,
};
pub use crate::query::model::{
    AggregateFunction, BinaryOperator, BodyClause, Expression, ExpressionDisplay, FromSource,
    Method, Ordering, Property, QueryModel, QuerySource, ResultOperator, SelectVariableName,
    SourceId, Value, ValueType, VariableBindingType,
};
pub use crate::query::visitor::{
    Projection, ResultCardinality, SortKey, SparqlQueryCompiler, SparqlQueryContext,
};
