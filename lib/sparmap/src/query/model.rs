//! Closed intermediate representation of an object query.
//!
//! A [`QueryModel`] is a query operator chain that has already been normalized: a main
//! source, body clauses (filters, orderings, joins, additional sources), a select expression
//! and the result operators applied on top of it.

use std::fmt;

/// Identity of a [`QuerySource`] inside its [`QueryModel`].
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SourceId(usize);

impl SourceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A range variable of the query (the `p` of `from p in context.Persons`).
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuerySource {
    pub item_name: String,
    pub from: FromSource,
}

/// What a [`QuerySource`] iterates over.
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FromSource {
    /// All the entities of a type.
    Entities { entity_type: String },
    /// The values of a collection valued expression, usually a member of another source.
    Collection(Expression),
}

impl FromSource {
    pub fn entities(entity_type: impl Into<String>) -> Self {
        Self::Entities {
            entity_type: entity_type.into(),
        }
    }
}

/// Static type of a value of the object model.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ValueType {
    String,
    Integer,
    Decimal,
    Double,
    Boolean,
    DateTime,
    /// A reference to an entity of the given type.
    Entity(String),
    Collection(Box<ValueType>),
}

impl ValueType {
    #[inline]
    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Entity(_))
    }

    /// The element type if this is a collection.
    #[inline]
    pub fn element_type(&self) -> Option<&ValueType> {
        match self {
            Self::Collection(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Property metadata, the key used to look up a [`PropertyHint`](super::PropertyHint).
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Property {
    pub declaring_type: String,
    pub name: String,
    pub value_type: ValueType,
}

impl Property {
    pub fn new(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            value_type,
        }
    }
}

/// A constant of the object model.
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    /// Lexical form of an `xsd:decimal`.
    Decimal(String),
    Double(f64),
    String(String),
    /// Lexical form of an `xsd:dateTime`.
    DateTime(String),
    List(Vec<Value>),
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    #[inline]
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Decimal(value) | Self::DateTime(value) => f.write_str(value),
            Self::Double(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
            Self::List(values) => {
                f.write_str("{")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    value.fmt(f)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// How a SPARQL variable is bound.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VariableBindingType {
    Resource,
    Literal,
}

/// A SPARQL variable standing for a query source or a member value.
///
/// The name is stored without the leading `?`.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectVariableName {
    pub name: String,
    pub binding_type: VariableBindingType,
    pub item_type: ValueType,
}

impl SelectVariableName {
    pub fn new(
        name: impl Into<String>,
        binding_type: VariableBindingType,
        item_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            binding_type,
            item_type,
        }
    }
}

impl fmt::Display for SelectVariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.name)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOperator {
    /// The operator compares its two operands.
    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessOrEqual
                | Self::Greater
                | Self::GreaterOrEqual
        )
    }

    /// The same comparison with swapped operands: `a < b` is `b > a`.
    pub fn flip(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::LessOrEqual => Self::GreaterOrEqual,
            Self::Greater => Self::Less,
            Self::GreaterOrEqual => Self::LessOrEqual,
            other => other,
        }
    }

    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// A method call supported inside an expression.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Method {
    StartsWith {
        ignore_case: bool,
    },
    EndsWith {
        ignore_case: bool,
    },
    /// Substring test on strings, membership test on collections and constant lists.
    Contains {
        ignore_case: bool,
    },
    Equals {
        ignore_case: bool,
    },
    ToLower,
    ToUpper,
    Length,
    /// `Regex.IsMatch(target, pattern[, flags])`.
    RegexIsMatch,
}

impl Method {
    fn name(self) -> &'static str {
        match self {
            Self::StartsWith { .. } => "StartsWith",
            Self::EndsWith { .. } => "EndsWith",
            Self::Contains { .. } => "Contains",
            Self::Equals { .. } => "Equals",
            Self::ToLower => "ToLower",
            Self::ToUpper => "ToUpper",
            Self::Length => "Length",
            Self::RegexIsMatch => "IsMatch",
        }
    }

    fn ignores_case(self) -> bool {
        matches!(
            self,
            Self::StartsWith { ignore_case: true }
                | Self::EndsWith { ignore_case: true }
                | Self::Contains { ignore_case: true }
                | Self::Equals { ignore_case: true }
        )
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AggregateFunction {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl AggregateFunction {
    pub(crate) fn sparql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Average => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "Count",
            Self::Sum => "Sum",
            Self::Average => "Average",
            Self::Min => "Min",
            Self::Max => "Max",
        })
    }
}

/// A node of an object query expression.
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Expression {
    /// Reference to a range variable.
    QuerySource(SourceId),
    /// Property access: `target.property`.
    Member {
        target: Box<Expression>,
        property: Property,
    },
    Constant(Value),
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    Call {
        method: Method,
        target: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// `source.Any(predicate)` where `source` iterates a collection.
    Any {
        source: SourceId,
        predicate: Option<Box<Expression>>,
    },
    /// `source.All(predicate)` where `source` iterates a collection.
    All {
        source: SourceId,
        predicate: Box<Expression>,
    },
    /// An already resolved SPARQL variable.
    SelectVariable(SelectVariableName),
    /// Anonymous type construction: `new { Name = p.Name, ... }`.
    New(Vec<(String, Expression)>),
    /// The key of the current group inside a grouped projection.
    GroupKey,
    /// An aggregate over the elements of the current group.
    Aggregate {
        function: AggregateFunction,
        argument: Option<Box<Expression>>,
    },
}

impl Expression {
    #[inline]
    pub fn source(source: SourceId) -> Self {
        Self::QuerySource(source)
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    #[must_use]
    pub fn member(self, property: Property) -> Self {
        Self::Member {
            target: Box::new(self),
            property,
        }
    }

    pub fn binary(operator: BinaryOperator, left: Self, right: Self) -> Self {
        Self::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn eq(self, other: Self) -> Self {
        Self::binary(BinaryOperator::Equal, self, other)
    }

    #[must_use]
    pub fn ne(self, other: Self) -> Self {
        Self::binary(BinaryOperator::NotEqual, self, other)
    }

    #[must_use]
    pub fn lt(self, other: Self) -> Self {
        Self::binary(BinaryOperator::Less, self, other)
    }

    #[must_use]
    pub fn le(self, other: Self) -> Self {
        Self::binary(BinaryOperator::LessOrEqual, self, other)
    }

    #[must_use]
    pub fn gt(self, other: Self) -> Self {
        Self::binary(BinaryOperator::Greater, self, other)
    }

    #[must_use]
    pub fn ge(self, other: Self) -> Self {
        Self::binary(BinaryOperator::GreaterOrEqual, self, other)
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::binary(BinaryOperator::And, self, other)
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::binary(BinaryOperator::Or, self, other)
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    #[must_use]
    pub fn call(self, method: Method, arguments: Vec<Self>) -> Self {
        Self::Call {
            method,
            target: Box::new(self),
            arguments,
        }
    }

    pub fn aggregate(function: AggregateFunction, argument: Option<Self>) -> Self {
        Self::Aggregate {
            function,
            argument: argument.map(Box::new),
        }
    }

    /// Splits a chain of `&&` into its conjuncts.
    pub(crate) fn conjuncts(&self) -> Vec<&Self> {
        let mut output = Vec::new();
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            if let Self::Binary {
                operator: BinaryOperator::And,
                left,
                right,
            } = expression
            {
                stack.push(right);
                stack.push(left);
            } else {
                output.push(expression);
            }
        }
        output
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ExpressionDisplay {
            expression: self,
            sources: &[],
        }
        .fmt(f)
    }
}

/// Formats an expression with the item names of its query sources.
pub struct ExpressionDisplay<'a> {
    expression: &'a Expression,
    sources: &'a [QuerySource],
}

impl<'a> ExpressionDisplay<'a> {
    fn nested(&self, expression: &'a Expression) -> Self {
        Self {
            expression,
            sources: self.sources,
        }
    }

    fn fmt_source(&self, source: SourceId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sources.get(source.0) {
            Some(source) => write!(f, "[{}]", source.item_name),
            None => write!(f, "[source{}]", source.0),
        }
    }
}

impl fmt::Display for ExpressionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expression {
            Expression::QuerySource(source) => self.fmt_source(*source, f),
            Expression::Member { target, property } => {
                write!(f, "{}.{}", self.nested(target), property.name)
            }
            Expression::Constant(value) => value.fmt(f),
            Expression::Binary {
                operator,
                left,
                right,
            } => {
                let (left, right) = (self.nested(left), self.nested(right));
                if matches!(operator, BinaryOperator::And | BinaryOperator::Or) {
                    write!(f, "({left} {} {right})", operator.symbol())
                } else {
                    let symbol = match operator {
                        BinaryOperator::Equal => "==",
                        operator => operator.symbol(),
                    };
                    write!(f, "{left} {symbol} {right}")
                }
            }
            Expression::Not(inner) => write!(f, "Not({})", self.nested(inner)),
            Expression::Call {
                method,
                target,
                arguments,
            } => {
                write!(f, "{}.{}(", self.nested(target), method.name())?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.nested(argument).fmt(f)?;
                }
                if method.ignores_case() {
                    if !arguments.is_empty() {
                        f.write_str(", ")?;
                    }
                    f.write_str("IgnoreCase")?;
                }
                f.write_str(")")
            }
            Expression::Any { source, predicate } => {
                self.fmt_source(*source, f)?;
                match predicate {
                    Some(predicate) => write!(f, ".Any({})", self.nested(predicate)),
                    None => f.write_str(".Any()"),
                }
            }
            Expression::All { source, predicate } => {
                self.fmt_source(*source, f)?;
                write!(f, ".All({})", self.nested(predicate))
            }
            Expression::SelectVariable(variable) => variable.fmt(f),
            Expression::New(members) => {
                f.write_str("new {")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {name} = {}", self.nested(value))?;
                }
                f.write_str(" }")
            }
            Expression::GroupKey => f.write_str("[group].Key"),
            Expression::Aggregate { function, argument } => match argument {
                Some(argument) => write!(f, "[group].{function}({})", self.nested(argument)),
                None => write!(f, "[group].{function}()"),
            },
        }
    }
}

/// An `ORDER BY` key.
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ordering {
    pub expression: Expression,
    #[cfg_attr(feature = "serde", serde(default))]
    pub descending: bool,
}

#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BodyClause {
    Where(Expression),
    /// `OrderBy` followed by its `ThenBy` keys.
    OrderBy(Vec<Ordering>),
    /// `join source in ... on outer_key equals inner_key`.
    Join {
        source: SourceId,
        outer_key: Expression,
        inner_key: Expression,
    },
    /// A second `from` clause (`SelectMany`).
    AdditionalFrom(SourceId),
}

#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResultOperator {
    Skip(usize),
    Take(usize),
    Distinct,
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Any,
    /// `All(predicate)`, the predicate refers to the main source.
    All(Expression),
    /// Groups the results by the key, the select expression then describes each group.
    GroupBy {
        key: Expression,
    },
}

impl fmt::Display for ResultOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(count) => write!(f, "Skip({count})"),
            Self::Take(count) => write!(f, "Take({count})"),
            Self::Distinct => f.write_str("Distinct()"),
            Self::Count => f.write_str("Count()"),
            Self::LongCount => f.write_str("LongCount()"),
            Self::Sum => f.write_str("Sum()"),
            Self::Average => f.write_str("Average()"),
            Self::Min => f.write_str("Min()"),
            Self::Max => f.write_str("Max()"),
            Self::First => f.write_str("First()"),
            Self::FirstOrDefault => f.write_str("FirstOrDefault()"),
            Self::Single => f.write_str("Single()"),
            Self::SingleOrDefault => f.write_str("SingleOrDefault()"),
            Self::Any => f.write_str("Any()"),
            Self::All(predicate) => write!(f, "All({predicate})"),
            Self::GroupBy { key } => write!(f, "GroupBy({key})"),
        }
    }
}

/// A normalized object query.
///
/// ```
/// use sparmap::query::{Expression, Property, QueryModel, ValueType};
///
/// // context.Persons.Where(p => p.Age > 30).OrderBy(p => p.Name)
/// let mut query = QueryModel::new("p", "Person");
/// let p = query.main_source();
/// let age = Property::new("Person", "Age", ValueType::Integer);
/// let name = Property::new("Person", "Name", ValueType::String);
/// query
///     .filter(Expression::source(p).member(age).gt(Expression::constant(30)))
///     .order_by(Expression::source(p).member(name));
/// assert_eq!(query.body.len(), 2);
/// ```
#[derive(PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryModel {
    pub sources: Vec<QuerySource>,
    pub main_source: SourceId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub body: Vec<BodyClause>,
    pub select: Expression,
    #[cfg_attr(feature = "serde", serde(default))]
    pub result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    /// A query over all the entities of `entity_type` selecting the entities themselves.
    pub fn new(item_name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let main_source = SourceId(0);
        Self {
            sources: vec![QuerySource {
                item_name: item_name.into(),
                from: FromSource::entities(entity_type),
            }],
            main_source,
            body: Vec::new(),
            select: Expression::QuerySource(main_source),
            result_operators: Vec::new(),
        }
    }

    #[inline]
    pub fn main_source(&self) -> SourceId {
        self.main_source
    }

    pub fn source(&self, id: SourceId) -> Option<&QuerySource> {
        self.sources.get(id.0)
    }

    /// Formats an expression of this query using the item names of its sources.
    pub fn display<'a>(&'a self, expression: &'a Expression) -> ExpressionDisplay<'a> {
        ExpressionDisplay {
            expression,
            sources: &self.sources,
        }
    }

    /// Registers a new range variable and returns its identity.
    pub fn add_source(&mut self, item_name: impl Into<String>, from: FromSource) -> SourceId {
        self.sources.push(QuerySource {
            item_name: item_name.into(),
            from,
        });
        SourceId(self.sources.len() - 1)
    }

    pub fn filter(&mut self, predicate: Expression) -> &mut Self {
        self.body.push(BodyClause::Where(predicate));
        self
    }

    pub fn order_by(&mut self, key: Expression) -> &mut Self {
        self.push_ordering(key, false, true)
    }

    pub fn order_by_descending(&mut self, key: Expression) -> &mut Self {
        self.push_ordering(key, true, true)
    }

    pub fn then_by(&mut self, key: Expression) -> &mut Self {
        self.push_ordering(key, false, false)
    }

    pub fn then_by_descending(&mut self, key: Expression) -> &mut Self {
        self.push_ordering(key, true, false)
    }

    fn push_ordering(
        &mut self,
        expression: Expression,
        descending: bool,
        new_clause: bool,
    ) -> &mut Self {
        let ordering = Ordering {
            expression,
            descending,
        };
        match self.body.last_mut() {
            Some(BodyClause::OrderBy(orderings)) if !new_clause => orderings.push(ordering),
            _ => self.body.push(BodyClause::OrderBy(vec![ordering])),
        }
        self
    }

    pub fn join(
        &mut self,
        source: SourceId,
        outer_key: Expression,
        inner_key: Expression,
    ) -> &mut Self {
        self.body.push(BodyClause::Join {
            source,
            outer_key,
            inner_key,
        });
        self
    }

    pub fn additional_from(&mut self, source: SourceId) -> &mut Self {
        self.body.push(BodyClause::AdditionalFrom(source));
        self
    }

    pub fn select(&mut self, select: Expression) -> &mut Self {
        self.select = select;
        self
    }

    pub fn result_operator(&mut self, operator: ResultOperator) -> &mut Self {
        self.result_operators.push(operator);
        self
    }

    pub fn skip(&mut self, count: usize) -> &mut Self {
        self.result_operator(ResultOperator::Skip(count))
    }

    pub fn take(&mut self, count: usize) -> &mut Self {
        self.result_operator(ResultOperator::Take(count))
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.result_operator(ResultOperator::Distinct)
    }
}
