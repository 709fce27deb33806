//! Triple-level description of a store update.
//!
//! The entity layer diffs the state of its objects into [`Triple`]s and hands them over in a
//! [`Transaction`]. A triple used as a delete pattern may leave any of its positions open with
//! [`Position::Wildcard`].

use std::fmt;

/// IRI written in place of a wildcard that ends up in a position where SPARQL requires a
/// concrete term (a wildcard subject inside `DELETE DATA`).
pub const WILDCARD_IRI: &str = "http://www.brightstardb.com/.well-known/model/wildcard";

/// A subject, predicate or object slot of a [`Triple`].
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Position {
    /// An IRI, or the lexical value of a literal when used as a literal object.
    Concrete(String),
    /// Matches any value.
    Wildcard,
}

impl Position {
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    #[inline]
    pub fn as_concrete(&self) -> Option<&str> {
        match self {
            Self::Concrete(value) => Some(value),
            Self::Wildcard => None,
        }
    }
}

impl From<&str> for Position {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Concrete(value.into())
    }
}

impl From<String> for Position {
    #[inline]
    fn from(value: String) -> Self {
        Self::Concrete(value)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(value) => f.write_str(value),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

/// The graph a [`Triple`] lives in.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum GraphSelector {
    /// The default graph, or the configured update graph.
    #[default]
    Default,
    /// A specific named graph.
    Named(String),
    /// Any graph of the store.
    Any,
}

impl GraphSelector {
    /// Returns the graph IRI if the selector targets one specific named graph.
    #[inline]
    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(iri) => Some(iri),
            Self::Default | Self::Any => None,
        }
    }
}

/// A candidate RDF statement.
///
/// ```
/// use sparmap::model::{GraphSelector, Position, Triple};
///
/// let triple = Triple::literal("http://example.com/alice", "http://xmlns.com/foaf/0.1/name", "Alice")
///     .with_lang_code("en")
///     .in_graph("http://example.com/people");
/// assert!(triple.is_literal);
/// assert_eq!(triple.object, Position::from("Alice"));
/// assert_eq!(triple.graph, GraphSelector::Named("http://example.com/people".into()));
/// ```
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Triple {
    pub subject: Position,
    pub predicate: Position,
    pub object: Position,
    /// If the object is a literal lexical value instead of an IRI.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_literal: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_type: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lang_code: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub graph: GraphSelector,
}

impl Triple {
    /// Builds a triple whose object is a resource.
    pub fn new(
        subject: impl Into<Position>,
        predicate: impl Into<Position>,
        object: impl Into<Position>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            is_literal: false,
            data_type: None,
            lang_code: None,
            graph: GraphSelector::Default,
        }
    }

    /// Builds a triple whose object is a literal with the given lexical value.
    pub fn literal(
        subject: impl Into<Position>,
        predicate: impl Into<Position>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            is_literal: true,
            ..Self::new(subject, predicate, Position::Concrete(value.into()))
        }
    }

    #[must_use]
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    #[must_use]
    pub fn with_lang_code(mut self, lang_code: impl Into<String>) -> Self {
        self.lang_code = Some(lang_code.into());
        self
    }

    #[must_use]
    pub fn in_graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = GraphSelector::Named(graph.into());
        self
    }

    #[must_use]
    pub fn in_any_graph(mut self) -> Self {
        self.graph = GraphSelector::Any;
        self
    }

    /// The triple targets a specific named graph.
    #[inline]
    pub fn is_graph_targeted(&self) -> bool {
        self.graph.as_named().is_some()
    }

    /// The predicate and the object are both concrete.
    ///
    /// The subject is deliberately not inspected.
    #[inline]
    pub fn is_grounded(&self) -> bool {
        !self.predicate.is_wildcard() && !self.object.is_wildcard()
    }

    /// Any of the three positions is a wildcard.
    #[inline]
    pub fn has_wildcard(&self) -> bool {
        self.subject.is_wildcard() || self.predicate.is_wildcard() || self.object.is_wildcard()
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} ", self.subject, self.predicate)?;
        if self.is_literal {
            write!(f, "{:?}", self.object.to_string())?;
        } else {
            write!(f, "{}", self.object)?;
        }
        match &self.graph {
            GraphSelector::Default => f.write_str(")"),
            GraphSelector::Named(graph) => write!(f, " in {graph})"),
            GraphSelector::Any => f.write_str(" in *)"),
        }
    }
}

/// One atomic update request.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Transaction {
    /// Triples that must exist for the update to apply.
    pub existence_preconditions: Vec<Triple>,
    /// Triples that must not exist for the update to apply.
    pub nonexistence_preconditions: Vec<Triple>,
    pub delete_patterns: Vec<Triple>,
    pub inserts: Vec<Triple>,
    /// Named graph that receives inserts without an explicit graph.
    pub update_graph: Option<String>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_existence_precondition(mut self, triple: Triple) -> Self {
        self.existence_preconditions.push(triple);
        self
    }

    #[must_use]
    pub fn with_nonexistence_precondition(mut self, triple: Triple) -> Self {
        self.nonexistence_preconditions.push(triple);
        self
    }

    #[must_use]
    pub fn with_delete_pattern(mut self, triple: Triple) -> Self {
        self.delete_patterns.push(triple);
        self
    }

    #[must_use]
    pub fn with_insert(mut self, triple: Triple) -> Self {
        self.inserts.push(triple);
        self
    }

    #[must_use]
    pub fn with_update_graph(mut self, graph: impl Into<String>) -> Self {
        self.update_graph = Some(graph.into());
        self
    }

    /// Nothing to delete nor to insert.
    pub fn is_empty(&self) -> bool {
        self.delete_patterns.is_empty() && self.inserts.is_empty()
    }
}
