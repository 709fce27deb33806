use crate::model::Triple;
use spargebra::SparqlSyntaxError;
use std::error::Error;

/// An error raised while applying a transaction or executing a compiled query.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The operation can't be expressed against this kind of store.
    #[error("{0}")]
    UnsupportedOperation(String),
    /// A triple to insert is not fully specified.
    #[error("Unable to insert {triple}: {reason}")]
    InvalidInsert { triple: Box<Triple>, reason: &'static str },
    /// Internally generated SPARQL is not valid.
    #[error(transparent)]
    QueryCompilation(#[from] QueryCompilationError),
    /// The object query can't be turned into SPARQL.
    #[error(transparent)]
    UnsupportedExpression(#[from] UnsupportedExpressionError),
    /// The store rejected the transaction because its preconditions do not hold.
    #[error(transparent)]
    PreconditionsFailed(#[from] TransactionPreconditionsFailed),
    /// A dataset graph is not a valid IRI.
    #[error("{iri} is not a valid graph IRI")]
    InvalidGraphIri {
        iri: String,
        #[source]
        source: oxigraph::model::IriParseError,
    },
    /// The query or update processor failed.
    #[error(transparent)]
    Processor(Box<dyn Error + Send + Sync>),
    /// A `First` or `Single` query returned a number of rows it does not allow.
    #[error("Expected {expected} but the query returned {actual} results")]
    UnexpectedResultCount { expected: &'static str, actual: usize },
}

impl From<ProcessorError> for StoreError {
    #[inline]
    fn from(error: ProcessorError) -> Self {
        match error {
            ProcessorError::PreconditionsFailed(error) => Self::PreconditionsFailed(error),
            ProcessorError::Evaluation(error) => Self::Processor(error),
        }
    }
}

/// The SPARQL text produced by the compiler failed to parse.
///
/// This always denotes a bug of the compiler or malformed input values.
#[derive(Debug, thiserror::Error)]
#[error("Generated SPARQL is not valid: {source}")]
pub struct QueryCompilationError {
    sparql: String,
    #[source]
    source: SparqlSyntaxError,
}

impl QueryCompilationError {
    pub(crate) fn new(sparql: impl Into<String>, source: SparqlSyntaxError) -> Self {
        Self {
            sparql: sparql.into(),
            source,
        }
    }

    /// The text that failed to parse.
    #[inline]
    pub fn sparql(&self) -> &str {
        &self.sparql
    }
}

/// An object query contains an expression the compiler does not know how to translate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("The expression '{expression}' is not supported: {reason}")]
pub struct UnsupportedExpressionError {
    expression: String,
    reason: String,
}

impl UnsupportedExpressionError {
    pub(crate) fn new(expression: impl ToString, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// The formatted offending expression.
    #[inline]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Optimistic locking conflict reported by the store.
///
/// It is propagated unchanged so that the caller can decide to retry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Transaction preconditions were not met: {message}")]
pub struct TransactionPreconditionsFailed {
    message: String,
}

impl TransactionPreconditionsFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error returned by a [`QueryProcessor`](crate::processor::QueryProcessor) or an [`UpdateProcessor`](crate::processor::UpdateProcessor).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProcessorError {
    #[error(transparent)]
    PreconditionsFailed(#[from] TransactionPreconditionsFailed),
    #[error(transparent)]
    Evaluation(Box<dyn Error + Send + Sync>),
}

impl ProcessorError {
    pub fn evaluation(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Evaluation(error.into())
    }
}
