//! Collaborators that evaluate the parsed SPARQL.

use crate::error::ProcessorError;
use oxigraph::sparql::{QueryResults, QuerySolution, SparqlEvaluator, Variable};
use oxigraph::store::Store;
use spargebra::{Query, Update};

/// Executes SPARQL updates.
///
/// All the operations of an update must be applied atomically, or none of them.
pub trait UpdateProcessor: Send + Sync {
    fn process_update(&self, update: &Update) -> Result<(), ProcessorError>;
}

/// Evaluates SPARQL queries.
pub trait QueryProcessor: Send + Sync {
    fn process_query(&self, query: &Query) -> Result<QueryOutcome, ProcessorError>;
}

/// The materialized result of a query evaluation.
#[derive(Debug, PartialEq)]
pub enum QueryOutcome {
    /// Results of a `SELECT` query, in evaluation order.
    Solutions {
        variables: Vec<Variable>,
        solutions: Vec<QuerySolution>,
    },
    /// Result of an `ASK` query.
    Boolean(bool),
}

/// Query and update processor backed by an [oxigraph](oxigraph) [`Store`].
///
/// ```
/// use sparmap::processor::{OxigraphProcessor, QueryOutcome, QueryProcessor, UpdateProcessor};
/// use spargebra::SparqlParser;
///
/// let processor = OxigraphProcessor::new()?;
/// processor.process_update(
///     &SparqlParser::new().parse_update("INSERT DATA { <http://example.com/s> <http://example.com/p> 1 }")?,
/// )?;
/// let outcome = processor.process_query(&SparqlParser::new().parse_query("ASK { ?s ?p 1 }")?)?;
/// assert_eq!(outcome, QueryOutcome::Boolean(true));
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone)]
pub struct OxigraphProcessor {
    store: Store,
}

impl OxigraphProcessor {
    /// Creates a processor over a new in-memory store.
    pub fn new() -> Result<Self, ProcessorError> {
        Ok(Self::from_store(
            Store::new().map_err(ProcessorError::evaluation)?,
        ))
    }

    pub fn from_store(store: Store) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl UpdateProcessor for OxigraphProcessor {
    fn process_update(&self, update: &Update) -> Result<(), ProcessorError> {
        SparqlEvaluator::new()
            .for_update(update.clone())
            .on_store(&self.store)
            .execute()
            .map_err(ProcessorError::evaluation)
    }
}

impl QueryProcessor for OxigraphProcessor {
    fn process_query(&self, query: &Query) -> Result<QueryOutcome, ProcessorError> {
        let results = SparqlEvaluator::new()
            .for_query(query.clone())
            .on_store(&self.store)
            .execute()
            .map_err(ProcessorError::evaluation)?;
        match results {
            QueryResults::Solutions(solutions) => {
                let variables = solutions.variables().to_vec();
                let solutions = solutions
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(ProcessorError::evaluation)?;
                Ok(QueryOutcome::Solutions {
                    variables,
                    solutions,
                })
            }
            QueryResults::Boolean(value) => Ok(QueryOutcome::Boolean(value)),
            QueryResults::Graph(_) => Err(ProcessorError::evaluation(
                "CONSTRUCT and DESCRIBE queries are not supported",
            )),
        }
    }
}
