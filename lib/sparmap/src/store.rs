//! A store whose reads and writes are expressed in SPARQL.

use crate::error::{QueryCompilationError, StoreError};
use crate::model::Transaction;
use crate::processor::{OxigraphProcessor, QueryOutcome, QueryProcessor, UpdateProcessor};
use crate::query::{ResultCardinality, SparqlQueryContext};
use crate::update::compile_transaction;
use oxigraph::model::{NamedNode, Term};
use oxigraph::sparql::{QuerySolution, Variable};
use spargebra::algebra::QueryDataset;
use spargebra::{Query, SparqlParser};
use tracing::{debug, error};

/// Applies transactions and runs compiled object queries through SPARQL processors.
///
/// ```
/// use sparmap::model::{Transaction, Triple};
/// use sparmap::SparqlUpdatableStore;
///
/// let store = SparqlUpdatableStore::in_memory()?;
/// store.apply_transaction(&Transaction::new().with_insert(Triple::new(
///     "http://example.com/s",
///     "http://example.com/p",
///     "http://example.com/o",
/// )))?;
/// assert_eq!(store.query_processor().store().len()?, 1);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub struct SparqlUpdatableStore<Q: QueryProcessor, U: UpdateProcessor> {
    query_processor: Q,
    update_processor: U,
}

impl SparqlUpdatableStore<OxigraphProcessor, OxigraphProcessor> {
    /// A store backed by a new in-memory oxigraph store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let processor = OxigraphProcessor::new()?;
        Ok(Self::new(processor.clone(), processor))
    }
}

impl<Q: QueryProcessor, U: UpdateProcessor> SparqlUpdatableStore<Q, U> {
    pub fn new(query_processor: Q, update_processor: U) -> Self {
        Self {
            query_processor,
            update_processor,
        }
    }

    #[inline]
    pub fn query_processor(&self) -> &Q {
        &self.query_processor
    }

    #[inline]
    pub fn update_processor(&self) -> &U {
        &self.update_processor
    }

    /// Compiles the transaction into one SPARQL update and submits it.
    pub fn apply_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let sparql = compile_transaction(transaction)?;
        debug!(%sparql, "applying transaction");
        let update = SparqlParser::new().parse_update(&sparql).map_err(|e| {
            error!(%sparql, error = %e, "generated SPARQL update is not valid");
            QueryCompilationError::new(sparql.clone(), e)
        })?;
        Ok(self.update_processor.process_update(&update)?)
    }

    /// Parses and evaluates a compiled query.
    ///
    /// The dataset graphs are used as default and named graphs if the query does not set its own dataset.
    pub fn execute_query(
        &self,
        context: &SparqlQueryContext,
        dataset_graph_uris: &[String],
    ) -> Result<SparqlResult, StoreError> {
        let sparql = &context.sparql_query;
        let mut query = SparqlParser::new().parse_query(sparql).map_err(|e| {
            error!(%sparql, error = %e, "generated SPARQL query is not valid");
            QueryCompilationError::new(sparql.clone(), e)
        })?;
        if !dataset_graph_uris.is_empty() {
            set_default_dataset(&mut query, dataset_graph_uris)?;
        }
        debug!(%sparql, "executing query");
        let outcome = self.query_processor.process_query(&query)?;
        Ok(SparqlResult {
            outcome,
            context: context.clone(),
        })
    }
}

fn set_default_dataset(query: &mut Query, graph_uris: &[String]) -> Result<(), StoreError> {
    let (Query::Select { dataset, .. }
    | Query::Construct { dataset, .. }
    | Query::Describe { dataset, .. }
    | Query::Ask { dataset, .. }) = query;
    if dataset.is_some() {
        return Ok(());
    }
    let graphs = graph_uris
        .iter()
        .map(|iri| {
            NamedNode::new(iri).map_err(|source| StoreError::InvalidGraphIri {
                iri: iri.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    *dataset = Some(QueryDataset {
        default: graphs.clone(),
        named: Some(graphs),
    });
    Ok(())
}

/// The solutions of a query together with the context it was compiled with.
#[derive(Debug)]
pub struct SparqlResult {
    outcome: QueryOutcome,
    context: SparqlQueryContext,
}

impl SparqlResult {
    #[inline]
    pub fn context(&self) -> &SparqlQueryContext {
        &self.context
    }

    #[inline]
    pub fn outcome(&self) -> &QueryOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> QueryOutcome {
        self.outcome
    }

    pub fn variables(&self) -> &[Variable] {
        match &self.outcome {
            QueryOutcome::Solutions { variables, .. } => variables,
            QueryOutcome::Boolean(_) => &[],
        }
    }

    pub fn solutions(&self) -> &[QuerySolution] {
        match &self.outcome {
            QueryOutcome::Solutions { solutions, .. } => solutions,
            QueryOutcome::Boolean(_) => &[],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.solutions().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.solutions().is_empty()
    }

    /// The values of a variable, one per solution.
    pub fn values<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = Option<&'a Term>> + 'a {
        self.solutions()
            .iter()
            .map(move |solution| solution.get(variable))
    }

    /// The value of the first projected variable in the first solution.
    ///
    /// This is where the value of aggregate queries lives.
    pub fn scalar(&self) -> Option<&Term> {
        let variable = self.context.select_variables.first()?;
        self.solutions().first()?.get(variable.as_str())
    }

    /// The answer of an `Any` or `All` query, `None` for other queries.
    pub fn exists(&self) -> Option<bool> {
        match (&self.outcome, self.context.cardinality) {
            (QueryOutcome::Boolean(value), _) => Some(*value),
            (_, ResultCardinality::Any) => Some(!self.is_empty()),
            (_, ResultCardinality::All) => Some(self.is_empty()),
            _ => None,
        }
    }

    /// The solution of a `First` or `Single` query.
    ///
    /// Fails if there is no solution and no default is allowed or if a `Single` query has more
    /// than one solution.
    pub fn single(&self) -> Result<Option<&QuerySolution>, StoreError> {
        let solutions = self.solutions();
        match self.context.cardinality {
            ResultCardinality::Single { or_default } => match solutions {
                [] if or_default => Ok(None),
                [solution] => Ok(Some(solution)),
                _ => Err(StoreError::UnexpectedResultCount {
                    expected: if or_default {
                        "at most one result"
                    } else {
                        "exactly one result"
                    },
                    actual: solutions.len(),
                }),
            },
            ResultCardinality::First { or_default } => match solutions.first() {
                None if !or_default => Err(StoreError::UnexpectedResultCount {
                    expected: "at least one result",
                    actual: 0,
                }),
                first => Ok(first),
            },
            _ => match solutions {
                [] => Ok(None),
                [solution] => Ok(Some(solution)),
                _ => Err(StoreError::UnexpectedResultCount {
                    expected: "at most one result",
                    actual: solutions.len(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcessorError, TransactionPreconditionsFailed};
    use crate::model::{Position, Triple};
    use crate::query::{Projection, SparqlQueryContext};
    use oxigraph::model::Literal;
    use spargebra::Update;
    use std::sync::Mutex;

    const S: &str = "http://example.com/s";
    const P: &str = "http://example.com/p";
    const O: &str = "http://example.com/o";

    #[derive(Default)]
    struct RecordingProcessor {
        updates: Mutex<Vec<String>>,
        queries: Mutex<Vec<String>>,
        reject_updates: bool,
    }

    impl UpdateProcessor for RecordingProcessor {
        fn process_update(&self, update: &Update) -> Result<(), ProcessorError> {
            if self.reject_updates {
                return Err(TransactionPreconditionsFailed::new("conflict").into());
            }
            self.updates.lock().unwrap().push(update.to_string());
            Ok(())
        }
    }

    impl QueryProcessor for RecordingProcessor {
        fn process_query(&self, query: &Query) -> Result<QueryOutcome, ProcessorError> {
            self.queries.lock().unwrap().push(query.to_string());
            let variable = Variable::new("count").unwrap();
            Ok(QueryOutcome::Solutions {
                variables: vec![variable.clone()],
                solutions: vec![QuerySolution::from((
                    vec![variable],
                    vec![Some(Term::from(Literal::from(3)))],
                ))],
            })
        }
    }

    fn context(sparql: &str, cardinality: ResultCardinality) -> SparqlQueryContext {
        SparqlQueryContext {
            sparql_query: sparql.into(),
            select_variables: vec!["count".into()],
            projection: Projection::Value {
                variable: "count".into(),
                value_type: None,
            },
            cardinality,
            ordering: Vec::new(),
        }
    }

    #[test]
    fn existence_preconditions_never_reach_the_processor() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let transaction = Transaction::new()
            .with_existence_precondition(Triple::new(S, P, Position::Wildcard));
        assert!(matches!(
            store.apply_transaction(&transaction),
            Err(StoreError::UnsupportedOperation(_))
        ));
        assert!(store.update_processor().updates.lock().unwrap().is_empty());
    }

    #[test]
    fn transaction_is_submitted_once() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let transaction = Transaction::new()
            .with_delete_pattern(Triple::new(S, P, Position::Wildcard))
            .with_insert(Triple::literal(S, P, "v"));
        store.apply_transaction(&transaction).unwrap();
        assert_eq!(store.update_processor().updates.lock().unwrap().len(), 1);
    }

    #[test]
    fn preconditions_failures_are_propagated() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor {
                reject_updates: true,
                ..RecordingProcessor::default()
            },
        );
        let transaction = Transaction::new().with_insert(Triple::new(S, P, O));
        assert!(matches!(
            store.apply_transaction(&transaction),
            Err(StoreError::PreconditionsFailed(_))
        ));
    }

    #[test]
    fn invalid_generated_update_is_a_compilation_error() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let transaction = Transaction::new().with_insert(Triple::new("not an iri", P, O));
        let Err(StoreError::QueryCompilation(error)) = store.apply_transaction(&transaction) else {
            panic!("the update should not parse")
        };
        assert!(error.sparql().contains("<not an iri>"));
        assert!(store.update_processor().updates.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_query_is_never_executed() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let result = store.execute_query(&context("SELECT WHERE", ResultCardinality::Many), &[]);
        assert!(matches!(result, Err(StoreError::QueryCompilation(_))));
        assert!(store.query_processor().queries.lock().unwrap().is_empty());
    }

    #[test]
    fn dataset_graphs_become_from_clauses() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let result = store
            .execute_query(
                &context(
                    "SELECT (COUNT(*) AS ?count) WHERE { ?s ?p ?o }",
                    ResultCardinality::Aggregate(crate::query::AggregateFunction::Count),
                ),
                &["http://example.com/g".into()],
            )
            .unwrap();
        let executed = store.query_processor().queries.lock().unwrap()[0].clone();
        assert!(executed.contains("FROM <http://example.com/g>"));
        assert!(executed.contains("FROM NAMED <http://example.com/g>"));
        assert_eq!(result.scalar(), Some(&Term::from(Literal::from(3))));
        assert_eq!(result.exists(), None);
    }

    #[test]
    fn explicit_dataset_is_kept() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        store
            .execute_query(
                &context(
                    "SELECT * FROM <http://example.com/own> WHERE { ?s ?p ?o }",
                    ResultCardinality::Many,
                ),
                &["http://example.com/g".into()],
            )
            .unwrap();
        let executed = store.query_processor().queries.lock().unwrap()[0].clone();
        assert!(executed.contains("http://example.com/own"));
        assert!(!executed.contains("http://example.com/g>"));
    }

    #[test]
    fn invalid_dataset_graph_is_rejected() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let result = store.execute_query(
            &context("SELECT * WHERE { ?s ?p ?o }", ResultCardinality::Many),
            &["not an iri".into()],
        );
        assert!(matches!(result, Err(StoreError::InvalidGraphIri { .. })));
    }

    #[test]
    fn single_enforces_cardinality() {
        let store = SparqlUpdatableStore::new(
            RecordingProcessor::default(),
            RecordingProcessor::default(),
        );
        let result = store
            .execute_query(
                &context(
                    "SELECT * WHERE { ?s ?p ?o }",
                    ResultCardinality::Single { or_default: false },
                ),
                &[],
            )
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.single().unwrap().is_some());
        let result = store
            .execute_query(&context("SELECT * WHERE { ?s ?p ?o }", ResultCardinality::All), &[])
            .unwrap();
        assert_eq!(result.exists(), Some(false));
    }
}
