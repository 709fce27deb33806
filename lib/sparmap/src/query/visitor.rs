//! Compilation of a [`QueryModel`] into a SPARQL `SELECT` query.

use crate::error::UnsupportedExpressionError;
use crate::query::builder::{
    FilterExpression, GroupPattern, PatternTerm, SourceBinding, SparqlQueryBuilder,
};
use crate::query::hints::{PropertyHint, PropertyHintResolver, PropertyMappingType};
use crate::query::model::{
    AggregateFunction, BinaryOperator, BodyClause, Expression, FromSource, Method, Property,
    QueryModel, QuerySource, ResultOperator, SelectVariableName, SourceId, Value, ValueType,
    VariableBindingType,
};
use oxigraph::model::vocab::rdf;
use tracing::debug;

/// The compiled query together with what is needed to turn its solutions into objects.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SparqlQueryContext {
    pub sparql_query: String,
    /// Projected variables, without `?`.
    pub select_variables: Vec<String>,
    pub projection: Projection,
    pub cardinality: ResultCardinality,
    pub ordering: Vec<SortKey>,
}

/// The shape of one result row.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Projection {
    /// The IRI of an entity of the given type.
    Entity {
        variable: String,
        entity_type: String,
    },
    /// The IRI of an entity, to be mapped back to its identifier.
    Identifier { variable: String },
    Value {
        variable: String,
        value_type: Option<ValueType>,
    },
    /// An anonymous object with named members.
    Anonymous(Vec<(String, Projection)>),
}

impl Projection {
    /// The variable of a single column projection.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Entity { variable, .. }
            | Self::Identifier { variable }
            | Self::Value { variable, .. } => Some(variable),
            Self::Anonymous(_) => None,
        }
    }
}

/// How many results the caller expects.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ResultCardinality {
    Many,
    First { or_default: bool },
    Single { or_default: bool },
    /// A single row holding the aggregate value.
    Aggregate(AggregateFunction),
    /// At least one row means `true`.
    Any,
    /// The rows are counterexamples: no row means `true`.
    All,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SortKey {
    /// The key as written in the `ORDER BY` clause.
    pub expression: String,
    pub descending: bool,
}

/// Compiles object queries to SPARQL using a [`PropertyHintResolver`] for the RDF mapping.
///
/// ```
/// use sparmap::query::{
///     EntityMapping, Expression, MappingTable, Property, PropertyHint, QueryModel,
///     SparqlQueryCompiler, ValueType,
/// };
///
/// let mappings = MappingTable::new().with_entity_type(
///     "Person",
///     EntityMapping::new("http://example.com/Person", "http://example.com/people/")
///         .with_property("Age", PropertyHint::data_property("http://example.com/age")),
/// );
/// // context.Persons.OrderBy(p => p.Age).Skip(3).Take(2)
/// let mut query = QueryModel::new("p", "Person");
/// let age = Property::new("Person", "Age", ValueType::Integer);
/// query
///     .order_by(Expression::source(query.main_source()).member(age))
///     .skip(3)
///     .take(2);
/// let context = SparqlQueryCompiler::new(&mappings).compile(&query)?;
/// assert_eq!(
///     context.sparql_query,
///     "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\n}\nORDER BY ?age\nOFFSET 3\nLIMIT 2\n"
/// );
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone)]
pub struct SparqlQueryCompiler<'a> {
    resolver: &'a dyn PropertyHintResolver,
    dataset_graphs: Vec<String>,
}

impl<'a> SparqlQueryCompiler<'a> {
    pub fn new(resolver: &'a dyn PropertyHintResolver) -> Self {
        Self {
            resolver,
            dataset_graphs: Vec::new(),
        }
    }

    /// Adds a graph to the `FROM` clause of the compiled queries.
    #[must_use]
    pub fn with_dataset_graph(mut self, graph: impl Into<String>) -> Self {
        self.dataset_graphs.push(graph.into());
        self
    }

    #[must_use]
    pub fn with_dataset_graphs(
        mut self,
        graphs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.dataset_graphs.extend(graphs.into_iter().map(Into::into));
        self
    }

    pub fn compile(
        &self,
        query: &QueryModel,
    ) -> Result<SparqlQueryContext, UnsupportedExpressionError> {
        let mut builder = SparqlQueryBuilder::new();
        for graph in &self.dataset_graphs {
            builder.add_from_graph(graph.as_str());
        }
        let context = Compilation {
            resolver: self.resolver,
            query,
            builder,
        }
        .run()?;
        debug!(sparql = %context.sparql_query, "compiled object query");
        Ok(context)
    }
}

/// A compiled operand of a SPARQL expression.
struct Operand {
    expression: FilterExpression,
    is_resource: bool,
    data_type: Option<String>,
}

impl Operand {
    fn resource(term: PatternTerm) -> Self {
        Self {
            expression: term.into(),
            is_resource: true,
            data_type: None,
        }
    }

    fn literal(expression: FilterExpression) -> Self {
        Self {
            expression,
            is_resource: false,
            data_type: None,
        }
    }

    /// A string valued expression.
    fn into_string(self) -> FilterExpression {
        if self.is_resource {
            FilterExpression::function("STR", vec![self.expression])
        } else {
            self.expression
        }
    }
}

struct Compilation<'a> {
    resolver: &'a dyn PropertyHintResolver,
    query: &'a QueryModel,
    builder: SparqlQueryBuilder,
}

impl<'a> Compilation<'a> {
    fn run(mut self) -> Result<SparqlQueryContext, UnsupportedExpressionError> {
        let query = self.query;
        self.register_source(query.main_source)?;
        // A projected property compared with null must not be bound by a required pattern first
        for clause in &query.body {
            if let BodyClause::Where(predicate) = clause {
                self.resolve_null_compared_members(predicate)?;
            }
        }

        let mut group_keys = query.result_operators.iter().filter_map(|op| match op {
            ResultOperator::GroupBy { key } => Some(key),
            _ => None,
        });
        let group_key = match group_keys.next() {
            Some(key) => Some(self.compile_group_key(key)?),
            None => None,
        };
        if let Some(key) = group_keys.next() {
            return Err(self.unsupported(key, "only one grouping is supported"));
        }

        let projection = self.compile_select(&query.select, group_key.as_ref())?;

        for clause in &query.body {
            match clause {
                BodyClause::Where(predicate) => self.compile_where(predicate)?,
                BodyClause::OrderBy(orderings) => {
                    // A new OrderBy sorts again from scratch, only ThenBy keys accumulate
                    self.builder.clear_ordering();
                    for ordering in orderings {
                        let key = self.compile_operand(&ordering.expression)?;
                        self.builder.add_ordering(key.expression, ordering.descending);
                    }
                }
                BodyClause::Join {
                    source,
                    outer_key,
                    inner_key,
                } => {
                    self.register_source(*source)?;
                    self.compile_join(outer_key, inner_key)?;
                }
                BodyClause::AdditionalFrom(source) => self.register_source(*source)?,
            }
        }

        let (projection, cardinality) = self.apply_result_operators(projection)?;
        Ok(SparqlQueryContext {
            sparql_query: self.builder.render(),
            select_variables: self.builder.select_variables(),
            projection,
            cardinality,
            ordering: self
                .builder
                .ordering()
                .into_iter()
                .map(|(expression, descending)| SortKey {
                    expression,
                    descending,
                })
                .collect(),
        })
    }

    fn unsupported(
        &self,
        expression: &Expression,
        reason: impl Into<String>,
    ) -> UnsupportedExpressionError {
        UnsupportedExpressionError::new(self.query.display(expression), reason)
    }

    fn query_source(
        &self,
        source: SourceId,
    ) -> Result<&'a QuerySource, UnsupportedExpressionError> {
        let query = self.query;
        query.source(source).ok_or_else(|| {
            self.unsupported(
                &Expression::QuerySource(source),
                "the query source is not declared",
            )
        })
    }

    /// The variable or constant standing for the source, created on first use.
    fn source_term(&mut self, source: SourceId) -> Result<PatternTerm, UnsupportedExpressionError> {
        match self.builder.try_get_mapping(source) {
            Some(SourceBinding::Variable(variable)) => {
                return Ok(PatternTerm::Variable(variable.name.clone()));
            }
            Some(SourceBinding::Constant(iri)) => return Ok(PatternTerm::Iri(iri.clone())),
            None => (),
        }
        let declaration = self.query_source(source)?;
        let (binding_type, item_type) = source_item_type(declaration);
        let name = self.builder.fresh_variable(&declaration.item_name);
        self.builder.add_mapping(
            source,
            SourceBinding::Variable(SelectVariableName::new(
                name.clone(),
                binding_type,
                item_type,
            )),
        );
        Ok(PatternTerm::Variable(name))
    }

    /// Adds the pattern enumerating the values of a source.
    fn register_source(&mut self, source: SourceId) -> Result<(), UnsupportedExpressionError> {
        let term = self.source_term(source)?;
        let declaration = self.query_source(source)?;
        match &declaration.from {
            FromSource::Entities { entity_type } => {
                let type_uri = self.resolver.entity_type_uri(entity_type).ok_or_else(|| {
                    self.unsupported(
                        &Expression::QuerySource(source),
                        format!("the entity type {entity_type} is not mapped"),
                    )
                })?;
                self.builder.add_triple(
                    term,
                    PatternTerm::iri(rdf::TYPE.as_str()),
                    PatternTerm::Iri(type_uri),
                );
            }
            FromSource::Collection(collection) => self.add_collection_pattern(collection, term)?,
        }
        Ok(())
    }

    /// Adds the triple linking the owner of a collection property to one of its elements.
    fn add_collection_pattern(
        &mut self,
        collection: &Expression,
        element: PatternTerm,
    ) -> Result<(), UnsupportedExpressionError> {
        let Expression::Member { target, property } = collection else {
            return Err(self.unsupported(
                collection,
                "only collection properties can be enumerated",
            ));
        };
        let hint = self.property_hint(collection, property)?;
        let predicate = self.predicate(collection, &hint)?;
        let owner = self.resolve_entity(target)?;
        if hint.mapping_type == PropertyMappingType::InverseProperty {
            self.builder.add_triple(element, PatternTerm::Iri(predicate), owner);
        } else {
            self.builder.add_triple(owner, PatternTerm::Iri(predicate), element);
        }
        Ok(())
    }

    fn property_hint(
        &self,
        expression: &Expression,
        property: &Property,
    ) -> Result<PropertyHint, UnsupportedExpressionError> {
        self.resolver.property_hint(property).ok_or_else(|| {
            self.unsupported(
                expression,
                format!(
                    "the property {}.{} is not mapped",
                    property.declaring_type, property.name
                ),
            )
        })
    }

    fn predicate(
        &self,
        expression: &Expression,
        hint: &PropertyHint,
    ) -> Result<String, UnsupportedExpressionError> {
        hint.predicate_uri
            .clone()
            .ok_or_else(|| self.unsupported(expression, "the property has no predicate"))
    }

    /// Resolves an expression that must denote a resource.
    fn resolve_entity(
        &mut self,
        expression: &Expression,
    ) -> Result<PatternTerm, UnsupportedExpressionError> {
        match expression {
            Expression::QuerySource(source) => self.source_term(*source),
            Expression::SelectVariable(variable) => {
                Ok(PatternTerm::Variable(variable.name.clone()))
            }
            Expression::Member { .. } => {
                let operand = self.resolve_member(expression, false)?;
                match operand.expression {
                    FilterExpression::Term(term) if operand.is_resource => Ok(term),
                    _ => Err(self.unsupported(expression, "the property value is not an entity")),
                }
            }
            _ => Err(self.unsupported(expression, "an entity was expected")),
        }
    }

    /// Resolves `target.property` to the variable holding its value.
    ///
    /// Identifier and address properties resolve to the entity itself.
    fn resolve_member(
        &mut self,
        expression: &Expression,
        optional: bool,
    ) -> Result<Operand, UnsupportedExpressionError> {
        let Expression::Member { target, property } = expression else {
            return Err(self.unsupported(expression, "a property access was expected"));
        };
        let hint = self.property_hint(expression, property)?;
        let subject = self.resolve_entity(target)?;
        if hint.is_identity() {
            return Ok(Operand::resource(subject));
        }
        if matches!(property.value_type, ValueType::Collection(_)) {
            return Err(self.unsupported(
                expression,
                "collection properties can only be used with Contains, Any, All or as a query source",
            ));
        }
        let predicate = self.predicate(expression, &hint)?;
        let inverse = hint.mapping_type == PropertyMappingType::InverseProperty;
        let variable = if let Some(variable) =
            self.builder.cached_member(&subject, &predicate, inverse)
        {
            variable.to_owned()
        } else {
            let variable = self.builder.fresh_variable(&property.name);
            let (s, o) = if inverse {
                (PatternTerm::Variable(variable.clone()), subject.clone())
            } else {
                (subject.clone(), PatternTerm::Variable(variable.clone()))
            };
            if optional {
                self.builder.add_optional(s, PatternTerm::Iri(predicate.clone()), o);
            } else {
                self.builder.add_triple(s, PatternTerm::Iri(predicate.clone()), o);
            }
            self.builder.cache_member(subject, &predicate, inverse, variable.clone());
            variable
        };
        Ok(Operand {
            expression: PatternTerm::Variable(variable).into(),
            is_resource: hint.mapping_type != PropertyMappingType::DataProperty,
            data_type: hint.data_type_uri,
        })
    }

    fn compile_group_key(
        &mut self,
        key: &Expression,
    ) -> Result<(String, Projection), UnsupportedExpressionError> {
        let projection = self.value_projection(key)?;
        let Some(variable) = projection.variable() else {
            return Err(self.unsupported(key, "group keys must be a property or an entity"));
        };
        if self.builder.constant_value(variable).is_some() {
            return Err(self.unsupported(key, "constant group keys are not supported"));
        }
        let variable = variable.to_owned();
        self.builder.add_group_by(&variable);
        Ok((variable, projection))
    }

    /// The projection of an entity or a property value, without registering it in the `SELECT` clause.
    fn value_projection(
        &mut self,
        expression: &Expression,
    ) -> Result<Projection, UnsupportedExpressionError> {
        match expression {
            Expression::QuerySource(source) => {
                let PatternTerm::Variable(variable) = self.source_term(*source)? else {
                    return Err(self.unsupported(expression, "the source is already a constant"));
                };
                let (binding_type, item_type) = source_item_type(self.query_source(*source)?);
                Ok(match (binding_type, item_type) {
                    (VariableBindingType::Resource, ValueType::Entity(entity_type)) => {
                        Projection::Entity {
                            variable,
                            entity_type,
                        }
                    }
                    (_, value_type) => Projection::Value {
                        variable,
                        value_type: Some(value_type),
                    },
                })
            }
            Expression::Member { property, .. } => {
                let hint = self.property_hint(expression, property)?;
                let operand = self.resolve_member(expression, false)?;
                let FilterExpression::Term(PatternTerm::Variable(variable)) = operand.expression
                else {
                    return Err(self.unsupported(expression, "the value is a constant"));
                };
                Ok(match (hint.mapping_type, &property.value_type) {
                    (PropertyMappingType::Identifier, _) => Projection::Identifier { variable },
                    (PropertyMappingType::Address, value_type) => Projection::Value {
                        variable,
                        value_type: Some(value_type.clone()),
                    },
                    (_, ValueType::Entity(entity_type)) => Projection::Entity {
                        variable,
                        entity_type: entity_type.clone(),
                    },
                    (_, value_type) => Projection::Value {
                        variable,
                        value_type: Some(value_type.clone()),
                    },
                })
            }
            Expression::SelectVariable(variable) => Ok(match &variable.item_type {
                ValueType::Entity(entity_type)
                    if variable.binding_type == VariableBindingType::Resource =>
                {
                    Projection::Entity {
                        variable: variable.name.clone(),
                        entity_type: entity_type.clone(),
                    }
                }
                value_type => Projection::Value {
                    variable: variable.name.clone(),
                    value_type: Some(value_type.clone()),
                },
            }),
            _ => Err(self.unsupported(expression, "only entities and properties can be projected")),
        }
    }

    fn compile_select(
        &mut self,
        select: &Expression,
        group_key: Option<&(String, Projection)>,
    ) -> Result<Projection, UnsupportedExpressionError> {
        match select {
            Expression::New(members) => {
                let mut projections = Vec::with_capacity(members.len());
                for (name, member) in members {
                    projections.push((name.clone(), self.compile_select(member, group_key)?));
                }
                Ok(Projection::Anonymous(projections))
            }
            Expression::GroupKey => {
                let Some((variable, projection)) = group_key else {
                    return Err(self.unsupported(select, "there is no grouping"));
                };
                self.builder.add_select_variable(variable);
                Ok(projection.clone())
            }
            Expression::Aggregate { function, argument } => {
                if group_key.is_none() {
                    return Err(self.unsupported(select, "there is no grouping"));
                }
                let (argument, value_type) = match argument {
                    Some(argument) => match self.value_projection(argument)? {
                        Projection::Value {
                            variable,
                            value_type,
                        } => (Some(variable), value_type),
                        _ => {
                            return Err(self.unsupported(
                                select,
                                "only literal values can be aggregated",
                            ));
                        }
                    },
                    None if *function == AggregateFunction::Count => (None, None),
                    None => return Err(self.unsupported(select, "the aggregate needs a value")),
                };
                let alias = self.builder.fresh_variable(&function.to_string());
                self.builder
                    .add_select_aggregate(*function, argument, alias.clone());
                Ok(Projection::Value {
                    variable: alias,
                    value_type: aggregate_type(*function, value_type),
                })
            }
            _ if group_key.is_some() => Err(self.unsupported(
                select,
                "grouped queries can only project the group key and aggregates",
            )),
            _ => {
                let projection = self.value_projection(select)?;
                if let Some(variable) = projection.variable() {
                    let variable = variable.to_owned();
                    self.builder.add_select_variable(&variable);
                }
                Ok(projection)
            }
        }
    }

    /// Compiles a filter in the current scope, turning its conjuncts into patterns when possible.
    fn compile_where(&mut self, predicate: &Expression) -> Result<(), UnsupportedExpressionError> {
        self.resolve_null_compared_members(predicate)?;
        for conjunct in predicate.conjuncts() {
            if self.try_identity_equality(conjunct)? || self.try_collection_membership(conjunct)? {
                continue;
            }
            let filter = self.compile_operand(conjunct)?;
            self.builder.add_filter(filter.expression);
        }
        Ok(())
    }

    /// Binds the properties compared with `null` through `OPTIONAL` before anything requires them.
    fn resolve_null_compared_members(
        &mut self,
        expression: &Expression,
    ) -> Result<(), UnsupportedExpressionError> {
        match expression {
            Expression::Binary {
                operator,
                left,
                right,
            } => {
                if operator.is_comparison() {
                    let member = match (left.as_ref(), right.as_ref()) {
                        (member @ Expression::Member { .. }, Expression::Constant(Value::Null))
                        | (
                            Expression::Constant(Value::Null),
                            member @ Expression::Member { .. },
                        ) => Some(member),
                        _ => None,
                    };
                    if let Some(member) = member {
                        self.resolve_member(member, true)?;
                        return Ok(());
                    }
                }
                self.resolve_null_compared_members(left)?;
                self.resolve_null_compared_members(right)
            }
            Expression::Not(inner) => self.resolve_null_compared_members(inner),
            Expression::Call {
                target, arguments, ..
            } => {
                self.resolve_null_compared_members(target)?;
                for argument in arguments {
                    self.resolve_null_compared_members(argument)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `x.Id == constant`: a filter if `x` is projected, otherwise `x` becomes the constant IRI.
    fn try_identity_equality(
        &mut self,
        conjunct: &Expression,
    ) -> Result<bool, UnsupportedExpressionError> {
        let Expression::Binary {
            operator: BinaryOperator::Equal,
            left,
            right,
        } = conjunct
        else {
            return Ok(false);
        };
        let (member, value) = match (left.as_ref(), right.as_ref()) {
            (member @ Expression::Member { .. }, Expression::Constant(value))
            | (Expression::Constant(value), member @ Expression::Member { .. }) => (member, value),
            _ => return Ok(false),
        };
        let Some(address) = self.identity_address(member, value) else {
            return Ok(false);
        };
        let Expression::Member { target, .. } = member else {
            return Ok(false);
        };
        match self.resolve_entity(target)? {
            PatternTerm::Variable(variable) if !self.builder.is_selected(&variable) => {
                self.builder.convert_variable_to_constant(&variable, address);
            }
            term => self.builder.add_filter(FilterExpression::binary(
                "=",
                term.into(),
                PatternTerm::Iri(address).into(),
            )),
        }
        Ok(true)
    }

    /// The IRI designated by a constant compared with an identifier or address property.
    fn identity_address(&self, member: &Expression, value: &Value) -> Option<String> {
        let Expression::Member { property, .. } = member else {
            return None;
        };
        let hint = self.resolver.property_hint(property)?;
        let value = match value {
            Value::String(value) => value.clone(),
            Value::Integer(value) => value.to_string(),
            _ => return None,
        };
        match hint.mapping_type {
            PropertyMappingType::Identifier => Some(self.resolver.map_id_to_uri(property, &value)),
            PropertyMappingType::Address => Some(value),
            _ => None,
        }
    }

    /// `x.Collection.Contains(y)` at the top of a filter is a plain triple pattern.
    fn try_collection_membership(
        &mut self,
        conjunct: &Expression,
    ) -> Result<bool, UnsupportedExpressionError> {
        let Expression::Call {
            method: Method::Contains { .. },
            target,
            arguments,
        } = conjunct
        else {
            return Ok(false);
        };
        let Some(element_type) = collection_element_type(target) else {
            return Ok(false);
        };
        let [argument] = arguments.as_slice() else {
            return Err(self.unsupported(conjunct, "Contains takes a single argument"));
        };
        let element = self.collection_element(element_type, argument)?;
        self.add_collection_pattern(target, element)?;
        Ok(true)
    }

    fn collection_element(
        &mut self,
        element_type: &ValueType,
        argument: &Expression,
    ) -> Result<PatternTerm, UnsupportedExpressionError> {
        match argument {
            Expression::Constant(Value::String(address)) if element_type.is_entity() => {
                Ok(PatternTerm::Iri(address.clone()))
            }
            Expression::Constant(value) => PatternTerm::literal(value).ok_or_else(|| {
                self.unsupported(argument, "the value can't be a collection element")
            }),
            _ if element_type.is_entity() => self.resolve_entity(argument),
            _ => match self.compile_operand(argument)?.expression {
                FilterExpression::Term(term) => Ok(term),
                _ => Err(self.unsupported(argument, "the value can't be a collection element")),
            },
        }
    }

    fn compile_join(
        &mut self,
        outer_key: &Expression,
        inner_key: &Expression,
    ) -> Result<(), UnsupportedExpressionError> {
        let outer = self.compile_operand(outer_key)?.expression;
        let inner = self.compile_operand(inner_key)?.expression;
        match (outer, inner) {
            (
                FilterExpression::Term(PatternTerm::Variable(outer)),
                FilterExpression::Term(PatternTerm::Variable(inner)),
            ) => {
                if !self.builder.unify(&outer, &inner) {
                    self.builder.add_filter(FilterExpression::binary(
                        "=",
                        PatternTerm::Variable(outer).into(),
                        PatternTerm::Variable(inner).into(),
                    ));
                }
            }
            (
                FilterExpression::Term(PatternTerm::Variable(variable)),
                FilterExpression::Term(PatternTerm::Iri(iri)),
            )
            | (
                FilterExpression::Term(PatternTerm::Iri(iri)),
                FilterExpression::Term(PatternTerm::Variable(variable)),
            ) if !self.builder.is_selected(&variable) =>
            {
                self.builder.convert_variable_to_constant(&variable, iri);
            }
            (outer, inner) => self
                .builder
                .add_filter(FilterExpression::binary("=", outer, inner)),
        }
        Ok(())
    }

    fn compile_operand(
        &mut self,
        expression: &Expression,
    ) -> Result<Operand, UnsupportedExpressionError> {
        match expression {
            Expression::Constant(value) => match PatternTerm::literal(value) {
                Some(literal) => Ok(Operand::literal(literal.into())),
                None if *value == Value::Null => Err(self.unsupported(
                    expression,
                    "null can only be compared with a property",
                )),
                None => Err(self.unsupported(expression, "lists can only be used with Contains")),
            },
            Expression::QuerySource(source) => Ok(Operand::resource(self.source_term(*source)?)),
            Expression::SelectVariable(variable) => Ok(Operand {
                expression: PatternTerm::Variable(variable.name.clone()).into(),
                is_resource: variable.binding_type == VariableBindingType::Resource,
                data_type: None,
            }),
            Expression::Member { .. } => self.resolve_member(expression, false),
            Expression::Binary {
                operator,
                left,
                right,
            } => self.compile_binary(expression, *operator, left, right),
            Expression::Not(inner) => Ok(Operand::literal(
                self.compile_operand(inner)?.expression.negate(),
            )),
            Expression::Call {
                method,
                target,
                arguments,
            } => self.compile_call(expression, *method, target, arguments),
            Expression::Any { source, predicate } => {
                let pattern = self.collection_scope(*source, predicate.as_deref(), false)?;
                Ok(Operand::literal(FilterExpression::Exists {
                    negated: false,
                    pattern,
                }))
            }
            Expression::All { source, predicate } => {
                let pattern = self.collection_scope(*source, Some(predicate), true)?;
                Ok(Operand::literal(FilterExpression::Exists {
                    negated: true,
                    pattern,
                }))
            }
            Expression::New(_) | Expression::GroupKey | Expression::Aggregate { .. } => Err(
                self.unsupported(expression, "the expression is only allowed in projections"),
            ),
        }
    }

    /// The group matching the elements of a collection source.
    ///
    /// With `counterexample` the group matches the elements for which the predicate is false.
    fn collection_scope(
        &mut self,
        source: SourceId,
        predicate: Option<&Expression>,
        counterexample: bool,
    ) -> Result<GroupPattern, UnsupportedExpressionError> {
        self.builder.push_scope();
        let result = self.fill_collection_scope(source, predicate, counterexample);
        let pattern = self.builder.pop_scope();
        result.map(|()| pattern)
    }

    fn fill_collection_scope(
        &mut self,
        source: SourceId,
        predicate: Option<&Expression>,
        counterexample: bool,
    ) -> Result<(), UnsupportedExpressionError> {
        let declaration = self.query_source(source)?;
        if !matches!(declaration.from, FromSource::Collection(_)) {
            return Err(self.unsupported(
                &Expression::QuerySource(source),
                "Any and All are only supported on collection properties",
            ));
        }
        self.register_source(source)?;
        match predicate {
            Some(predicate) if counterexample => {
                let filter = self.compile_operand(predicate)?.expression.negate();
                self.builder.add_filter(filter);
            }
            Some(predicate) => self.compile_where(predicate)?,
            None => (),
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        expression: &Expression,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<Operand, UnsupportedExpressionError> {
        if operator.is_comparison() {
            if let Some(filter) = self.compile_null_comparison(expression, operator, left, right)? {
                return Ok(Operand::literal(filter));
            }
            if matches!(operator, BinaryOperator::Equal | BinaryOperator::NotEqual) {
                if let Some(filter) = self.compile_identity_comparison(operator, left, right)? {
                    return Ok(Operand::literal(filter));
                }
            }
        }
        let left_operand = self.compile_operand(left)?;
        let right_operand = self.compile_operand(right)?;
        let left_expression = retype_constant(
            left,
            left_operand.expression,
            right_operand.data_type.as_deref(),
        );
        let right_expression = retype_constant(
            right,
            right_operand.expression,
            left_operand.data_type.as_deref(),
        );
        Ok(Operand::literal(FilterExpression::binary(
            operator.symbol(),
            left_expression,
            right_expression,
        )))
    }

    fn compile_null_comparison(
        &mut self,
        expression: &Expression,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<Option<FilterExpression>, UnsupportedExpressionError> {
        let member = match (left, right) {
            (other, Expression::Constant(Value::Null))
            | (Expression::Constant(Value::Null), other) => other,
            _ => return Ok(None),
        };
        let bound = match self.resolve_member(member, true)?.expression {
            FilterExpression::Term(PatternTerm::Variable(variable)) => {
                FilterExpression::Bound(variable)
            }
            _ => return Err(self.unsupported(expression, "the value can't be null")),
        };
        match operator {
            BinaryOperator::Equal => Ok(Some(bound.negate())),
            BinaryOperator::NotEqual => Ok(Some(bound)),
            _ => Err(self.unsupported(expression, "null can only be compared for equality")),
        }
    }

    /// Comparison of an identifier or address with a constant, nested in a larger expression.
    fn compile_identity_comparison(
        &mut self,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<Option<FilterExpression>, UnsupportedExpressionError> {
        let (member, value) = match (left, right) {
            (member @ Expression::Member { .. }, Expression::Constant(value))
            | (Expression::Constant(value), member @ Expression::Member { .. }) => (member, value),
            _ => return Ok(None),
        };
        let Some(address) = self.identity_address(member, value) else {
            return Ok(None);
        };
        let Expression::Member { target, .. } = member else {
            return Ok(None);
        };
        let entity = self.resolve_entity(target)?;
        Ok(Some(FilterExpression::binary(
            operator.symbol(),
            entity.into(),
            PatternTerm::Iri(address).into(),
        )))
    }

    fn compile_call(
        &mut self,
        expression: &Expression,
        method: Method,
        target: &Expression,
        arguments: &[Expression],
    ) -> Result<Operand, UnsupportedExpressionError> {
        match method {
            Method::Contains { ignore_case } => {
                if let Expression::Constant(Value::List(values)) = target {
                    let [needle] = arguments else {
                        return Err(self.unsupported(
                            expression,
                            "Contains takes a single argument",
                        ));
                    };
                    return self.compile_in(expression, needle, values);
                }
                if let Some(element_type) = collection_element_type(target) {
                    let [argument] = arguments else {
                        return Err(self.unsupported(
                            expression,
                            "Contains takes a single argument",
                        ));
                    };
                    self.builder.push_scope();
                    let result = self
                        .collection_element(element_type, argument)
                        .and_then(|element| self.add_collection_pattern(target, element));
                    let pattern = self.builder.pop_scope();
                    result?;
                    return Ok(Operand::literal(FilterExpression::Exists {
                        negated: false,
                        pattern,
                    }));
                }
                self.compile_string_test(expression, "CONTAINS", target, arguments, ignore_case)
            }
            Method::StartsWith { ignore_case } => {
                self.compile_string_test(expression, "STRSTARTS", target, arguments, ignore_case)
            }
            Method::EndsWith { ignore_case } => {
                self.compile_string_test(expression, "STRENDS", target, arguments, ignore_case)
            }
            Method::Equals { ignore_case } => {
                let [argument] = arguments else {
                    return Err(self.unsupported(expression, "Equals takes a single argument"));
                };
                let (left, right) = self.string_pair(target, argument, ignore_case)?;
                Ok(Operand::literal(FilterExpression::binary("=", left, right)))
            }
            Method::ToLower | Method::ToUpper | Method::Length => {
                if !arguments.is_empty() {
                    return Err(self.unsupported(expression, "the method takes no argument"));
                }
                let name = match method {
                    Method::ToLower => "LCASE",
                    Method::ToUpper => "UCASE",
                    _ => "STRLEN",
                };
                let target = self.compile_operand(target)?.into_string();
                Ok(Operand::literal(FilterExpression::function(name, vec![target])))
            }
            Method::RegexIsMatch => {
                let (pattern, flags) = match arguments {
                    [pattern] => (pattern, None),
                    [pattern, flags] => (pattern, Some(flags)),
                    _ => {
                        return Err(self.unsupported(
                            expression,
                            "IsMatch takes a pattern and optional flags",
                        ));
                    }
                };
                let mut function_arguments = vec![
                    self.compile_operand(target)?.into_string(),
                    self.compile_operand(pattern)?.expression,
                ];
                if let Some(flags) = flags {
                    let Expression::Constant(Value::String(_)) = flags else {
                        return Err(self.unsupported(
                            flags,
                            "regular expression flags must be a constant",
                        ));
                    };
                    function_arguments.push(self.compile_operand(flags)?.expression);
                }
                Ok(Operand::literal(FilterExpression::function("REGEX", function_arguments)))
            }
        }
    }

    fn compile_string_test(
        &mut self,
        expression: &Expression,
        function: &'static str,
        target: &Expression,
        arguments: &[Expression],
        ignore_case: bool,
    ) -> Result<Operand, UnsupportedExpressionError> {
        let [argument] = arguments else {
            return Err(self.unsupported(expression, "the method takes a single argument"));
        };
        let (haystack, needle) = self.string_pair(target, argument, ignore_case)?;
        Ok(Operand::literal(FilterExpression::function(
            function,
            vec![haystack, needle],
        )))
    }

    fn string_pair(
        &mut self,
        left: &Expression,
        right: &Expression,
        ignore_case: bool,
    ) -> Result<(FilterExpression, FilterExpression), UnsupportedExpressionError> {
        let left = self.compile_operand(left)?.into_string();
        let right = self.compile_operand(right)?.into_string();
        Ok(if ignore_case {
            (
                FilterExpression::function("LCASE", vec![left]),
                FilterExpression::function("LCASE", vec![right]),
            )
        } else {
            (left, right)
        })
    }

    /// `list.Contains(needle)` with a constant list.
    fn compile_in(
        &mut self,
        expression: &Expression,
        needle: &Expression,
        values: &[Value],
    ) -> Result<Operand, UnsupportedExpressionError> {
        if let Expression::Member { target, .. } = needle {
            let addresses = values
                .iter()
                .map(|value| self.identity_address(needle, value))
                .collect::<Option<Vec<_>>>();
            if let Some(addresses) = addresses.filter(|_| !values.is_empty()) {
                let entity = self.resolve_entity(target)?;
                return Ok(Operand::literal(FilterExpression::In {
                    needle: Box::new(entity.into()),
                    haystack: addresses
                        .into_iter()
                        .map(|address| PatternTerm::Iri(address).into())
                        .collect(),
                }));
            }
        }
        let needle = self.compile_operand(needle)?;
        let mut haystack = Vec::with_capacity(values.len());
        for value in values {
            let literal = PatternTerm::literal(value)
                .ok_or_else(|| self.unsupported(expression, "list elements must be literals"))?;
            haystack.push(literal.into());
        }
        Ok(Operand::literal(FilterExpression::In {
            needle: Box::new(needle.expression),
            haystack,
        }))
    }

    fn apply_result_operators(
        &mut self,
        mut projection: Projection,
    ) -> Result<(Projection, ResultCardinality), UnsupportedExpressionError> {
        let query = self.query;
        let mut cardinality = ResultCardinality::Many;
        for operator in &query.result_operators {
            if cardinality != ResultCardinality::Many {
                return Err(UnsupportedExpressionError::new(
                    operator,
                    "no operator can follow an operator returning a single value",
                ));
            }
            match operator {
                ResultOperator::Skip(count) => self.builder.apply_skip(*count),
                ResultOperator::Take(count) => self.builder.apply_take(*count),
                ResultOperator::Distinct => self.builder.set_distinct(),
                ResultOperator::Count | ResultOperator::LongCount => {
                    let alias = self.builder.fresh_variable("count");
                    self.builder
                        .set_final_aggregate(AggregateFunction::Count, None, alias.clone());
                    projection = Projection::Value {
                        variable: alias,
                        value_type: Some(ValueType::Integer),
                    };
                    cardinality = ResultCardinality::Aggregate(AggregateFunction::Count);
                }
                ResultOperator::Sum
                | ResultOperator::Average
                | ResultOperator::Min
                | ResultOperator::Max => {
                    let function = match operator {
                        ResultOperator::Sum => AggregateFunction::Sum,
                        ResultOperator::Average => AggregateFunction::Average,
                        ResultOperator::Min => AggregateFunction::Min,
                        _ => AggregateFunction::Max,
                    };
                    let Projection::Value {
                        variable,
                        value_type,
                    } = &projection
                    else {
                        return Err(UnsupportedExpressionError::new(
                            operator,
                            "only literal values can be aggregated",
                        ));
                    };
                    let value_type = aggregate_type(function, value_type.clone());
                    let alias = self.builder.fresh_variable(&function.to_string());
                    self.builder
                        .set_final_aggregate(function, Some(variable.clone()), alias.clone());
                    projection = Projection::Value {
                        variable: alias,
                        value_type,
                    };
                    cardinality = ResultCardinality::Aggregate(function);
                }
                ResultOperator::First | ResultOperator::FirstOrDefault => {
                    self.builder.apply_take(1);
                    cardinality = ResultCardinality::First {
                        or_default: *operator == ResultOperator::FirstOrDefault,
                    };
                }
                ResultOperator::Single | ResultOperator::SingleOrDefault => {
                    // A second row is enough to detect a violation
                    self.builder.apply_take(2);
                    cardinality = ResultCardinality::Single {
                        or_default: *operator == ResultOperator::SingleOrDefault,
                    };
                }
                ResultOperator::Any => {
                    self.builder.apply_take(1);
                    cardinality = ResultCardinality::Any;
                }
                ResultOperator::All(predicate) => {
                    if query
                        .result_operators
                        .iter()
                        .any(|operator| matches!(operator, ResultOperator::GroupBy { .. }))
                    {
                        return Err(self.unsupported(
                            predicate,
                            "All is not supported on grouped queries",
                        ));
                    }
                    let counterexample = self.compile_operand(predicate)?.expression.negate();
                    self.builder.find_counterexample(counterexample);
                    cardinality = ResultCardinality::All;
                }
                ResultOperator::GroupBy { .. } => (),
            }
        }
        Ok((projection, cardinality))
    }
}

fn source_item_type(source: &QuerySource) -> (VariableBindingType, ValueType) {
    match &source.from {
        FromSource::Entities { entity_type } => (
            VariableBindingType::Resource,
            ValueType::Entity(entity_type.clone()),
        ),
        FromSource::Collection(collection) => {
            let item_type = match collection {
                Expression::Member { property, .. } => property
                    .value_type
                    .element_type()
                    .unwrap_or(&property.value_type)
                    .clone(),
                _ => ValueType::String,
            };
            let binding_type = if item_type.is_entity() {
                VariableBindingType::Resource
            } else {
                VariableBindingType::Literal
            };
            (binding_type, item_type)
        }
    }
}

/// The element type if the expression is a collection valued property.
fn collection_element_type(expression: &Expression) -> Option<&ValueType> {
    match expression {
        Expression::Member { property, .. } => property.value_type.element_type(),
        _ => None,
    }
}

fn aggregate_type(function: AggregateFunction, argument: Option<ValueType>) -> Option<ValueType> {
    match (function, argument) {
        (AggregateFunction::Count, _) => Some(ValueType::Integer),
        (AggregateFunction::Average, Some(ValueType::Integer)) => Some(ValueType::Decimal),
        (_, argument) => argument,
    }
}

/// Gives a string constant the datatype of the property it is compared with.
fn retype_constant(
    expression: &Expression,
    compiled: FilterExpression,
    data_type: Option<&str>,
) -> FilterExpression {
    match (expression, data_type) {
        (Expression::Constant(Value::String(value)), Some(data_type)) => {
            PatternTerm::typed_literal(value, data_type).into()
        }
        _ => compiled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::hints::{EntityMapping, MappingTable};

    fn mappings() -> MappingTable {
        MappingTable::new()
            .with_entity_type(
                "Person",
                EntityMapping::new("http://example.com/Person", "http://example.com/people/")
                    .with_property("Id", PropertyHint::identifier())
                    .with_property("Age", PropertyHint::data_property("http://example.com/age"))
                    .with_property("Name", PropertyHint::data_property("http://example.com/name"))
                    .with_property("Nick", PropertyHint::data_property("http://example.com/nick"))
                    .with_property(
                        "Friends",
                        PropertyHint::object_property("http://example.com/friend"),
                    )
                    .with_property(
                        "Employer",
                        PropertyHint::object_property("http://example.com/worksFor"),
                    ),
            )
            .with_entity_type(
                "Company",
                EntityMapping::new("http://example.com/Company", "http://example.com/companies/")
                    .with_property("Id", PropertyHint::identifier())
                    .with_property(
                        "Employees",
                        PropertyHint::inverse_property("http://example.com/worksFor"),
                    ),
            )
    }

    fn id() -> Property {
        Property::new("Person", "Id", ValueType::String)
    }

    fn age() -> Property {
        Property::new("Person", "Age", ValueType::Integer)
    }

    fn name() -> Property {
        Property::new("Person", "Name", ValueType::String)
    }

    fn friends() -> Property {
        Property::new(
            "Person",
            "Friends",
            ValueType::Collection(Box::new(ValueType::Entity("Person".into()))),
        )
    }

    fn compile(query: &QueryModel) -> SparqlQueryContext {
        SparqlQueryCompiler::new(&mappings()).compile(query).unwrap()
    }

    #[test]
    fn identifier_equality_on_unprojected_source_becomes_a_constant() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .filter(Expression::source(p).member(id()).eq(Expression::constant("alice")))
            .select(Expression::source(p).member(name()));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT ?name\nWHERE {\n<http://example.com/people/alice> a <http://example.com/Person> .\n<http://example.com/people/alice> <http://example.com/name> ?name .\n}\n"
        );
        assert!(!context.sparql_query.contains("FILTER"));
        assert_eq!(
            context.projection,
            Projection::Value {
                variable: "name".into(),
                value_type: Some(ValueType::String)
            }
        );
    }

    #[test]
    fn identifier_equality_on_projected_source_is_a_filter() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.filter(Expression::constant("alice").eq(Expression::source(p).member(id())));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nFILTER ((?p = <http://example.com/people/alice>))\n}\n"
        );
        assert_eq!(
            context.projection,
            Projection::Entity {
                variable: "p".into(),
                entity_type: "Person".into()
            }
        );
        assert_eq!(context.select_variables, ["p"]);
    }

    #[test]
    fn nested_identifier_comparisons_compare_iris() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.filter(
            Expression::source(p)
                .member(id())
                .eq(Expression::constant("alice"))
                .or(Expression::source(p).member(id()).eq(Expression::constant("bob"))),
        );
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nFILTER (((?p = <http://example.com/people/alice>) || (?p = <http://example.com/people/bob>)))\n}\n"
        );
    }

    #[test]
    fn conjuncts_become_separate_filters() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.filter(
            Expression::source(p)
                .member(age())
                .gt(Expression::constant(30))
                .and(Expression::source(p).member(name()).call(
                    Method::StartsWith { ignore_case: false },
                    vec![Expression::constant("A")],
                )),
        );
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\n?p <http://example.com/name> ?name .\nFILTER ((?age > 30))\nFILTER (STRSTARTS(?name, \"A\"))\n}\n"
        );
    }

    #[test]
    fn ignore_case_lowers_both_sides() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.filter(Expression::source(p).member(name()).call(
            Method::Equals { ignore_case: true },
            vec![Expression::constant("bob")],
        ));
        assert!(
            compile(&query)
                .sparql_query
                .contains("FILTER ((LCASE(?name) = LCASE(\"bob\")))\n")
        );
    }

    #[test]
    fn null_comparison_uses_optional_and_bound() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let nick = Property::new("Person", "Nick", ValueType::String);
        query.filter(Expression::source(p).member(nick).eq(Expression::constant(Value::Null)));
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nOPTIONAL { ?p <http://example.com/nick> ?nick . }\nFILTER (!(BOUND(?nick)))\n}\n"
        );
    }

    #[test]
    fn projected_property_compared_with_null_stays_optional() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let nick = Property::new("Person", "Nick", ValueType::String);
        query
            .filter(
                Expression::source(p)
                    .member(nick.clone())
                    .eq(Expression::constant(Value::Null)),
            )
            .select(Expression::New(vec![
                ("Name".into(), Expression::source(p).member(name())),
                ("Nick".into(), Expression::source(p).member(nick)),
            ]));
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?name ?nick\nWHERE {\n?p a <http://example.com/Person> .\nOPTIONAL { ?p <http://example.com/nick> ?nick . }\n?p <http://example.com/name> ?name .\nFILTER (!(BOUND(?nick)))\n}\n"
        );
    }

    #[test]
    fn top_level_collection_contains_is_a_pattern() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let contains_bob = Expression::source(p).member(friends()).call(
            Method::Contains { ignore_case: false },
            vec![Expression::constant("http://example.com/people/bob")],
        );
        query.filter(contains_bob.clone());
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/friend> <http://example.com/people/bob> .\n}\n"
        );

        let mut query = QueryModel::new("p", "Person");
        query.filter(contains_bob.not());
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nFILTER (!(EXISTS { ?p <http://example.com/friend> <http://example.com/people/bob> . }))\n}\n"
        );
    }

    #[test]
    fn constant_list_contains_is_in() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let names = Expression::constant(Value::List(vec!["alice".into(), "bob".into()]));
        query.filter(names.clone().call(
            Method::Contains { ignore_case: false },
            vec![Expression::source(p).member(id())],
        ));
        assert!(compile(&query).sparql_query.contains(
            "FILTER ((?p IN (<http://example.com/people/alice>, <http://example.com/people/bob>)))\n"
        ));

        let mut query = QueryModel::new("p", "Person");
        query.filter(names.call(
            Method::Contains { ignore_case: false },
            vec![Expression::source(p).member(name())],
        ));
        assert!(
            compile(&query)
                .sparql_query
                .contains("FILTER ((?name IN (\"alice\", \"bob\")))\n")
        );
    }

    #[test]
    fn any_and_all_use_exists() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let f = query.add_source(
            "f",
            FromSource::Collection(Expression::source(p).member(friends())),
        );
        let adult = Expression::Member {
            target: Box::new(Expression::source(f)),
            property: age(),
        }
        .gt(Expression::constant(18));
        query.filter(Expression::Any {
            source: f,
            predicate: Some(Box::new(adult.clone())),
        });
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nFILTER (EXISTS { ?p <http://example.com/friend> ?f . ?f <http://example.com/age> ?age . FILTER ((?age > 18)) })\n}\n"
        );

        query.body.clear();
        query.filter(Expression::All {
            source: f,
            predicate: Box::new(adult),
        });
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\nFILTER (NOT EXISTS { ?p <http://example.com/friend> ?f . ?f <http://example.com/age> ?age . FILTER (!((?age > 18))) })\n}\n"
        );
    }

    #[test]
    fn any_on_entity_source_is_unsupported() {
        let mut query = QueryModel::new("p", "Person");
        let c = query.add_source("c", FromSource::entities("Company"));
        query.filter(Expression::Any {
            source: c,
            predicate: None,
        });
        let error = SparqlQueryCompiler::new(&mappings()).compile(&query).unwrap_err();
        assert_eq!(error.expression(), "[c]");
    }

    #[test]
    fn join_unifies_keys() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let c = query.add_source("c", FromSource::entities("Company"));
        let employer = Property::new("Person", "Employer", ValueType::Entity("Company".into()));
        query.join(c, Expression::source(p).member(employer.clone()), Expression::source(c));
        assert_eq!(
            compile(&query).sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\n?employer a <http://example.com/Company> .\n?p <http://example.com/worksFor> ?employer .\n}\n"
        );

        // The projected variable survives
        query.select(Expression::source(c));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT ?c\nWHERE {\n?p a <http://example.com/Person> .\n?c a <http://example.com/Company> .\n?p <http://example.com/worksFor> ?c .\n}\n"
        );
        assert_eq!(
            context.projection,
            Projection::Entity {
                variable: "c".into(),
                entity_type: "Company".into()
            }
        );
    }

    #[test]
    fn ordering_and_dataset() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .order_by_descending(Expression::source(p).member(name()))
            .then_by(Expression::source(p).member(age()));
        let context = SparqlQueryCompiler::new(&mappings())
            .with_dataset_graph("http://example.com/g")
            .compile(&query)
            .unwrap();
        assert_eq!(
            context.sparql_query,
            "SELECT ?p\nFROM <http://example.com/g>\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/name> ?name .\n?p <http://example.com/age> ?age .\n}\nORDER BY DESC(?name) ?age\n"
        );
        assert_eq!(
            context.ordering,
            [
                SortKey {
                    expression: "?name".into(),
                    descending: true
                },
                SortKey {
                    expression: "?age".into(),
                    descending: false
                }
            ]
        );
    }

    #[test]
    fn later_order_by_takes_precedence() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .order_by(Expression::source(p).member(name()))
            .order_by_descending(Expression::source(p).member(age()))
            .then_by(Expression::source(p).member(name()));
        let context = compile(&query);
        assert!(context.sparql_query.ends_with("}\nORDER BY DESC(?age) ?name\n"));
        assert_eq!(
            context.ordering,
            [
                SortKey {
                    expression: "?age".into(),
                    descending: true
                },
                SortKey {
                    expression: "?name".into(),
                    descending: false
                }
            ]
        );
    }

    #[test]
    fn count_and_cardinalities() {
        let mut query = QueryModel::new("p", "Person");
        query.result_operator(ResultOperator::Count);
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT (COUNT(*) AS ?count)\nWHERE {\n?p a <http://example.com/Person> .\n}\n"
        );
        assert_eq!(context.cardinality, ResultCardinality::Aggregate(AggregateFunction::Count));
        assert_eq!(context.select_variables, ["count"]);

        let mut query = QueryModel::new("p", "Person");
        query.take(5).result_operator(ResultOperator::SingleOrDefault);
        let context = compile(&query);
        assert!(context.sparql_query.ends_with("LIMIT 2\n"));
        assert_eq!(context.cardinality, ResultCardinality::Single { or_default: true });

        let mut query = QueryModel::new("p", "Person");
        query.result_operator(ResultOperator::First);
        let context = compile(&query);
        assert!(context.sparql_query.ends_with("LIMIT 1\n"));
        assert_eq!(context.cardinality, ResultCardinality::First { or_default: false });
    }

    #[test]
    fn all_operator_looks_for_a_counterexample() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.result_operator(ResultOperator::All(
            Expression::source(p).member(age()).ge(Expression::constant(18)),
        ));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT ?p\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\nFILTER (!((?age >= 18)))\n}\nLIMIT 1\n"
        );
        assert_eq!(context.cardinality, ResultCardinality::All);
    }

    #[test]
    fn all_after_paging_only_checks_the_page() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .order_by_descending(Expression::source(p).member(age()))
            .take(1)
            .result_operator(ResultOperator::All(
                Expression::source(p).member(age()).gt(Expression::constant(30)),
            ));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT *\nWHERE {\n{\nSELECT ?p ?age\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\n}\nORDER BY DESC(?age)\nLIMIT 1\n}\nFILTER (!((?age > 30)))\n}\nLIMIT 1\n"
        );
        assert_eq!(context.cardinality, ResultCardinality::All);
    }

    #[test]
    fn all_is_unsupported_on_groups() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .result_operator(ResultOperator::GroupBy {
                key: Expression::source(p).member(age()),
            })
            .select(Expression::GroupKey)
            .result_operator(ResultOperator::All(
                Expression::source(p).member(age()).gt(Expression::constant(30)),
            ));
        let error = SparqlQueryCompiler::new(&mappings()).compile(&query).unwrap_err();
        assert_eq!(error.reason(), "All is not supported on grouped queries");
    }

    #[test]
    fn sum_after_take_uses_a_subquery() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .select(Expression::source(p).member(age()))
            .take(3)
            .result_operator(ResultOperator::Sum);
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT (SUM(?age) AS ?sum)\nWHERE {\n{\nSELECT ?age\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\n}\nLIMIT 3\n}\n}\n"
        );
        assert_eq!(
            context.projection,
            Projection::Value {
                variable: "sum".into(),
                value_type: Some(ValueType::Integer)
            }
        );
    }

    #[test]
    fn group_by_projects_key_and_aggregates() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query
            .result_operator(ResultOperator::GroupBy {
                key: Expression::source(p).member(age()),
            })
            .select(Expression::New(vec![
                ("Age".into(), Expression::GroupKey),
                ("Count".into(), Expression::aggregate(AggregateFunction::Count, None)),
            ]));
        let context = compile(&query);
        assert_eq!(
            context.sparql_query,
            "SELECT ?age (COUNT(*) AS ?count)\nWHERE {\n?p a <http://example.com/Person> .\n?p <http://example.com/age> ?age .\n}\nGROUP BY ?age\n"
        );
        assert_eq!(context.select_variables, ["age", "count"]);
        assert_eq!(
            context.projection,
            Projection::Anonymous(vec![
                (
                    "Age".into(),
                    Projection::Value {
                        variable: "age".into(),
                        value_type: Some(ValueType::Integer)
                    }
                ),
                (
                    "Count".into(),
                    Projection::Value {
                        variable: "count".into(),
                        value_type: Some(ValueType::Integer)
                    }
                ),
            ])
        );
    }

    #[test]
    fn unmapped_members_are_reported_with_item_names() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        let salary = Property::new("Person", "Salary", ValueType::Decimal);
        query.filter(Expression::source(p).member(salary).gt(Expression::constant(10)));
        let error = SparqlQueryCompiler::new(&mappings()).compile(&query).unwrap_err();
        assert_eq!(error.expression(), "[p].Salary");
        assert_eq!(error.reason(), "the property Person.Salary is not mapped");
    }

    #[test]
    fn unmapped_entity_type_is_reported() {
        let error = SparqlQueryCompiler::new(&mappings())
            .compile(&QueryModel::new("x", "Unknown"))
            .unwrap_err();
        assert_eq!(error.expression(), "[x]");
        assert_eq!(error.reason(), "the entity type Unknown is not mapped");
    }

    #[test]
    fn nothing_follows_a_terminal_operator() {
        let mut query = QueryModel::new("p", "Person");
        query.result_operator(ResultOperator::Count).skip(1);
        let error = SparqlQueryCompiler::new(&mappings()).compile(&query).unwrap_err();
        assert_eq!(error.expression(), "Skip(1)");
    }

    #[test]
    fn compilations_are_independent() {
        let mut query = QueryModel::new("p", "Person");
        let p = query.main_source();
        query.filter(Expression::source(p).member(age()).lt(Expression::constant(10)));
        let mappings = mappings();
        let compiler = SparqlQueryCompiler::new(&mappings);
        let first = compiler.compile(&query).unwrap();
        let second = compiler.compile(&query).unwrap();
        assert_eq!(first, second);
    }
}
