//! Query source bindings and SPARQL text assembly for one compilation.

use crate::query::model::{AggregateFunction, SelectVariableName, SourceId, Value};
use crate::update::escape_string_into;
use oxigraph::model::vocab::{rdf, xsd};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Write;
use tracing::debug;

/// What a query source stands for in the generated query.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum SourceBinding {
    Variable(SelectVariableName),
    /// The source has been proven to be a single resource.
    Constant(String),
}

/// A subject, predicate or object of a triple pattern.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum PatternTerm {
    /// Variable name without `?`.
    Variable(String),
    Iri(String),
    /// An already serialized SPARQL literal.
    Literal(String),
}

impl PatternTerm {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Iri(iri.into())
    }

    /// Serializes a constant, `None` for [`Value::Null`] and lists.
    pub fn literal(value: &Value) -> Option<Self> {
        Some(Self::Literal(match value {
            Value::Null | Value::List(_) => return None,
            Value::Boolean(value) => value.to_string(),
            Value::Integer(value) => value.to_string(),
            Value::Decimal(value) => typed_literal(value, xsd::DECIMAL.as_str()),
            Value::Double(value) => {
                typed_literal(&double_lexical_form(*value), xsd::DOUBLE.as_str())
            }
            Value::String(value) => typed_literal(value, xsd::STRING.as_str()),
            Value::DateTime(value) => typed_literal(value, xsd::DATE_TIME.as_str()),
        }))
    }

    /// A literal with the given lexical value and datatype.
    pub fn typed_literal(value: &str, data_type: &str) -> Self {
        Self::Literal(typed_literal(value, data_type))
    }
}

fn double_lexical_form(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value == f64::INFINITY {
        "INF".into()
    } else if value == f64::NEG_INFINITY {
        "-INF".into()
    } else {
        value.to_string()
    }
}

fn typed_literal(value: &str, data_type: &str) -> String {
    let mut output = String::with_capacity(value.len() + 2);
    output.push('"');
    escape_string_into(value, &mut output);
    output.push('"');
    if data_type != xsd::STRING.as_str() {
        let _ = write!(output, "^^<{data_type}>");
    }
    output
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
}

/// An element of a `{ ... }` group.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum GroupElement {
    Triple(TriplePattern),
    Optional(TriplePattern),
    Filter(FilterExpression),
}

/// A group graph pattern.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct GroupPattern {
    pub elements: Vec<GroupElement>,
}

impl GroupPattern {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A SPARQL expression as used in `FILTER`, `ORDER BY` and projections.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FilterExpression {
    Term(PatternTerm),
    Binary {
        operator: &'static str,
        left: Box<FilterExpression>,
        right: Box<FilterExpression>,
    },
    Not(Box<FilterExpression>),
    Function {
        name: &'static str,
        arguments: Vec<FilterExpression>,
    },
    In {
        needle: Box<FilterExpression>,
        haystack: Vec<FilterExpression>,
    },
    Exists {
        negated: bool,
        pattern: GroupPattern,
    },
    /// `BOUND(?variable)`.
    Bound(String),
}

impl FilterExpression {
    pub fn binary(operator: &'static str, left: Self, right: Self) -> Self {
        Self::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn function(name: &'static str, arguments: Vec<Self>) -> Self {
        Self::Function { name, arguments }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl From<PatternTerm> for FilterExpression {
    #[inline]
    fn from(term: PatternTerm) -> Self {
        Self::Term(term)
    }
}

/// An element of the `SELECT` clause.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum SelectItem {
    Variable(String),
    Aggregate {
        function: AggregateFunction,
        /// `None` for `COUNT(*)`.
        argument: Option<String>,
        alias: String,
    },
}

#[derive(Debug, Clone)]
struct MemberEntry {
    subject: PatternTerm,
    predicate: String,
    inverse: bool,
    variable: String,
}

#[derive(Debug, Default)]
struct Scope {
    pattern: GroupPattern,
    members: Vec<MemberEntry>,
}

#[derive(Debug)]
struct FinalAggregate {
    item: SelectItem,
    over_subquery: bool,
}

/// Accumulates the state of one query compilation and renders it as SPARQL.
///
/// All the variable names are allocated by the builder itself so that two compilations never
/// interfere.
///
/// ```
/// use sparmap::query::{PatternTerm, SparqlQueryBuilder};
///
/// let mut builder = SparqlQueryBuilder::new();
/// let person = builder.fresh_variable("p");
/// let age = builder.fresh_variable("Age");
/// builder.add_triple(
///     PatternTerm::variable(&person),
///     PatternTerm::iri("http://example.com/age"),
///     PatternTerm::variable(&age),
/// );
/// builder.add_select_variable(&person);
/// builder.add_ordering(PatternTerm::variable(&age).into(), false);
/// builder.apply_skip(3);
/// builder.apply_take(2);
/// assert_eq!(
///     builder.render(),
///     "SELECT ?p\nWHERE {\n?p <http://example.com/age> ?age .\n}\nORDER BY ?age\nOFFSET 3\nLIMIT 2\n"
/// );
/// ```
#[derive(Debug)]
pub struct SparqlQueryBuilder {
    mappings: FxHashMap<SourceId, SourceBinding>,
    constants: FxHashMap<String, String>,
    aliases: FxHashMap<String, String>,
    used_names: FxHashSet<String>,
    scopes: Vec<Scope>,
    select: Vec<SelectItem>,
    distinct: bool,
    group_by: Vec<String>,
    order_by: Vec<(FilterExpression, bool)>,
    offset: usize,
    limit: Option<usize>,
    aggregate: Option<FinalAggregate>,
    counterexample: Option<FilterExpression>,
    from_graphs: Vec<String>,
}

impl Default for SparqlQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SparqlQueryBuilder {
    pub fn new() -> Self {
        Self {
            mappings: FxHashMap::default(),
            constants: FxHashMap::default(),
            aliases: FxHashMap::default(),
            used_names: FxHashSet::default(),
            scopes: vec![Scope::default()],
            select: Vec::new(),
            distinct: false,
            group_by: Vec::new(),
            order_by: Vec::new(),
            offset: 0,
            limit: None,
            aggregate: None,
            counterexample: None,
            from_graphs: Vec::new(),
        }
    }

    pub fn try_get_mapping(&self, source: SourceId) -> Option<&SourceBinding> {
        self.mappings.get(&source)
    }

    /// Binds a query source. A source already converted to a constant keeps its constant.
    pub fn add_mapping(&mut self, source: SourceId, binding: SourceBinding) {
        if let Some(SourceBinding::Constant(iri)) = self.mappings.get(&source) {
            debug!(source = source.index(), iri, "ignoring a new mapping of a constant source");
            return;
        }
        self.mappings.insert(source, binding);
    }

    /// Replaces every occurrence of the variable with the IRI, including the sources bound to it.
    pub fn convert_variable_to_constant(&mut self, variable: &str, iri: impl Into<String>) {
        let variable = self.resolve_alias(variable).to_owned();
        let iri = iri.into();
        for binding in self.mappings.values_mut() {
            if let SourceBinding::Variable(bound) = binding {
                if resolve_alias(&self.aliases, &bound.name) == variable {
                    *binding = SourceBinding::Constant(iri.clone());
                }
            }
        }
        self.constants.insert(variable, iri);
    }

    /// The IRI the variable has been converted to, if any.
    pub fn constant_value(&self, variable: &str) -> Option<&str> {
        self.constants
            .get(self.resolve_alias(variable))
            .map(String::as_str)
    }

    /// Allocates a variable name derived from `base` that is not used yet in this query.
    pub fn fresh_variable(&mut self, base: &str) -> String {
        let mut sanitized = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect::<String>();
        if sanitized.is_empty() {
            sanitized.push('v');
        }
        let mut candidate = sanitized.clone();
        let mut suffix = 1;
        while self.used_names.contains(&candidate) {
            candidate = format!("{sanitized}{suffix}");
            suffix += 1;
        }
        self.used_names.insert(candidate.clone());
        candidate
    }

    /// Makes the two variables the same variable.
    ///
    /// Returns `false` if they can't be merged (both are projected or both are distinct
    /// constants), the caller then has to compare them explicitly.
    pub fn unify(&mut self, left: &str, right: &str) -> bool {
        let mut keep = self.resolve_alias(left).to_owned();
        let mut alias = self.resolve_alias(right).to_owned();
        if keep == alias {
            return true;
        }
        match (
            self.constants.get(&keep).cloned(),
            self.constants.get(&alias).cloned(),
        ) {
            (Some(left), Some(right)) => return left == right,
            (Some(iri), None) => {
                self.convert_variable_to_constant(&alias, iri);
                return true;
            }
            (None, Some(iri)) => {
                self.convert_variable_to_constant(&keep, iri);
                return true;
            }
            (None, None) => (),
        }
        match (self.is_selected(&keep), self.is_selected(&alias)) {
            (true, true) => return false,
            (false, true) => std::mem::swap(&mut keep, &mut alias),
            _ => (),
        }
        self.aliases.insert(alias, keep);
        true
    }

    fn resolve_alias<'a>(&'a self, variable: &'a str) -> &'a str {
        resolve_alias(&self.aliases, variable)
    }

    /// The term as it will be rendered: aliases and constants are substituted.
    pub fn canonical(&self, term: &PatternTerm) -> PatternTerm {
        match term {
            PatternTerm::Variable(name) => {
                let name = self.resolve_alias(name);
                match self.constants.get(name) {
                    Some(iri) => PatternTerm::Iri(iri.clone()),
                    None => PatternTerm::Variable(name.to_owned()),
                }
            }
            term => term.clone(),
        }
    }

    pub fn add_triple(
        &mut self,
        subject: PatternTerm,
        predicate: PatternTerm,
        object: PatternTerm,
    ) {
        self.push_element(GroupElement::Triple(TriplePattern {
            subject,
            predicate,
            object,
        }));
    }

    /// Adds `OPTIONAL { s p o }` to the current scope.
    pub fn add_optional(
        &mut self,
        subject: PatternTerm,
        predicate: PatternTerm,
        object: PatternTerm,
    ) {
        self.push_element(GroupElement::Optional(TriplePattern {
            subject,
            predicate,
            object,
        }));
    }

    pub fn add_filter(&mut self, filter: FilterExpression) {
        self.push_element(GroupElement::Filter(filter));
    }

    fn push_element(&mut self, element: GroupElement) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.pattern.elements.push(element);
        }
    }

    /// The variable already holding the value of `predicate` for `subject` in a visible scope.
    pub fn cached_member(
        &self,
        subject: &PatternTerm,
        predicate: &str,
        inverse: bool,
    ) -> Option<&str> {
        let subject = self.canonical(subject);
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .members
                .iter()
                .find(|entry| {
                    entry.predicate == predicate
                        && entry.inverse == inverse
                        && self.canonical(&entry.subject) == subject
                })
                .map(|entry| entry.variable.as_str())
        })
    }

    pub fn cache_member(
        &mut self,
        subject: PatternTerm,
        predicate: &str,
        inverse: bool,
        variable: String,
    ) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.members.push(MemberEntry {
                subject,
                predicate: predicate.into(),
                inverse,
                variable,
            });
        }
    }

    /// Opens a nested group, used for `EXISTS` patterns.
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Closes the innermost nested group and returns its content.
    pub fn pop_scope(&mut self) -> GroupPattern {
        if self.scopes.len() > 1 {
            self.scopes
                .pop()
                .map(|scope| scope.pattern)
                .unwrap_or_default()
        } else {
            GroupPattern::default()
        }
    }

    pub fn add_select_variable(&mut self, variable: &str) {
        let resolved = self.resolve_alias(variable);
        let projected = self.select.iter().any(|item| {
            matches!(item, SelectItem::Variable(name) if self.resolve_alias(name) == resolved)
        });
        if !projected {
            self.select.push(SelectItem::Variable(variable.into()));
        }
    }

    pub fn add_select_aggregate(
        &mut self,
        function: AggregateFunction,
        argument: Option<String>,
        alias: String,
    ) {
        self.select.push(SelectItem::Aggregate {
            function,
            argument,
            alias,
        });
    }

    /// Variables projected by the query, aggregate aliases included.
    pub fn select_variables(&self) -> Vec<String> {
        if let Some(FinalAggregate {
            item: SelectItem::Aggregate { alias, .. },
            ..
        }) = &self.aggregate
        {
            return vec![alias.clone()];
        }
        self.select
            .iter()
            .map(|item| match item {
                SelectItem::Variable(name) => name.clone(),
                SelectItem::Aggregate { alias, .. } => alias.clone(),
            })
            .collect()
    }

    /// The variable is projected or is a group key.
    pub fn is_selected(&self, variable: &str) -> bool {
        let variable = self.resolve_alias(variable);
        self.select.iter().any(|item| match item {
            SelectItem::Variable(name) => self.resolve_alias(name) == variable,
            SelectItem::Aggregate { .. } => false,
        }) || self
            .group_by
            .iter()
            .any(|name| self.resolve_alias(name) == variable)
    }

    /// Drops the `ORDER BY` keys added so far.
    pub fn clear_ordering(&mut self) {
        self.order_by.clear();
    }

    /// Appends an `ORDER BY` key after the existing ones.
    pub fn add_ordering(&mut self, expression: FilterExpression, descending: bool) {
        self.order_by.push((expression, descending));
    }

    pub fn apply_skip(&mut self, count: usize) {
        self.offset += count;
        if let Some(limit) = &mut self.limit {
            *limit = limit.saturating_sub(count);
        }
    }

    pub fn apply_take(&mut self, count: usize) {
        self.limit = Some(self.limit.map_or(count, |limit| limit.min(count)));
    }

    pub fn set_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn add_group_by(&mut self, variable: &str) {
        self.group_by.push(variable.into());
    }

    /// Grouping or solution modifiers have been applied: an aggregate must then be computed over a sub-select.
    pub fn has_solution_modifiers(&self) -> bool {
        self.distinct || self.offset > 0 || self.limit.is_some() || !self.group_by.is_empty()
    }

    /// Replaces the projection by a single aggregate over the current solutions.
    pub fn set_final_aggregate(
        &mut self,
        function: AggregateFunction,
        argument: Option<String>,
        alias: String,
    ) {
        let over_subquery = self.has_solution_modifiers();
        self.aggregate = Some(FinalAggregate {
            item: SelectItem::Aggregate {
                function,
                argument,
                alias,
            },
            over_subquery,
        });
    }

    /// Looks for one solution matching the filter.
    ///
    /// Once solution modifiers are set, the filter applies to the solutions of a sub-select
    /// so that it only sees the selected page.
    pub fn find_counterexample(&mut self, filter: FilterExpression) {
        if self.has_solution_modifiers() {
            self.counterexample = Some(filter);
        } else {
            self.add_filter(filter);
            self.apply_take(1);
        }
    }

    pub fn add_from_graph(&mut self, graph: impl Into<String>) {
        let graph = graph.into();
        if !self.from_graphs.contains(&graph) {
            self.from_graphs.push(graph);
        }
    }

    /// Ordering keys as rendered in the `ORDER BY` clause.
    pub fn ordering(&self) -> Vec<(String, bool)> {
        self.order_by
            .iter()
            .map(|(expression, descending)| {
                let mut output = String::new();
                self.write_expression(expression, &mut output);
                (output, *descending)
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        match &self.aggregate {
            Some(aggregate) => {
                output.push_str("SELECT ");
                self.write_select_item(&aggregate.item, &mut output);
                output.push('\n');
                self.write_from(&mut output);
                if aggregate.over_subquery {
                    output.push_str("WHERE {\n{\n");
                    self.write_select(&mut output);
                    output.push_str("}\n}\n");
                } else {
                    self.write_where(&mut output);
                }
            }
            None if self.counterexample.is_some() => {
                output.push_str("SELECT *\n");
                self.write_from(&mut output);
                output.push_str("WHERE {\n{\n");
                self.write_select(&mut output);
                output.push_str("}\n");
                if let Some(filter) = &self.counterexample {
                    output.push_str("FILTER (");
                    self.write_expression(filter, &mut output);
                    output.push_str(")\n");
                }
                output.push_str("}\nLIMIT 1\n");
            }
            None => {
                let mut select = String::new();
                self.write_select(&mut select);
                let (head, tail) = select.split_once('\n').unwrap_or((&select, ""));
                output.push_str(head);
                output.push('\n');
                self.write_from(&mut output);
                output.push_str(tail);
            }
        }
        output
    }

    fn write_from(&self, output: &mut String) {
        for graph in &self.from_graphs {
            let _ = writeln!(output, "FROM <{graph}>");
        }
    }

    /// Writes the query without its dataset clause.
    fn write_select(&self, output: &mut String) {
        output.push_str("SELECT ");
        if self.distinct {
            output.push_str("DISTINCT ");
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                output.push(' ');
            }
            self.write_select_item(item, output);
        }
        if self.select.is_empty() {
            output.push('*');
        } else if let Some(filter) = &self.counterexample {
            // The outer filter needs the variables it refers to
            let mut variables = Vec::new();
            collect_filter_variables(filter, &mut variables);
            let mut projected = self
                .select
                .iter()
                .filter_map(|item| match item {
                    SelectItem::Variable(name) => Some(self.resolve_alias(name).to_owned()),
                    SelectItem::Aggregate { .. } => None,
                })
                .collect::<Vec<_>>();
            for variable in variables {
                let variable = self.resolve_alias(&variable).to_owned();
                if self.constant_value(&variable).is_none() && !projected.contains(&variable) {
                    let _ = write!(output, " ?{variable}");
                    projected.push(variable);
                }
            }
        }
        output.push('\n');
        self.write_where(output);
        if !self.group_by.is_empty() {
            output.push_str("GROUP BY");
            for variable in &self.group_by {
                output.push(' ');
                self.write_term(&PatternTerm::Variable(variable.clone()), output);
            }
            output.push('\n');
        }
        if !self.order_by.is_empty() {
            output.push_str("ORDER BY");
            for (expression, descending) in &self.order_by {
                output.push(' ');
                if *descending {
                    output.push_str("DESC(");
                    self.write_expression(expression, output);
                    output.push(')');
                } else if matches!(expression, FilterExpression::Term(_)) {
                    self.write_expression(expression, output);
                } else {
                    output.push('(');
                    self.write_expression(expression, output);
                    output.push(')');
                }
            }
            output.push('\n');
        }
        if self.offset > 0 {
            let _ = writeln!(output, "OFFSET {}", self.offset);
        }
        if let Some(limit) = self.limit {
            let _ = writeln!(output, "LIMIT {limit}");
        }
    }

    fn write_select_item(&self, item: &SelectItem, output: &mut String) {
        match item {
            SelectItem::Variable(name) => {
                self.write_term(&PatternTerm::Variable(name.clone()), output)
            }
            SelectItem::Aggregate {
                function,
                argument,
                alias,
            } => {
                let _ = write!(output, "({}(", function.sparql_name());
                match argument {
                    Some(argument) => {
                        self.write_term(&PatternTerm::Variable(argument.clone()), output)
                    }
                    None => output.push('*'),
                }
                let _ = write!(output, ") AS ?{alias})");
            }
        }
    }

    fn write_where(&self, output: &mut String) {
        output.push_str("WHERE {\n");
        if let Some(root) = self.scopes.first() {
            self.write_group_elements(&root.pattern, "\n", output);
        }
        output.push_str("}\n");
    }

    /// Patterns first, in insertion order, filters last.
    fn write_group_elements(&self, pattern: &GroupPattern, separator: &str, output: &mut String) {
        let patterns = pattern
            .elements
            .iter()
            .filter(|e| !matches!(e, GroupElement::Filter(_)));
        let filters = pattern
            .elements
            .iter()
            .filter(|e| matches!(e, GroupElement::Filter(_)));
        for element in patterns.chain(filters) {
            match element {
                GroupElement::Triple(triple) => {
                    self.write_triple(triple, output);
                    output.push_str(" .");
                }
                GroupElement::Optional(triple) => {
                    output.push_str("OPTIONAL { ");
                    self.write_triple(triple, output);
                    output.push_str(" . }");
                }
                GroupElement::Filter(filter) => {
                    output.push_str("FILTER (");
                    self.write_expression(filter, output);
                    output.push(')');
                }
            }
            output.push_str(separator);
        }
    }

    fn write_triple(&self, triple: &TriplePattern, output: &mut String) {
        self.write_term(&triple.subject, output);
        output.push(' ');
        if triple.predicate == PatternTerm::Iri(rdf::TYPE.as_str().into()) {
            output.push('a');
        } else {
            self.write_term(&triple.predicate, output);
        }
        output.push(' ');
        self.write_term(&triple.object, output);
    }

    fn write_term(&self, term: &PatternTerm, output: &mut String) {
        match self.canonical(term) {
            PatternTerm::Variable(name) => {
                output.push('?');
                output.push_str(&name);
            }
            PatternTerm::Iri(iri) => {
                let _ = write!(output, "<{iri}>");
            }
            PatternTerm::Literal(literal) => output.push_str(&literal),
        }
    }

    fn write_expression(&self, expression: &FilterExpression, output: &mut String) {
        match expression {
            FilterExpression::Term(term) => self.write_term(term, output),
            FilterExpression::Binary {
                operator,
                left,
                right,
            } => {
                output.push('(');
                self.write_expression(left, output);
                let _ = write!(output, " {operator} ");
                self.write_expression(right, output);
                output.push(')');
            }
            FilterExpression::Not(inner) => {
                output.push_str("!(");
                self.write_expression(inner, output);
                output.push(')');
            }
            FilterExpression::Function { name, arguments } => {
                output.push_str(name);
                output.push('(');
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        output.push_str(", ");
                    }
                    self.write_expression(argument, output);
                }
                output.push(')');
            }
            FilterExpression::In { needle, haystack } => {
                output.push('(');
                self.write_expression(needle, output);
                output.push_str(" IN (");
                for (i, value) in haystack.iter().enumerate() {
                    if i > 0 {
                        output.push_str(", ");
                    }
                    self.write_expression(value, output);
                }
                output.push_str("))");
            }
            FilterExpression::Exists { negated, pattern } => {
                if *negated {
                    output.push_str("NOT ");
                }
                output.push_str("EXISTS { ");
                self.write_group_elements(pattern, " ", output);
                output.push('}');
            }
            FilterExpression::Bound(variable) => {
                // A variable replaced by a constant is always bound
                if self.constant_value(variable).is_some() {
                    output.push_str("true");
                } else {
                    output.push_str("BOUND(");
                    self.write_term(&PatternTerm::Variable(variable.clone()), output);
                    output.push(')');
                }
            }
        }
    }
}

fn collect_filter_variables(expression: &FilterExpression, variables: &mut Vec<String>) {
    match expression {
        FilterExpression::Term(PatternTerm::Variable(name)) | FilterExpression::Bound(name) => {
            variables.push(name.clone());
        }
        FilterExpression::Term(_) => (),
        FilterExpression::Binary { left, right, .. } => {
            collect_filter_variables(left, variables);
            collect_filter_variables(right, variables);
        }
        FilterExpression::Not(inner) => collect_filter_variables(inner, variables),
        FilterExpression::Function { arguments, .. } => {
            for argument in arguments {
                collect_filter_variables(argument, variables);
            }
        }
        FilterExpression::In { needle, haystack } => {
            collect_filter_variables(needle, variables);
            for value in haystack {
                collect_filter_variables(value, variables);
            }
        }
        FilterExpression::Exists { pattern, .. } => {
            for element in &pattern.elements {
                match element {
                    GroupElement::Triple(triple) | GroupElement::Optional(triple) => {
                        for term in [&triple.subject, &triple.predicate, &triple.object] {
                            if let PatternTerm::Variable(name) = term {
                                variables.push(name.clone());
                            }
                        }
                    }
                    GroupElement::Filter(filter) => collect_filter_variables(filter, variables),
                }
            }
        }
    }
}

fn resolve_alias<'a>(aliases: &'a FxHashMap<String, String>, mut variable: &'a str) -> &'a str {
    while let Some(target) = aliases.get(variable) {
        variable = target;
    }
    variable
}
