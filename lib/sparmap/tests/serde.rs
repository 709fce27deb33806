#![cfg(all(test, feature = "serde"))]
#![allow(clippy::panic_in_result_fn)]

use serde_json::json;
use sparmap::history::{CommitPoint, CommitPointResponse};
use sparmap::model::{GraphSelector, Position, Transaction, Triple};
use sparmap::query::{
    EntityMapping, Expression, MappingTable, Property, PropertyHint, QueryModel,
    SparqlQueryCompiler, ValueType,
};
use std::error::Error;
use time::macros::datetime;

#[test]
fn test_transaction_from_json() -> Result<(), Box<dyn Error>> {
    let transaction: Transaction = serde_json::from_value(json!({
        "delete_patterns": [{
            "subject": {"concrete": "http://example.com/s"},
            "predicate": "wildcard",
            "object": "wildcard",
            "graph": "any"
        }],
        "inserts": [{
            "subject": {"concrete": "http://example.com/s"},
            "predicate": {"concrete": "http://example.com/p"},
            "object": {"concrete": "chat"},
            "is_literal": true,
            "lang_code": "fr",
            "graph": {"named": "http://example.com/g"}
        }],
        "update_graph": "http://example.com/u"
    }))?;
    assert_eq!(
        transaction,
        Transaction::new()
            .with_update_graph("http://example.com/u")
            .with_delete_pattern(Triple {
                graph: GraphSelector::Any,
                ..Triple::new("http://example.com/s", Position::Wildcard, Position::Wildcard)
            })
            .with_insert(
                Triple::literal("http://example.com/s", "http://example.com/p", "chat")
                    .with_lang_code("fr")
                    .in_graph("http://example.com/g")
            )
    );
    Ok(())
}

#[test]
fn test_query_model_from_json() -> Result<(), Box<dyn Error>> {
    let mappings: MappingTable = serde_json::from_value(json!({"types": {"Person": {
        "type_uri": "http://example.com/Person",
        "identifier_prefix": "http://example.com/people/",
        "properties": {
            "Age": {"mapping_type": "data_property", "predicate_uri": "http://example.com/age"}
        }
    }}}))?;
    assert_eq!(
        mappings,
        MappingTable::new().with_entity_type(
            "Person",
            EntityMapping::new("http://example.com/Person", "http://example.com/people/")
                .with_property("Age", PropertyHint::data_property("http://example.com/age")),
        )
    );

    let query: QueryModel = serde_json::from_value(json!({
        "sources": [{"item_name": "p", "from": {"entities": {"entity_type": "Person"}}}],
        "main_source": 0,
        "body": [{"where": {"binary": {
            "operator": "greater",
            "left": {"member": {
                "target": {"query_source": 0},
                "property": {"declaring_type": "Person", "name": "Age", "value_type": "integer"}
            }},
            "right": {"constant": {"integer": 30}}
        }}}],
        "select": {"query_source": 0}
    }))?;
    let mut expected = QueryModel::new("p", "Person");
    let p = expected.main_source();
    expected.filter(
        Expression::source(p)
            .member(Property::new("Person", "Age", ValueType::Integer))
            .gt(Expression::constant(30)),
    );
    assert_eq!(query, expected);
    assert!(
        SparqlQueryCompiler::new(&mappings)
            .compile(&query)?
            .sparql_query
            .contains("FILTER ((?age > 30))")
    );
    Ok(())
}

#[test]
fn test_commit_point_response_to_json() -> Result<(), Box<dyn Error>> {
    let response = CommitPointResponse::from(CommitPoint {
        id: 3,
        store_name: "people".into(),
        commit_time: datetime!(2024-05-01 10:30:00 UTC),
        job_id: "job-3".into(),
    });
    assert_eq!(
        serde_json::to_value(&response)?,
        json!({
            "id": 3,
            "store_name": "people",
            "commit_time": "2024-05-01T10:30:00Z",
            "job_id": "job-3"
        })
    );
    Ok(())
}
