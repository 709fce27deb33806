use crate::cli::{Args, Command};
use anyhow::Context;
use clap::Parser;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sparmap::SparqlUpdatableStore;
use sparmap::model::Transaction;
use sparmap::query::{MappingTable, QueryModel, SparqlQueryCompiler};
use sparmap::update::compile_transaction;
use spargebra::SparqlParser;
use std::fs::File;
use std::io::{BufReader, Read, Write, stdin, stdout};
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let matches = Args::parse();
    match matches.command {
        Command::CompileUpdate { file, parse } => {
            let transaction: Transaction = read_json(file.as_deref())?;
            let mut sparql = compile_transaction(&transaction)?;
            if parse {
                sparql = SparqlParser::new()
                    .parse_update(&sparql)
                    .with_context(|| format!("The generated update is not valid:\n{sparql}"))?
                    .to_string();
                sparql.push('\n');
            }
            write_output(&sparql)
        }
        Command::CompileQuery {
            mapping,
            file,
            dataset_graph,
        } => {
            let mappings: MappingTable = read_json(Some(&mapping))?;
            let query: QueryModel = read_json(file.as_deref())?;
            let context = SparqlQueryCompiler::new(&mappings)
                .with_dataset_graphs(dataset_graph)
                .compile(&query)?;
            write_output(&context.sparql_query)
        }
        Command::Evaluate {
            mapping,
            transaction,
            file,
            dataset_graph,
        } => {
            let mappings: MappingTable = read_json(Some(&mapping))?;
            let query: QueryModel = read_json(Some(&file))?;
            let store = SparqlUpdatableStore::in_memory()?;
            for path in &transaction {
                let transaction: Transaction = read_json(Some(path))?;
                store
                    .apply_transaction(&transaction)
                    .with_context(|| format!("Failed to apply {}", path.display()))?;
                debug!(path = %path.display(), "applied transaction");
            }
            let context = SparqlQueryCompiler::new(&mappings).compile(&query)?;
            let result = store.execute_query(&context, &dataset_graph)?;
            let mut output = String::new();
            if let Some(exists) = result.exists() {
                output.push_str(if exists { "true\n" } else { "false\n" });
            } else {
                for solution in result.solutions() {
                    let row = solution
                        .iter()
                        .map(|(variable, value)| {
                            (variable.as_str().to_owned(), Value::String(value.to_string()))
                        })
                        .collect::<Map<_, _>>();
                    output.push_str(&serde_json::to_string(&row)?);
                    output.push('\n');
                }
            }
            write_output(&output)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: Option<&Path>) -> anyhow::Result<T> {
    if let Some(path) = path {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))
    } else {
        let mut input = String::new();
        stdin().lock().read_to_string(&mut input)?;
        serde_json::from_str(&input).context("Failed to parse the standard input")
    }
}

fn write_output(output: &str) -> anyhow::Result<()> {
    let mut stdout = stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
