use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "sparmap")]
/// Compiles entity transactions and object queries to SPARQL
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a JSON transaction into a SPARQL update
    CompileUpdate {
        /// File containing the transaction
        ///
        /// If no file is given, stdin is used.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        /// Check that the generated update is valid SPARQL and print it in its normalized form
        #[arg(long)]
        parse: bool,
    },
    /// Compile a JSON object query into a SPARQL query
    CompileQuery {
        /// File containing the mapping of the entity types to RDF
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        mapping: PathBuf,
        /// File containing the query model
        ///
        /// If no file is given, stdin is used.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        /// Graph to query instead of the default graph
        ///
        /// Can be repeated.
        #[arg(long, value_hint = ValueHint::Url)]
        dataset_graph: Vec<String>,
    },
    /// Apply transactions to an in-memory store and evaluate an object query on it
    ///
    /// The solutions are written to stdout, one JSON object per line.
    Evaluate {
        /// File containing the mapping of the entity types to RDF
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        mapping: PathBuf,
        /// Transaction file(s) applied in order before the evaluation
        #[arg(short, long, num_args = 0.., value_hint = ValueHint::FilePath)]
        transaction: Vec<PathBuf>,
        /// File containing the query model
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Graph to query instead of the default graph
        #[arg(long, value_hint = ValueHint::Url)]
        dataset_graph: Vec<String>,
    },
}
