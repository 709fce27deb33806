#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
pub mod history;
pub mod model;
pub mod processor;
pub mod query;
mod store;
pub mod update;

pub use crate::error::{
    ProcessorError, QueryCompilationError, StoreError, TransactionPreconditionsFailed,
    UnsupportedExpressionError,
};
pub use crate::processor::{OxigraphProcessor, QueryOutcome, QueryProcessor, UpdateProcessor};
pub use crate::store::{SparqlResult, SparqlUpdatableStore};
