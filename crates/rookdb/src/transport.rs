//! Request abstraction between the session and the server.
//!
//! The session never talks HTTP directly; it hands a [`Command`] to a
//! [`RequestExecutor`] and interprets the [`CommandResult`]. Tests plug
//! in an in-memory executor with canned responses.

use crate::{error::ExecutionError, query::IndexQuery};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

///
/// Command
///
/// One server round trip. `MultiQuery` carries every pending lazy query
/// in FIFO order so the whole batch costs a single request.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Query(IndexQuery),
    GetDocuments { ids: Vec<String>, includes: Vec<String> },
    MultiQuery(Vec<IndexQuery>),
}

///
/// CommandResult
///

#[derive(Clone, Debug, PartialEq)]
pub enum CommandResult {
    Query(QueryResult),
    GetDocuments(GetDocumentsResult),
    MultiQuery(Vec<QueryResult>),
}

impl CommandResult {
    pub(crate) fn into_query(self) -> Result<QueryResult, ExecutionError> {
        match self {
            Self::Query(result) => Ok(result),
            _ => Err(ExecutionError::UnexpectedResponse { expected: "Query" }),
        }
    }

    pub(crate) fn into_documents(self) -> Result<GetDocumentsResult, ExecutionError> {
        match self {
            Self::GetDocuments(result) => Ok(result),
            _ => Err(ExecutionError::UnexpectedResponse {
                expected: "GetDocuments",
            }),
        }
    }

    pub(crate) fn into_multi_query(self) -> Result<Vec<QueryResult>, ExecutionError> {
        match self {
            Self::MultiQuery(results) => Ok(results),
            _ => Err(ExecutionError::UnexpectedResponse {
                expected: "MultiQuery",
            }),
        }
    }
}

///
/// RequestExecutor
///
/// The single seam to the server. Implementations own retry, topology,
/// and encoding concerns; the session only sees commands and results.
///

pub trait RequestExecutor {
    fn execute(&self, command: &Command) -> Result<CommandResult, ExecutionError>;
}

///
/// QueryResult
///
/// Server response to a query. `Results` are raw documents; `Includes`
/// are keyed by document id and registered with the session before the
/// results are materialized.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct QueryResult {
    pub results: Vec<Value>,
    pub includes: BTreeMap<String, Value>,
    pub total_results: i64,
    pub skipped_results: i64,
    pub is_stale: bool,
    pub duration_in_ms: i64,
    pub index_name: String,
}

///
/// GetDocumentsResult
///
/// Server response to a documents-by-id request. `Results` is positional
/// against the requested ids; a missing document appears as `null`.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetDocumentsResult {
    pub results: Vec<Value>,
    pub includes: BTreeMap<String, Value>,
}
