use crate::{
    error::QueryError,
    query::IndexQuery,
    session::{DocumentSession, register_query_result},
    transport::{Command, QueryResult},
};
use serde::de::DeserializeOwned;

///
/// QueryOperation
///
/// A frozen query plus, after execution, its server response. A builder
/// compiles into at most one of these; re-executing it is a no-op that
/// reuses the cached result.
///

pub struct QueryOperation {
    index_query: IndexQuery,
    disable_tracking: bool,
    result: Option<QueryResult>,
}

impl QueryOperation {
    #[must_use]
    pub const fn new(index_query: IndexQuery, disable_tracking: bool) -> Self {
        Self {
            index_query,
            disable_tracking,
            result: None,
        }
    }

    #[must_use]
    pub const fn index_query(&self) -> &IndexQuery {
        &self.index_query
    }

    #[must_use]
    pub const fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }

    /// Run the query once; the response is cached and folded into the
    /// session's identity map.
    pub fn execute(&mut self, session: &DocumentSession) -> Result<(), QueryError> {
        if self.result.is_some() {
            return Ok(());
        }

        let result = session
            .execute(&Command::Query(self.index_query.clone()))?
            .into_query()?;
        self.set_result(session, result);
        Ok(())
    }

    pub fn set_result(&mut self, session: &DocumentSession, result: QueryResult) {
        register_query_result(session, &result, self.disable_tracking);
        self.result = Some(result);
    }

    /// Materialize the cached results into `T`.
    pub fn complete<T: DeserializeOwned>(&self) -> Result<Vec<T>, QueryError> {
        let Some(result) = &self.result else {
            return Ok(Vec::new());
        };

        result
            .results
            .iter()
            .map(|document| serde_json::from_value(document.clone()).map_err(QueryError::from))
            .collect()
    }
}
