//! Client-side query engine for RookDB: a fluent, typed query builder that
//! compiles to RQL text, plus the session layer that executes compiled
//! queries, tracks loaded documents, and batches lazy operations.

// public exports are one module level down
pub mod conventions;
pub mod error;
pub mod query;
pub mod rql;
pub mod session;
pub mod transport;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No executors, token internals, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        conventions::DocumentConventions,
        error::QueryError,
        query::{IndexQuery, QueryStatistics, QueryValue},
        rql::QueryOperator,
        session::{DocumentQuery, DocumentSession, Lazy},
        transport::RequestExecutor,
    };
}
