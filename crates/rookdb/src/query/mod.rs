//! Query construction: the builder state machine, parameter binding,
//! and the compiled request shape.

pub mod builder;
pub mod index_query;
pub mod params;

pub use builder::QueryBuilder;
pub use index_query::{DEFAULT_WAIT_TIMEOUT, IndexQuery, QueryStatistics};
pub use params::{Parameters, QueryValue, WhereParams};
