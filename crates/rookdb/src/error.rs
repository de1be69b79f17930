use thiserror::Error as ThisError;

///
/// QueryError
///
/// Umbrella error for query construction, validation, execution, and
/// result materialization. Construction and validation failures are
/// raised before any network activity.
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error("{0}")]
    Construction(#[from] ConstructionError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Execution(#[from] ExecutionError),
    #[error("{0}")]
    ResultShape(#[from] ResultShapeError),
    #[error("failed to materialize result document: {0}")]
    Materialize(#[from] serde_json::Error),
}

///
/// ConstructionError
///
/// Invariant violations while building a query. All variants surface at
/// the mutator call site, except `ClauseDepthMismatch` which can only be
/// detected when the query text is rendered.
///

#[remain::sorted]
#[derive(Debug, ThisError)]
pub enum ConstructionError {
    #[error("boost factor must be a positive number")]
    BoostNotPositive,

    #[error("a clause was not closed correctly within this query, current clause depth = {depth}")]
    ClauseDepthMismatch { depth: i32 },

    #[error("default operator can only be set before any where clause is added")]
    DefaultOperatorAfterWhere,

    #[error("this query is already a distinct query")]
    DistinctAlreadyApplied,

    #[error("cannot add {operator}, previous token was already an operator token")]
    DoubleOperator { operator: &'static str },

    #[error("the parameter {name} was already added")]
    DuplicateParameter { name: String },

    #[error(
        "field '{field}' cannot be used when static index '{index}' is queried; \
         dynamic spatial fields can only be used with dynamic queries"
    )]
    DynamicSpatialOnStaticIndex { field: String, index: String },

    #[error("expected a where predicate as the last token")]
    ExpectedWherePredicate,

    #[error("aggregation query can select only facets, found another select token")]
    FacetConflict,

    #[error("fuzzy distance must be between 0.0 and 1.0")]
    FuzzyOutOfRange,

    #[error("group by only works with dynamic queries")]
    GroupByRequiresDynamicQuery,

    #[error("cannot add intersect at this point")]
    MisplacedIntersect,

    #[error("missing where clause")]
    MissingWhereClause,

    #[error("there is no open more-like-this scope to add tokens to")]
    MoreLikeThisNotActive,

    #[error("proximity distance must be a positive number")]
    ProximityNotPositive,

    #[error(
        "raw query was already set; cannot modify this query with structured \
         operations such as where, select, order by, or group by"
    )]
    RawQueryConflict,

    #[error("cannot add suggest when {clause} statements are present")]
    SuggestConflict { clause: &'static str },
}

///
/// ValidationError
///

#[derive(Debug, ThisError)]
pub enum ValidationError {
    #[error("field name cannot be empty")]
    EmptyFieldName,
}

///
/// ExecutionError
///
/// Failures while dispatching a compiled request. Transport errors pass
/// through unchanged; this layer never retries.
///

#[remain::sorted]
#[derive(Debug, ThisError)]
pub enum ExecutionError {
    #[error(
        "maximum number of requests ({limit}) reached for this session; \
         sessions are expected to be short lived"
    )]
    MaxRequests { limit: u32 },

    #[error("transport: {message}")]
    Transport { message: String },

    #[error("transport returned an unexpected response shape, expected {expected}")]
    UnexpectedResponse { expected: &'static str },
}

///
/// ResultShapeError
///
/// Wrong result cardinality for `first`/`single` terminals.
///

#[derive(Debug, ThisError)]
pub enum ResultShapeError {
    #[error("expected at least one result")]
    Empty,

    #[error("expected a single result, got {count}")]
    NotSingle { count: usize },
}
