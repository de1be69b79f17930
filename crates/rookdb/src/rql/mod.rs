//! RQL token model.
//!
//! Every query fragment is a [`QueryToken`]; rendering is side-effect
//! free and depends only on the token's own data plus the immediately
//! preceding token (for separator decisions).

pub mod field;
pub mod token;
pub mod where_token;

pub use field::{DOCUMENT_ID_FIELD_NAME, escape_if_necessary};
pub use token::{
    DeclareToken, DistanceShape, FacetAggregation, FacetAggregationToken, FacetToken,
    FieldsToFetchToken, FromToken, GroupByMethod, GroupByToken, LoadToken, MoreLikeThisToken,
    OrderByToken, OrderingType, QueryOperator, QueryToken, SuggestToken, write_token_run,
};
pub use where_token::{
    DEFAULT_SPATIAL_DISTANCE_ERROR_PCT, MethodCallKind, MethodCallToken, SearchOperator,
    ShapeToken, SpatialUnits, WhereOperator, WhereOptions, WhereToken,
};

#[cfg(test)]
mod tests;
