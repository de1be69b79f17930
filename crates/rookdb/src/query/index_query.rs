use crate::{query::Parameters, transport::QueryResult};
use serde::{Serialize, Serializer};
use time::Duration;

/// Default wait when non-stale results are requested without an explicit
/// timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::seconds(15);

///
/// IndexQuery
///
/// A compiled query: immutable text plus its bound parameters and
/// paging/staleness knobs. Built once per execution by the query
/// builder; the transport serializes it as the request body.
///

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexQuery {
    pub query: String,
    pub query_parameters: Parameters,
    pub start: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    pub wait_for_non_stale_results: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub wait_for_non_stale_results_timeout: Duration,
    pub disable_caching: bool,
}

impl IndexQuery {
    #[must_use]
    pub fn new(query: String, query_parameters: Parameters) -> Self {
        Self {
            query,
            query_parameters,
            start: 0,
            page_size: None,
            wait_for_non_stale_results: false,
            wait_for_non_stale_results_timeout: DEFAULT_WAIT_TIMEOUT,
            disable_caching: false,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(value.whole_milliseconds() as i64)
}

///
/// QueryStatistics
///
/// Server-reported metadata for the most recent execution of a query.
/// Registered up front and filled in after the round trip.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryStatistics {
    pub is_stale: bool,
    pub duration_ms: i64,
    pub total_results: i64,
    pub skipped_results: i64,
    pub index_name: String,
}

impl QueryStatistics {
    pub(crate) fn update_from(&mut self, result: &QueryResult) {
        self.is_stale = result.is_stale;
        self.duration_ms = result.duration_in_ms;
        self.total_results = result.total_results;
        self.skipped_results = result.skipped_results;
        self.index_name = result.index_name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_pascal_case_and_omits_unset_page_size() {
        let query = IndexQuery::new("from Users".to_string(), Parameters::new());
        let json = serde_json::to_value(&query).unwrap();

        assert_eq!(json["Query"], "from Users");
        assert_eq!(json["Start"], 0);
        assert!(json.get("PageSize").is_none());
        assert_eq!(json["WaitForNonStaleResultsTimeout"], 15_000);
    }

    #[test]
    fn statistics_copy_server_fields() {
        let result = QueryResult {
            is_stale: true,
            duration_in_ms: 12,
            total_results: 3,
            skipped_results: 1,
            index_name: "Auto/Users".to_string(),
            ..QueryResult::default()
        };

        let mut stats = QueryStatistics::default();
        stats.update_from(&result);

        assert!(stats.is_stale);
        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.index_name, "Auto/Users");
    }
}
