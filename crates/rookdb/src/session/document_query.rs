use crate::{
    error::{QueryError, ResultShapeError},
    query::{IndexQuery, QueryBuilder, QueryStatistics, QueryValue, WhereParams},
    rql::{FacetToken, GroupByMethod, OrderingType, QueryOperator, SearchOperator, SpatialUnits, WhereOperator},
    session::{
        DocumentSession, QueryOperation,
        lazy::{Lazy, PendingLazyOperation},
        register_query_result,
    },
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{cell::RefCell, marker::PhantomData, rc::Rc};
use time::Duration;

/// Hook invoked on the compiled request just before it is dispatched.
pub type BeforeQueryListener = Box<dyn Fn(&mut IndexQuery)>;

///
/// DocumentQuery
///
/// Typed fluent query over one session. Mutators consume and return the
/// query so construction chains; the first terminal freezes the builder
/// into a [`QueryOperation`] and later terminals reuse it.
///

pub struct DocumentQuery<'a, T> {
    session: &'a DocumentSession,
    builder: QueryBuilder,
    operation: Option<QueryOperation>,
    statistics_targets: Vec<Rc<RefCell<QueryStatistics>>>,
    // Tombstoned on removal so handles stay stable.
    before_query_listeners: Vec<Option<BeforeQueryListener>>,
    disable_tracking: bool,
    marker: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> DocumentQuery<'a, T> {
    pub(crate) fn from_collection(session: &'a DocumentSession, collection: String) -> Self {
        Self::with_builder(
            session,
            QueryBuilder::from_collection(collection, Rc::clone(session.conventions())),
        )
    }

    pub(crate) fn from_index(session: &'a DocumentSession, index: String) -> Self {
        Self::with_builder(
            session,
            QueryBuilder::from_index(index, Rc::clone(session.conventions())),
        )
    }

    fn with_builder(session: &'a DocumentSession, builder: QueryBuilder) -> Self {
        Self {
            session,
            builder,
            operation: None,
            statistics_targets: Vec::new(),
            before_query_listeners: Vec::new(),
            disable_tracking: false,
            marker: PhantomData,
        }
    }

    pub(crate) fn raw(&mut self, query: &str) -> Result<(), QueryError> {
        self.builder.raw_query(query.to_string())
    }

    // ------------------------------------------------------------------
    // predicates
    // ------------------------------------------------------------------

    pub fn where_equals(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder
            .where_equals(WhereParams::new(field, value.into_value()))?;
        Ok(self)
    }

    pub fn where_equals_exact(
        mut self,
        field: &str,
        value: impl QueryValue,
    ) -> Result<Self, QueryError> {
        let params = WhereParams {
            is_exact: true,
            ..WhereParams::new(field, value.into_value())
        };
        self.builder.where_equals(params)?;
        Ok(self)
    }

    pub fn where_not_equals(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder
            .where_not_equals(WhereParams::new(field, value.into_value()))?;
        Ok(self)
    }

    pub fn where_in(mut self, field: &str, values: Vec<Value>) -> Result<Self, QueryError> {
        self.builder.where_in(field, values, false)?;
        Ok(self)
    }

    pub fn where_all_in(mut self, field: &str, values: Vec<Value>) -> Result<Self, QueryError> {
        self.builder.where_all_in(field, values)?;
        Ok(self)
    }

    pub fn contains_any(mut self, field: &str, values: Vec<Value>) -> Result<Self, QueryError> {
        self.builder.contains_any(field, values)?;
        Ok(self)
    }

    pub fn contains_all(mut self, field: &str, values: Vec<Value>) -> Result<Self, QueryError> {
        self.builder.contains_all(field, values)?;
        Ok(self)
    }

    pub fn where_starts_with(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder.where_starts_with(field, value.into_value())?;
        Ok(self)
    }

    pub fn where_ends_with(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder.where_ends_with(field, value.into_value())?;
        Ok(self)
    }

    pub fn where_between(
        mut self,
        field: &str,
        start: impl QueryValue,
        end: impl QueryValue,
    ) -> Result<Self, QueryError> {
        self.builder
            .where_between(field, start.into_value(), end.into_value(), false)?;
        Ok(self)
    }

    pub fn where_greater_than(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder
            .where_greater_than(field, value.into_value(), false)?;
        Ok(self)
    }

    pub fn where_greater_than_or_equal(
        mut self,
        field: &str,
        value: impl QueryValue,
    ) -> Result<Self, QueryError> {
        self.builder
            .where_greater_than_or_equal(field, value.into_value(), false)?;
        Ok(self)
    }

    pub fn where_less_than(mut self, field: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder
            .where_less_than(field, value.into_value(), false)?;
        Ok(self)
    }

    pub fn where_less_than_or_equal(
        mut self,
        field: &str,
        value: impl QueryValue,
    ) -> Result<Self, QueryError> {
        self.builder
            .where_less_than_or_equal(field, value.into_value(), false)?;
        Ok(self)
    }

    pub fn where_exists(mut self, field: &str) -> Result<Self, QueryError> {
        self.builder.where_exists(field)?;
        Ok(self)
    }

    pub fn where_regex(mut self, field: &str, pattern: &str) -> Result<Self, QueryError> {
        self.builder.where_regex(field, pattern)?;
        Ok(self)
    }

    pub fn where_lucene(mut self, field: &str, where_clause: &str) -> Result<Self, QueryError> {
        self.builder.where_lucene(field, where_clause)?;
        Ok(self)
    }

    pub fn search(mut self, field: &str, terms: &str) -> Result<Self, QueryError> {
        self.builder.search(field, terms, SearchOperator::Or)?;
        Ok(self)
    }

    pub fn search_with_operator(
        mut self,
        field: &str,
        terms: &str,
        operator: SearchOperator,
    ) -> Result<Self, QueryError> {
        self.builder.search(field, terms, operator)?;
        Ok(self)
    }

    pub fn where_equals_cmp_xchg(
        mut self,
        field: &str,
        key: &str,
        access_path: Option<&str>,
    ) -> Result<Self, QueryError> {
        self.builder.where_equals_cmp_xchg(
            field,
            vec![Value::String(key.to_string())],
            access_path.map(str::to_string),
            false,
        )?;
        Ok(self)
    }

    pub fn spatial_within_circle(
        mut self,
        field: &str,
        radius: f64,
        latitude: f64,
        longitude: f64,
        units: Option<SpatialUnits>,
        distance_error_pct: f64,
    ) -> Result<Self, QueryError> {
        self.builder
            .spatial_within_circle(field, radius, latitude, longitude, units, distance_error_pct)?;
        Ok(self)
    }

    pub fn spatial_wkt(
        mut self,
        field: &str,
        relation: WhereOperator,
        shape_wkt: &str,
        distance_error_pct: f64,
    ) -> Result<Self, QueryError> {
        self.builder
            .spatial_wkt(field, relation, shape_wkt, distance_error_pct)?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // structure and modifiers
    // ------------------------------------------------------------------

    #[must_use]
    pub fn not(mut self) -> Self {
        self.builder.negate_next();
        self
    }

    pub fn and_also(mut self) -> Result<Self, QueryError> {
        self.builder.and_also()?;
        Ok(self)
    }

    pub fn or_else(mut self) -> Result<Self, QueryError> {
        self.builder.or_else()?;
        Ok(self)
    }

    pub fn open_subclause(mut self) -> Result<Self, QueryError> {
        self.builder.open_subclause()?;
        Ok(self)
    }

    pub fn close_subclause(mut self) -> Result<Self, QueryError> {
        self.builder.close_subclause()?;
        Ok(self)
    }

    pub fn intersect(mut self) -> Result<Self, QueryError> {
        self.builder.intersect()?;
        Ok(self)
    }

    pub fn using_default_operator(mut self, operator: QueryOperator) -> Result<Self, QueryError> {
        self.builder.using_default_operator(operator)?;
        Ok(self)
    }

    pub fn boost(mut self, boost: f64) -> Result<Self, QueryError> {
        self.builder.boost(boost)?;
        Ok(self)
    }

    pub fn fuzzy(mut self, fuzzy: f64) -> Result<Self, QueryError> {
        self.builder.fuzzy(fuzzy)?;
        Ok(self)
    }

    pub fn proximity(mut self, proximity: u32) -> Result<Self, QueryError> {
        self.builder.proximity(proximity)?;
        Ok(self)
    }

    pub fn add_parameter(mut self, name: &str, value: impl QueryValue) -> Result<Self, QueryError> {
        self.builder.add_parameter(name, value.into_value())?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // ordering, grouping, projection
    // ------------------------------------------------------------------

    pub fn order_by(mut self, field: &str) -> Result<Self, QueryError> {
        self.builder.order_by(field, OrderingType::String)?;
        Ok(self)
    }

    pub fn order_by_as(mut self, field: &str, ordering: OrderingType) -> Result<Self, QueryError> {
        self.builder.order_by(field, ordering)?;
        Ok(self)
    }

    pub fn order_by_descending(mut self, field: &str) -> Result<Self, QueryError> {
        self.builder
            .order_by_descending(field, OrderingType::String)?;
        Ok(self)
    }

    pub fn order_by_score(mut self) -> Result<Self, QueryError> {
        self.builder.order_by_score(false)?;
        Ok(self)
    }

    pub fn random_ordering(mut self, seed: Option<&str>) -> Result<Self, QueryError> {
        self.builder.random_ordering(seed.map(str::to_string))?;
        Ok(self)
    }

    pub fn order_by_distance_point(
        mut self,
        field: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, QueryError> {
        self.builder
            .order_by_distance_point(field, latitude, longitude, false)?;
        Ok(self)
    }

    pub fn order_by_distance_wkt(mut self, field: &str, shape_wkt: &str) -> Result<Self, QueryError> {
        self.builder.order_by_distance_wkt(field, shape_wkt, false)?;
        Ok(self)
    }

    pub fn group_by(mut self, fields: &[&str]) -> Result<Self, QueryError> {
        let fields: Vec<(&str, GroupByMethod)> = fields
            .iter()
            .map(|field| (*field, GroupByMethod::None))
            .collect();
        self.builder.group_by(&fields)?;
        Ok(self)
    }

    #[must_use]
    pub fn add_group_by_alias(mut self, field: &str, projected_name: &str) -> Self {
        self.builder.add_group_by_alias(field, projected_name);
        self
    }

    pub fn group_by_key(
        mut self,
        field: Option<&str>,
        projected_name: Option<&str>,
    ) -> Result<Self, QueryError> {
        self.builder.group_by_key(field, projected_name)?;
        Ok(self)
    }

    pub fn group_by_sum(mut self, field: &str, projected_name: Option<&str>) -> Result<Self, QueryError> {
        self.builder.group_by_sum(field, projected_name)?;
        Ok(self)
    }

    pub fn group_by_count(mut self, projected_name: Option<&str>) -> Result<Self, QueryError> {
        self.builder.group_by_count(projected_name)?;
        Ok(self)
    }

    pub fn select_fields(mut self, fields: &[&str]) -> Result<Self, QueryError> {
        self.builder
            .select_fields(fields.iter().map(|field| (*field).to_string()).collect(), None)?;
        Ok(self)
    }

    pub fn distinct(mut self) -> Result<Self, QueryError> {
        self.builder.distinct()?;
        Ok(self)
    }

    pub fn include(mut self, path: &str) -> Result<Self, QueryError> {
        self.builder.include(path)?;
        Ok(self)
    }

    pub fn suggest_using(
        mut self,
        field: &str,
        terms: impl QueryValue,
        options: Option<Value>,
    ) -> Result<Self, QueryError> {
        self.builder.suggest_using(field, terms.into_value(), options)?;
        Ok(self)
    }

    pub fn aggregate_by(mut self, facet: FacetToken) -> Result<Self, QueryError> {
        self.builder.aggregate_by(facet)?;
        Ok(self)
    }

    pub fn aggregate_using(mut self, facet_setup_document_id: &str) -> Result<Self, QueryError> {
        self.builder.aggregate_using(facet_setup_document_id)?;
        Ok(self)
    }

    pub fn more_like_this_using_document(
        mut self,
        document: Value,
        options: Option<Value>,
    ) -> Result<Self, QueryError> {
        self.builder.more_like_this_using_document(document, options)?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // paging and execution flags
    // ------------------------------------------------------------------

    #[must_use]
    pub fn take(mut self, count: u32) -> Self {
        self.builder.take(count);
        self
    }

    #[must_use]
    pub fn skip(mut self, count: u32) -> Self {
        self.builder.skip(count);
        self
    }

    #[must_use]
    pub fn wait_for_non_stale_results(mut self, timeout: Option<Duration>) -> Self {
        self.builder.wait_for_non_stale_results(timeout);
        self
    }

    #[must_use]
    pub fn no_caching(mut self) -> Self {
        self.builder.no_caching();
        self
    }

    #[must_use]
    pub fn no_tracking(mut self) -> Self {
        self.disable_tracking = true;
        self
    }

    /// Register a statistics target refreshed after each execution.
    #[must_use]
    pub fn statistics(mut self, target: Rc<RefCell<QueryStatistics>>) -> Self {
        self.statistics_targets.push(target);
        self
    }

    /// Register a pre-dispatch hook; returns a handle for removal.
    pub fn add_before_query_listener(&mut self, listener: BeforeQueryListener) -> usize {
        self.before_query_listeners.push(Some(listener));
        self.before_query_listeners.len() - 1
    }

    pub fn remove_before_query_listener(&mut self, handle: usize) {
        if let Some(slot) = self.before_query_listeners.get_mut(handle) {
            *slot = None;
        }
    }

    /// Render the query text without executing it.
    pub fn to_rql(&self) -> Result<String, QueryError> {
        self.builder.to_rql()
    }

    // ------------------------------------------------------------------
    // terminals
    // ------------------------------------------------------------------

    pub fn get_results(&mut self) -> Result<Vec<T>, QueryError> {
        self.execute_query_operation(None)?;
        self.completed_results()
    }

    pub fn first(&mut self) -> Result<T, QueryError> {
        self.execute_query_operation(Some(1))?;
        let mut results: Vec<T> = self.completed_results()?;
        if results.is_empty() {
            return Err(ResultShapeError::Empty.into());
        }
        Ok(results.swap_remove(0))
    }

    pub fn single(&mut self) -> Result<T, QueryError> {
        self.execute_query_operation(Some(2))?;
        let mut results: Vec<T> = self.completed_results()?;
        if results.len() != 1 {
            return Err(ResultShapeError::NotSingle {
                count: results.len(),
            }
            .into());
        }
        Ok(results.swap_remove(0))
    }

    pub fn count(&mut self) -> Result<i64, QueryError> {
        self.execute_query_operation(Some(0))?;
        Ok(self.query_result().map_or(0, |result| result.total_results))
    }

    pub fn any(&mut self) -> Result<bool, QueryError> {
        if self.builder.is_distinct() {
            // Count with distinct would recount the unprojected set;
            // fetching a single result is the reliable probe.
            self.execute_query_operation(Some(1))?;
            return Ok(self
                .query_result()
                .is_some_and(|result| !result.results.is_empty()));
        }

        Ok(self.count()? > 0)
    }

    fn execute_query_operation(&mut self, internal_take: Option<u32>) -> Result<(), QueryError> {
        self.init_operation(internal_take)?;
        if let Some(operation) = &mut self.operation {
            operation.execute(self.session)?;
            if let Some(result) = operation.result() {
                for target in &self.statistics_targets {
                    target.borrow_mut().update_from(result);
                }
            }
        }
        Ok(())
    }

    /// Freeze the builder into a query operation, once.
    fn init_operation(&mut self, internal_take: Option<u32>) -> Result<(), QueryError> {
        if self.operation.is_some() {
            return Ok(());
        }

        if let Some(take) = internal_take {
            self.builder.apply_internal_take(take);
        }
        let mut index_query = self.builder.index_query()?;
        for listener in self.before_query_listeners.iter().flatten() {
            listener(&mut index_query);
        }
        self.operation = Some(QueryOperation::new(index_query, self.disable_tracking));
        Ok(())
    }

    fn completed_results<U: DeserializeOwned>(&self) -> Result<Vec<U>, QueryError> {
        match &self.operation {
            Some(operation) => operation.complete(),
            None => Ok(Vec::new()),
        }
    }

    fn query_result(&self) -> Option<&crate::transport::QueryResult> {
        self.operation.as_ref().and_then(QueryOperation::result)
    }

    fn frozen_index_query(&self) -> Result<IndexQuery, QueryError> {
        match &self.operation {
            Some(operation) => Ok(operation.index_query().clone()),
            None => self.builder.index_query(),
        }
    }
}

impl<'a, T: DeserializeOwned + 'static> DocumentQuery<'a, T> {
    /// Defer execution; the result materializes when any lazy handle on
    /// this session is resolved.
    pub fn lazily(mut self) -> Result<Lazy<'a, Vec<T>>, QueryError> {
        self.init_operation(None)?;
        let index_query = self.frozen_index_query()?;

        let slot = Rc::new(RefCell::new(None));
        let fill = Rc::clone(&slot);
        let statistics_targets = self.statistics_targets.clone();
        let disable_tracking = self.disable_tracking;
        self.session.add_lazy_operation(PendingLazyOperation {
            index_query,
            complete: Box::new(move |session, result| {
                for target in &statistics_targets {
                    target.borrow_mut().update_from(&result);
                }
                register_query_result(session, &result, disable_tracking);
                let typed = result
                    .results
                    .iter()
                    .map(|document| serde_json::from_value(document.clone()))
                    .collect::<Result<Vec<T>, _>>()?;
                *fill.borrow_mut() = Some(typed);
                Ok(())
            }),
        });

        Ok(Lazy::new(self.session, slot))
    }

    /// Deferred count; joins the same flush batch as other lazy handles.
    pub fn count_lazily(mut self) -> Result<Lazy<'a, i64>, QueryError> {
        self.init_operation(Some(0))?;
        let index_query = self.frozen_index_query()?;

        let slot = Rc::new(RefCell::new(None));
        let fill = Rc::clone(&slot);
        let statistics_targets = self.statistics_targets.clone();
        self.session.add_lazy_operation(PendingLazyOperation {
            index_query,
            complete: Box::new(move |_, result| {
                for target in &statistics_targets {
                    target.borrow_mut().update_from(&result);
                }
                *fill.borrow_mut() = Some(result.total_results);
                Ok(())
            }),
        });

        Ok(Lazy::new(self.session, slot))
    }
}
