use crate::{
    conventions::{DocumentConventions, IDENTITY_PROPERTY},
    error::{ConstructionError, QueryError},
    query::{
        index_query::{DEFAULT_WAIT_TIMEOUT, IndexQuery},
        params::{Parameters, WhereParams},
    },
    rql::{
        DeclareToken, DistanceShape, FacetToken, FieldsToFetchToken, FromToken, GroupByMethod,
        GroupByToken, LoadToken, MethodCallToken, MoreLikeThisToken, OrderByToken, OrderingType,
        QueryOperator, QueryToken, SearchOperator, ShapeToken, SuggestToken, WhereOperator,
        WhereOptions, WhereToken, escape_if_necessary,
        field::{DOCUMENT_ID_FIELD_NAME, assert_valid_field_name},
        write_token_run,
    },
};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};
use time::Duration;

///
/// QueryBuilder
///
/// Accumulates tokens from fluent mutators, enforces construction
/// invariants at each call site, and renders the fixed clause order
/// declare, from, group by, where, order by, load, select, include.
///
/// One builder is one logical query; rendering an unmutated builder is
/// deterministic.
///

pub struct QueryBuilder {
    conventions: Rc<DocumentConventions>,
    from_token: FromToken,
    declare_token: Option<DeclareToken>,
    group_by_tokens: Vec<GroupByToken>,
    where_tokens: Vec<QueryToken>,
    order_by_tokens: Vec<OrderByToken>,
    load_tokens: Vec<LoadToken>,
    select_tokens: Vec<QueryToken>,
    includes: BTreeSet<String>,
    // Projected group-by names back to the fields they alias.
    group_by_aliases: BTreeMap<String, String>,

    parameters: Parameters,
    query_raw: Option<String>,

    default_operator: QueryOperator,
    negate: bool,
    current_clause_depth: i32,
    is_intersect: bool,

    // Open more-like-this scope; predicates target its nested list
    // until the scope is closed and the token joins `where_tokens`.
    more_like_this_scope: Option<MoreLikeThisToken>,

    start: u32,
    page_size: Option<u32>,
    wait_for_non_stale_results: bool,
    wait_timeout: Duration,
    disable_caching: bool,
}

impl QueryBuilder {
    #[must_use]
    pub fn from_collection(collection_name: String, conventions: Rc<DocumentConventions>) -> Self {
        Self::new(FromToken::collection(collection_name, None), conventions)
    }

    #[must_use]
    pub fn from_index(index_name: String, conventions: Rc<DocumentConventions>) -> Self {
        Self::new(FromToken::index(index_name, None), conventions)
    }

    fn new(from_token: FromToken, conventions: Rc<DocumentConventions>) -> Self {
        Self {
            conventions,
            from_token,
            declare_token: None,
            group_by_tokens: Vec::new(),
            where_tokens: Vec::new(),
            order_by_tokens: Vec::new(),
            load_tokens: Vec::new(),
            select_tokens: Vec::new(),
            includes: BTreeSet::new(),
            group_by_aliases: BTreeMap::new(),
            parameters: Parameters::new(),
            query_raw: None,
            default_operator: QueryOperator::And,
            negate: false,
            current_clause_depth: 0,
            is_intersect: false,
            more_like_this_scope: None,
            start: 0,
            page_size: None,
            wait_for_non_stale_results: false,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            disable_caching: false,
        }
    }

    #[must_use]
    pub fn conventions(&self) -> &Rc<DocumentConventions> {
        &self.conventions
    }

    // ------------------------------------------------------------------
    // raw query / parameters
    // ------------------------------------------------------------------

    /// Replace the whole query with raw text. Conflicts with any
    /// structured state, in either order.
    pub fn raw_query(&mut self, query: String) -> Result<(), QueryError> {
        if !self.parameters.is_empty()
            || !self.where_tokens.is_empty()
            || !self.select_tokens.is_empty()
            || !self.group_by_tokens.is_empty()
            || !self.order_by_tokens.is_empty()
        {
            return Err(ConstructionError::RawQueryConflict.into());
        }

        self.query_raw = Some(query);
        Ok(())
    }

    /// Bind an explicitly named parameter, for use with raw query text.
    pub fn add_parameter(&mut self, name: &str, value: Value) -> Result<(), QueryError> {
        self.parameters.add_named(name, value)?;
        Ok(())
    }

    fn add_query_parameter(&mut self, value: Value) -> String {
        self.parameters.add_generated(value)
    }

    fn assert_no_raw_query(&self) -> Result<(), ConstructionError> {
        if self.query_raw.is_some() {
            return Err(ConstructionError::RawQueryConflict);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // operators and structure
    // ------------------------------------------------------------------

    pub fn using_default_operator(&mut self, operator: QueryOperator) -> Result<(), QueryError> {
        if !self.where_tokens.is_empty() {
            return Err(ConstructionError::DefaultOperatorAfterWhere.into());
        }

        self.default_operator = operator;
        Ok(())
    }

    /// Queue a negation for the next predicate.
    pub fn negate_next(&mut self) {
        self.negate = !self.negate;
    }

    pub fn and_also(&mut self) -> Result<(), QueryError> {
        self.push_explicit_operator(QueryOperator::And)
    }

    pub fn or_else(&mut self) -> Result<(), QueryError> {
        self.push_explicit_operator(QueryOperator::Or)
    }

    fn push_explicit_operator(&mut self, operator: QueryOperator) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let tokens = self.current_where_tokens_mut();
        if tokens.is_empty() {
            return Ok(());
        }
        if matches!(tokens.last(), Some(QueryToken::Operator(_))) {
            return Err(ConstructionError::DoubleOperator {
                operator: operator.as_str(),
            }
            .into());
        }

        tokens.push(QueryToken::Operator(operator));
        Ok(())
    }

    pub fn open_subclause(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.current_clause_depth += 1;
        self.prepare_tokens(None);
        self.current_where_tokens_mut().push(QueryToken::OpenSubclause);
        Ok(())
    }

    pub fn close_subclause(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.current_clause_depth -= 1;
        self.current_where_tokens_mut().push(QueryToken::CloseSubclause);
        Ok(())
    }

    /// Separate the previous predicate group from the next with an
    /// intersect. Only legal right after a completed predicate.
    pub fn intersect(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let tokens = self.current_where_tokens_mut();
        if !matches!(
            tokens.last(),
            Some(QueryToken::Where(_) | QueryToken::CloseSubclause)
        ) {
            return Err(ConstructionError::MisplacedIntersect.into());
        }

        self.is_intersect = true;
        self.current_where_tokens_mut().push(QueryToken::IntersectMarker);
        Ok(())
    }

    // ------------------------------------------------------------------
    // predicates
    // ------------------------------------------------------------------

    pub fn where_equals(&mut self, mut params: WhereParams) -> Result<(), QueryError> {
        if self.negate {
            self.negate = false;
            return self.where_not_equals(params);
        }
        self.assert_no_raw_query()?;

        params.field_name = self.ensure_valid_field_name(&params.field_name, params.is_nested_path)?;
        let value = self.transform_value(&params, false);
        let parameter = self.add_query_parameter(value);

        self.push_predicate(
            None,
            WhereToken::with_options(
                WhereOperator::Equals,
                params.field_name,
                Some(parameter),
                WhereOptions::exact(params.is_exact),
            ),
        );
        Ok(())
    }

    pub fn where_not_equals(&mut self, mut params: WhereParams) -> Result<(), QueryError> {
        if self.negate {
            self.negate = false;
            return self.where_equals(params);
        }
        self.assert_no_raw_query()?;

        params.field_name = self.ensure_valid_field_name(&params.field_name, params.is_nested_path)?;
        let value = self.transform_value(&params, false);
        let parameter = self.add_query_parameter(value);

        self.push_predicate(
            None,
            WhereToken::with_options(
                WhereOperator::NotEquals,
                params.field_name,
                Some(parameter),
                WhereOptions::exact(params.is_exact),
            ),
        );
        Ok(())
    }

    pub fn where_in(&mut self, field_name: &str, values: Vec<Value>, exact: bool) -> Result<(), QueryError> {
        self.simple_collection_predicate(WhereOperator::In, field_name, values, exact)
    }

    pub fn where_all_in(&mut self, field_name: &str, values: Vec<Value>) -> Result<(), QueryError> {
        self.simple_collection_predicate(WhereOperator::AllIn, field_name, values, false)
    }

    /// Predicate that always matches.
    pub fn where_true(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.prepare_tokens(None);
        self.current_where_tokens_mut().push(QueryToken::True);
        Ok(())
    }

    pub fn contains_any(&mut self, field_name: &str, values: Vec<Value>) -> Result<(), QueryError> {
        self.simple_collection_predicate(WhereOperator::In, field_name, values, false)
    }

    /// An empty value set matches every document.
    pub fn contains_all(&mut self, field_name: &str, values: Vec<Value>) -> Result<(), QueryError> {
        if values.is_empty() {
            self.assert_no_raw_query()?;
            let field_name = self.ensure_valid_field_name(field_name, false)?;
            self.prepare_tokens(Some(field_name));
            self.current_where_tokens_mut().push(QueryToken::True);
            return Ok(());
        }

        self.simple_collection_predicate(WhereOperator::AllIn, field_name, values, false)
    }

    fn simple_collection_predicate(
        &mut self,
        operator: WhereOperator,
        field_name: &str,
        values: Vec<Value>,
        exact: bool,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let transformed: Vec<Value> = values
            .into_iter()
            .map(|value| {
                let params = WhereParams {
                    allow_wildcards: true,
                    ..WhereParams::new(field_name.clone(), value)
                };
                self.transform_value(&params, false)
            })
            .collect();
        let parameter = self.add_query_parameter(Value::Array(transformed));

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(operator, field_name, Some(parameter), WhereOptions::exact(exact)),
        );
        Ok(())
    }

    pub fn where_starts_with(&mut self, field_name: &str, value: Value) -> Result<(), QueryError> {
        self.wildcard_predicate(WhereOperator::StartsWith, field_name, value)
    }

    pub fn where_ends_with(&mut self, field_name: &str, value: Value) -> Result<(), QueryError> {
        self.wildcard_predicate(WhereOperator::EndsWith, field_name, value)
    }

    fn wildcard_predicate(
        &mut self,
        operator: WhereOperator,
        field_name: &str,
        value: Value,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let params = WhereParams {
            allow_wildcards: true,
            ..WhereParams::new(field_name.clone(), value)
        };
        let value = self.transform_value(&params, false);
        let parameter = self.add_query_parameter(value);

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::new(operator, field_name, Some(parameter)),
        );
        Ok(())
    }

    /// Range predicate over both bounds. An absent lower bound binds the
    /// `*` sentinel, an absent upper bound binds `NULL`.
    pub fn where_between(
        &mut self,
        field_name: &str,
        start: Value,
        end: Value,
        exact: bool,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        // TODO: the upper-bound sentinel keys off the start value's
        // nullness; it should consult `end` instead.
        let from_value = if start.is_null() {
            Value::String("*".to_string())
        } else {
            self.transform_value(&WhereParams::new(field_name.clone(), start.clone()), true)
        };
        let to_value = if start.is_null() {
            Value::String("NULL".to_string())
        } else {
            self.transform_value(&WhereParams::new(field_name.clone(), end), true)
        };

        let from_parameter = self.add_query_parameter(from_value);
        let to_parameter = self.add_query_parameter(to_value);

        let mut options = WhereOptions::from_to(from_parameter, to_parameter);
        options.exact = exact;
        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(WhereOperator::Between, field_name, None, options),
        );
        Ok(())
    }

    pub fn where_greater_than(&mut self, field_name: &str, value: Value, exact: bool) -> Result<(), QueryError> {
        self.range_predicate(WhereOperator::GreaterThan, field_name, value, exact, "*")
    }

    pub fn where_greater_than_or_equal(
        &mut self,
        field_name: &str,
        value: Value,
        exact: bool,
    ) -> Result<(), QueryError> {
        self.range_predicate(WhereOperator::GreaterThanOrEqual, field_name, value, exact, "*")
    }

    pub fn where_less_than(&mut self, field_name: &str, value: Value, exact: bool) -> Result<(), QueryError> {
        self.range_predicate(WhereOperator::LessThan, field_name, value, exact, "NULL")
    }

    pub fn where_less_than_or_equal(
        &mut self,
        field_name: &str,
        value: Value,
        exact: bool,
    ) -> Result<(), QueryError> {
        self.range_predicate(WhereOperator::LessThanOrEqual, field_name, value, exact, "NULL")
    }

    fn range_predicate(
        &mut self,
        operator: WhereOperator,
        field_name: &str,
        value: Value,
        exact: bool,
        absent_sentinel: &str,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let bound = if value.is_null() {
            Value::String(absent_sentinel.to_string())
        } else {
            self.transform_value(&WhereParams::new(field_name.clone(), value), true)
        };
        let parameter = self.add_query_parameter(bound);

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(operator, field_name, Some(parameter), WhereOptions::exact(exact)),
        );
        Ok(())
    }

    pub fn where_exists(&mut self, field_name: &str) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::new(WhereOperator::Exists, field_name, None),
        );
        Ok(())
    }

    pub fn where_regex(&mut self, field_name: &str, pattern: &str) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let params = WhereParams::new(field_name.clone(), Value::String(pattern.to_string()));
        let value = self.transform_value(&params, false);
        let parameter = self.add_query_parameter(value);

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::new(WhereOperator::Regex, field_name, Some(parameter)),
        );
        Ok(())
    }

    pub fn where_lucene(&mut self, field_name: &str, where_clause: &str) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;
        let parameter = self.add_query_parameter(Value::String(where_clause.to_string()));

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::new(WhereOperator::Lucene, field_name, Some(parameter)),
        );
        Ok(())
    }

    /// Full-text search. Predicates that carry a search operator force
    /// OR when the next predicate is appended without an explicit
    /// operator.
    pub fn search(
        &mut self,
        field_name: &str,
        search_terms: &str,
        operator: SearchOperator,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;
        let parameter = self.add_query_parameter(Value::String(search_terms.to_string()));

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(
                WhereOperator::Search,
                field_name,
                Some(parameter),
                WhereOptions::search(operator),
            ),
        );
        Ok(())
    }

    /// Compare the field against a server-side compare-exchange value
    /// instead of a literal.
    pub fn where_equals_cmp_xchg(
        &mut self,
        field_name: &str,
        keys: Vec<Value>,
        access_path: Option<String>,
        exact: bool,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let parameters = keys
            .into_iter()
            .map(|key| self.add_query_parameter(key))
            .collect();
        let method = MethodCallToken {
            kind: crate::rql::MethodCallKind::CmpXchg,
            parameters,
            access_path,
        };

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(
                WhereOperator::Equals,
                field_name,
                None,
                WhereOptions::method(method, exact),
            ),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // spatial
    // ------------------------------------------------------------------

    pub fn spatial_within_circle(
        &mut self,
        field_name: &str,
        radius: f64,
        latitude: f64,
        longitude: f64,
        units: Option<crate::rql::SpatialUnits>,
        distance_error_pct: f64,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let radius_parameter = self.add_query_parameter(serde_json::json!(radius));
        let latitude_parameter = self.add_query_parameter(serde_json::json!(latitude));
        let longitude_parameter = self.add_query_parameter(serde_json::json!(longitude));
        let shape = ShapeToken::Circle {
            radius_parameter,
            latitude_parameter,
            longitude_parameter,
            units,
        };

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(
                WhereOperator::SpatialWithin,
                field_name,
                None,
                WhereOptions::shape(shape, distance_error_pct),
            ),
        );
        Ok(())
    }

    pub fn spatial_wkt(
        &mut self,
        field_name: &str,
        relation: WhereOperator,
        shape_wkt: &str,
        distance_error_pct: f64,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let shape_parameter = self.add_query_parameter(Value::String(shape_wkt.to_string()));
        let shape = ShapeToken::Wkt { shape_parameter };

        self.push_predicate(
            Some(field_name.clone()),
            WhereToken::with_options(
                relation,
                field_name,
                None,
                WhereOptions::shape(shape, distance_error_pct),
            ),
        );
        Ok(())
    }

    /// Spatial predicate over a computed (dynamic) field expression.
    /// Only dynamic queries can evaluate these.
    pub fn spatial_dynamic_wkt(
        &mut self,
        field_expression: &str,
        relation: WhereOperator,
        shape_wkt: &str,
        distance_error_pct: f64,
    ) -> Result<(), QueryError> {
        if let Some(index) = &self.from_token.index_name {
            return Err(ConstructionError::DynamicSpatialOnStaticIndex {
                field: field_expression.to_string(),
                index: index.clone(),
            }
            .into());
        }
        self.assert_no_raw_query()?;

        let shape_parameter = self.add_query_parameter(Value::String(shape_wkt.to_string()));
        let shape = ShapeToken::Wkt { shape_parameter };

        self.push_predicate(
            None,
            WhereToken::with_options(
                relation,
                field_expression.to_string(),
                None,
                WhereOptions::shape(shape, distance_error_pct),
            ),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // predicate modifiers
    // ------------------------------------------------------------------

    pub fn boost(&mut self, boost: f64) -> Result<(), QueryError> {
        if boost <= 0.0 {
            return Err(ConstructionError::BoostNotPositive.into());
        }
        if (boost - 1.0).abs() < f64::EPSILON {
            return Ok(());
        }

        let token = self.last_where_token_mut()?;
        token.options.boost = Some(boost);
        Ok(())
    }

    pub fn fuzzy(&mut self, fuzzy: f64) -> Result<(), QueryError> {
        if !(0.0..=1.0).contains(&fuzzy) {
            return Err(ConstructionError::FuzzyOutOfRange.into());
        }

        let token = self.last_where_token_mut()?;
        token.options.fuzzy = Some(fuzzy);
        Ok(())
    }

    pub fn proximity(&mut self, proximity: u32) -> Result<(), QueryError> {
        if proximity == 0 {
            return Err(ConstructionError::ProximityNotPositive.into());
        }

        let token = self.last_where_token_mut()?;
        if token.operator != WhereOperator::Search {
            return Err(ConstructionError::ExpectedWherePredicate.into());
        }
        token.options.proximity = Some(proximity);
        Ok(())
    }

    fn last_where_token_mut(&mut self) -> Result<&mut WhereToken, ConstructionError> {
        match self.current_where_tokens_mut().last_mut() {
            Some(QueryToken::Where(token)) => Ok(token),
            Some(_) => Err(ConstructionError::ExpectedWherePredicate),
            None => Err(ConstructionError::MissingWhereClause),
        }
    }

    // ------------------------------------------------------------------
    // ordering
    // ------------------------------------------------------------------

    pub fn order_by(&mut self, field_name: &str, ordering: OrderingType) -> Result<(), QueryError> {
        self.push_order_by(field_name, false, ordering)
    }

    pub fn order_by_descending(
        &mut self,
        field_name: &str,
        ordering: OrderingType,
    ) -> Result<(), QueryError> {
        self.push_order_by(field_name, true, ordering)
    }

    fn push_order_by(
        &mut self,
        field_name: &str,
        descending: bool,
        ordering: OrderingType,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;
        self.order_by_tokens.push(OrderByToken::Field {
            field_name,
            descending,
            ordering,
        });
        Ok(())
    }

    pub fn order_by_score(&mut self, descending: bool) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.order_by_tokens.push(OrderByToken::Score { descending });
        Ok(())
    }

    /// Random ordering makes results uncacheable, so caching is turned
    /// off alongside. A blank seed is treated as no seed.
    pub fn random_ordering(&mut self, seed: Option<String>) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.no_caching();
        let seed = seed.filter(|seed| !seed.trim().is_empty());
        self.order_by_tokens.push(OrderByToken::Random { seed });
        Ok(())
    }

    pub fn order_by_distance_point(
        &mut self,
        field_name: &str,
        latitude: f64,
        longitude: f64,
        descending: bool,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let latitude_parameter = self.add_query_parameter(serde_json::json!(latitude));
        let longitude_parameter = self.add_query_parameter(serde_json::json!(longitude));
        self.order_by_tokens.push(OrderByToken::Distance {
            field_name,
            descending,
            shape: DistanceShape::Point {
                latitude_parameter,
                longitude_parameter,
            },
        });
        Ok(())
    }

    pub fn order_by_distance_wkt(
        &mut self,
        field_name: &str,
        shape_wkt: &str,
        descending: bool,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let shape_parameter = self.add_query_parameter(Value::String(shape_wkt.to_string()));
        self.order_by_tokens.push(OrderByToken::Distance {
            field_name,
            descending,
            shape: DistanceShape::Wkt { shape_parameter },
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // grouping and projection
    // ------------------------------------------------------------------

    pub fn group_by(&mut self, fields: &[(&str, GroupByMethod)]) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        if !self.from_token.is_dynamic() {
            return Err(ConstructionError::GroupByRequiresDynamicQuery.into());
        }

        for (field, method) in fields {
            let field_name = self.ensure_valid_field_name(field, false)?;
            self.group_by_tokens.push(GroupByToken {
                field_name,
                method: *method,
            });
        }
        Ok(())
    }

    /// Register a projection alias so later `group_by_key` calls can
    /// refer to the projected name instead of the underlying field.
    pub fn add_group_by_alias(&mut self, field_name: &str, projected_name: &str) {
        self.group_by_aliases
            .insert(projected_name.to_string(), field_name.to_string());
    }

    pub fn group_by_key(
        &mut self,
        field_name: Option<&str>,
        projected_name: Option<&str>,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;

        let mut field_name = field_name.map(str::to_string);
        if let Some(projected) = projected_name
            && let Some(aliased) = self.group_by_aliases.get(projected)
        {
            let reuse = match &field_name {
                None => true,
                Some(field) => field.eq_ignore_ascii_case(projected),
            };
            if reuse {
                field_name = Some(aliased.clone());
            }
        } else if let Some(field) = &field_name
            && let Some(aliased) = self.group_by_aliases.get(field)
        {
            field_name = Some(aliased.clone());
        }

        self.select_tokens.push(QueryToken::GroupByKey {
            field_name,
            projected_name: projected_name.map(str::to_string),
        });
        Ok(())
    }

    pub fn group_by_sum(
        &mut self,
        field_name: &str,
        projected_name: Option<&str>,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;
        self.select_tokens.push(QueryToken::GroupBySum {
            field_name,
            projected_name: projected_name.map(str::to_string),
        });
        Ok(())
    }

    pub fn group_by_count(&mut self, projected_name: Option<&str>) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.select_tokens.push(QueryToken::GroupByCount {
            projected_name: projected_name.map(str::to_string),
        });
        Ok(())
    }

    pub fn select_fields(
        &mut self,
        fields: Vec<String>,
        projections: Option<Vec<String>>,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.select_tokens
            .retain(|token| !matches!(token, QueryToken::FieldsToFetch(_)));
        self.select_tokens
            .push(QueryToken::FieldsToFetch(FieldsToFetchToken { fields, projections }));
        Ok(())
    }

    /// Distinct serializes first in the select clause and may only be
    /// applied once.
    pub fn distinct(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        if matches!(self.select_tokens.first(), Some(QueryToken::Distinct)) {
            return Err(ConstructionError::DistinctAlreadyApplied.into());
        }

        self.select_tokens.insert(0, QueryToken::Distinct);
        Ok(())
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        parameters: Option<&str>,
        body: &str,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.declare_token = Some(DeclareToken {
            name: name.to_string(),
            parameters: parameters.map(str::to_string),
            body: body.to_string(),
        });
        Ok(())
    }

    pub fn load(&mut self, argument: &str, alias: &str) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.load_tokens.push(LoadToken {
            argument: argument.to_string(),
            alias: alias.to_string(),
        });
        Ok(())
    }

    pub fn include(&mut self, path: &str) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.includes.insert(path.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // facets and suggestions
    // ------------------------------------------------------------------

    pub fn aggregate_by(&mut self, facet: FacetToken) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        if self
            .select_tokens
            .iter()
            .any(|token| !matches!(token, QueryToken::Facet(_)))
        {
            return Err(ConstructionError::FacetConflict.into());
        }

        self.select_tokens.push(QueryToken::Facet(facet));
        Ok(())
    }

    pub fn aggregate_using(&mut self, facet_setup_document_id: &str) -> Result<(), QueryError> {
        let parameter_name =
            self.add_query_parameter(Value::String(facet_setup_document_id.to_string()));
        self.aggregate_by(FacetToken::SetupDocument { parameter_name })
    }

    pub fn suggest_using(
        &mut self,
        field_name: &str,
        terms: Value,
        options: Option<Value>,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.assert_can_suggest()?;
        let field_name = self.ensure_valid_field_name(field_name, false)?;

        let term_parameter_name = self.add_query_parameter(terms);
        let options_parameter_name = options.map(|options| self.add_query_parameter(options));
        self.select_tokens.push(QueryToken::Suggest(SuggestToken {
            field_name,
            term_parameter_name,
            options_parameter_name,
        }));
        Ok(())
    }

    fn assert_can_suggest(&self) -> Result<(), ConstructionError> {
        if !self.where_tokens.is_empty() {
            return Err(ConstructionError::SuggestConflict { clause: "where" });
        }
        if !self.select_tokens.is_empty() {
            return Err(ConstructionError::SuggestConflict { clause: "select" });
        }
        if !self.order_by_tokens.is_empty() {
            return Err(ConstructionError::SuggestConflict { clause: "order by" });
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // more-like-this
    // ------------------------------------------------------------------

    /// Open a more-like-this scope; predicate mutators target its nested
    /// token list until [`Self::end_more_like_this`] closes it.
    pub fn begin_more_like_this(&mut self) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.prepare_tokens(None);
        self.more_like_this_scope = Some(MoreLikeThisToken::default());
        Ok(())
    }

    pub fn end_more_like_this(&mut self, options: Option<Value>) -> Result<(), QueryError> {
        let Some(mut scope) = self.more_like_this_scope.take() else {
            return Err(ConstructionError::MoreLikeThisNotActive.into());
        };

        scope.options_parameter_name = options.map(|options| self.add_query_parameter(options));
        self.where_tokens.push(QueryToken::MoreLikeThis(scope));
        Ok(())
    }

    /// More-like-this seeded by an inline document instead of nested
    /// predicates.
    pub fn more_like_this_using_document(
        &mut self,
        document: Value,
        options: Option<Value>,
    ) -> Result<(), QueryError> {
        self.assert_no_raw_query()?;
        self.prepare_tokens(None);

        let document_parameter_name = Some(self.add_query_parameter(document));
        let options_parameter_name = options.map(|options| self.add_query_parameter(options));
        self.where_tokens.push(QueryToken::MoreLikeThis(MoreLikeThisToken {
            where_tokens: Vec::new(),
            document_parameter_name,
            options_parameter_name,
        }));
        Ok(())
    }

    // ------------------------------------------------------------------
    // paging and execution flags
    // ------------------------------------------------------------------

    pub fn take(&mut self, count: u32) {
        self.page_size = Some(count);
    }

    pub fn skip(&mut self, count: u32) {
        self.start = count;
    }

    /// Internal paging request used by count/any/first/single. Never
    /// shrinks an explicit page size to zero, and otherwise only lowers
    /// it.
    pub(crate) fn apply_internal_take(&mut self, count: u32) {
        match self.page_size {
            None => self.page_size = Some(count),
            Some(existing) if count != 0 && existing > count => self.page_size = Some(count),
            Some(_) => {}
        }
    }

    pub fn wait_for_non_stale_results(&mut self, timeout: Option<Duration>) {
        self.wait_for_non_stale_results = true;
        self.wait_timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
    }

    pub fn no_caching(&mut self) {
        self.disable_caching = true;
    }

    #[must_use]
    pub fn is_distinct(&self) -> bool {
        matches!(self.select_tokens.first(), Some(QueryToken::Distinct))
    }

    // ------------------------------------------------------------------
    // shared predicate plumbing
    // ------------------------------------------------------------------

    fn push_predicate(&mut self, negate_guard_field: Option<String>, token: WhereToken) {
        self.prepare_tokens(negate_guard_field);
        self.current_where_tokens_mut().push(QueryToken::Where(token));
    }

    /// Insert the implicit boolean operator and resolve any pending
    /// negation before the next token lands.
    fn prepare_tokens(&mut self, negate_guard_field: Option<String>) {
        let default_operator = self.default_operator;
        let negate = std::mem::take(&mut self.negate);
        let tokens = self.current_where_tokens_mut();
        append_operator_if_needed(default_operator, tokens);
        negate_if_needed(negate, negate_guard_field, tokens);
    }

    fn current_where_tokens_mut(&mut self) -> &mut Vec<QueryToken> {
        match &mut self.more_like_this_scope {
            Some(scope) => &mut scope.where_tokens,
            None => &mut self.where_tokens,
        }
    }

    fn ensure_valid_field_name(
        &self,
        field_name: &str,
        is_nested_path: bool,
    ) -> Result<String, QueryError> {
        assert_valid_field_name(field_name)?;
        if !is_nested_path && field_name == IDENTITY_PROPERTY {
            return Ok(DOCUMENT_ID_FIELD_NAME.to_string());
        }

        Ok(escape_if_necessary(field_name))
    }

    /// Normalize a value before it is bound: conventions-registered
    /// converters run first; nulls resolve to the `NULL` sentinel.
    fn transform_value(&self, params: &WhereParams, for_range: bool) -> Value {
        match &params.value {
            Value::Null => Value::String("NULL".to_string()),
            Value::String(text) if text.is_empty() => Value::String(String::new()),
            value => self
                .conventions
                .try_convert_value_for_query(&params.field_name, value, for_range)
                .map_or_else(|| value.clone(), Value::String),
        }
    }

    // ------------------------------------------------------------------
    // rendering
    // ------------------------------------------------------------------

    /// Render the query text. Fails when subclauses are unbalanced; the
    /// output is a pure function of the accumulated tokens.
    pub fn to_rql(&self) -> Result<String, QueryError> {
        if self.current_clause_depth != 0 {
            return Err(ConstructionError::ClauseDepthMismatch {
                depth: self.current_clause_depth,
            }
            .into());
        }

        if let Some(raw) = &self.query_raw {
            return Ok(raw.clone());
        }

        let mut text = String::new();
        self.build_declare(&mut text);
        self.build_from(&mut text);
        self.build_group_by(&mut text);
        self.build_where(&mut text);
        self.build_order_by(&mut text);
        self.build_load(&mut text);
        self.build_select(&mut text);
        self.build_include(&mut text);
        Ok(text)
    }

    /// Freeze the builder into an immutable request.
    pub fn index_query(&self) -> Result<IndexQuery, QueryError> {
        let query = self.to_rql()?;
        let mut index_query = IndexQuery::new(query, self.parameters.clone());
        index_query.start = self.start;
        index_query.page_size = self.page_size;
        index_query.wait_for_non_stale_results = self.wait_for_non_stale_results;
        index_query.wait_for_non_stale_results_timeout = self.wait_timeout;
        index_query.disable_caching = self.disable_caching;
        Ok(index_query)
    }

    fn build_declare(&self, text: &mut String) {
        if let Some(declare) = &self.declare_token {
            QueryToken::Declare(declare.clone()).write_to(text, None);
        }
    }

    fn build_from(&self, text: &mut String) {
        QueryToken::From(self.from_token.clone()).write_to(text, None);
    }

    fn build_group_by(&self, text: &mut String) {
        if self.group_by_tokens.is_empty() {
            return;
        }

        text.push_str(" group by ");
        for (i, token) in self.group_by_tokens.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            QueryToken::GroupBy(token.clone()).write_to(text, None);
        }
    }

    fn build_where(&self, text: &mut String) {
        if self.where_tokens.is_empty() {
            return;
        }

        text.push_str(" where ");
        if self.is_intersect {
            text.push_str("intersect(");
        }
        write_token_run(&self.where_tokens, text);
        if self.is_intersect {
            text.push(')');
        }
    }

    fn build_order_by(&self, text: &mut String) {
        if self.order_by_tokens.is_empty() {
            return;
        }

        text.push_str(" order by ");
        for (i, token) in self.order_by_tokens.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            QueryToken::OrderBy(token.clone()).write_to(text, None);
        }
    }

    fn build_load(&self, text: &mut String) {
        if self.load_tokens.is_empty() {
            return;
        }

        text.push_str(" load ");
        for (i, token) in self.load_tokens.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            QueryToken::Load(token.clone()).write_to(text, None);
        }
    }

    fn build_select(&self, text: &mut String) {
        if self.select_tokens.is_empty() {
            return;
        }

        if matches!(self.select_tokens.as_slice(), [QueryToken::Distinct]) {
            text.push_str(" select distinct *");
            return;
        }

        text.push_str(" select ");
        let mut prev: Option<&QueryToken> = None;
        for token in &self.select_tokens {
            match prev {
                None => {}
                Some(QueryToken::Distinct) => text.push(' '),
                Some(_) => text.push_str(", "),
            }
            token.write_to(text, None);
            prev = Some(token);
        }
    }

    fn build_include(&self, text: &mut String) {
        if self.includes.is_empty() {
            return;
        }

        text.push_str(" include ");
        for (i, include) in self.includes.iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            text.push_str(&escape_if_necessary(include));
        }
    }
}

fn append_operator_if_needed(default_operator: QueryOperator, tokens: &mut Vec<QueryToken>) {
    let Some(last) = tokens.last() else {
        return;
    };
    if !matches!(last, QueryToken::Where(_) | QueryToken::CloseSubclause) {
        return;
    }

    // A search predicate joins to its neighbor with OR regardless of
    // the configured default.
    let last_where = tokens.iter().rev().find_map(|token| match token {
        QueryToken::Where(token) => Some(token),
        _ => None,
    });
    let operator = if last_where.is_some_and(|token| token.options.search_operator.is_some()) {
        QueryOperator::Or
    } else {
        default_operator
    };

    tokens.push(QueryToken::Operator(operator));
}

/// Resolve a pending negation. At the start of a clause there is
/// nothing to negate against, so a guard predicate (`exists(field)`, or
/// `true` when no field is known) is synthesized first.
fn negate_if_needed(negate: bool, field_name: Option<String>, tokens: &mut Vec<QueryToken>) {
    if !negate {
        return;
    }

    if tokens.is_empty() || matches!(tokens.last(), Some(QueryToken::OpenSubclause)) {
        match field_name {
            Some(field_name) => tokens.push(QueryToken::Where(WhereToken::new(
                WhereOperator::Exists,
                field_name,
                None,
            ))),
            None => tokens.push(QueryToken::True),
        }
        tokens.push(QueryToken::Operator(QueryOperator::And));
    }

    tokens.push(QueryToken::Negate);
}
