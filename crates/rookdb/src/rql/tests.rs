use super::*;

fn render(tokens: &[QueryToken]) -> String {
    let mut buf = String::new();
    write_token_run(tokens, &mut buf);
    buf
}

fn where_equals(field: &str, parameter: &str) -> QueryToken {
    QueryToken::Where(WhereToken::new(
        WhereOperator::Equals,
        field.to_string(),
        Some(parameter.to_string()),
    ))
}

#[test]
fn equals_renders_field_and_parameter() {
    assert_eq!(render(&[where_equals("name", "p0")]), "name = $p0");
}

#[test]
fn operator_token_is_space_separated() {
    let tokens = vec![
        where_equals("name", "p0"),
        QueryToken::Operator(QueryOperator::And),
        where_equals("age", "p1"),
    ];

    assert_eq!(render(&tokens), "name = $p0 and age = $p1");
}

#[test]
fn no_separator_after_open_subclause_or_before_close() {
    let tokens = vec![
        QueryToken::OpenSubclause,
        where_equals("name", "p0"),
        QueryToken::CloseSubclause,
    ];

    assert_eq!(render(&tokens), "(name = $p0)");
}

#[test]
fn negate_precedes_predicate() {
    let tokens = vec![QueryToken::Negate, where_equals("name", "p0")];
    assert_eq!(render(&tokens), "not name = $p0");
}

#[test]
fn between_uses_from_and_to_parameters() {
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Between,
        "age".to_string(),
        None,
        WhereOptions::from_to("p0".to_string(), "p1".to_string()),
    ));

    assert_eq!(render(&[token]), "age between $p0 and $p1");
}

#[test]
fn exact_wraps_the_predicate() {
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Equals,
        "name".to_string(),
        Some("p0".to_string()),
        WhereOptions::exact(true),
    ));

    assert_eq!(render(&[token]), "exact(name = $p0)");
}

#[test]
fn boost_wraps_outside_exact() {
    let mut options = WhereOptions::exact(true);
    options.boost = Some(2.0);
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Equals,
        "name".to_string(),
        Some("p0".to_string()),
        options,
    ));

    assert_eq!(render(&[token]), "boost(exact(name = $p0), 2)");
}

#[test]
fn search_with_and_operator_renders_trailing_and() {
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Search,
        "bio".to_string(),
        Some("p0".to_string()),
        WhereOptions::search(SearchOperator::And),
    ));

    assert_eq!(render(&[token]), "search(bio, $p0, and)");
}

#[test]
fn search_with_or_operator_omits_the_suffix() {
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Search,
        "bio".to_string(),
        Some("p0".to_string()),
        WhereOptions::search(SearchOperator::Or),
    ));

    assert_eq!(render(&[token]), "search(bio, $p0)");
}

#[test]
fn spatial_within_renders_shape_and_nondefault_margin() {
    let shape = ShapeToken::Circle {
        radius_parameter: "p0".to_string(),
        latitude_parameter: "p1".to_string(),
        longitude_parameter: "p2".to_string(),
        units: Some(SpatialUnits::Kilometers),
    };
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::SpatialWithin,
        "coordinates".to_string(),
        None,
        WhereOptions::shape(shape, 0.1),
    ));

    assert_eq!(
        render(&[token]),
        "spatial.within(coordinates, spatial.circle($p0, $p1, $p2, 'kilometers'), 0.1)"
    );
}

#[test]
fn spatial_default_margin_is_omitted() {
    let shape = ShapeToken::Wkt {
        shape_parameter: "p0".to_string(),
    };
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::SpatialIntersects,
        "coordinates".to_string(),
        None,
        WhereOptions::shape(shape, DEFAULT_SPATIAL_DISTANCE_ERROR_PCT),
    ));

    assert_eq!(
        render(&[token]),
        "spatial.intersects(coordinates, spatial.wkt($p0))"
    );
}

#[test]
fn cmpxchg_method_call_replaces_the_literal() {
    let method = MethodCallToken {
        kind: MethodCallKind::CmpXchg,
        parameters: vec!["p0".to_string()],
        access_path: None,
    };
    let token = QueryToken::Where(WhereToken::with_options(
        WhereOperator::Equals,
        "quota".to_string(),
        None,
        WhereOptions::method(method, false),
    ));

    assert_eq!(render(&[token]), "quota = cmpxchg($p0)");
}

#[test]
fn from_token_quotes_awkward_collection_names() {
    let mut buf = String::new();
    QueryToken::From(FromToken::collection("user docs".to_string(), None)).write_to(&mut buf, None);
    assert_eq!(buf, "from 'user docs'");

    let mut buf = String::new();
    QueryToken::From(FromToken::index("Users/ByName".to_string(), None)).write_to(&mut buf, None);
    assert_eq!(buf, "from index 'Users/ByName'");
}

#[test]
fn order_by_tokens_render_direction_and_collation() {
    let tokens = vec![
        QueryToken::OrderBy(OrderByToken::Field {
            field_name: "age".to_string(),
            descending: true,
            ordering: OrderingType::Long,
        }),
        QueryToken::OrderBy(OrderByToken::Score { descending: false }),
    ];

    let mut buf = String::new();
    tokens[0].write_to(&mut buf, None);
    assert_eq!(buf, "age as long desc");

    let mut buf = String::new();
    tokens[1].write_to(&mut buf, None);
    assert_eq!(buf, "score()");
}

#[test]
fn more_like_this_renders_nested_predicates() {
    let token = QueryToken::MoreLikeThis(MoreLikeThisToken {
        where_tokens: vec![
            where_equals("id()", "p0"),
            QueryToken::Operator(QueryOperator::And),
            where_equals("category", "p1"),
        ],
        document_parameter_name: None,
        options_parameter_name: Some("p2".to_string()),
    });

    assert_eq!(
        render(&[token]),
        "moreLikeThis(id() = $p0 and category = $p1, $p2)"
    );
}

#[test]
fn suggest_token_renders_optional_options() {
    let token = QueryToken::Suggest(SuggestToken {
        field_name: "name".to_string(),
        term_parameter_name: "p0".to_string(),
        options_parameter_name: None,
    });
    assert_eq!(render(&[token]), "suggest(name, $p0)");
}

#[test]
fn facet_tokens_render_setup_and_inline_forms() {
    let setup = QueryToken::Facet(FacetToken::SetupDocument {
        parameter_name: "p0".to_string(),
    });
    assert_eq!(render(&[setup]), "facet(id($p0))");

    let inline = QueryToken::Facet(FacetToken::Inline {
        field_name: Some("brand".to_string()),
        ranges: Vec::new(),
        aggregations: vec![FacetAggregationToken {
            aggregation: FacetAggregation::Sum,
            field_name: "total".to_string(),
        }],
        options_parameter_name: None,
        alias: Some("brands".to_string()),
    });
    assert_eq!(render(&[inline]), "facet(brand, sum(total)) as brands");
}
