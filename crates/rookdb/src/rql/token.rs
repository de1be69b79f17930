use crate::rql::{field::escape_if_necessary, where_token::WhereToken};
use std::fmt::Write;

///
/// QueryOperator
///
/// Boolean operator joining two predicates.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum QueryOperator {
    #[default]
    And,
    Or,
}

impl QueryOperator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

///
/// OrderingType
///
/// Server-side collation hint for an order-by field.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OrderingType {
    #[default]
    String,
    Long,
    Double,
    AlphaNumeric,
}

impl OrderingType {
    const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::String => None,
            Self::Long => Some(" as long"),
            Self::Double => Some(" as double"),
            Self::AlphaNumeric => Some(" as alphaNumeric"),
        }
    }
}

///
/// FromToken
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FromToken {
    pub index_name: Option<String>,
    pub collection_name: Option<String>,
    pub alias: Option<String>,
}

impl FromToken {
    #[must_use]
    pub const fn index(index_name: String, alias: Option<String>) -> Self {
        Self {
            index_name: Some(index_name),
            collection_name: None,
            alias,
        }
    }

    #[must_use]
    pub const fn collection(collection_name: String, alias: Option<String>) -> Self {
        Self {
            index_name: None,
            collection_name: Some(collection_name),
            alias,
        }
    }

    /// A dynamic query targets a collection; a static one targets an index.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.index_name.is_none()
    }

    fn write_to(&self, buf: &mut String) {
        if let Some(index) = &self.index_name {
            let _ = write!(buf, "from index '{index}'");
        } else if let Some(collection) = &self.collection_name {
            buf.push_str("from ");
            buf.push_str(&escape_if_necessary(collection));
        }
        if let Some(alias) = &self.alias {
            let _ = write!(buf, " as {alias}");
        }
    }
}

///
/// DeclareToken
///
/// `declare function` preamble for projection queries.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeclareToken {
    pub name: String,
    pub parameters: Option<String>,
    pub body: String,
}

impl DeclareToken {
    fn write_to(&self, buf: &mut String) {
        let _ = write!(
            buf,
            "declare function {}({}) {{\n{}\n}}\n",
            self.name,
            self.parameters.as_deref().unwrap_or(""),
            self.body
        );
    }
}

///
/// LoadToken
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadToken {
    pub argument: String,
    pub alias: String,
}

impl LoadToken {
    fn write_to(&self, buf: &mut String) {
        let _ = write!(buf, "{} as {}", self.argument, self.alias);
    }
}

///
/// GroupByToken
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GroupByMethod {
    #[default]
    None,
    Array,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupByToken {
    pub field_name: String,
    pub method: GroupByMethod,
}

impl GroupByToken {
    fn write_to(&self, buf: &mut String) {
        match self.method {
            GroupByMethod::None => buf.push_str(&self.field_name),
            GroupByMethod::Array => {
                let _ = write!(buf, "array({})", self.field_name);
            }
        }
    }
}

///
/// OrderByToken
///

#[derive(Clone, Debug, PartialEq)]
pub enum OrderByToken {
    Field {
        field_name: String,
        descending: bool,
        ordering: OrderingType,
    },
    Score {
        descending: bool,
    },
    Random {
        seed: Option<String>,
    },
    Distance {
        field_name: String,
        descending: bool,
        shape: DistanceShape,
    },
}

/// Reference shape for distance ordering; coordinates and WKT text are
/// parameter references.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DistanceShape {
    Point {
        latitude_parameter: String,
        longitude_parameter: String,
    },
    Wkt {
        shape_parameter: String,
    },
}

impl OrderByToken {
    fn write_to(&self, buf: &mut String) {
        match self {
            Self::Field {
                field_name,
                descending,
                ordering,
            } => {
                buf.push_str(field_name);
                if let Some(suffix) = ordering.suffix() {
                    buf.push_str(suffix);
                }
                if *descending {
                    buf.push_str(" desc");
                }
            }
            Self::Score { descending } => {
                buf.push_str("score()");
                if *descending {
                    buf.push_str(" desc");
                }
            }
            Self::Random { seed } => match seed {
                Some(seed) => {
                    let _ = write!(buf, "random('{seed}')");
                }
                None => buf.push_str("random()"),
            },
            Self::Distance {
                field_name,
                descending,
                shape,
            } => {
                let _ = write!(buf, "spatial.distance({field_name}, ");
                match shape {
                    DistanceShape::Point {
                        latitude_parameter,
                        longitude_parameter,
                    } => {
                        let _ = write!(
                            buf,
                            "spatial.point(${latitude_parameter}, ${longitude_parameter})"
                        );
                    }
                    DistanceShape::Wkt { shape_parameter } => {
                        let _ = write!(buf, "spatial.wkt(${shape_parameter})");
                    }
                }
                buf.push(')');
                if *descending {
                    buf.push_str(" desc");
                }
            }
        }
    }
}

///
/// FieldsToFetchToken
///
/// Projection list of a select clause. `projections` aliases line up
/// with `fields` by position when present.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldsToFetchToken {
    pub fields: Vec<String>,
    pub projections: Option<Vec<String>>,
}

impl FieldsToFetchToken {
    fn write_to(&self, buf: &mut String) {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                buf.push_str(", ");
            }
            buf.push_str(field);

            let projection = self
                .projections
                .as_ref()
                .and_then(|projections| projections.get(i));
            if let Some(projection) = projection {
                if projection != field {
                    let _ = write!(buf, " as {projection}");
                }
            }
        }
    }
}

///
/// FacetToken
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FacetToken {
    /// Facets stored in a setup document; the parameter holds its id.
    SetupDocument { parameter_name: String },
    /// Inline facet over a field or range list, with optional
    /// aggregations and options.
    Inline {
        field_name: Option<String>,
        ranges: Vec<String>,
        aggregations: Vec<FacetAggregationToken>,
        options_parameter_name: Option<String>,
        alias: Option<String>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FacetAggregationToken {
    pub aggregation: FacetAggregation,
    pub field_name: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FacetAggregation {
    Max,
    Min,
    Average,
    Sum,
}

impl FacetAggregation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Average => "avg",
            Self::Sum => "sum",
        }
    }
}

impl FacetToken {
    fn write_to(&self, buf: &mut String) {
        match self {
            Self::SetupDocument { parameter_name } => {
                let _ = write!(buf, "facet(id(${parameter_name}))");
            }
            Self::Inline {
                field_name,
                ranges,
                aggregations,
                options_parameter_name,
                alias,
            } => {
                buf.push_str("facet(");
                let mut first = true;
                let mut sep = |buf: &mut String, first: &mut bool| {
                    if !*first {
                        buf.push_str(", ");
                    }
                    *first = false;
                };
                for range in ranges {
                    sep(buf, &mut first);
                    buf.push_str(range);
                }
                if let Some(field) = field_name {
                    sep(buf, &mut first);
                    buf.push_str(field);
                }
                for aggregation in aggregations {
                    sep(buf, &mut first);
                    let _ = write!(
                        buf,
                        "{}({})",
                        aggregation.aggregation.as_str(),
                        aggregation.field_name
                    );
                }
                if let Some(options) = options_parameter_name {
                    sep(buf, &mut first);
                    let _ = write!(buf, "${options}");
                }
                buf.push(')');
                if let Some(alias) = alias {
                    let _ = write!(buf, " as {alias}");
                }
            }
        }
    }
}

///
/// SuggestToken
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuggestToken {
    pub field_name: String,
    pub term_parameter_name: String,
    pub options_parameter_name: Option<String>,
}

impl SuggestToken {
    fn write_to(&self, buf: &mut String) {
        let _ = write!(buf, "suggest({}, ${}", self.field_name, self.term_parameter_name);
        if let Some(options) = &self.options_parameter_name {
            let _ = write!(buf, ", ${options}");
        }
        buf.push(')');
    }
}

///
/// MoreLikeThisToken
///
/// Wrapper predicate owning a nested where-token list; while its scope
/// is open the builder targets this list instead of the top-level one.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MoreLikeThisToken {
    pub where_tokens: Vec<QueryToken>,
    pub document_parameter_name: Option<String>,
    pub options_parameter_name: Option<String>,
}

impl MoreLikeThisToken {
    fn write_to(&self, buf: &mut String) {
        buf.push_str("moreLikeThis(");
        if let Some(document) = &self.document_parameter_name {
            let _ = write!(buf, "${document}");
        } else {
            write_token_run(&self.where_tokens, buf);
        }
        if let Some(options) = &self.options_parameter_name {
            let _ = write!(buf, ", ${options}");
        }
        buf.push(')');
    }
}

///
/// QueryToken
///
/// One structured fragment of a query. Structural markers are unit
/// variants, so "two operators in a row" style invariant checks reduce
/// to discriminant matches.
///

#[derive(Clone, Debug, PartialEq)]
pub enum QueryToken {
    Declare(DeclareToken),
    From(FromToken),
    GroupBy(GroupByToken),
    Where(WhereToken),
    OrderBy(OrderByToken),
    Load(LoadToken),
    FieldsToFetch(FieldsToFetchToken),
    GroupByKey {
        field_name: Option<String>,
        projected_name: Option<String>,
    },
    GroupBySum {
        field_name: String,
        projected_name: Option<String>,
    },
    GroupByCount {
        projected_name: Option<String>,
    },
    Facet(FacetToken),
    Suggest(SuggestToken),
    MoreLikeThis(MoreLikeThisToken),
    Operator(QueryOperator),
    OpenSubclause,
    CloseSubclause,
    Negate,
    True,
    IntersectMarker,
    Distinct,
}

impl QueryToken {
    /// Render this token, emitting a leading separator when the spacing
    /// table calls for one given the preceding token.
    pub fn write_to(&self, buf: &mut String, prev: Option<&Self>) {
        add_space_if_needed(prev, self, buf);

        match self {
            Self::Declare(token) => token.write_to(buf),
            Self::From(token) => token.write_to(buf),
            Self::GroupBy(token) => token.write_to(buf),
            Self::Where(token) => token.write_to(buf),
            Self::OrderBy(token) => token.write_to(buf),
            Self::Load(token) => token.write_to(buf),
            Self::FieldsToFetch(token) => token.write_to(buf),
            Self::GroupByKey {
                field_name,
                projected_name,
            } => {
                match field_name {
                    Some(field) => buf.push_str(field),
                    None => buf.push_str("key()"),
                }
                if let Some(projected) = projected_name {
                    let _ = write!(buf, " as {projected}");
                }
            }
            Self::GroupBySum {
                field_name,
                projected_name,
            } => {
                let _ = write!(buf, "sum({field_name})");
                if let Some(projected) = projected_name {
                    let _ = write!(buf, " as {projected}");
                }
            }
            Self::GroupByCount { projected_name } => {
                buf.push_str("count()");
                if let Some(projected) = projected_name {
                    let _ = write!(buf, " as {projected}");
                }
            }
            Self::Facet(token) => token.write_to(buf),
            Self::Suggest(token) => token.write_to(buf),
            Self::MoreLikeThis(token) => token.write_to(buf),
            Self::Operator(operator) => buf.push_str(operator.as_str()),
            Self::OpenSubclause => buf.push('('),
            Self::CloseSubclause => buf.push(')'),
            Self::Negate => buf.push_str("not"),
            Self::True => buf.push_str("true"),
            Self::IntersectMarker => buf.push(','),
            Self::Distinct => buf.push_str("distinct"),
        }
    }
}

/// Spacing table: a separating space is written between two tokens
/// unless the previous token just opened a subclause, or the current
/// token closes one, or the current token is the intersect separator.
fn add_space_if_needed(prev: Option<&QueryToken>, current: &QueryToken, buf: &mut String) {
    let Some(prev) = prev else {
        return;
    };

    if matches!(prev, QueryToken::OpenSubclause)
        || matches!(current, QueryToken::CloseSubclause | QueryToken::IntersectMarker)
    {
        return;
    }

    buf.push(' ');
}

/// Render a token run with the standard spacing rules.
pub fn write_token_run(tokens: &[QueryToken], buf: &mut String) {
    for (i, token) in tokens.iter().enumerate() {
        let prev = if i > 0 { tokens.get(i - 1) } else { None };
        token.write_to(buf, prev);
    }
}
