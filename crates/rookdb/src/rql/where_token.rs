use std::fmt::Write;

///
/// CONSTANTS
///

/// Server-side default distance error for spatial predicates; the margin
/// is only rendered when it differs from this value.
pub const DEFAULT_SPATIAL_DISTANCE_ERROR_PCT: f64 = 0.025;

///
/// WhereOperator
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WhereOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    In,
    AllIn,
    StartsWith,
    EndsWith,
    Search,
    Lucene,
    Exists,
    Regex,
    SpatialWithin,
    SpatialContains,
    SpatialDisjoint,
    SpatialIntersects,
}

///
/// SearchOperator
///
/// Term-joining operator inside a `search()` predicate.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchOperator {
    Or,
    And,
}

///
/// SpatialUnits
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpatialUnits {
    Kilometers,
    Miles,
}

impl SpatialUnits {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Kilometers => "kilometers",
            Self::Miles => "miles",
        }
    }
}

///
/// ShapeToken
///
/// Spatial shape argument of a spatial predicate. Radius, coordinates,
/// and WKT text are all parameter references, never inline literals.
///

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeToken {
    Circle {
        radius_parameter: String,
        latitude_parameter: String,
        longitude_parameter: String,
        units: Option<SpatialUnits>,
    },
    Wkt {
        shape_parameter: String,
    },
}

impl ShapeToken {
    pub(crate) fn write_to(&self, buf: &mut String) {
        match self {
            Self::Circle {
                radius_parameter,
                latitude_parameter,
                longitude_parameter,
                units,
            } => {
                let _ = write!(
                    buf,
                    "spatial.circle(${radius_parameter}, ${latitude_parameter}, ${longitude_parameter}"
                );
                if let Some(units) = units {
                    let _ = write!(buf, ", '{}'", units.as_str());
                }
                buf.push(')');
            }
            Self::Wkt { shape_parameter } => {
                let _ = write!(buf, "spatial.wkt(${shape_parameter})");
            }
        }
    }
}

///
/// MethodCallToken
///
/// Method-call value of a predicate, e.g. a compare-exchange reference:
/// the comparison targets a server-side atomic value instead of a
/// literal.
///

#[derive(Clone, Debug, PartialEq)]
pub struct MethodCallToken {
    pub kind: MethodCallKind,
    pub parameters: Vec<String>,
    pub access_path: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MethodCallKind {
    CmpXchg,
}

impl MethodCallToken {
    fn write_to(&self, buf: &mut String) {
        match self.kind {
            MethodCallKind::CmpXchg => buf.push_str("cmpxchg("),
        }
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            let _ = write!(buf, "${parameter}");
        }
        buf.push(')');
        if let Some(path) = &self.access_path {
            let _ = write!(buf, ".{path}");
        }
    }
}

///
/// WhereOptions
///
/// Modifiers owned by a single where token. Boost/fuzzy/proximity wrap
/// the predicate text; from/to name the range parameters of a between
/// clause; the shape and method fields carry spatial and method-call
/// payloads.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhereOptions {
    pub exact: bool,
    pub boost: Option<f64>,
    pub fuzzy: Option<f64>,
    pub proximity: Option<u32>,
    pub search_operator: Option<SearchOperator>,
    pub from_parameter_name: Option<String>,
    pub to_parameter_name: Option<String>,
    pub shape: Option<ShapeToken>,
    pub distance_error_pct: Option<f64>,
    pub method: Option<MethodCallToken>,
}

impl WhereOptions {
    #[must_use]
    pub fn exact(exact: bool) -> Self {
        Self {
            exact,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn search(operator: SearchOperator) -> Self {
        Self {
            search_operator: Some(operator),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_to(from_parameter_name: String, to_parameter_name: String) -> Self {
        Self {
            from_parameter_name: Some(from_parameter_name),
            to_parameter_name: Some(to_parameter_name),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn shape(shape: ShapeToken, distance_error_pct: f64) -> Self {
        Self {
            shape: Some(shape),
            distance_error_pct: Some(distance_error_pct),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn method(method: MethodCallToken, exact: bool) -> Self {
        Self {
            exact,
            method: Some(method),
            ..Self::default()
        }
    }
}

///
/// WhereToken
///
/// A single predicate. The field name is already escaped/remapped by the
/// builder; rendering is a pure function of the token.
///

#[derive(Clone, Debug, PartialEq)]
pub struct WhereToken {
    pub field_name: String,
    pub operator: WhereOperator,
    pub parameter_name: Option<String>,
    pub options: WhereOptions,
}

impl WhereToken {
    #[must_use]
    pub fn new(operator: WhereOperator, field_name: String, parameter_name: Option<String>) -> Self {
        Self {
            field_name,
            operator,
            parameter_name,
            options: WhereOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(
        operator: WhereOperator,
        field_name: String,
        parameter_name: Option<String>,
        options: WhereOptions,
    ) -> Self {
        Self {
            field_name,
            operator,
            parameter_name,
            options,
        }
    }

    pub(crate) fn write_to(&self, buf: &mut String) {
        if self.options.boost.is_some() {
            buf.push_str("boost(");
        }
        if self.options.fuzzy.is_some() {
            buf.push_str("fuzzy(");
        }
        if self.options.proximity.is_some() {
            buf.push_str("proximity(");
        }
        if self.options.exact {
            buf.push_str("exact(");
        }

        match self.operator {
            WhereOperator::Search => buf.push_str("search("),
            WhereOperator::Lucene => buf.push_str("lucene("),
            WhereOperator::StartsWith => buf.push_str("startsWith("),
            WhereOperator::EndsWith => buf.push_str("endsWith("),
            WhereOperator::Exists => buf.push_str("exists("),
            WhereOperator::Regex => buf.push_str("regex("),
            WhereOperator::SpatialWithin => buf.push_str("spatial.within("),
            WhereOperator::SpatialContains => buf.push_str("spatial.contains("),
            WhereOperator::SpatialDisjoint => buf.push_str("spatial.disjoint("),
            WhereOperator::SpatialIntersects => buf.push_str("spatial.intersects("),
            _ => {}
        }

        buf.push_str(&self.field_name);
        self.write_operator_body(buf);

        if self.options.exact {
            buf.push(')');
        }
        if let Some(proximity) = self.options.proximity {
            let _ = write!(buf, ", {proximity})");
        }
        if let Some(fuzzy) = self.options.fuzzy {
            let _ = write!(buf, ", {fuzzy})");
        }
        if let Some(boost) = self.options.boost {
            let _ = write!(buf, ", {boost})");
        }
    }

    fn write_operator_body(&self, buf: &mut String) {
        match self.operator {
            WhereOperator::In => {
                let _ = write!(buf, " in (${})", self.parameter_name());
            }
            WhereOperator::AllIn => {
                let _ = write!(buf, " all in (${})", self.parameter_name());
            }
            WhereOperator::Between => {
                let from = self.options.from_parameter_name.as_deref().unwrap_or("");
                let to = self.options.to_parameter_name.as_deref().unwrap_or("");
                let _ = write!(buf, " between ${from} and ${to}");
            }
            WhereOperator::Equals => self.write_comparison(buf, " = "),
            WhereOperator::NotEquals => self.write_comparison(buf, " != "),
            WhereOperator::GreaterThan => self.write_comparison(buf, " > "),
            WhereOperator::GreaterThanOrEqual => self.write_comparison(buf, " >= "),
            WhereOperator::LessThan => self.write_comparison(buf, " < "),
            WhereOperator::LessThanOrEqual => self.write_comparison(buf, " <= "),
            WhereOperator::Search => {
                let _ = write!(buf, ", ${}", self.parameter_name());
                if self.options.search_operator == Some(SearchOperator::And) {
                    buf.push_str(", and");
                }
                buf.push(')');
            }
            WhereOperator::Lucene
            | WhereOperator::StartsWith
            | WhereOperator::EndsWith
            | WhereOperator::Regex => {
                let _ = write!(buf, ", ${})", self.parameter_name());
            }
            WhereOperator::Exists => buf.push(')'),
            WhereOperator::SpatialWithin
            | WhereOperator::SpatialContains
            | WhereOperator::SpatialDisjoint
            | WhereOperator::SpatialIntersects => {
                buf.push_str(", ");
                if let Some(shape) = &self.options.shape {
                    shape.write_to(buf);
                }
                if let Some(pct) = self.options.distance_error_pct {
                    if (pct - DEFAULT_SPATIAL_DISTANCE_ERROR_PCT).abs() > f64::EPSILON {
                        let _ = write!(buf, ", {pct}");
                    }
                }
                buf.push(')');
            }
        }
    }

    fn write_comparison(&self, buf: &mut String, symbol: &str) {
        buf.push_str(symbol);
        if let Some(method) = &self.options.method {
            method.write_to(buf);
        } else {
            let _ = write!(buf, "${}", self.parameter_name());
        }
    }

    fn parameter_name(&self) -> &str {
        self.parameter_name.as_deref().unwrap_or("")
    }
}
