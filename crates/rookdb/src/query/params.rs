use crate::error::ConstructionError;
use derive_more::{Deref, DerefMut};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

///
/// Parameters
///
/// Query parameter map, bound out-of-band from the query text as
/// `$name` references. Generated names are sequential (`p0`, `p1`, ...)
/// and never reused; insertion order is irrelevant.
///

#[derive(Clone, Debug, Default, Deref, DerefMut, PartialEq, Serialize)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value under the next generated name and return that name.
    pub fn add_generated(&mut self, value: Value) -> String {
        let name = format!("p{}", self.0.len());
        self.0.insert(name.clone(), value);
        name
    }

    /// Bind a value under an explicit name. A leading `$` is stripped;
    /// rebinding an existing name is a construction error.
    pub fn add_named(&mut self, name: &str, value: Value) -> Result<(), ConstructionError> {
        let name = name.strip_prefix('$').unwrap_or(name);
        if self.0.contains_key(name) {
            return Err(ConstructionError::DuplicateParameter {
                name: name.to_string(),
            });
        }

        self.0.insert(name.to_string(), value);
        Ok(())
    }
}

///
/// WhereParams
///
/// Transient input to value normalization before a predicate's
/// parameter is bound.
///

#[derive(Clone, Debug)]
pub struct WhereParams {
    pub field_name: String,
    pub value: Value,
    pub is_nested_path: bool,
    pub allow_wildcards: bool,
    pub is_exact: bool,
}

impl WhereParams {
    #[must_use]
    pub fn new(field_name: impl Into<String>, value: Value) -> Self {
        Self {
            field_name: field_name.into(),
            value,
            is_nested_path: false,
            allow_wildcards: false,
            is_exact: false,
        }
    }
}

///
/// QueryValue
///
/// Conversion into a bindable parameter value. Dates format to the
/// server's 7-digit-fraction ISO form; durations convert to 100ns
/// ticks. Anything already a `serde_json::Value` passes through.
///

pub trait QueryValue {
    fn into_value(self) -> Value;
}

impl QueryValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl QueryValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl QueryValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl QueryValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl QueryValue for f64 {
    fn into_value(self) -> Value {
        serde_json::json!(self)
    }
}

impl QueryValue for OffsetDateTime {
    fn into_value(self) -> Value {
        Value::String(format_datetime(self))
    }
}

impl QueryValue for Duration {
    fn into_value(self) -> Value {
        let ticks = self.whole_nanoseconds() / 100;
        Value::from(i64::try_from(ticks).unwrap_or(i64::MAX))
    }
}

impl<T: QueryValue> QueryValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: QueryValue> QueryValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(QueryValue::into_value).collect())
    }
}

macro_rules! impl_query_value_int {
    ($($t:ty),*) => {
        $(
            impl QueryValue for $t {
                fn into_value(self) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

impl_query_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

fn format_datetime(value: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:07}",
        value.year(),
        u8::from(value.month()),
        value.day(),
        value.hour(),
        value.minute(),
        value.second(),
        value.nanosecond() / 100
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_are_sequential_and_distinct() {
        let mut parameters = Parameters::new();
        assert_eq!(parameters.add_generated(Value::from(1)), "p0");
        assert_eq!(parameters.add_generated(Value::from(2)), "p1");
        assert_eq!(parameters.add_generated(Value::from(3)), "p2");
        assert_eq!(parameters.len(), 3);
    }

    #[test]
    fn named_parameters_strip_dollar_and_reject_duplicates() {
        let mut parameters = Parameters::new();
        parameters.add_named("$limit", Value::from(10)).unwrap();
        assert!(parameters.contains_key("limit"));

        let err = parameters.add_named("limit", Value::from(20)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConstructionError::DuplicateParameter { .. }
        ));
    }

    #[test]
    fn duration_converts_to_ticks() {
        let value = Duration::seconds(2).into_value();
        assert_eq!(value, Value::from(20_000_000_i64));
    }
}
