//! Client-side conventions: naming, identity, and per-session limits.

use serde_json::Value;
use std::{cell::RefCell, collections::BTreeMap, fmt};

/// Property that carries a document's identity inside entity JSON.
pub const IDENTITY_PROPERTY: &str = "id";

/// Converts a typed value into query-string form before it is bound as a
/// parameter. Returning `None` passes the value to the next converter.
pub type QueryValueConverter = Box<dyn Fn(&str, &Value, bool) -> Option<String>>;

/// Resolves a collection name from a type name, overriding the default
/// pluralization when it returns `Some`.
pub type CollectionNameFinder = Box<dyn Fn(&str) -> Option<String>>;

///
/// DocumentConventions
///
/// Shared, mostly-static configuration consulted by the session and the
/// query builder. Converters are addressed by registration handle so a
/// removal never shifts the position of later entries.
///

pub struct DocumentConventions {
    pub max_number_of_requests_per_session: u32,
    pub identity_parts_separator: String,
    collection_name_finder: Option<CollectionNameFinder>,
    collection_names_cache: RefCell<BTreeMap<String, String>>,
    query_value_converters: Vec<Option<QueryValueConverter>>,
}

impl Default for DocumentConventions {
    fn default() -> Self {
        Self {
            max_number_of_requests_per_session: 30,
            identity_parts_separator: "/".to_string(),
            collection_name_finder: None,
            collection_names_cache: RefCell::new(BTreeMap::new()),
            query_value_converters: Vec::new(),
        }
    }
}

impl DocumentConventions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_collection_name_finder(&mut self, finder: CollectionNameFinder) {
        self.collection_name_finder = Some(finder);
    }

    /// Collection name for a type name, e.g. `my_app::model::User` ->
    /// `Users`. The finder hook wins; otherwise the last path segment is
    /// pluralized and cached.
    pub fn collection_name(&self, type_name: &str) -> String {
        if let Some(finder) = &self.collection_name_finder
            && let Some(name) = finder(type_name)
        {
            return name;
        }

        if let Some(cached) = self.collection_names_cache.borrow().get(type_name) {
            return cached.clone();
        }

        let short = type_name.rsplit("::").next().unwrap_or(type_name);
        let name = pluralize(short);
        self.collection_names_cache
            .borrow_mut()
            .insert(type_name.to_string(), name.clone());
        name
    }

    /// Register a converter and return its handle.
    pub fn register_query_value_converter(&mut self, converter: QueryValueConverter) -> usize {
        self.query_value_converters.push(Some(converter));
        self.query_value_converters.len() - 1
    }

    /// Remove a converter by handle. Handles of other converters stay
    /// valid.
    pub fn remove_query_value_converter(&mut self, handle: usize) {
        if let Some(slot) = self.query_value_converters.get_mut(handle) {
            *slot = None;
        }
    }

    /// Run the value through registered converters in registration
    /// order; the first one that accepts it wins.
    #[must_use]
    pub fn try_convert_value_for_query(
        &self,
        field_name: &str,
        value: &Value,
        for_range: bool,
    ) -> Option<String> {
        self.query_value_converters
            .iter()
            .flatten()
            .find_map(|converter| converter(field_name, value, for_range))
    }
}

impl fmt::Debug for DocumentConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConventions")
            .field(
                "max_number_of_requests_per_session",
                &self.max_number_of_requests_per_session,
            )
            .field("identity_parts_separator", &self.identity_parts_separator)
            .field("query_value_converters", &self.query_value_converters.len())
            .finish_non_exhaustive()
    }
}

fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(stem) = name.strip_suffix('y') {
        let penultimate = lower.chars().rev().nth(1);
        if !matches!(penultimate, Some('a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{stem}ies");
        }
    }
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{name}es");
    }

    format!("{name}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_pluralizes_last_path_segment() {
        let conventions = DocumentConventions::new();
        assert_eq!(conventions.collection_name("my_app::model::User"), "Users");
        assert_eq!(conventions.collection_name("Company"), "Companies");
        assert_eq!(conventions.collection_name("Box"), "Boxes");
        assert_eq!(conventions.collection_name("Day"), "Days");
    }

    #[test]
    fn finder_hook_overrides_pluralization() {
        let mut conventions = DocumentConventions::new();
        conventions.set_collection_name_finder(Box::new(|type_name| {
            type_name.ends_with("Person").then(|| "People".to_string())
        }));

        assert_eq!(conventions.collection_name("model::Person"), "People");
        assert_eq!(conventions.collection_name("model::User"), "Users");
    }

    #[test]
    fn removed_converter_keeps_later_handles_stable() {
        let mut conventions = DocumentConventions::new();
        let first = conventions
            .register_query_value_converter(Box::new(|_, _, _| Some("first".to_string())));
        let second = conventions
            .register_query_value_converter(Box::new(|_, _, _| Some("second".to_string())));
        assert_eq!((first, second), (0, 1));

        conventions.remove_query_value_converter(first);
        let converted =
            conventions.try_convert_value_for_query("name", &Value::from("x"), false);
        assert_eq!(converted.as_deref(), Some("second"));
    }
}
