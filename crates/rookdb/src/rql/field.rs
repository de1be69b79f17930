use crate::error::ValidationError;

/// Field name the server resolves to the document id, regardless of the
/// entity's own identity property name.
pub const DOCUMENT_ID_FIELD_NAME: &str = "id()";

/// Quote a field path if it contains characters outside `[A-Za-z0-9_.]`,
/// escaping any internal single quotes.
///
/// Applied uniformly to where-clause field references and include lists.
#[must_use]
pub fn escape_if_necessary(name: &str) -> String {
    if name.is_empty() || name == DOCUMENT_ID_FIELD_NAME || !requires_quotes(name) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + 2);
    out.push('\'');
    for ch in name.chars() {
        if ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

fn requires_quotes(name: &str) -> bool {
    name.chars()
        .any(|ch| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
}

/// Reject field names that can never be valid in a predicate.
pub fn assert_valid_field_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyFieldName);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(escape_if_necessary("name"), "name");
        assert_eq!(escape_if_necessary("address.city"), "address.city");
        assert_eq!(escape_if_necessary("snake_case_9"), "snake_case_9");
    }

    #[test]
    fn special_characters_force_quoting() {
        assert_eq!(escape_if_necessary("first name"), "'first name'");
        assert_eq!(escape_if_necessary("tags[]"), "'tags[]'");
        assert_eq!(escape_if_necessary("it's"), "'it\\'s'");
    }

    #[test]
    fn document_id_pseudo_field_is_never_quoted() {
        assert_eq!(escape_if_necessary(DOCUMENT_ID_FIELD_NAME), "id()");
    }

    #[test]
    fn empty_field_name_is_invalid() {
        assert!(assert_valid_field_name("").is_err());
        assert!(assert_valid_field_name("name").is_ok());
    }
}
