//! Reverse routing: build a concrete path from a pattern and values.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::hash::{BuildHasher, Hash};

use super::PathVars;

/// A pattern variable had no value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingValueError {
    pub key: String,
}

impl Display for MissingValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing value for path variable '{}'", self.key)
    }
}

impl std::error::Error for MissingValueError {}

/// Source of values for [`reverse`].
///
/// Positional values are looked up with stringified indexes (`"0"`, `"1"`, ...).
pub trait PathValues {
    fn value(&self, key: &str) -> Option<String>;
}

impl<K, V, S> PathValues for HashMap<K, V, S>
where
    K: Borrow<str> + Hash + Eq,
    V: Display,
    S: BuildHasher,
{
    fn value(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }
}

impl<V: Display> PathValues for [V] {
    fn value(&self, key: &str) -> Option<String> {
        key.parse::<usize>()
            .ok()
            .and_then(|index| self.get(index))
            .map(ToString::to_string)
    }
}

impl PathValues for PathVars {
    fn value(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }
}

/// Substitute every variable of `pattern`.
///
/// Each variable is resolved by name first, then by its position among all
/// variables of the pattern. Values are inserted verbatim.
pub fn reverse<T>(pattern: &str, values: &T) -> Result<String, MissingValueError>
where
    T: PathValues + ?Sized,
{
    let mut path = String::with_capacity(pattern.len() + 16);
    let mut position = 0usize;
    let mut lookup = |name: &str| {
        let index = position;
        position += 1;
        values
            .value(name)
            .or_else(|| values.value(&index.to_string()))
            .ok_or_else(|| MissingValueError {
                key: name.to_string(),
            })
    };

    let mut depth = 0usize;
    let mut start = 0usize;
    let mut name_end = usize::MAX;
    let mut literal_from = 0usize;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    path.push_str(&pattern[literal_from..i]);
                    start = i + 1;
                    name_end = usize::MAX;
                }
                depth += 1;
            }
            ':' if depth == 1 && name_end == usize::MAX => name_end = i,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let value = lookup(&pattern[start..i.min(name_end)])?;
                    path.push_str(&value);
                    literal_from = i + 1;
                }
            }
            '*' if depth == 0 => {
                path.push_str(&pattern[literal_from..i]);
                let key = if i == pattern.len() - 1 {
                    "*"
                } else {
                    &pattern[i + 1..]
                };
                path.push_str(&lookup(key)?);
                return Ok(path);
            }
            _ => {}
        }
    }

    path.push_str(&pattern[literal_from..]);
    Ok(path)
}

/// Substitute variables by position only.
pub fn reverse_positional<V: Display>(
    pattern: &str,
    values: &[V],
) -> Result<String, MissingValueError> {
    reverse(pattern, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_named() {
        let values = HashMap::from([("id", 42)]);
        assert_eq!(reverse("/order/{id}", &values).unwrap(), "/order/42");

        let values = HashMap::from([("id", "7"), ("sku", "abc")]);
        assert_eq!(
            reverse("/product/{id}/{sku:[a-z]+}/details", &values).unwrap(),
            "/product/7/abc/details"
        );
    }

    #[test]
    fn test_reverse_positional_fallback() {
        let values = HashMap::from([("0".to_string(), 42)]);
        assert_eq!(reverse("/order/{id}", &values).unwrap(), "/order/42");

        assert_eq!(
            reverse_positional("/a/{x}/b/{y}", &["1", "2"]).unwrap(),
            "/a/1/b/2"
        );
    }

    #[test]
    fn test_reverse_position_is_shared() {
        // `id` is named, so `name` gets position 1
        let values = HashMap::from([("id", "9"), ("1", "bob")]);
        assert_eq!(reverse("/u/{id}/{name}", &values).unwrap(), "/u/9/bob");
    }

    #[test]
    fn test_reverse_named_wins_over_positional() {
        let values = HashMap::from([("id", "named"), ("0", "positional")]);
        assert_eq!(reverse("/x/{id}", &values).unwrap(), "/x/named");
    }

    #[test]
    fn test_reverse_wildcard() {
        let values = HashMap::from([("*", "a/b/c.txt")]);
        assert_eq!(reverse("/files/*", &values).unwrap(), "/files/a/b/c.txt");

        let values = HashMap::from([("path", "css/site.css")]);
        assert_eq!(
            reverse("/assets/*path", &values).unwrap(),
            "/assets/css/site.css"
        );
    }

    #[test]
    fn test_reverse_missing() {
        let values: HashMap<&str, &str> = HashMap::new();
        let err = reverse("/order/{id}", &values).unwrap_err();
        assert_eq!(err.key, "id");
        assert_eq!(err.to_string(), "missing value for path variable 'id'");
    }

    #[test]
    fn test_reverse_static_pattern() {
        let values: HashMap<&str, &str> = HashMap::new();
        assert_eq!(reverse("/health", &values).unwrap(), "/health");
    }
}
