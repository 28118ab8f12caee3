//! Ordered HTTP header list with case-insensitive name lookup.
//!
//! Headers are kept as an association list rather than a map: the order in which a
//! handler inserts response headers is the order they reach the wire, and request
//! headers keep their order of arrival.

use std::fmt;

/// An ordered, multi-value HTTP header list.
///
/// Name comparison is ASCII case-insensitive; the original spelling of every name
/// is retained for serialization.
///
/// # Examples
///
/// ```
/// use h1chain::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/plain");
/// headers.insert("Set-Cookie", "a=1");
/// headers.insert("Set-Cookie", "b=2");
///
/// assert_eq!(headers.get("content-type"), Some("text/plain"));
/// let all: Vec<_> = headers.get_all("set-cookie").collect();
/// assert_eq!(all, vec!["a=1", "b=2"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header list with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry. Repeated names are kept as separate entries.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single entry.
    ///
    /// The replacement takes the position of the first removed entry, or goes to
    /// the end when the name was absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.inner.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(pos) => {
                let mut idx = 0;
                self.inner.retain(|(k, _)| {
                    let keep = idx <= pos || !k.eq_ignore_ascii_case(&name);
                    idx += 1;
                    keep
                });
                self.inner[pos] = (name, value);
            }
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name` in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any comma-separated element of any `name` header equals
    /// `token` (case-insensitive). Used for list headers such as `Connection`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|element| element.trim().eq_ignore_ascii_case(token))
    }

    /// Removes every entry named `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if at least one entry is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn display_keeps_insertion_order() {
        let h: Headers = [("X-B", "2"), ("X-A", "1"), ("X-B", "3")].into_iter().collect();
        assert_eq!(h.to_string(), "X-B: 2\r\nX-A: 1\r\nX-B: 3\r\n");
    }

    #[test]
    fn set_replaces_in_place() {
        let mut h = Headers::new();
        h.insert("X-First", "1");
        h.insert("Content-Length", "10");
        h.insert("X-Last", "2");
        h.insert("content-length", "11");
        h.set("Content-Length", "5");
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(
            pairs,
            vec![("X-First", "1"), ("Content-Length", "5"), ("X-Last", "2")]
        );
    }

    #[test]
    fn list_tokens() {
        let mut h = Headers::new();
        h.insert("Connection", "Upgrade, Close");
        assert!(h.has_token("connection", "close"));
        assert!(h.has_token("connection", "upgrade"));
        assert!(!h.has_token("connection", "keep-alive"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        h.insert("X-Foo", "baz");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo"));
    }
}
