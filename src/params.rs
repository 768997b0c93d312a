//! Path and query parameters of the current request.

use std::collections::HashMap;

use tracing::debug;

/// Named path parameters captured by the router, plus the decoded query
/// string.
#[derive(Debug, Default, Clone)]
pub struct Params {
    path: HashMap<String, String>,
    query: Vec<(String, String)>,
}

impl Params {
    pub fn new(path: HashMap<String, String>, query: Option<&str>) -> Self {
        let query = query.map(parse_query).unwrap_or_default();
        Self { path, query }
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `params.get("id")` on `/users/42` returns `Some("42")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.path.get(key).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated query parameter, in request order.
    pub fn query_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn clear(&mut self) {
        self.path.clear();
        self.query.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.query.is_empty()
    }
}

/// Decodes an `application/x-www-form-urlencoded` query. An undecodable
/// query yields no pairs.
fn parse_query(raw: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(raw).unwrap_or_else(|e| {
        debug!(query = raw, "ignoring undecodable query: {e}");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_lookup() {
        let path = HashMap::from([("id".to_owned(), "42".to_owned())]);
        let params = Params::new(path, Some("tag=a&tag=b&q=hello+world&x=%2Fy"));

        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.query("q"), Some("hello world"));
        assert_eq!(params.query("x"), Some("/y"));
        assert_eq!(params.query_all("tag").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(params.query("missing"), None);
    }
}
