// Cache key construction.
// Keys are the request path plus a canonical, order-independent query string.

use url::form_urlencoded;

/// Build the cache key for a path and its query parameters.
///
/// Parameters are sorted by name and then value before encoding, so the
/// same parameter set always maps to the same key regardless of the order
/// the caller supplied it in.
pub fn cache_key(path: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let mut pairs: Vec<&(String, String)> = query.iter().collect();
    pairs.sort();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    format!("{}?{}", path, serializer.finish())
}

/// The path portion of a cache key.
pub fn key_path(key: &str) -> &str {
    key.split_once('?').map_or(key, |(path, _)| path)
}
