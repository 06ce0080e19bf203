//! What a client presented when it opened the connection.

use std::collections::HashMap;

/// The request line and headers captured during the WebSocket upgrade.
///
/// Live connections identify themselves through query parameters
/// (`?user_id=7&token=...`) and, optionally, an `Authorization` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Request path, e.g. `/ws`.
    pub path: String,
    /// Decoded query parameters. Later duplicates win.
    pub query: HashMap<String, String>,
    /// Raw value of the `Authorization` header, if sent.
    pub authorization: Option<String>,
}

impl Handshake {
    /// Builds a handshake from a path, raw query string and header value.
    pub fn new(
        path: impl Into<String>,
        raw_query: Option<&str>,
        authorization: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            query: raw_query.map(parse_query).unwrap_or_default(),
            authorization,
        }
    }

    /// Returns a query parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Splits `a=1&b=two` into a map, percent-decoding keys and values.
/// Pairs that are not valid UTF-8 after decoding are dropped.
fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode(key)?;
            let value = decode(value)?;
            Some((key, value))
        })
        .collect()
}

#[cfg(feature = "websocket")]
fn decode(part: &str) -> Option<String> {
    urlencoding::decode(part).ok().map(|s| s.into_owned())
}

#[cfg(not(feature = "websocket"))]
fn decode(part: &str) -> Option<String> {
    Some(part.to_string())
}
