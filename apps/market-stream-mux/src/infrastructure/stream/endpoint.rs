//! Stream Endpoint Derivation
//!
//! The streaming URL is derived from the configured REST API base: same
//! host and port, scheme upgraded (`http` → `ws`, `https` → `wss`), and the
//! venue's path suffix appended to the base path.

use url::Url;

/// Endpoint derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The base is not a valid URL.
    #[error("invalid API base {0:?}: {1}")]
    InvalidBase(String, String),
    /// The base scheme has no streaming counterpart.
    #[error("unsupported scheme {0:?}, expected http(s) or ws(s)")]
    UnsupportedScheme(String),
}

/// Parse an API base URL.
///
/// # Errors
///
/// Returns [`EndpointError::InvalidBase`] if `raw` does not parse.
pub fn parse_api_base(raw: &str) -> Result<Url, EndpointError> {
    Url::parse(raw.trim()).map_err(|e| EndpointError::InvalidBase(raw.to_string(), e.to_string()))
}

/// Build the streaming URL for `path` under `api_base`.
///
/// # Errors
///
/// Returns [`EndpointError::UnsupportedScheme`] for schemes other than
/// `http`, `https`, `ws`, and `wss`.
pub fn stream_url(api_base: &Url, path: &str) -> Result<Url, EndpointError> {
    let scheme = match api_base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };

    let mut url = api_base.clone();
    url.set_scheme(scheme)
        .map_err(|()| EndpointError::UnsupportedScheme(api_base.scheme().to_string()))?;

    let base_path = api_base.path().trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    url.set_path(&format!("{base_path}/{suffix}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
