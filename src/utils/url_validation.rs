//! Negotiation endpoint URL validation
//!
//! The API key travels in the `Authorization` header of every handshake, so the
//! endpoint must:
//! - Be an absolute, well-formed URL with a host
//! - Use HTTPS, except for loopback hosts used in local development
//! - Carry no embedded credentials

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not embed credentials")]
    CredentialsNotAllowed,
}

/// Whether the URL host is a loopback name or address.
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Validates a negotiation endpoint URL and returns it parsed.
///
/// # Example
/// ```rust
/// use rtc_voice_client::utils::validate_endpoint_url;
///
/// assert!(validate_endpoint_url("https://api.openai.com/v1/realtime/calls").is_ok());
/// assert!(validate_endpoint_url("http://127.0.0.1:8080/session").is_ok());
///
/// // Plain HTTP is only allowed for loopback hosts
/// assert!(validate_endpoint_url("http://api.example.com/session").is_err());
/// ```
pub fn validate_endpoint_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    match parsed.scheme() {
        "https" => {}
        "http" if is_loopback_host(&parsed) => {}
        other => {
            warn!(url = %parsed, "Rejecting negotiation endpoint with insecure scheme");
            return Err(UrlValidationError::HttpsRequired(other.to_string()));
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(UrlValidationError::CredentialsNotAllowed);
    }

    Ok(parsed)
}

/// Returns `endpoint` with a `model` query parameter appended.
pub fn with_model_query(endpoint: &Url, model: &str) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("model", model);
    url
}
