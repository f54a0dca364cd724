//! SDP offer/answer exchange against the negotiation endpoint.
//!
//! Two wire modes are supported:
//! - **JSON**: `POST {sdp, session}` as `application/json`
//! - **SDP**: `POST <raw offer>` as `application/sdp`, model in the query string
//!
//! `JsonWithSdpFallback` starts in JSON mode and retries exactly once in SDP
//! mode, with the same offer, when the server rejects the JSON body with
//! HTTP 400 `unsupported_content_type`.
//!
//! Answers are accepted either as raw SDP text or as JSON carrying the SDP at
//! `sdp` or `rtc_connection.sdp`.

use std::fmt;
use std::str::FromStr;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::base::{RealtimeError, RealtimeResult};
use super::diagnostics::Diagnostics;
use super::messages::{ANSWER_SDP_PATHS, HandshakeRequest, SessionPayload, first_string, lookup};
use crate::core::rtc::PeerConnection;
use crate::utils::with_model_query;

/// Error code that triggers the SDP-mode retry.
pub const UNSUPPORTED_CONTENT_TYPE: &str = "unsupported_content_type";

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Wire mode used for the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    Json,
    Sdp,
    #[default]
    JsonWithSdpFallback,
}

impl HandshakeMode {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sdp => "sdp",
            Self::JsonWithSdpFallback => "json_with_sdp_fallback",
        }
    }
}

impl FromStr for HandshakeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sdp" => Ok(Self::Sdp),
            "json_with_sdp_fallback" | "fallback" | "auto" => Ok(Self::JsonWithSdpFallback),
            other => Err(format!(
                "Unknown handshake mode '{other}' (expected json, sdp or json_with_sdp_fallback)"
            )),
        }
    }
}

impl fmt::Display for HandshakeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A non-2xx answer from the endpoint.
#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    detail: String,
    /// `error.code` of a JSON body
    code: Option<String>,
    json: bool,
}

impl Rejection {
    /// JSON bodies are judged by `error.code` only; plain-text bodies by content.
    fn is_unsupported_content_type(&self) -> bool {
        if self.status != StatusCode::BAD_REQUEST {
            return false;
        }
        if self.json {
            self.code.as_deref() == Some(UNSUPPORTED_CONTENT_TYPE)
        } else {
            self.detail.contains(UNSUPPORTED_CONTENT_TYPE)
        }
    }
}

#[derive(Debug)]
enum ExchangeError {
    Rejected(Rejection),
    Other(RealtimeError),
}

impl From<RealtimeError> for ExchangeError {
    fn from(e: RealtimeError) -> Self {
        ExchangeError::Other(e)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Other(e.into())
    }
}

impl From<ExchangeError> for RealtimeError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Rejected(r) => RealtimeError::HandshakeFailed {
                status: r.status.as_u16(),
                detail: r.detail,
            },
            ExchangeError::Other(e) => e,
        }
    }
}

/// Performs the offer/answer exchange. Never retries on its own beyond the
/// single content-type fallback.
pub struct HandshakeNegotiator {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    mode: HandshakeMode,
    diagnostics: Diagnostics,
}

impl HandshakeNegotiator {
    pub fn new(
        endpoint: Url,
        model: impl Into<String>,
        mode: HandshakeMode,
        diagnostics: Diagnostics,
    ) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, model, mode, diagnostics)
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: Url,
        model: impl Into<String>,
        mode: HandshakeMode,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            http,
            endpoint,
            model: model.into(),
            mode,
            diagnostics,
        }
    }

    /// Create and apply the local offer, exchange it and apply the answer.
    pub async fn negotiate(
        &self,
        peer: &dyn PeerConnection,
        api_key: &str,
        descriptor: &SessionPayload,
    ) -> RealtimeResult<()> {
        let offer_sdp = peer.create_offer().await?;
        peer.set_local_description(&offer_sdp).await?;

        let answer_sdp = self.exchange(api_key, &offer_sdp, descriptor).await?;

        peer.set_remote_answer(&answer_sdp).await?;
        self.diagnostics.info("Remote answer applied");
        Ok(())
    }

    /// POST the offer in the configured mode and return the answer SDP.
    pub async fn exchange(
        &self,
        api_key: &str,
        offer_sdp: &str,
        descriptor: &SessionPayload,
    ) -> RealtimeResult<String> {
        match self.mode {
            HandshakeMode::Json => Ok(self.post_json(api_key, offer_sdp, descriptor).await?),
            HandshakeMode::Sdp => Ok(self.post_sdp(api_key, offer_sdp).await?),
            HandshakeMode::JsonWithSdpFallback => {
                match self.post_json(api_key, offer_sdp, descriptor).await {
                    Err(ExchangeError::Rejected(rejection))
                        if rejection.is_unsupported_content_type() =>
                    {
                        self.diagnostics.warn(
                            "JSON handshake rejected, retrying with application/sdp",
                            Some(serde_json::json!({ "status": rejection.status.as_u16() })),
                        );
                        Ok(self.post_sdp(api_key, offer_sdp).await?)
                    }
                    other => Ok(other?),
                }
            }
        }
    }

    async fn post_json(
        &self,
        api_key: &str,
        offer_sdp: &str,
        descriptor: &SessionPayload,
    ) -> Result<String, ExchangeError> {
        tracing::debug!(endpoint = %self.endpoint, "Posting JSON handshake");

        let body = HandshakeRequest {
            sdp: offer_sdp,
            session: descriptor,
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        Self::read_answer(response).await
    }

    async fn post_sdp(&self, api_key: &str, offer_sdp: &str) -> Result<String, ExchangeError> {
        let url = with_model_query(&self.endpoint, &self.model);
        tracing::debug!(endpoint = %url, "Posting SDP handshake");

        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await?;

        Self::read_answer(response).await
    }

    async fn read_answer(response: reqwest::Response) -> Result<String, ExchangeError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Rejected(parse_rejection(
                status,
                &content_type,
                &body,
            )));
        }

        extract_answer_sdp(&content_type, &body)
            .ok_or(ExchangeError::Other(RealtimeError::MissingAnswerSdp))
    }
}

fn parse_rejection(status: StatusCode, content_type: &str, body: &str) -> Rejection {
    if content_type.contains("application/json")
        && let Ok(value) = serde_json::from_str::<Value>(body)
    {
        let code = lookup(&value, &["error", "code"])
            .and_then(Value::as_str)
            .map(str::to_string);
        return Rejection {
            status,
            detail: body.trim().to_string(),
            code,
            json: true,
        };
    }

    let detail = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("").to_string()
    } else {
        body.trim().to_string()
    };
    Rejection {
        status,
        detail,
        code: None,
        json: false,
    }
}

/// Pull the answer SDP out of a 2xx body, JSON-wrapped or raw.
pub fn extract_answer_sdp(content_type: &str, body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    let looks_like_json = content_type.contains("application/json") || trimmed.starts_with('{');

    if looks_like_json && let Ok(value) = serde_json::from_str::<Value>(body) {
        return first_string(&value, ANSWER_SDP_PATHS).filter(|sdp| !sdp.is_empty());
    }

    trimmed.starts_with("v=").then(|| body.to_string())
}
