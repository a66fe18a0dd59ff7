//! Request replay
//!
//! Builds a brand-new outbound request from caller-supplied (usually edited)
//! fields and executes it against the live network. Replays never pass
//! through the capture proxy and are never recorded.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dgateway_core::{classify, inflate_if_gzip, HeaderMultimap};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Replay payload accepted by the admin API
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReplayRequest {
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Text,
    Base64,
}

/// Outcome of a replay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub status_code: u16,
    pub headers: HeaderMultimap,
    pub body: String,
    pub body_encoding: BodyEncoding,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("invalid URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("invalid method '{0}'")]
    InvalidMethod(String),

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {0} failed: {1}")]
    Send(String, #[source] reqwest::Error),

    #[error("failed to read response from {0}: {1}")]
    ReadBody(String, #[source] reqwest::Error),
}

impl ReplayError {
    /// Whether the caller, not the network, is at fault
    pub fn is_bad_input(&self) -> bool {
        matches!(self, ReplayError::InvalidUrl(..))
    }
}

/// Executes replays against the configured target
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    target: Url,
    timeout: Duration,
}

impl ReplayEngine {
    pub fn new(target: Url, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Resolve a possibly relative URL against the target; absolute URLs
    /// are returned unchanged
    pub fn resolve_url(&self, raw: &str) -> Result<Url, ReplayError> {
        self.target
            .join(raw.trim())
            .map_err(|e| ReplayError::InvalidUrl(raw.to_string(), e.to_string()))
    }

    pub async fn replay(&self, request: ReplayRequest) -> Result<ReplayResult, ReplayError> {
        let url = self.resolve_url(&request.url)?;
        let method = if request.method.trim().is_empty() {
            Method::GET
        } else {
            Method::from_bytes(request.method.trim().as_bytes())
                .map_err(|_| ReplayError::InvalidMethod(request.method.clone()))?
        };

        // Fresh client per replay: no shared pool, no cookie jar
        let client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(ReplayError::Client)?;

        let mut outbound = client.request(method.clone(), url.clone());
        for (name, values) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ReplayError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(&values.join(", "))
                .map_err(|_| ReplayError::InvalidHeader(name.clone()))?;
            outbound = outbound.header(header_name, header_value);
        }
        if !request.body.is_empty() {
            outbound = outbound.body(request.body);
        }

        debug!("Replaying {} {}", method, url);
        let response = outbound
            .send()
            .await
            .map_err(|e| ReplayError::Send(url.to_string(), e))?;

        let status_code = response.status().as_u16();
        let headers = HeaderMultimap::from_header_map(response.headers());
        let raw = response
            .bytes()
            .await
            .map_err(|e| ReplayError::ReadBody(url.to_string(), e))?;

        let body = inflate_if_gzip(&raw, headers.get("content-encoding"));
        let (body, body_encoding) = if classify(&body, headers.get("content-type")).is_text() {
            (String::from_utf8_lossy(&body).into_owned(), BodyEncoding::Text)
        } else {
            (STANDARD.encode(&body), BodyEncoding::Base64)
        };

        if status_code >= 500 {
            warn!("Replay of {} {} answered {}", method, url, status_code);
        }

        Ok(ReplayResult {
            status_code,
            headers,
            body,
            body_encoding,
        })
    }
}
