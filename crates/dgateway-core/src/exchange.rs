//! Exchange records
//!
//! An [`ExchangeRecord`] is the candidate handed from the proxy to the
//! persistence pipeline. Stored rows come back as [`ExchangeSummary`]
//! (list view), [`ExchangeMetadata`] (detail view), [`StoredBody`] (a single
//! blob) or [`StoredExchange`] (full row, used by the HAR export).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, BodyKind};
use crate::codec::{decode_for_storage, inflate_if_gzip};
use crate::error::{AppError, Result};
use crate::headers::HeaderMultimap;

/// Textual layout of the `timestamp` column. Lexicographic order matches
/// chronological order, which the date-range filter relies on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One request/response pair waiting to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub request_headers: HeaderMultimap,
    pub request_body: Vec<u8>,
    pub status_code: u16,
    pub response_headers: HeaderMultimap,
    pub response_body: Vec<u8>,
}

impl ExchangeRecord {
    pub fn request_kind(&self) -> BodyKind {
        classify(&self.request_body, self.request_headers.get("content-type"))
    }

    pub fn response_kind(&self) -> BodyKind {
        classify(&self.response_body, self.response_headers.get("content-type"))
    }
}

/// In-flight capture state for a single proxied request.
///
/// Built when the request arrives, filled with the request body once it has
/// been read, and turned into an [`ExchangeRecord`] when the response is in.
#[derive(Debug, Clone)]
pub struct Capture {
    started_at: DateTime<Utc>,
    method: String,
    url: String,
    request_headers: HeaderMultimap,
    request_body: Vec<u8>,
}

impl Capture {
    /// Start a capture; the timestamp is taken now
    pub fn begin(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            started_at: Utc::now(),
            method: method.as_str().to_string(),
            url: uri.to_string(),
            request_headers: HeaderMultimap::from_header_map(headers),
            request_body: Vec::new(),
        }
    }

    /// Attach the request body; gzip bodies are stored inflated
    pub fn set_request_body(&mut self, body: &[u8]) {
        self.request_body = inflate_if_gzip(body, self.request_headers.get("content-encoding"));
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the capture with the upstream response as it was received
    pub fn finish(self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ExchangeRecord {
        let decoded = decode_for_storage(body, HeaderMultimap::from_header_map(headers));
        ExchangeRecord {
            timestamp: self.started_at,
            method: self.method,
            url: self.url,
            request_headers: self.request_headers,
            request_body: self.request_body,
            status_code: status.as_u16(),
            response_headers: decoded.headers,
            response_body: decoded.body,
        }
    }
}

/// Row shape for the list view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeSummary {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status_code: u16,
}

/// Every column except the two body blobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeMetadata {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    /// Header multimap as a JSON string
    pub request_headers: String,
    pub request_body_size: i64,
    pub is_request_body_text: bool,
    pub status_code: u16,
    /// Header multimap as a JSON string
    pub response_headers: String,
    pub response_body_size: i64,
    pub is_response_body_text: bool,
}

/// Which body blob to read
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyFacet {
    Request,
    Response,
}

impl BodyFacet {
    pub(crate) fn body_column(self) -> &'static str {
        match self {
            BodyFacet::Request => "request_body",
            BodyFacet::Response => "response_body",
        }
    }

    pub(crate) fn headers_column(self) -> &'static str {
        match self {
            BodyFacet::Request => "request_headers",
            BodyFacet::Response => "response_headers",
        }
    }
}

impl fmt::Display for BodyFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyFacet::Request => write!(f, "request"),
            BodyFacet::Response => write!(f, "response"),
        }
    }
}

impl FromStr for BodyFacet {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "request" => Ok(BodyFacet::Request),
            "response" => Ok(BodyFacet::Response),
            other => Err(AppError::InvalidQuery(format!("Unknown body facet: {other}"))),
        }
    }
}

/// A raw body blob and the media type declared next to it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBody {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// A full stored row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredExchange {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub request_headers: HeaderMultimap,
    pub request_body: Vec<u8>,
    pub status_code: u16,
    pub response_headers: HeaderMultimap,
    pub response_body: Vec<u8>,
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a `timestamp` column value.
///
/// Besides the current layout this accepts RFC 3339,
/// `2006-01-02 15:04:05.999999999-07:00` and
/// `2006-01-02 15:04:05.999999999 -0700 MST`, all found in older stores.
/// Offsets are honoured and zone names ignored.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }

    let mut parts = raw.split_whitespace();
    if let (Some(date), Some(time), Some(offset)) = (parts.next(), parts.next(), parts.next()) {
        let joined = format!("{date} {time} {offset}");
        if let Ok(ts) = DateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(AppError::StorageError(format!("Unrecognised timestamp: {raw}")))
}
