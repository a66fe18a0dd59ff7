//! HAR 1.2 export
//!
//! Builds an HTTP Archive document from stored exchanges. Timing data is not
//! captured, so `time` and every timing phase are zero.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::classify::classify;
use crate::defaults::FALLBACK_MEDIA_TYPE;
use crate::exchange::StoredExchange;
use crate::headers::HeaderMultimap;

pub const HAR_VERSION: &str = "1.2";
pub const CREATOR_NAME: &str = "dGateway";
pub const PAGE_TITLE: &str = "dGateway Export";
const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<HarPage>,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarPage {
    pub started_date_time: DateTime<Utc>,
    pub id: String,
    pub title: String,
    pub page_timings: HarPageTimings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarPageTimings {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pageref: Option<String>,
    pub started_date_time: DateTime<Utc>,
    /// Milliseconds; not tracked
    pub time: u64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarNameValue>,
    pub query_string: Vec<HarNameValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarNameValue>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarNameValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HarCache {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HarTimings {
    pub send: i64,
    pub wait: i64,
    pub receive: i64,
}

/// Build an archive from `exchanges`, keeping their order
pub fn build_har(exchanges: &[StoredExchange]) -> Har {
    let page_id = uuid::Uuid::new_v4().to_string();
    let page_started = exchanges
        .first()
        .map(|e| e.timestamp)
        .unwrap_or_else(Utc::now);

    let entries = exchanges
        .iter()
        .map(|exchange| build_entry(exchange, &page_id))
        .collect();

    Har {
        log: HarLog {
            version: HAR_VERSION.to_string(),
            creator: HarCreator {
                name: CREATOR_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            pages: vec![HarPage {
                started_date_time: page_started,
                id: page_id,
                title: PAGE_TITLE.to_string(),
                page_timings: HarPageTimings::default(),
            }],
            entries,
        },
    }
}

fn build_entry(exchange: &StoredExchange, page_id: &str) -> HarEntry {
    let post_data = (!exchange.request_body.is_empty()).then(|| HarPostData {
        mime_type: media_type(&exchange.request_headers),
        text: String::from_utf8_lossy(&exchange.request_body).into_owned(),
    });

    let status_text = StatusCode::from_u16(exchange.status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string();

    HarEntry {
        pageref: Some(page_id.to_string()),
        started_date_time: exchange.timestamp,
        time: 0,
        request: HarRequest {
            method: exchange.method.clone(),
            url: exchange.url.clone(),
            http_version: HTTP_VERSION.to_string(),
            cookies: Vec::new(),
            headers: name_values(&exchange.request_headers),
            query_string: query_string(&exchange.url),
            post_data,
            headers_size: -1,
            body_size: exchange.request_body.len() as i64,
        },
        response: HarResponse {
            status: exchange.status_code,
            status_text,
            http_version: HTTP_VERSION.to_string(),
            cookies: Vec::new(),
            headers: name_values(&exchange.response_headers),
            content: content(&exchange.response_body, &exchange.response_headers),
            redirect_url: exchange
                .response_headers
                .get("location")
                .unwrap_or_default()
                .to_string(),
            headers_size: -1,
            body_size: exchange.response_body.len() as i64,
        },
        cache: HarCache::default(),
        timings: HarTimings::default(),
    }
}

fn content(body: &[u8], headers: &HeaderMultimap) -> HarContent {
    let mime_type = media_type(headers);
    let (text, encoding) = if body.is_empty() {
        (None, None)
    } else if classify(body, headers.get("content-type")).is_text() {
        (Some(String::from_utf8_lossy(body).into_owned()), None)
    } else {
        (Some(STANDARD.encode(body)), Some("base64".to_string()))
    };

    HarContent {
        size: body.len() as i64,
        mime_type,
        text,
        encoding,
    }
}

fn media_type(headers: &HeaderMultimap) -> String {
    headers
        .get("content-type")
        .filter(|v| !v.is_empty())
        .unwrap_or(FALLBACK_MEDIA_TYPE)
        .to_string()
}

fn name_values(headers: &HeaderMultimap) -> Vec<HarNameValue> {
    headers
        .pairs()
        .map(|(name, value)| HarNameValue {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Query parameters of a stored URL, which may be absolute or origin-form
fn query_string(raw_url: &str) -> Vec<HarNameValue> {
    let Some((_, query)) = raw_url.split_once('?') else {
        return Vec::new();
    };
    let query = query.split_once('#').map_or(query, |(q, _)| q);

    url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| HarNameValue {
            name: name.into_owned(),
            value: value.into_owned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn exchange(url: &str, body: &[u8], content_type: Option<&str>) -> StoredExchange {
        let mut response_headers = HeaderMultimap::new();
        if let Some(ct) = content_type {
            response_headers.append("Content-Type", ct);
        }
        StoredExchange {
            id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
            method: "GET".to_string(),
            url: url.to_string(),
            request_headers: HeaderMultimap::new(),
            request_body: Vec::new(),
            status_code: 200,
            response_headers,
            response_body: body.to_vec(),
        }
    }

    #[test]
    fn test_single_json_exchange() {
        let har = build_har(&[exchange("http://x/y", b"{\"a\":1}", Some("application/json"))]);
        assert_eq!(har.log.version, "1.2");
        assert_eq!(har.log.creator.name, "dGateway");
        assert_eq!(har.log.entries.len(), 1);

        let entry = &har.log.entries[0];
        assert_eq!(entry.request.url, "http://x/y");
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.status_text, "OK");
        assert_eq!(entry.response.content.text.as_deref(), Some("{\"a\":1}"));
        assert_eq!(entry.response.content.encoding, None);
        assert_eq!(entry.response.content.mime_type, "application/json");
        assert_eq!(entry.time, 0);
        assert_eq!(entry.pageref.as_deref(), Some(har.log.pages[0].id.as_str()));
        assert!(entry.request.post_data.is_none());
    }

    #[test]
    fn test_serialized_field_names() {
        let har = build_har(&[exchange("/a?x=1", b"ok", Some("text/plain"))]);
        let json = serde_json::to_value(&har).unwrap();
        let entry = &json["log"]["entries"][0];

        assert_eq!(entry["startedDateTime"], "2024-05-06T07:08:09Z");
        assert_eq!(entry["request"]["httpVersion"], "HTTP/1.1");
        assert_eq!(entry["request"]["queryString"][0]["name"], "x");
        assert_eq!(entry["response"]["redirectURL"], "");
        assert_eq!(entry["cache"], serde_json::json!({}));
        assert_eq!(entry["timings"]["wait"], 0);
        assert_eq!(json["log"]["pages"][0]["title"], "dGateway Export");
        assert!(entry["request"].get("postData").is_none());
    }

    #[test]
    fn test_binary_content_is_base64() {
        let body = [0xffu8, 0xd8, 0xff, 0xe0, 0x00, 0x10];
        let har = build_har(&[exchange("/img", &body, Some("image/jpeg"))]);
        let content = &har.log.entries[0].response.content;
        assert_eq!(content.encoding.as_deref(), Some("base64"));
        assert_eq!(
            STANDARD.decode(content.text.as_deref().unwrap()).unwrap(),
            body
        );
        assert_eq!(content.size, 6);
    }

    #[test]
    fn test_post_data_and_flattened_headers() {
        let mut ex = exchange("/submit?a=1&b=two%20words&a=3", b"", None);
        ex.method = "POST".to_string();
        ex.request_body = b"name=x".to_vec();
        ex.request_headers
            .append("Content-Type", "application/x-www-form-urlencoded");
        ex.response_headers.append("Set-Cookie", "a=1");
        ex.response_headers.append("Set-Cookie", "b=2");
        ex.status_code = 418;

        let har = build_har(&[ex]);
        let entry = &har.log.entries[0];

        let post = entry.request.post_data.as_ref().unwrap();
        assert_eq!(post.mime_type, "application/x-www-form-urlencoded");
        assert_eq!(post.text, "name=x");

        let query: Vec<_> = entry
            .request
            .query_string
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        assert_eq!(query, vec![("a", "1"), ("b", "two words"), ("a", "3")]);

        let cookies: Vec<_> = entry
            .response
            .headers
            .iter()
            .filter(|h| h.name == "Set-Cookie")
            .map(|h| h.value.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);

        assert_eq!(entry.response.status_text, "I'm a teapot");
        assert_eq!(entry.response.content.mime_type, FALLBACK_MEDIA_TYPE);
        assert_eq!(entry.response.content.text, None);
    }

    #[test]
    fn test_empty_export_still_has_page() {
        let har = build_har(&[]);
        assert!(har.log.entries.is_empty());
        assert_eq!(har.log.pages.len(), 1);
    }
}
