//! Gzip decoding for captured bodies
//!
//! Decoding only ever produces the *stored* copy of a body. Forwarded bytes
//! are never touched here, and a failed decode falls back to the raw bytes.

use std::io::Read;

use flate2::read::MultiGzDecoder;

use crate::headers::HeaderMultimap;

/// Gzip decoding failure
#[derive(Debug, thiserror::Error)]
#[error("gzip decode failed: {0}")]
pub struct CodecError(#[from] std::io::Error);

/// Inflate a gzip payload (multi-member streams included)
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Whether a `Content-Encoding` value names gzip
pub fn is_gzip(content_encoding: Option<&str>) -> bool {
    content_encoding.is_some_and(|v| {
        let v = v.trim();
        v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
    })
}

/// Body and headers as they should be stored
#[derive(Debug, Clone)]
pub struct DecodedBody {
    pub body: Vec<u8>,
    pub headers: HeaderMultimap,
    /// True when the body was inflated and the headers rewritten
    pub decompressed: bool,
}

/// Produce the storage view of a response body.
///
/// On a successful gzip decode `Content-Encoding` is dropped and
/// `Content-Length` is set to the inflated size. On failure, or when the body
/// is not gzip, body and headers are returned exactly as received.
pub fn decode_for_storage(body: &[u8], headers: HeaderMultimap) -> DecodedBody {
    if !is_gzip(headers.get("content-encoding")) {
        return DecodedBody {
            body: body.to_vec(),
            headers,
            decompressed: false,
        };
    }

    match decompress_gzip(body) {
        Ok(inflated) => {
            let mut headers = headers;
            headers.remove("content-encoding");
            headers.set("content-length", inflated.len().to_string());
            DecodedBody {
                body: inflated,
                headers,
                decompressed: true,
            }
        }
        Err(e) => {
            tracing::warn!("Keeping compressed body: {}", e);
            DecodedBody {
                body: body.to_vec(),
                headers,
                decompressed: false,
            }
        }
    }
}

/// Inflate a body only if `content_encoding` says gzip, else return it as is.
///
/// Used where headers are not rewritten (request bodies, replay responses).
pub fn inflate_if_gzip(body: &[u8], content_encoding: Option<&str>) -> Vec<u8> {
    if !is_gzip(content_encoding) {
        return body.to_vec();
    }
    match decompress_gzip(body) {
        Ok(inflated) => inflated,
        Err(e) => {
            tracing::warn!("Keeping compressed body: {}", e);
            body.to_vec()
        }
    }
}
