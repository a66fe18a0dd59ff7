//! Text/binary classification for captured bodies
//!
//! Best-effort only. The result decides how a body is rendered or encoded
//! (plain text vs. base64) and nothing else; no forwarding or storage
//! decision depends on it.

use serde::{Deserialize, Serialize};

use crate::defaults::{CLASSIFY_SAMPLE_BYTES, CLASSIFY_TEXT_RATIO};

/// Outcome of [`classify`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Text,
    Binary,
}

impl BodyKind {
    pub fn is_text(self) -> bool {
        matches!(self, BodyKind::Text)
    }
}

/// Classify `data`, trusting a textual `media_type` when one is declared.
///
/// Without a textual media type, empty payloads are text and anything else
/// is text when more than 70% of the first 512 bytes are tab, LF, CR or
/// printable ASCII.
pub fn classify(data: &[u8], media_type: Option<&str>) -> BodyKind {
    if media_type.is_some_and(is_textual_media_type) {
        return BodyKind::Text;
    }

    if data.is_empty() {
        return BodyKind::Text;
    }

    let sample = &data[..data.len().min(CLASSIFY_SAMPLE_BYTES)];
    let printable = sample
        .iter()
        .filter(|&&b| b == 0x09 || b == 0x0A || b == 0x0D || (0x20..=0x7E).contains(&b))
        .count();

    if printable as f64 / sample.len() as f64 > CLASSIFY_TEXT_RATIO {
        BodyKind::Text
    } else {
        BodyKind::Binary
    }
}

/// Whether a `Content-Type` value belongs to a textual family
pub fn is_textual_media_type(media_type: &str) -> bool {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/xml"
        || essence == "application/javascript"
        || essence == "application/xhtml+xml"
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_HEADER: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
        0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x08, 0x06, 0x06, 0x07, 0x06,
    ];

    #[test]
    fn test_declared_text_wins() {
        assert_eq!(classify(JPEG_HEADER, Some("text/plain")), BodyKind::Text);
        assert_eq!(classify(&[0u8; 64], Some("text/plain")), BodyKind::Text);
        assert_eq!(
            classify(&[0u8; 8], Some("application/json; charset=utf-8")),
            BodyKind::Text
        );
        assert_eq!(classify(&[0u8; 8], Some("application/xhtml+xml")), BodyKind::Text);
        assert_eq!(classify(&[0u8; 8], Some("application/problem+json")), BodyKind::Text);
        assert_eq!(classify(&[0u8; 8], Some("Text/HTML")), BodyKind::Text);
    }

    #[test]
    fn test_empty_is_text() {
        assert_eq!(classify(b"", None), BodyKind::Text);
        assert_eq!(classify(b"", Some("image/png")), BodyKind::Text);
    }

    #[test]
    fn test_jpeg_is_binary() {
        assert_eq!(classify(JPEG_HEADER, None), BodyKind::Binary);
        assert_eq!(classify(JPEG_HEADER, Some("")), BodyKind::Binary);
        assert_eq!(classify(JPEG_HEADER, Some("image/jpeg")), BodyKind::Binary);
    }

    #[test]
    fn test_plain_ascii_without_media_type() {
        assert_eq!(classify(b"hello\r\n\tworld", None), BodyKind::Text);
    }

    #[test]
    fn test_ratio_threshold_is_exclusive() {
        // 7 printable out of 10 is exactly 0.70, which is not enough
        let mut data = vec![b'a'; 7];
        data.extend_from_slice(&[0u8; 3]);
        assert_eq!(classify(&data, None), BodyKind::Binary);

        let mut data = vec![b'a'; 8];
        data.extend_from_slice(&[0u8; 2]);
        assert_eq!(classify(&data, None), BodyKind::Text);
    }

    #[test]
    fn test_only_first_512_bytes_sampled() {
        let mut data = vec![b'x'; 512];
        data.extend(std::iter::repeat(0u8).take(4096));
        assert_eq!(classify(&data, None), BodyKind::Text);
    }

    #[test]
    fn test_non_textual_media_types() {
        assert!(!is_textual_media_type("application/octet-stream"));
        assert!(!is_textual_media_type("image/png"));
        assert!(!is_textual_media_type(""));
    }
}
