//! Opaque page tokens for keyset pagination.
//!
//! A token is URL-safe base64 (unpadded) over a small versioned JSON
//! document holding the last emitted release date as Unix seconds plus
//! nanoseconds:
//!
//! ```text
//! {"v":1,"secs":1709596800,"nanos":0}
//! ```
//!
//! Seconds cover every date `DateTime<Utc>` can hold, including years
//! outside 0000..=9999 that RFC 3339 cannot express.
//!
//! Encoding is a pure function of the date, so tokens survive restarts and
//! are interchangeable between requests for the same scan. Decoding accepts
//! only the exact bytes `encode` would produce.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LagError, LagResult};

const CURSOR_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorDocument {
    v: u8,
    secs: i64,
    nanos: u32,
}

/// Position after the last row of a lagging feature count page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub release_date: DateTime<Utc>,
}

impl Cursor {
    pub fn new(release_date: DateTime<Utc>) -> Self {
        Self { release_date }
    }

    /// Encode into an opaque page token.
    pub fn encode(&self) -> String {
        let doc = CursorDocument {
            v: CURSOR_VERSION,
            secs: self.release_date.timestamp(),
            nanos: self.release_date.timestamp_subsec_nanos(),
        };
        // Serializing a struct of plain integers cannot fail.
        let json = serde_json::to_vec(&doc).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a page token produced by [`Cursor::encode`].
    pub fn decode(token: &str) -> LagResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| LagError::invalid_cursor(format!("not a page token: {e}")))?;
        let doc: CursorDocument = serde_json::from_slice(&bytes)
            .map_err(|e| LagError::invalid_cursor(format!("malformed page token: {e}")))?;

        if doc.v != CURSOR_VERSION {
            return Err(LagError::invalid_cursor(format!(
                "unsupported page token version {}",
                doc.v
            )));
        }

        let release_date = DateTime::from_timestamp(doc.secs, doc.nanos).ok_or_else(|| {
            LagError::invalid_cursor(format!(
                "release date {}s+{}ns is out of range",
                doc.secs, doc.nanos
            ))
        })?;

        let cursor = Self::new(release_date);
        if cursor.encode() != token {
            return Err(LagError::invalid_cursor("page token is not canonical"));
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn raw_token(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json)
    }

    #[test]
    fn test_round_trip() {
        let dates = [
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(),
            Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap(),
            DateTime::<Utc>::MAX_UTC,
            DateTime::<Utc>::MIN_UTC,
        ];
        for date in dates {
            let token = Cursor::new(date).encode();
            assert_eq!(Cursor::decode(&token).unwrap().release_date, date);
        }
    }

    #[test]
    fn test_deterministic() {
        let date = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(Cursor::new(date).encode(), Cursor::new(date).encode());
        assert_eq!(
            Cursor::new(date).encode(),
            raw_token(r#"{"v":1,"secs":1704844800,"nanos":0}"#)
        );
    }

    #[test]
    fn test_rejects_garbage() {
        for token in ["", "!!!", "bm90IGpzb24", "e30"] {
            let err = Cursor::decode(token).unwrap_err();
            assert!(matches!(err, LagError::InvalidCursor(_)), "{token}: {err}");
        }
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let cases = [
            r#"{"v":2,"secs":1704844800,"nanos":0}"#,
            r#"{"v":1,"secs":"yesterday","nanos":0}"#,
            r#"{"v":1,"release_date":"2024-01-10T00:00:00Z"}"#,
            r#"{"v":1,"secs":1704844800,"nanos":0,"extra":true}"#,
            r#"{"v":1,"secs":1704844800}"#,
            r#"{"v":1,"secs":1704844800.0,"nanos":0}"#,
            r#"{"v":1,"secs": 1704844800,"nanos":0}"#,
            r#"{"nanos":0,"secs":1704844800,"v":1}"#,
            r#"{"v":1,"secs":1704844800,"nanos":-1}"#,
            r#"{"v":1,"secs":9223372036854775807,"nanos":0}"#,
            r#"{"v":1,"secs":1704844800,"nanos":2000000000}"#,
            r#"{"v":1,"count":3}"#,
        ];
        for json in cases {
            let err = Cursor::decode(&raw_token(json)).unwrap_err();
            assert!(matches!(err, LagError::InvalidCursor(_)), "{json}: {err}");
        }
    }

    #[test]
    fn test_rejects_tampering() {
        let token = Cursor::new(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()).encode();
        let mut tampered = token.clone();
        tampered.push('A');
        assert!(Cursor::decode(&tampered).is_err());
        assert!(Cursor::decode(&token[1..]).is_err());
    }
}
