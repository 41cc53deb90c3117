//! Timezone parameters and the network lookup that produces them.

use std::fmt;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TzLookupError};

/// Offsets at or beyond a full day are not real zones.
const MAX_OFFSET_SECS: i64 = 86_400;

const DST_SHIFT_SECS: i64 = 3_600;

/// Local offset from UTC and how long it is known to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TzParameters {
    /// Whole-second signed offset from UTC, including any DST shift.
    pub offset: Duration,
    /// End of the current zone period; `None` never expires.
    pub valid_until: Option<DateTime<Utc>>,
    pub is_dst: bool,
    pub has_dst: bool,
}

impl TzParameters {
    /// Offset 0, no DST, never expiring. Used until a lookup succeeds.
    pub fn unconfirmed() -> Self {
        Self {
            offset: Duration::zero(),
            valid_until: None,
            is_dst: false,
            has_dst: false,
        }
    }

    pub fn offset_seconds(&self) -> i64 {
        self.offset.num_seconds()
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|end| at >= end)
    }

    /// Flip into or out of DST, moving the offset by one hour in the matching
    /// direction. Zones without DST are left untouched. Returns whether the
    /// offset changed.
    pub fn toggle_dst(&mut self) -> bool {
        if !self.has_dst {
            return false;
        }
        let shift = Duration::seconds(DST_SHIFT_SECS);
        if self.is_dst {
            self.offset = self.offset - shift;
        } else {
            self.offset = self.offset + shift;
        }
        self.is_dst = !self.is_dst;
        true
    }
}

impl Default for TzParameters {
    fn default() -> Self {
        Self::unconfirmed()
    }
}

impl fmt::Display for TzParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset={}s dst={}", self.offset_seconds(), self.is_dst)?;
        if !self.has_dst {
            f.write_str(" (no dst)")?;
        }
        match self.valid_until {
            Some(end) => write!(f, " until {}", end.to_rfc3339()),
            None => f.write_str(" until forever"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    gmt_offset: i64,
    #[serde(default)]
    dst: Option<String>,
    #[serde(default)]
    zone_end: Option<i64>,
}

/// Decode a lookup response body.
///
/// `dst` present and non-empty means the zone observes DST; its value `"1"`
/// means DST is in effect. A missing or null `zoneEnd` never expires.
pub fn parse_lookup_response(body: &[u8]) -> Result<TzParameters> {
    let response: LookupResponse = serde_json::from_slice(body)?;

    if let Some(status) = response.status.as_deref() {
        if status != "OK" {
            return Err(TzLookupError::Rejected {
                message: response
                    .message
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| status.to_string()),
            });
        }
    }

    if response.gmt_offset.abs() >= MAX_OFFSET_SECS {
        return Err(TzLookupError::Malformed(format!(
            "gmtOffset {} out of range",
            response.gmt_offset
        )));
    }

    let valid_until = match response.zone_end {
        Some(end) => Some(DateTime::from_timestamp(end, 0).ok_or_else(|| {
            TzLookupError::Malformed(format!("zoneEnd {end} out of range"))
        })?),
        None => None,
    };

    let dst = response.dst.as_deref().unwrap_or("");
    Ok(TzParameters {
        offset: Duration::seconds(response.gmt_offset),
        valid_until,
        is_dst: dst == "1",
        has_dst: !dst.is_empty(),
    })
}

/// One-shot timezone resolution keyed by position.
#[async_trait]
pub trait TimezoneLookup: Send + Sync + 'static {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<TzParameters>;
}

/// HTTP client for a TimeZoneDB-compatible `get-time-zone` endpoint.
#[derive(Clone)]
pub struct TimezoneDbClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
}

impl TimezoneDbClient {
    pub fn new(api_url: &str, api_key: impl Into<String>, timeout: StdDuration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: Url::parse(api_url)?,
            api_key: api_key.into(),
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn request_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("format", "json")
            .append_pair("by", "position")
            .append_pair("lat", &latitude.to_string())
            .append_pair("lng", &longitude.to_string());
        url
    }
}

impl fmt::Debug for TimezoneDbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimezoneDbClient")
            .field("api_url", &self.api_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TimezoneLookup for TimezoneDbClient {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<TzParameters> {
        debug!(latitude, longitude, url = %self.api_url, "requesting timezone");
        let response = self
            .client
            .get(self.request_url(latitude, longitude))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TzLookupError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        parse_lookup_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_response() {
        let body = br#"{"status":"OK","message":"","gmtOffset":-18000,"dst":"0","zoneEnd":1710054000}"#;
        let params = parse_lookup_response(body).unwrap();
        assert_eq!(params.offset_seconds(), -18_000);
        assert!(params.has_dst);
        assert!(!params.is_dst);
        assert_eq!(params.valid_until.unwrap().timestamp(), 1_710_054_000);
    }

    #[test]
    fn dst_flag_requires_literal_one() {
        let on = parse_lookup_response(br#"{"gmtOffset":7200,"dst":"1"}"#).unwrap();
        assert!(on.is_dst && on.has_dst);

        let other = parse_lookup_response(br#"{"gmtOffset":7200,"dst":"yes"}"#).unwrap();
        assert!(!other.is_dst);
        assert!(other.has_dst);
    }

    #[test]
    fn empty_or_missing_dst_means_no_dst() {
        let empty = parse_lookup_response(br#"{"gmtOffset":19800,"dst":""}"#).unwrap();
        assert!(!empty.has_dst && !empty.is_dst);

        let missing = parse_lookup_response(br#"{"gmtOffset":19800}"#).unwrap();
        assert!(!missing.has_dst && !missing.is_dst);
    }

    #[test]
    fn missing_or_null_zone_end_never_expires() {
        let missing = parse_lookup_response(br#"{"gmtOffset":0,"dst":"0"}"#).unwrap();
        assert_eq!(missing.valid_until, None);
        let null = parse_lookup_response(br#"{"gmtOffset":0,"dst":"0","zoneEnd":null}"#).unwrap();
        assert_eq!(null.valid_until, None);
        assert!(!null.is_expired(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn failed_status_is_rejected() {
        let err = parse_lookup_response(
            br#"{"status":"FAILED","message":"Invalid API key.","gmtOffset":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TzLookupError::Rejected { ref message } if message == "Invalid API key."));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_lookup_response(b"<html>busy</html>"),
            Err(TzLookupError::Malformed(_))
        ));
        assert!(matches!(
            parse_lookup_response(br#"{"dst":"1"}"#),
            Err(TzLookupError::Malformed(_))
        ));
        assert!(matches!(
            parse_lookup_response(br#"{"gmtOffset":90000}"#),
            Err(TzLookupError::Malformed(_))
        ));
    }

    #[test]
    fn toggle_alternates_direction() {
        let mut params = TzParameters {
            offset: Duration::seconds(-18_000),
            valid_until: None,
            is_dst: false,
            has_dst: true,
        };
        assert!(params.toggle_dst());
        assert_eq!(params.offset_seconds(), -14_400);
        assert!(params.is_dst);
        assert!(params.toggle_dst());
        assert_eq!(params.offset_seconds(), -18_000);
        assert!(!params.is_dst);
    }

    #[test]
    fn toggle_without_dst_is_noop() {
        let mut params = TzParameters {
            offset: Duration::seconds(19_800),
            ..TzParameters::unconfirmed()
        };
        assert!(!params.toggle_dst());
        assert_eq!(params.offset_seconds(), 19_800);
    }

    #[test]
    fn expiry_is_inclusive() {
        let end = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let params = TzParameters {
            valid_until: Some(end),
            ..TzParameters::unconfirmed()
        };
        assert!(!params.is_expired(end - Duration::seconds(1)));
        assert!(params.is_expired(end));
    }

    #[test]
    fn request_carries_query_contract() {
        let client = TimezoneDbClient::new(
            "http://tz.example/v2.1/get-time-zone",
            "secret",
            StdDuration::from_secs(5),
        )
        .unwrap();
        let url = client.request_url(40.5, -74.25);
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_string(), "secret".to_string()),
                ("format".to_string(), "json".to_string()),
                ("by".to_string(), "position".to_string()),
                ("lat".to_string(), "40.5".to_string()),
                ("lng".to_string(), "-74.25".to_string()),
            ]
        );
        assert!(!format!("{client:?}").contains("secret"));
    }
}
