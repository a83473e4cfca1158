//! Response Decoding & Rate Metadata
//!
//! Decodes response bodies into json/binary/empty and extracts the
//! rate-limit metadata the scheduler feeds on. Header parsing is tolerant:
//! a malformed value reads as absent, never as an error.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::TransportError;

pub(crate) const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub(crate) const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub(crate) const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub(crate) const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub(crate) const HEADER_RETRY_AFTER: &str = "retry-after";

/// Fallback delay when a 429 carries no usable retry-after at all.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// A decoded successful exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: ResponseBody,
}

impl Response {
    /// Deserialize the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone()),
            ResponseBody::Binary(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Empty => serde_json::from_str("null"),
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// A JSON body that parsed.
    Json(serde_json::Value),

    /// Raw bytes: non-json content, or a json content type that did not
    /// parse (the raw body is preserved rather than dropped).
    Binary(Bytes),

    /// No content.
    Empty,
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn decode(content_type: Option<&str>, bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }
        let json_like = content_type
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if json_like {
            if let Ok(value) = serde_json::from_slice(&bytes) {
                return ResponseBody::Json(value);
            }
        }
        ResponseBody::Binary(bytes)
    }
}

/// Rate-limit metadata disclosed by a response.
#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    /// Requests left in the current window.
    pub remaining: Option<u32>,

    /// Window ceiling.
    pub limit: Option<u32>,

    /// Delta until the window resets.
    pub reset_after: Option<Duration>,

    /// Canonical bucket hash assigned by the server.
    pub bucket: Option<String>,

    /// Whether the response flagged the global quota.
    pub global: bool,

    /// `retry-after` header value.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_parse(headers, HEADER_REMAINING),
            limit: header_parse(headers, HEADER_LIMIT),
            reset_after: header_parse::<f64>(headers, HEADER_RESET_AFTER).and_then(secs_f64),
            bucket: header_str(headers, HEADER_BUCKET).map(str::to_string),
            global: header_str(headers, HEADER_GLOBAL)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            retry_after: header_parse::<f64>(headers, HEADER_RETRY_AFTER).and_then(secs_f64),
        }
    }
}

/// Body of a 429 response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RateLimitBody {
    pub message: Option<String>,

    /// Seconds to wait, possibly fractional.
    pub retry_after: Option<f64>,

    /// Whether the global quota tripped, not just this bucket.
    #[serde(default)]
    pub global: bool,
}

/// Outcome of one transport exchange.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 2xx (and other non-error statuses) with a decoded body.
    Success {
        response: Response,
        rate: RateLimitInfo,
    },

    /// 4xx other than 429.
    ClientError { status: u16, body: ResponseBody },

    /// 5xx.
    ServerError { status: u16 },

    /// 429.
    RateLimited {
        retry_after: Duration,
        global: bool,
        rate: RateLimitInfo,
    },

    /// The exchange never produced a status.
    Network(TransportError),
}

/// Delay for a 429: the body value wins, then headers, then a conservative
/// fallback.
pub(crate) fn resolve_retry_after(body: Option<&RateLimitBody>, rate: &RateLimitInfo) -> Duration {
    body.and_then(|b| b.retry_after)
        .and_then(secs_f64)
        .or(rate.retry_after)
        .or(rate.reset_after)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|s| s.trim().parse().ok())
}

fn secs_f64(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
