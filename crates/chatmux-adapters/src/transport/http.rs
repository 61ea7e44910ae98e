//! HTTP plumbing shared by every adapter: status → error mapping,
//! `retry-after` parsing and rate-limit header extraction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderId;
use crate::response::RateLimitInfo;

/// Wait assumed when a 429 carries no usable `retry-after`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Upper bound on any server-requested wait.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_ERROR_TEXT_CHARS: usize = 512;

/// Header names a provider uses to advertise its request quota.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHeaders {
    pub limit: &'static str,
    pub remaining: &'static str,
    pub reset: &'static str,
}

/// Pass successful responses through; turn anything else into a typed error.
pub async fn check_status(provider: ProviderId, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status, &headers, &body, Utc::now()))
}

/// Map a non-success status onto the shared error taxonomy.
pub fn classify_status(
    provider: ProviderId,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    now: DateTime<Utc>,
) -> ProviderError {
    let message = error_message(body).unwrap_or_else(|| status.to_string());
    match status.as_u16() {
        401 | 403 => ProviderError::auth(provider, format!("HTTP {}: {message}", status.as_u16())),
        429 => {
            let retry_after = parse_retry_after(headers, now).unwrap_or(DEFAULT_RETRY_AFTER);
            ProviderError::rate_limited(provider, message, retry_after, now)
        }
        code if code >= 500 => ProviderError::Server {
            provider,
            status: code,
            message,
        },
        code => ProviderError::Unknown {
            provider,
            status: code,
            message,
        },
    }
}

/// Parse `retry-after` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
        return Some(wait.min(MAX_RETRY_AFTER));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
}

/// Pull a human-readable message out of a provider error body.
///
/// Handles `{"error": {"message": ...}}`, `{"error": "..."}` and
/// `{"message": ...}`; falls back to the (truncated) raw body.
pub fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidate = json
            .pointer("/error/message")
            .or_else(|| json.get("error").filter(|e| e.is_string()))
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str());
        if let Some(message) = candidate {
            return Some(message.to_string());
        }
    }
    Some(truncate(trimmed))
}

fn truncate(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_ERROR_TEXT_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_ERROR_TEXT_CHARS).collect();
    format!("{head}... [truncated {} chars]", count - MAX_ERROR_TEXT_CHARS)
}

/// Read quota headers, if the provider sent any.
pub fn extract_rate_limit(
    headers: &HeaderMap,
    names: &RateLimitHeaders,
    now: DateTime<Utc>,
) -> Option<RateLimitInfo> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let info = RateLimitInfo {
        limit: text(names.limit).and_then(|v| v.parse().ok()),
        remaining: text(names.remaining).and_then(|v| v.parse().ok()),
        reset: text(names.reset).and_then(|v| parse_reset(v, now)),
    };
    (!info.is_empty()).then_some(info)
}

/// Quota reset values come as RFC 3339 timestamps (Anthropic), Go-style
/// durations such as `6m0s` or `20ms` (OpenAI), or bare seconds.
pub fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(secs) = value.parse::<f64>() {
        return offset(now, secs);
    }
    parse_go_duration(value).and_then(|secs| offset(now, secs))
}

fn offset(now: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let delta = chrono::TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)?;
    now.checked_add_signed(delta)
}

fn parse_go_duration(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut chars = value.chars().peekable();
    let mut matched = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let amount: f64 = number.parse().ok()?;
        number.clear();
        let scale = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += amount * scale;
        matched = true;
    }
    (matched && number.is_empty()).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_classify_auth_and_server() {
        let now = Utc::now();
        let err = classify_status(
            ProviderId::OpenAi,
            StatusCode::UNAUTHORIZED,
            &HeaderMap::new(),
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
            now,
        );
        assert!(matches!(err, ProviderError::Auth { .. }));
        assert!(err.to_string().contains("Incorrect API key provided"));

        let err = classify_status(
            ProviderId::OpenAi,
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            "",
            now,
        );
        assert!(matches!(err, ProviderError::Auth { .. }));

        let err = classify_status(
            ProviderId::Anthropic,
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            "upstream down",
            now,
        );
        assert!(matches!(err, ProviderError::Server { status: 502, .. }));
        assert!(err.is_retryable());

        let err = classify_status(
            ProviderId::Gemini,
            StatusCode::BAD_REQUEST,
            &HeaderMap::new(),
            r#"{"error":"bad"}"#,
            now,
        );
        assert!(matches!(err, ProviderError::Unknown { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_rate_limit_uses_retry_after() {
        let now = Utc::now();
        let err = classify_status(
            ProviderId::OpenAi,
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "60")]),
            "",
            now,
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(err.reset_time(), Some(now + chrono::Duration::milliseconds(60_000)));

        let err = classify_status(
            ProviderId::OpenAi,
            StatusCode::TOO_MANY_REQUESTS,
            &HeaderMap::new(),
            "",
            now,
        );
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn test_huge_retry_after_is_clamped() {
        let now = Utc::now();
        for value in ["1e30", "100000000000000", "inf"] {
            let err = classify_status(
                ProviderId::OpenAi,
                StatusCode::TOO_MANY_REQUESTS,
                &headers(&[("retry-after", value)]),
                "",
                now,
            );
            assert_eq!(err.retry_after(), Some(MAX_RETRY_AFTER), "retry-after {value}");
            assert_eq!(err.reset_time(), Some(now + chrono::Duration::days(1)));
        }
        assert_eq!(parse_retry_after(&headers(&[("retry-after", "-5")]), now), None);
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:28:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let wait = parse_retry_after(
            &headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:30 GMT")]),
            now,
        );
        assert_eq!(wait, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_reset_formats() {
        let now = Utc::now();
        assert_eq!(
            parse_reset("6m0s", now),
            Some(now + chrono::Duration::seconds(360))
        );
        assert_eq!(
            parse_reset("20ms", now),
            Some(now + chrono::Duration::milliseconds(20))
        );
        assert_eq!(parse_reset("2", now), Some(now + chrono::Duration::seconds(2)));
        assert!(parse_reset("2024-06-01T12:00:00Z", now).is_some());
        assert!(parse_reset("soon", now).is_none());
        assert!(parse_reset("1e20", now).is_none());
        assert!(parse_reset("99999999999999999h", now).is_none());
    }

    #[test]
    fn test_extract_rate_limit() {
        let names = RateLimitHeaders {
            limit: "x-ratelimit-limit-requests",
            remaining: "x-ratelimit-remaining-requests",
            reset: "x-ratelimit-reset-requests",
        };
        let now = Utc::now();
        let info = extract_rate_limit(
            &headers(&[
                ("x-ratelimit-limit-requests", "500"),
                ("x-ratelimit-remaining-requests", "499"),
                ("x-ratelimit-reset-requests", "120ms"),
            ]),
            &names,
            now,
        )
        .unwrap();
        assert_eq!(info.limit, Some(500));
        assert_eq!(info.remaining, Some(499));
        assert_eq!(info.reset, Some(now + chrono::Duration::milliseconds(120)));

        assert!(extract_rate_limit(&HeaderMap::new(), &names, now).is_none());
    }

    #[test]
    fn test_error_message_truncates_raw_bodies() {
        let long = "x".repeat(600);
        let message = error_message(&long).unwrap();
        assert!(message.ends_with("[truncated 88 chars]"));
        assert_eq!(error_message("   "), None);
    }
}
