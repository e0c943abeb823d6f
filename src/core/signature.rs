//! HMAC-SHA256 request signing.
//!
//! The upstream gateway recomputes the canonical message on its side and
//! compares signatures, so every byte of the message layout matters:
//!
//! ```text
//! {METHOD}|{encoded path?query}|{body}|{timestamp}|{recvWindow}
//! ```
//!
//! The timestamp is always taken from the proxy clock. The body is written
//! the way `JSON.stringify` writes it on the gateway side (see [`write_json`]).
use std::{fmt::Write, sync::Arc};

use hmac::{Hmac, Mac};
use http::{HeaderValue, Method};
use serde_json::Value;
use sha2::Sha256;

use crate::{
    config::Credentials,
    core::query::{QueryParams, js_property_order},
};

type HmacSha256 = Hmac<Sha256>;

/// Receive window used when the caller does not send a usable one.
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

/// Documented upper bound for the receive window. Not enforced when signing.
pub const MAX_RECV_WINDOW_MS: u64 = 3_600_000;

/// Everything that goes into one signature. Built per request and dropped afterwards.
#[derive(Debug, Clone)]
pub struct SigningContext {
    method: Method,
    path: String,
    query: QueryParams,
    body: String,
    timestamp: i64,
    recv_window: u64,
}

impl SigningContext {
    /// Create a context stamped with the current proxy time.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: QueryParams,
        body: Option<&Value>,
        recv_window: u64,
    ) -> Self {
        Self::with_timestamp(
            method,
            path,
            query,
            body,
            recv_window,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Create a context with an explicit timestamp (epoch milliseconds).
    pub fn with_timestamp(
        method: Method,
        path: impl Into<String>,
        query: QueryParams,
        body: Option<&Value>,
        recv_window: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            body: body_segment(body),
            timestamp,
            recv_window,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Serialized body exactly as it appears in the message (and on the wire).
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn recv_window(&self) -> u64 {
        self.recv_window
    }

    /// `path?query`, or just `path` when there are no parameters.
    pub fn original_url(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query.to_canonical_string())
        }
    }

    pub fn encoded_url(&self) -> String {
        encode_uri_component(&self.original_url())
    }

    pub fn canonical_message(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.method.as_str().to_ascii_uppercase(),
            self.encoded_url(),
            self.body,
            self.timestamp,
            self.recv_window
        )
    }
}

/// Result of signing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Lowercase hex HMAC-SHA256, 64 characters
    pub value: String,
    pub timestamp: i64,
    pub recv_window: u64,
}

/// Computes signatures with the process-wide upstream secret.
#[derive(Debug, Clone)]
pub struct SignatureEngine {
    credentials: Arc<Credentials>,
}

impl SignatureEngine {
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self { credentials }
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    pub fn sign(&self, context: &SigningContext) -> Signature {
        let message = context.canonical_message();
        tracing::debug!(
            method = %context.method(),
            path = context.path(),
            timestamp = context.timestamp(),
            recv_window = context.recv_window(),
            "Signing upstream request"
        );

        Signature {
            value: hmac_sha256_hex(self.credentials.api_secret(), &message),
            timestamp: context.timestamp(),
            recv_window: context.recv_window(),
        }
    }
}

/// Compute HMAC-SHA256 of `message` keyed with `secret`, hex encoded.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Body segment of the message: empty when there is nothing to serialize,
/// compact JSON in received key order otherwise.
pub fn body_segment(body: Option<&Value>) -> String {
    match body {
        None | Some(Value::Null) | Some(Value::Bool(_)) | Some(Value::Number(_)) => String::new(),
        Some(Value::Object(map)) if map.is_empty() => String::new(),
        Some(Value::Array(items)) if items.is_empty() => String::new(),
        Some(Value::String(s)) if s.is_empty() => String::new(),
        Some(value) => {
            let mut out = String::new();
            write_json(value, &mut out);
            out
        }
    }
}

/// Integers up to this magnitude survive a round trip through an `f64`.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Compact JSON as `JSON.stringify` produces it: array-index object keys
/// first, numbers in JavaScript `Number#toString` form (`1.0` -> `1`,
/// `1e21` -> `1e+21`), `/` and non-ASCII left as is.
pub fn write_json(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_js_number(n, out),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let entries = js_property_order(map.iter().map(|(k, v)| (k.as_str(), v)));
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_json(item, out);
            }
            out.push('}');
        }
    }
}

fn write_js_number(n: &serde_json::Number, out: &mut String) {
    if let Some(v) = n.as_u64().filter(|v| *v <= MAX_SAFE_INTEGER) {
        let _ = write!(out, "{v}");
    } else if let Some(v) = n.as_i64().filter(|v| v.unsigned_abs() <= MAX_SAFE_INTEGER) {
        let _ = write!(out, "{v}");
    } else if let Some(v) = n.as_f64() {
        out.push_str(&js_number_to_string(v));
    } else {
        out.push_str("null");
    }
}

/// `Number.prototype.toString()` for a finite `f64`.
pub fn js_number_to_string(v: f64) -> String {
    if !v.is_finite() {
        return "null".to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }

    // Shortest round-trip digits, e.g. "1.2345e-7".
    let sci = format!("{:e}", v.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let n = exponent + 1;

    let mut out = String::new();
    if v < 0.0 {
        out.push('-');
    }
    if k <= n && n <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (n - k) as usize));
    } else if 0 < n && n <= 21 {
        out.push_str(&digits[..n as usize]);
        out.push('.');
        out.push_str(&digits[n as usize..]);
    } else if -6 < n && n <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-n) as usize));
        out.push_str(&digits);
    } else {
        out.push_str(&digits[..1]);
        if k > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{}", if n - 1 >= 0 { "+" } else { "-" }, (n - 1).abs());
    }
    out
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Use the caller's receive window when it is a non-negative integer, else the default.
pub fn parse_recv_window(header: Option<&HeaderValue>) -> u64 {
    header
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RECV_WINDOW_MS)
}

/// Percent-encode like a URI component: everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_uri_component(input: &str) -> String {
    urlencoding::encode(input)
        .replace("%21", "!")
        .replace("%2A", "*")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
}
