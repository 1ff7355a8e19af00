//! Protocol headers propagated on every switch call
//!
//! Every outbound request carries the source participant, a W3C `traceparent`
//! and an RFC 1123 `Date`. Responses additionally name the destination.

use axum::http::HeaderMap;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

pub const FSPIOP_SOURCE: &str = "FSPIOP-Source";
pub const FSPIOP_DESTINATION: &str = "FSPIOP-Destination";
pub const TRACEPARENT: &str = "traceparent";
pub const DATE: &str = "Date";
pub const ACCEPT: &str = "Accept";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Versioned media type of the parties resource
pub const PARTIES_MEDIA_TYPE: &str = "application/vnd.interoperability.parties+json;version=1.0";

lazy_static! {
    static ref TRACEPARENT_RE: Regex =
        Regex::new(r"^([0-9a-f]{2})-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})$").unwrap();
}

/// W3C trace context carried in the `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_id: String,
    pub flags: String,
}

impl TraceContext {
    /// Start a new sampled trace
    pub fn generate() -> Self {
        Self {
            trace_id: hex::encode(Uuid::new_v4().as_bytes()),
            parent_id: new_span_id(),
            flags: "01".to_string(),
        }
    }

    /// Parse a `traceparent` value, `None` if it is not well formed
    pub fn parse(value: &str) -> Option<Self> {
        let caps = TRACEPARENT_RE.captures(value.trim())?;
        let trace_id = caps[2].to_string();
        if trace_id.chars().all(|c| c == '0') {
            return None;
        }
        Some(Self {
            trace_id,
            parent_id: caps[3].to_string(),
            flags: caps[4].to_string(),
        })
    }

    /// Same trace, new span for the next hop
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            parent_id: new_span_id(),
            flags: self.flags.clone(),
        }
    }

    /// Continue an inbound trace or start a new one
    pub fn continue_or_generate(inbound: Option<&TraceContext>) -> Self {
        inbound.map(TraceContext::child).unwrap_or_else(TraceContext::generate)
    }

    pub fn to_header(&self) -> String {
        format!("00-{}-{}-{}", self.trace_id, self.parent_id, self.flags)
    }
}

fn new_span_id() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..8])
}

/// Current time formatted for the `Date` header
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Identifying headers of an inbound switch request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolHeaders {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub traceparent: Option<String>,
    pub date: Option<String>,
}

impl ProtocolHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        Self {
            source: get(FSPIOP_SOURCE),
            destination: get(FSPIOP_DESTINATION),
            traceparent: get(TRACEPARENT),
            date: get(DATE),
        }
    }

    pub fn trace_context(&self) -> Option<TraceContext> {
        self.traceparent.as_deref().and_then(TraceContext::parse)
    }
}

/// Ordered header set attached to an outbound request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundHeaders(Vec<(&'static str, String)>);

impl OutboundHeaders {
    /// Headers for a lookup request sent to the switch
    pub fn party_request(source: &str, trace: &TraceContext) -> Self {
        let mut headers = Self::default();
        headers.set(FSPIOP_SOURCE, source);
        headers.set(TRACEPARENT, trace.to_header());
        headers.set(DATE, http_date());
        headers.set(ACCEPT, PARTIES_MEDIA_TYPE);
        headers.set(CONTENT_TYPE, PARTIES_MEDIA_TYPE);
        headers
    }

    /// Headers for a success or error response sent to the switch
    pub fn party_response(source: &str, destination: &str, trace: &TraceContext) -> Self {
        let mut headers = Self::party_request(source, trace);
        headers.set(FSPIOP_DESTINATION, destination);
        headers
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(n, v)| (*n, v.as_str()))
    }

    /// Header names in insertion order
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|(n, _)| *n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_traceparent_parse_and_child() {
        let value = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        let ctx = TraceContext::parse(value).unwrap();
        assert_eq!(ctx.to_header(), value);

        let child = ctx.child();
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_ne!(child.parent_id, ctx.parent_id);
        assert_eq!(child.parent_id.len(), 16);
    }

    #[test]
    fn test_invalid_traceparent_is_rejected() {
        assert!(TraceContext::parse("garbage").is_none());
        assert!(TraceContext::parse(
            "00-00000000000000000000000000000000-b7ad6b7169203331-01"
        )
        .is_none());
    }

    #[test]
    fn test_generated_trace_is_well_formed() {
        let ctx = TraceContext::generate();
        assert!(TraceContext::parse(&ctx.to_header()).is_some());
    }

    #[test]
    fn test_protocol_headers_from_header_map() {
        let mut map = HeaderMap::new();
        map.insert("fspiop-source", HeaderValue::from_static("payerfsp"));
        map.insert("date", HeaderValue::from_static("Tue, 01 Oct 2024 10:00:00 GMT"));

        let headers = ProtocolHeaders::from_header_map(&map);
        assert_eq!(headers.source.as_deref(), Some("payerfsp"));
        assert_eq!(headers.date.as_deref(), Some("Tue, 01 Oct 2024 10:00:00 GMT"));
        assert!(headers.traceparent.is_none());
        assert!(headers.trace_context().is_none());
    }

    #[test]
    fn test_response_headers_extend_request_headers() {
        let trace = TraceContext::generate();
        let request = OutboundHeaders::party_request("payerfsp", &trace);
        let response = OutboundHeaders::party_response("payerfsp", "payeefsp", &trace);

        assert_eq!(request.get(FSPIOP_SOURCE), Some("payerfsp"));
        assert!(request.get(FSPIOP_DESTINATION).is_none());
        assert_eq!(response.get("fspiop-destination"), Some("payeefsp"));
        assert_eq!(response.get(TRACEPARENT), Some(trace.to_header().as_str()));
        assert!(response.get(DATE).unwrap().ends_with("GMT"));
    }
}
