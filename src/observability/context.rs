//! Trace context and W3C `traceparent` propagation.
//!
//! # Responsibilities
//! - Generate trace and span identifiers
//! - Derive child contexts at every span boundary
//! - Inject context into outbound request headers
//! - Extract context from inbound request headers
//!
//! # Design Decisions
//! - `traceparent` format: `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`
//! - Extraction is best-effort: anything malformed is treated as absent
//! - Contexts are immutable values; a new one is derived per span

use std::fmt;

use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the propagated context.
pub const TRACEPARENT: &str = "traceparent";

/// Flag bit marking a sampled trace.
pub const FLAG_SAMPLED: u8 = 0x01;

/// 128-bit trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u128);

impl TraceId {
    pub fn random() -> Self {
        loop {
            let id = Uuid::new_v4().as_u128();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !is_lower_hex(s) {
            return None;
        }
        u128::from_str_radix(s, 16).ok().filter(|v| *v != 0).map(Self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn random() -> Self {
        Self(fastrand::u64(1..))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !is_lower_hex(s) {
            return None;
        }
        u64::from_str_radix(s, 16).ok().filter(|v| *v != 0).map(Self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

macro_rules! hex_serde {
    ($ty:ident, $what:literal) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s)
                    .ok_or_else(|| serde::de::Error::custom(concat!("invalid ", $what)))
            }
        }
    };
}

hex_serde!(TraceId, "trace id");
hex_serde!(SpanId, "span id");

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Identifiers of one unit of work and its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub flags: u8,
}

impl TraceContext {
    /// A fresh root context for a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            flags: FLAG_SAMPLED,
        }
    }

    /// Context for a unit of work nested under `self`.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            flags: self.flags,
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }

    /// Parse a `traceparent` value. The parsed context describes the remote
    /// caller's span, so it has no parent of its own.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
            return None;
        }
        // Version 00 defines exactly four fields.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if flags.len() != 2 || !is_lower_hex(flags) {
            return None;
        }

        Some(Self {
            trace_id: TraceId::from_hex(trace_id)?,
            span_id: SpanId::from_hex(span_id)?,
            parent_span_id: None,
            flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }
}

/// Headers to attach to an outbound request.
pub fn inject_context(ctx: &TraceContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    inject_into(ctx, &mut headers);
    headers
}

pub fn inject_into(ctx: &TraceContext, headers: &mut HeaderMap) {
    if let Ok(value) = HeaderValue::from_str(&ctx.to_traceparent()) {
        headers.insert(TRACEPARENT, value);
    }
}

/// Read the caller's context from inbound headers, if any usable one exists.
pub fn extract_context(headers: &HeaderMap) -> Option<TraceContext> {
    let value = headers.get(TRACEPARENT)?.to_str().ok()?;
    let ctx = TraceContext::from_traceparent(value);
    if ctx.is_none() {
        tracing::debug!(traceparent = %value, "Ignoring malformed traceparent header");
    }
    ctx
}
