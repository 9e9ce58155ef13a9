//! Reading and writing trace context and extra fields from HTTP headers.
//!
//! Trace context travels in whatever format the configured
//! [`TextMapPropagator`] speaks (W3C `traceparent` by default). Extra fields
//! are plain headers whose names are drawn from a fixed whitelist; their
//! values are handed to application code untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

use crate::error::{Result, TracingError};

pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Extra fields (baggage) carried alongside the trace context.
///
/// Keys are whitelisted header names in lower case. The set is read-only once
/// extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields(BTreeMap<String, String>);

impl ExtraFields {
    /// Looks a field up by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .or_else(|| self.0.get(&name.to_ascii_lowercase()))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for ExtraFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        )
    }
}

/// Stateless extract/inject over a header carrier.
#[derive(Clone)]
pub struct Carrier {
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
    fields: Arc<[HeaderName]>,
}

impl fmt::Debug for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Carrier")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self {
            propagator: Arc::new(TraceContextPropagator::new()),
            fields: Arc::new([]),
        }
    }
}

impl Carrier {
    /// W3C trace context, whitelisting the given extra field names.
    pub fn new<I, N>(extra_fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        Self::default().with_extra_fields(extra_fields)
    }

    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Arc::new(propagator);
        self
    }

    pub fn with_extra_fields<I, N>(mut self, extra_fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut fields = Vec::new();
        for name in extra_fields {
            let name = name.as_ref();
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|source| {
                TracingError::InvalidFieldName {
                    name: name.to_string(),
                    source,
                }
            })?;
            if self
                .propagator
                .fields()
                .any(|reserved| reserved.eq_ignore_ascii_case(header.as_str()))
            {
                return Err(TracingError::ReservedFieldName(name.to_string()));
            }
            if !fields.contains(&header) {
                fields.push(header);
            }
        }
        self.fields = fields.into();
        Ok(self)
    }

    pub fn extra_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(HeaderName::as_str)
    }

    /// Reads the remote parent and extra fields. A missing or malformed trace
    /// header yields `None`, never an error.
    pub fn extract(&self, headers: &HeaderMap) -> (Option<SpanContext>, ExtraFields) {
        let cx = self.propagator.extract(&HeaderExtractor(headers));
        let span_context = cx.span().span_context().clone();
        let parent = span_context.is_valid().then_some(span_context);

        let extra = self
            .fields
            .iter()
            .filter_map(|name| {
                let value = headers.get(name)?.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        (parent, extra)
    }

    /// Writes the trace context and extra fields into outbound headers.
    pub fn inject(&self, context: &SpanContext, extra: &ExtraFields, headers: &mut HeaderMap) {
        let cx = Context::new().with_remote_span_context(context.clone());
        self.propagator
            .inject_context(&cx, &mut HeaderInjector(&mut *headers));

        let mut injector = HeaderInjector(headers);
        for (name, value) in extra.iter() {
            if self.fields.iter().any(|field| field.as_str() == name) {
                injector.set(name, value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};
    use pretty_assertions::assert_eq;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn extracts_remote_parent() {
        let carrier = Carrier::default();
        let (parent, extra) = carrier.extract(&headers(&[("traceparent", TRACEPARENT)]));

        let parent = parent.unwrap();
        assert_eq!(
            parent.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
        assert_eq!(parent.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
        assert!(parent.is_remote());
        assert!(extra.is_empty());
    }

    #[test]
    fn malformed_traceparent_is_absent() {
        let carrier = Carrier::default();
        let (parent, _) = carrier.extract(&headers(&[("traceparent", "00-nope-nope-01")]));
        assert!(parent.is_none());

        let (parent, _) = carrier.extract(&HeaderMap::new());
        assert!(parent.is_none());
    }

    #[test]
    fn only_whitelisted_fields_are_read() {
        let carrier = Carrier::new(["X-Vcap-Request-Id"]).unwrap();
        let (_, extra) = carrier.extract(&headers(&[
            ("x-vcap-request-id", "abc"),
            ("x-other", "nope"),
        ]));

        assert_eq!(extra.len(), 1);
        assert_eq!(extra.get("x-vcap-request-id"), Some("abc"));
        assert_eq!(extra.get("X-VCAP-REQUEST-ID"), Some("abc"));
        assert_eq!(extra.get("x-other"), None);
    }

    #[test]
    fn rejects_bad_and_reserved_field_names() {
        assert!(matches!(
            Carrier::new(["bad name"]),
            Err(TracingError::InvalidFieldName { .. })
        ));
        assert!(matches!(
            Carrier::new(["traceparent"]),
            Err(TracingError::ReservedFieldName(_))
        ));
    }

    #[test]
    fn inject_writes_traceparent_and_fields() {
        let carrier = Carrier::new(["user-id"]).unwrap();
        let context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        let extra: ExtraFields = [("user-id".to_string(), "42".to_string())]
            .into_iter()
            .collect();

        let mut out = HeaderMap::new();
        carrier.inject(&context, &extra, &mut out);

        assert_eq!(out.get("traceparent").unwrap(), TRACEPARENT);
        assert_eq!(out.get("user-id").unwrap(), "42");
    }
}
