use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState, TracerProvider as _,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;

use super::{TableCarrier, TableExtractor, extract_context, inject_context};
use crate::broker::{FieldTable, FieldValue};

fn remote_context() -> Context {
    let span_context = SpanContext::new(
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
        SpanId::from_hex("00f067aa0ba902b7").unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Context::new().with_remote_span_context(span_context)
}

#[test]
fn test_carrier_get_set_keys() {
    let mut table = FieldTable::new();
    table.insert("retries".to_string(), FieldValue::Int(3));

    let mut carrier = TableCarrier::new(&mut table);
    carrier.set("traceparent", "abc".to_string());
    carrier.set("traceparent", "def".to_string());

    assert_eq!(carrier.get("traceparent"), "def");
    assert_eq!(carrier.get("retries"), "3");
    assert_eq!(carrier.get("missing"), "");

    let mut keys = carrier.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["retries", "traceparent"]);

    assert_eq!(table.get("traceparent"), Some(&FieldValue::from("def")));
}

#[test]
fn test_carrier_as_injector_mutates_caller_table() {
    let mut table = FieldTable::new();
    Injector::set(&mut TableCarrier::new(&mut table), "k", "v".to_string());
    assert_eq!(table.len(), 1);
}

#[test]
fn test_extractor_stringifies_non_string_values() {
    let mut table = FieldTable::new();
    table.insert("flag".to_string(), FieldValue::Bool(false));
    table.insert("name".to_string(), FieldValue::from("orders"));

    let extractor = TableExtractor::new(&table);
    assert_eq!(extractor.get("flag"), Some("false"));
    assert_eq!(extractor.get("name"), Some("orders"));
    assert_eq!(extractor.get("absent"), None);
    assert_eq!(extractor.keys().len(), 2);
}

#[test]
fn test_trace_context_round_trip_through_copied_headers() {
    let propagator = TraceContextPropagator::new();
    let cx = remote_context();

    let mut headers = FieldTable::new();
    propagator.inject_context(&cx, &mut TableCarrier::new(&mut headers));
    assert!(headers.contains_key("traceparent"));

    let copy = headers.clone();
    let extracted = propagator.extract(&TableExtractor::new(&copy));

    assert_eq!(
        extracted.span().span_context().trace_id(),
        cx.span().span_context().trace_id()
    );
    assert!(extracted.span().span_context().is_remote());
}

#[test]
fn test_global_helpers_use_installed_propagator() {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let cx = remote_context();

    let mut headers = FieldTable::new();
    inject_context(&cx, &mut headers);
    let extracted = extract_context(&headers);

    assert_eq!(
        extracted.span().span_context().trace_id(),
        cx.span().span_context().trace_id()
    );
}

#[test]
fn test_tracing_span_context_is_injectable() {
    let provider = SdkTracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
    let propagator = TraceContextPropagator::new();

    tracing::subscriber::with_default(subscriber, || {
        let span = tracing::info_span!("publish");
        let cx = span.context();
        let trace_id = cx.span().span_context().trace_id();
        assert_ne!(trace_id, TraceId::INVALID);

        let mut headers = FieldTable::new();
        propagator.inject_context(&cx, &mut TableCarrier::new(&mut headers));
        let extracted = propagator.extract(&TableExtractor::new(&headers));
        assert_eq!(extracted.span().span_context().trace_id(), trace_id);
    });
}
